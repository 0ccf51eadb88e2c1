// src/store/memory.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::{SessionStore, StoreError};
use crate::session::{ChatSessionSummary, Citation, Message, Role};

/// In-process store, seeded with demo conversations by `demo`.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Vec<ChatSessionSummary>,
    messages: HashMap<String, Vec<Message>>,
    delay: Duration,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated read latency applied to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn insert(&mut self, summary: ChatSessionSummary, messages: Vec<Message>) {
        self.messages.insert(summary.id.clone(), messages);
        self.sessions.retain(|s| s.id != summary.id);
        self.sessions.push(summary);
    }

    pub fn sessions(&self) -> &[ChatSessionSummary] {
        &self.sessions
    }

    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.messages.get(session_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn demo() -> Self {
        Self::demo_at(Utc::now())
    }

    pub fn demo_at(now: DateTime<Utc>) -> Self {
        let minutes_ago = |m: i64| now - ChronoDuration::minutes(m);
        let entry = |id: &str, role: Role, content: &str, at: DateTime<Utc>| Message {
            id: id.to_string(),
            ..Message::new(role, content).with_timestamp(at)
        };

        let mut store = MemorySessionStore::new();
        store.insert(
            ChatSessionSummary {
                id: "session-1".into(),
                title: "软件著作权申请流程".into(),
                updated_at: minutes_ago(120),
                preview: "请问软件著作权申请需要哪些材料？".into(),
            },
            vec![
                entry("s1-m1", Role::User, "请问软件著作权申请需要哪些材料？", minutes_ago(126)),
                entry(
                    "s1-m2",
                    Role::Model,
                    "申请软件著作权（软著）通常需要准备以下材料：\n\n1. **软件著作权登记申请表**：在线填写并打印签字盖章。\n2. **身份证明文件**：\n   - 个人：身份证复印件。\n   - 企业：营业执照副本复印件（需加盖公章）。\n3. **源代码**：\n   - 提供前后各连续30页，共60页。\n   - 不足60页的需全部提交。\n4. **说明文档**：\n   - 用户手册、操作说明书或设计说明书（任选一种），也是前后各30页。\n\n建议您访问中国版权保护中心官网查看最新要求。",
                    minutes_ago(120),
                )
                .with_citations(vec![Citation::new("中国版权保护中心 - 登记指南", "https://www.ccopyright.com.cn/")]),
            ],
        );
        store.insert(
            ChatSessionSummary {
                id: "session-2".into(),
                title: "商标侵权判定标准".into(),
                updated_at: minutes_ago(60 * 24),
                preview: "如何判断我的商标是否被侵权？".into(),
            },
            vec![
                entry(
                    "s2-m1",
                    Role::User,
                    "我收到了一封律师函，说我的Logo侵犯了他们的商标权，我该怎么判断是否真的侵权？",
                    minutes_ago(60 * 24 + 144),
                ),
                entry(
                    "s2-m2",
                    Role::Model,
                    "收到侵权警告需冷静应对。商标侵权的判定主要依据《商标法》第五十七条，核心标准是**“混淆可能性”**。\n\n主要考量因素包括：\n1. **商标近似度**：您的Logo与对方商标在文字、图形、读音、含义上是否相似。\n2. **商品/服务类别**：双方使用的商品或服务是否属于同一种或类似类别。\n3. **显著性与知名度**：对方商标的知名度越高，保护范围通常越宽。\n\n建议您：\n- 立即停止使用涉嫌侵权的标识（暂时的）。\n- 寻求专业知识产权律师进行比对分析。\n- 调查对方商标的权利状态（是否有效、是否连续使用）。",
                    minutes_ago(60 * 24),
                )
                .with_citations(vec![Citation::new("中华人民共和国商标法 - 第五十七条", "http://www.npc.gov.cn/")]),
            ],
        );
        store.insert(
            ChatSessionSummary {
                id: "session-3".into(),
                title: "专利年费缴纳规定".into(),
                updated_at: minutes_ago(60 * 24 * 3),
                preview: "专利年费如果不交会怎么样？".into(),
            },
            vec![
                entry(
                    "s3-m1",
                    Role::User,
                    "专利年费如果不交会怎么样？有宽限期吗？",
                    minutes_ago(60 * 24 * 3 + 432),
                ),
                entry(
                    "s3-m2",
                    Role::Model,
                    "如果不按时缴纳专利年费，可能会导致专利权终止。\n\n关于宽限期（滞纳期）：\n1. **6个月宽限期**：在应当缴纳年费期满之日起6个月内，可以补缴，但需要缴纳滞纳金。\n   - 超过规定期限1个月内，不收滞纳金。\n   - 超过1个月，滞纳金金额按月递增（通常为全额年费的5%~25%）。\n2. **终止**：如果期满6个月仍未缴纳，专利权将自应当缴纳年费期满之日起终止。\n\n如果是因不可抗力导致未缴纳，在收到终止通知书后2个月内可以申请恢复权利。",
                    minutes_ago(60 * 24 * 3),
                )
                .with_citations(vec![Citation::new("专利审查指南 - 年费缴纳", "https://www.cnipa.gov.cn/")]),
            ],
        );
        store
    }

    async fn simulate_latency(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn list_sessions(&self) -> Result<Vec<ChatSessionSummary>, StoreError> {
        self.simulate_latency().await;
        Ok(self.sessions.clone())
    }

    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        self.simulate_latency().await;
        log::debug!("Loading messages for session {}", session_id);
        Ok(self.messages(session_id).to_vec())
    }
}
