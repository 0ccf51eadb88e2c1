// src/llm/mock.rs
use std::time::Duration;

use async_trait::async_trait;

use super::{Answer, AnswerError, AnswerService};
use crate::session::{Citation, Message};

const TRADEMARK_ANSWER: &str = "【模拟本地模型回复】关于商标注册问题：

根据《中华人民共和国商标法》相关规定，申请注册商标应当具备显著特征，便于识别，并不得与他人在先取得的合法权利相冲突。

建议流程：
1. **商标查询**：在申请前进行近似查询，降低被驳回风险。
2. **提交申请**：向国家知识产权局商标局提交申请书及相关材料。
3. **形式审查与实质审查**：通常需要9个月左右的时间。
4. **公告与核准**：初审公告期为3个月，无异议后核准注册。

请注意，这只是模拟的法律建议，实际操作请咨询专业律师。";

const PATENT_ANSWER: &str = "【模拟本地模型回复】关于专利申请：

在中国，专利分为发明专利、实用新型专利和外观设计专利三种。

- **发明专利**：保护期限20年，要求具有突出的实质性特点和显著进步。
- **实用新型**：保护期限10年，主要针对产品的形状、构造提出的适于实用的新技术方案。
- **外观设计**：保护期限15年，针对产品的外观设计。

申请专利需要向国家知识产权局提交说明书、权利要求书等文件。";

const COPYRIGHT_ANSWER: &str = "【模拟本地模型回复】关于著作权（版权）：

著作权自作品创作完成之日起自动产生，但进行著作权登记可以作为权利归属的初步证明，在维权时非常有帮助。

中国版权保护中心负责软件著作权和其他作品著作权的登记工作。一般登记流程包括：填表、提交材料、受理、审查、发证。

软件著作权通常需要提供源代码的前后各30页以及用户手册。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    Trademark,
    Patent,
    Copyright,
    General,
}

impl Topic {
    fn detect(utterance: &str) -> Self {
        let lower = utterance.to_lowercase();
        let mentions = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));
        if mentions(&["商标", "trademark"]) {
            Topic::Trademark
        } else if mentions(&["专利", "patent"]) {
            Topic::Patent
        } else if mentions(&["著作权", "版权", "copyright"]) {
            Topic::Copyright
        } else {
            Topic::General
        }
    }
}

/// Canned IP-law answers picked by keyword, for running without a model backend.
#[derive(Debug, Clone, Default)]
pub struct MockLegalAnswerService {
    delay: Duration,
}

impl MockLegalAnswerService {
    pub fn new(delay: Duration) -> Self {
        MockLegalAnswerService { delay }
    }

    fn compose(utterance: &str) -> Answer {
        match Topic::detect(utterance) {
            Topic::Trademark => Answer {
                text: TRADEMARK_ANSWER.to_string(),
                citations: vec![
                    Citation::new(
                        "中华人民共和国商标法 - 中国人大网",
                        "http://www.npc.gov.cn/npc/c30834/201905/75ef71816f584e0c83a5477215444655.shtml",
                    ),
                    Citation::new("商标注册申请指南 - 国家知识产权局", "https://www.cnipa.gov.cn/"),
                ],
            },
            Topic::Patent => Answer {
                text: PATENT_ANSWER.to_string(),
                citations: vec![Citation::new(
                    "中华人民共和国专利法 (2020修正)",
                    "https://www.cnipa.gov.cn/art/2020/11/23/art_98_155167.html",
                )],
            },
            Topic::Copyright => Answer {
                text: COPYRIGHT_ANSWER.to_string(),
                citations: vec![Citation::new("中国版权保护中心 - 著作权登记", "https://www.ccopyright.com.cn/")],
            },
            Topic::General => Answer {
                text: format!(
                    "【模拟本地模型回复】收到您的问题：\"{}\"。\n\n这是一个模拟的回复，用于测试前端与本地模型的连接。\n\n在实际接入本地模型后，这里将显示经过微调的法律大模型生成的专业回答。目前系统运行正常，您可以继续测试其他界面交互功能。\n\n(Mock Data Generated)",
                    utterance
                ),
                citations: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl AnswerService for MockLegalAnswerService {
    async fn answer(&self, history: &[Message], utterance: &str) -> Result<Answer, AnswerError> {
        log::debug!("Mock answer for {:?} with {} context messages", utterance, history.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::compose(utterance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_pick_topics() {
        assert_eq!(Topic::detect("如何申请专利?"), Topic::Patent);
        assert_eq!(Topic::detect("Is my TRADEMARK safe?"), Topic::Trademark);
        assert_eq!(Topic::detect("版权登记"), Topic::Copyright);
        assert_eq!(Topic::detect("商标和专利"), Topic::Trademark);
        assert_eq!(Topic::detect("你好"), Topic::General);
    }

    #[tokio::test]
    async fn patent_question_gets_patent_citation() {
        let service = MockLegalAnswerService::default();
        let answer = service.answer(&[], "如何申请专利?").await.unwrap();
        assert!(answer.text.contains("发明专利"));
        assert_eq!(answer.citations.len(), 1);
        assert!(answer.citations[0].title.contains("专利法"));
    }

    #[tokio::test]
    async fn general_question_is_echoed_without_citations() {
        let service = MockLegalAnswerService::default();
        let answer = service.answer(&[], "公司股权怎么分配").await.unwrap();
        assert!(answer.text.contains("公司股权怎么分配"));
        assert!(answer.citations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_simulated() {
        let service = MockLegalAnswerService::new(Duration::from_millis(1500));
        let started = tokio::time::Instant::now();
        service.answer(&[], "trademark").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }
}
