// src/app.rs
use std::sync::Arc;

use crate::config::{Config, Theme};
use crate::flight::{InFlight, InFlightGuard};
use crate::llm::{Answer, AnswerError, AnswerService};
use crate::reveal::{RevealConfig, RevealEngine};
use crate::session::{self, ChatSessionSummary, Message, LOAD_FAILED_TEXT};
use crate::store::{SessionStore, StoreError};
use crate::timeline::Timeline;

/// Presentation state owned by the controller rather than kept in globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiState {
    pub theme: Theme,
    pub sidebar_open: bool,
    pub sidebar_collapsed: bool,
}

impl UiState {
    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
    }
}

/// A send that has updated the timeline and is waiting on the answer service.
pub struct PendingSend {
    guard: InFlightGuard,
    epoch: u64,
    assistant_id: String,
    history: Vec<Message>,
    text: String,
    answers: Arc<dyn AnswerService>,
}

impl PendingSend {
    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    pub async fn run(self) -> CompletedSend {
        let outcome = self.answers.answer(&self.history, &self.text).await;
        CompletedSend {
            guard: self.guard,
            epoch: self.epoch,
            assistant_id: self.assistant_id,
            outcome,
        }
    }
}

pub struct CompletedSend {
    guard: InFlightGuard,
    epoch: u64,
    assistant_id: String,
    outcome: Result<Answer, AnswerError>,
}

pub struct PendingSelect {
    guard: InFlightGuard,
    epoch: u64,
    session_id: String,
    store: Arc<dyn SessionStore>,
}

impl PendingSelect {
    pub async fn run(self) -> CompletedSelect {
        let outcome = self.store.get_session_messages(&self.session_id).await;
        CompletedSelect {
            guard: self.guard,
            epoch: self.epoch,
            session_id: self.session_id,
            outcome,
        }
    }
}

pub struct CompletedSelect {
    guard: InFlightGuard,
    epoch: u64,
    session_id: String,
    outcome: Result<Vec<Message>, StoreError>,
}

pub struct PendingHistory {
    store: Arc<dyn SessionStore>,
}

impl PendingHistory {
    pub async fn run(self) -> CompletedHistory {
        CompletedHistory { outcome: self.store.list_sessions().await }
    }
}

pub struct CompletedHistory {
    outcome: Result<Vec<ChatSessionSummary>, StoreError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Resolved,
    Failed,
    /// The timeline was reset or replaced while the answer was in flight.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Loaded,
    Failed,
    Discarded,
}

/// Session controller: owns the active timeline and bridges it to the store and answer service.
pub struct App {
    pub config: Config,
    pub ui: UiState,
    timeline: Timeline,
    current_session_id: Option<String>,
    last_load_failed: bool,
    sessions: Vec<ChatSessionSummary>,
    // Bumped whenever the timeline is replaced wholesale; stale completions compare against it.
    epoch: u64,
    in_flight: InFlight,
    reveal: RevealEngine,
    answers: Arc<dyn AnswerService>,
    store: Arc<dyn SessionStore>,
}

impl App {
    pub fn new(config: Config, answers: Arc<dyn AnswerService>, store: Arc<dyn SessionStore>) -> Self {
        let reveal = RevealEngine::new(RevealConfig::from(&config.reveal));
        let ui = UiState { theme: config.ui.theme, sidebar_open: false, sidebar_collapsed: false };
        let app = App {
            config,
            ui,
            timeline: Timeline::new(Message::welcome()),
            current_session_id: None,
            last_load_failed: false,
            sessions: Vec::new(),
            epoch: 0,
            in_flight: InFlight::new(),
            reveal,
            answers,
            store,
        };
        app.reveal.sync(&app.timeline);
        app
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn reveal(&self) -> &RevealEngine {
        &self.reveal
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn sessions(&self) -> &[ChatSessionSummary] {
        &self.sessions
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_held()
    }

    /// True while something on screen changes without input: a pending reply or a reply being typed.
    pub fn is_animating(&self) -> bool {
        self.is_busy() || self.reveal.active_timers() > 0
    }

    pub fn begin_history_load(&self) -> PendingHistory {
        PendingHistory { store: Arc::clone(&self.store) }
    }

    /// A failed listing is logged and leaves the sidebar empty; chatting still works.
    pub fn finish_history_load(&mut self, completed: CompletedHistory) {
        match completed.outcome {
            Ok(mut sessions) => {
                session::sort_by_recent(&mut sessions);
                log::info!("Loaded {} history sessions", sessions.len());
                self.sessions = sessions;
            }
            Err(e) => {
                log::error!("Failed to load history: {}", e);
                self.sessions = Vec::new();
            }
        }
    }

    pub async fn load_initial_history(&mut self) {
        let completed = self.begin_history_load().run().await;
        self.finish_history_load(completed);
    }

    pub fn start_new_chat(&mut self) {
        log::info!("Starting a new chat");
        self.replace_timeline(|timeline| timeline.reset(Message::new_chat_welcome()));
        self.current_session_id = None;
        self.last_load_failed = false;
        self.ui.sidebar_open = false;
    }

    /// Returns `None` when the selection is a no-op: same session already loaded, or busy.
    pub fn begin_select(&mut self, session_id: &str) -> Option<PendingSelect> {
        if self.current_session_id.as_deref() == Some(session_id) && !self.last_load_failed {
            log::debug!("Session {} already active", session_id);
            return None;
        }
        let Some(guard) = self.in_flight.try_acquire() else {
            log::debug!("Ignoring selection of {} while busy", session_id);
            return None;
        };

        log::info!("Loading session {}", session_id);
        self.current_session_id = Some(session_id.to_string());
        Some(PendingSelect {
            guard,
            epoch: self.epoch,
            session_id: session_id.to_string(),
            store: Arc::clone(&self.store),
        })
    }

    pub fn finish_select(&mut self, completed: CompletedSelect) -> SelectOutcome {
        let CompletedSelect { guard, epoch, session_id, outcome } = completed;
        let result = if epoch != self.epoch {
            log::debug!("Discarding stale load of session {}", session_id);
            SelectOutcome::Discarded
        } else {
            match outcome {
                Ok(messages) => {
                    log::info!("Loaded {} messages for session {}", messages.len(), session_id);
                    self.replace_timeline(|timeline| timeline.replace_all(messages));
                    self.last_load_failed = false;
                    SelectOutcome::Loaded
                }
                Err(e) => {
                    log::error!("Failed to load session details for {}: {}", session_id, e);
                    self.replace_timeline(|timeline| timeline.reset(Message::error(LOAD_FAILED_TEXT)));
                    self.last_load_failed = true;
                    SelectOutcome::Failed
                }
            }
        };
        self.ui.sidebar_open = false;
        drop(guard);
        result
    }

    pub async fn select_session(&mut self, session_id: &str) -> Option<SelectOutcome> {
        let pending = self.begin_select(session_id)?;
        let completed = pending.run().await;
        Some(self.finish_select(completed))
    }

    /// Returns `None` for blank input or while another operation is in flight.
    pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let Some(guard) = self.in_flight.try_acquire() else {
            log::debug!("Ignoring send while busy");
            return None;
        };

        let history = self.timeline.messages().to_vec();
        let (_, pending) = match self.timeline.append_exchange(text) {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("Refusing send: {}", e);
                return None;
            }
        };
        log::info!("Sending question ({} prior messages), awaiting reply {}", history.len(), pending.id);

        Some(PendingSend {
            guard,
            epoch: self.epoch,
            assistant_id: pending.id,
            history,
            text: text.to_string(),
            answers: Arc::clone(&self.answers),
        })
    }

    pub fn finish_send(&mut self, completed: CompletedSend) -> SendOutcome {
        let CompletedSend { guard, epoch, assistant_id, outcome } = completed;
        let result = if epoch != self.epoch {
            log::debug!("Discarding stale reply {}", assistant_id);
            SendOutcome::Discarded
        } else {
            match outcome {
                Ok(answer) => {
                    if self.timeline.resolve_assistant(&assistant_id, answer.text, answer.citations) {
                        SendOutcome::Resolved
                    } else {
                        log::debug!("Reply {} no longer in timeline", assistant_id);
                        SendOutcome::Discarded
                    }
                }
                Err(e) => {
                    log::error!("Answer service failed for {}: {}", assistant_id, e);
                    let notice = format!("抱歉，暂时无法获取回答（{}）。请稍后重试。", e);
                    if self.timeline.fail_assistant(&assistant_id, notice) {
                        SendOutcome::Failed
                    } else {
                        SendOutcome::Discarded
                    }
                }
            }
        };
        if let Some(message) = self.timeline.get(&assistant_id) {
            self.reveal.observe(message);
        }
        drop(guard);
        result
    }

    pub async fn send(&mut self, text: &str) -> Option<SendOutcome> {
        let pending = self.begin_send(text)?;
        let completed = pending.run().await;
        Some(self.finish_send(completed))
    }

    fn replace_timeline(&mut self, update: impl FnOnce(&mut Timeline)) {
        self.reveal.clear();
        update(&mut self.timeline);
        self.epoch += 1;
        self.reveal.sync(&self.timeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::llm::MockLegalAnswerService;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn list_sessions(&self) -> Result<Vec<ChatSessionSummary>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn get_session_messages(&self, _session_id: &str) -> Result<Vec<Message>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    struct FailingAnswers;

    #[async_trait]
    impl AnswerService for FailingAnswers {
        async fn answer(&self, _history: &[Message], _utterance: &str) -> Result<Answer, AnswerError> {
            Err(AnswerError::Unavailable("backend down".into()))
        }
    }

    /// Records the context it was called with.
    #[derive(Default)]
    struct RecordingAnswers {
        seen: std::sync::Mutex<Vec<(usize, String)>>,
    }

    #[async_trait]
    impl AnswerService for RecordingAnswers {
        async fn answer(&self, history: &[Message], utterance: &str) -> Result<Answer, AnswerError> {
            self.seen.lock().unwrap().push((history.len(), utterance.to_string()));
            Ok(Answer { text: format!("re: {utterance}"), citations: Vec::new() })
        }
    }

    fn app_with(answers: Arc<dyn AnswerService>, store: Arc<dyn SessionStore>) -> App {
        App::new(Config::default(), answers, store)
    }

    fn demo_app() -> App {
        app_with(Arc::new(MockLegalAnswerService::default()), Arc::new(MemorySessionStore::demo()))
    }

    #[tokio::test]
    async fn starts_with_single_welcome_message() {
        let app = demo_app();
        assert_eq!(app.timeline().len(), 1);
        assert_eq!(app.timeline().messages()[0].role, Role::Model);
        assert!(app.current_session_id().is_none());
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn send_patent_question_on_empty_timeline() {
        let mut app = demo_app();
        app.timeline.replace_all(Vec::new());

        let outcome = app.send("  如何申请专利?  ").await;

        assert_eq!(outcome, Some(SendOutcome::Resolved));
        let messages = app.timeline().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "如何申请专利?");
        assert_eq!(messages[1].role, Role::Model);
        assert!(!messages[1].is_loading);
        assert!(!messages[1].content.is_empty());
        assert!(messages[1].citations().iter().any(|c| c.title.contains("专利法")));
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut app = demo_app();
        assert_eq!(app.send("   \n\t").await, None);
        assert_eq!(app.timeline().len(), 1);
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn second_send_while_awaiting_is_refused() {
        let mut app = demo_app();
        let pending = app.begin_send("商标").expect("first send");
        assert!(app.is_busy());
        assert_eq!(app.timeline().len(), 3);
        assert_eq!(app.timeline().pending().map(|m| m.id.clone()), Some(pending.assistant_id().to_string()));

        assert!(app.begin_send("专利").is_none());
        assert!(app.begin_select("session-1").is_none());
        assert_eq!(app.timeline().len(), 3);

        let completed = pending.run().await;
        assert_eq!(app.finish_send(completed), SendOutcome::Resolved);
        assert!(!app.is_busy());
        assert!(app.timeline().pending().is_none());
    }

    #[tokio::test]
    async fn answer_service_receives_prior_timeline() {
        let recorder = Arc::new(RecordingAnswers::default());
        let mut app = app_with(recorder.clone(), Arc::new(MemorySessionStore::demo()));

        app.send("first").await;
        app.send("second").await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(1, "first".to_string()), (3, "second".to_string())]);
    }

    #[tokio::test]
    async fn answer_failure_resolves_as_error_and_releases() {
        let mut app = app_with(Arc::new(FailingAnswers), Arc::new(MemorySessionStore::demo()));

        assert_eq!(app.send("商标").await, Some(SendOutcome::Failed));

        let last = app.timeline().messages().last().unwrap();
        assert!(last.is_error);
        assert!(!last.is_loading);
        assert!(last.content.contains("backend down"));
        assert!(!app.is_busy());
        assert_eq!(app.send("again").await, Some(SendOutcome::Failed));
    }

    #[tokio::test]
    async fn stale_reply_after_new_chat_is_discarded() {
        let mut app = demo_app();
        let pending = app.begin_send("专利").unwrap();

        app.start_new_chat();
        let after_reset = app.timeline().messages().to_vec();
        let completed = pending.run().await;

        assert_eq!(app.finish_send(completed), SendOutcome::Discarded);
        assert_eq!(app.timeline().messages(), after_reset.as_slice());
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn start_new_chat_always_yields_single_message() {
        let mut app = demo_app();
        app.select_session("session-2").await;
        app.send("商标").await;

        app.start_new_chat();

        assert_eq!(app.timeline().len(), 1);
        assert!(!app.timeline().messages()[0].is_loading);
        assert!(app.current_session_id().is_none());
    }

    #[tokio::test]
    async fn select_session_loads_store_messages_in_order() {
        let store = MemorySessionStore::demo();
        let expected = store.messages("session-2").to_vec();
        let mut app = app_with(Arc::new(MockLegalAnswerService::default()), Arc::new(store));

        assert_eq!(app.select_session("session-2").await, Some(SelectOutcome::Loaded));

        assert_eq!(app.timeline().messages(), expected.as_slice());
        assert_eq!(app.current_session_id(), Some("session-2"));
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn reselecting_current_session_is_a_no_op() {
        let mut app = demo_app();
        app.select_session("session-1").await;
        assert_eq!(app.select_session("session-1").await, None);
    }

    #[tokio::test]
    async fn unknown_session_yields_empty_timeline() {
        let mut app = demo_app();
        assert_eq!(app.select_session("unknown-id").await, Some(SelectOutcome::Loaded));
        assert!(app.timeline().is_empty());
        assert_eq!(app.current_session_id(), Some("unknown-id"));
    }

    #[tokio::test]
    async fn store_failure_shows_error_message_and_allows_retry() {
        let mut app = app_with(Arc::new(MockLegalAnswerService::default()), Arc::new(FailingStore));

        assert_eq!(app.select_session("session-1").await, Some(SelectOutcome::Failed));
        assert_eq!(app.timeline().len(), 1);
        let notice = &app.timeline().messages()[0];
        assert!(notice.is_error);
        assert_eq!(notice.content, LOAD_FAILED_TEXT);
        assert_eq!(app.current_session_id(), Some("session-1"));
        assert!(!app.is_busy());

        assert_eq!(app.select_session("session-1").await, Some(SelectOutcome::Failed));
    }

    #[tokio::test]
    async fn history_failure_is_an_empty_list() {
        let mut app = app_with(Arc::new(MockLegalAnswerService::default()), Arc::new(FailingStore));
        app.load_initial_history().await;
        assert!(app.sessions().is_empty());
        assert_eq!(app.send("still usable").await, Some(SendOutcome::Resolved));
    }

    #[tokio::test]
    async fn history_is_sorted_most_recent_first() {
        let mut store = MemorySessionStore::demo();
        let mut newest = store.sessions()[2].clone();
        newest.id = "session-new".into();
        newest.updated_at = chrono::Utc::now();
        store.insert(newest, Vec::new());
        let mut app = app_with(Arc::new(MockLegalAnswerService::default()), Arc::new(store));

        app.load_initial_history().await;

        let ids: Vec<_> = app.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["session-new", "session-1", "session-2", "session-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_sessions_cancels_reveal_of_previous_timeline() {
        let mut app = demo_app();
        app.send("专利").await;
        let previous: Vec<String> = app.timeline().messages().iter().map(|m| m.id.clone()).collect();
        assert!(app.reveal().active_timers() > 0);

        app.select_session("session-3").await;

        assert_eq!(app.reveal().active_timers(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        for id in &previous {
            assert!(!app.reveal().is_tracking(id));
        }
        for message in app.timeline().messages() {
            assert!(!app.reveal().is_typing(&message.id));
        }
    }

    #[tokio::test]
    async fn select_in_flight_blocks_others_and_new_chat_discards_it() {
        let mut app = demo_app();
        let pending = app.begin_select("session-2").expect("first select");
        assert!(app.is_busy());
        assert_eq!(app.current_session_id(), Some("session-2"));

        assert!(app.begin_send("商标").is_none());
        assert!(app.begin_select("session-3").is_none());
        assert_eq!(app.current_session_id(), Some("session-2"));

        app.start_new_chat();
        let completed = pending.run().await;
        assert_eq!(app.finish_select(completed), SelectOutcome::Discarded);

        assert_eq!(app.timeline().len(), 1);
        assert_eq!(app.timeline().messages()[0].content, crate::session::NEW_CHAT_TEXT);
        assert_eq!(app.current_session_id(), None);
        assert!(!app.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_reply_is_typed_out() {
        let mut app = demo_app();
        app.send("版权").await;
        let reply = app.timeline().messages().last().unwrap().clone();

        assert!(app.reveal().is_typing(&reply.id));
        assert!(app.is_animating());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!app.reveal().is_typing(&reply.id));
        assert!(!app.is_animating());
        assert_eq!(app.reveal().revealed_len(&reply.id), Some(reply.content.chars().count()));
    }

    #[test]
    fn theme_toggle_is_explicit_state() {
        let mut ui = UiState { theme: Theme::Light, sidebar_open: true, sidebar_collapsed: false };
        ui.toggle_theme();
        assert_eq!(ui.theme, Theme::Dark);
    }
}
