//! Progressive reveal of completed assistant replies.
//!
//! Each model message gets a revealed length measured in chars. Replies created inside
//! the recency window are typed out by a per-message task on a fixed tick; anything
//! older (restored history) snaps to its full length on first observation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RevealSettings;
use crate::session::{Message, Role};
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConfig {
    pub recency_window: Duration,
    pub tick: Duration,
    pub chunk_size: usize,
}

impl Default for RevealConfig {
    fn default() -> Self {
        RevealConfig {
            recency_window: Duration::from_secs(10),
            tick: Duration::from_millis(15),
            chunk_size: 3,
        }
    }
}

impl From<&RevealSettings> for RevealConfig {
    fn from(settings: &RevealSettings) -> Self {
        RevealConfig {
            recency_window: Duration::from_millis(settings.recency_window_ms),
            tick: Duration::from_millis(settings.tick_ms.max(1)),
            chunk_size: settings.chunk_size.max(1),
        }
    }
}

/// What the presentation layer should draw for a message right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visible {
    Busy,
    Text { text: String, typing: bool },
}

#[derive(Debug)]
struct RevealState {
    content: String,
    total: usize,
    revealed: usize,
    generation: u64,
    cancel_token: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct RevealEngine {
    config: RevealConfig,
    states: Arc<DashMap<String, RevealState>>,
    generations: AtomicU64,
}

impl RevealEngine {
    pub fn new(config: RevealConfig) -> Self {
        RevealEngine {
            config,
            states: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, message: &Message) {
        self.observe_at(message, Utc::now());
    }

    /// Starts tracking a completed model message, or restarts it if its content changed.
    ///
    /// Must run inside a tokio runtime when the message is recent enough to animate.
    pub fn observe_at(&self, message: &Message, now: DateTime<Utc>) {
        if message.role != Role::Model || message.is_loading {
            return;
        }

        let unchanged = self
            .states
            .get(&message.id)
            .map(|state| state.content == message.content)
            .unwrap_or(false);
        if unchanged {
            return;
        }

        self.cancel(&message.id);

        let total = message.content.chars().count();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let age = (now - message.timestamp).to_std().unwrap_or(Duration::ZERO);

        if total == 0 || age >= self.config.recency_window {
            log::trace!("Reveal snap for message {} ({} chars)", message.id, total);
            self.states.insert(
                message.id.clone(),
                RevealState {
                    content: message.content.clone(),
                    total,
                    revealed: total,
                    generation,
                    cancel_token: None,
                },
            );
            return;
        }

        log::debug!("Reveal typing for message {} ({} chars)", message.id, total);
        let cancel_token = CancellationToken::new();
        self.states.insert(
            message.id.clone(),
            RevealState {
                content: message.content.clone(),
                total,
                revealed: 0,
                generation,
                cancel_token: Some(cancel_token.clone()),
            },
        );
        tokio::spawn(drive_reveal(
            Arc::clone(&self.states),
            message.id.clone(),
            generation,
            cancel_token,
            self.config.tick,
            self.config.chunk_size,
        ));
    }

    pub fn visible(&self, message: &Message) -> Visible {
        if message.is_loading {
            return Visible::Busy;
        }
        if message.role != Role::Model {
            return Visible::Text { text: message.content.clone(), typing: false };
        }
        match self.states.get(&message.id) {
            Some(state) if state.content == message.content => {
                let text: String = message.content.chars().take(state.revealed).collect();
                Visible::Text { text, typing: state.revealed < state.total }
            }
            _ => Visible::Text { text: message.content.clone(), typing: false },
        }
    }

    #[cfg(test)]
    pub fn revealed_len(&self, id: &str) -> Option<usize> {
        self.states.get(id).map(|state| state.revealed)
    }

    #[cfg(test)]
    pub fn is_typing(&self, id: &str) -> bool {
        self.states.get(id).map(|state| state.revealed < state.total).unwrap_or(false)
    }

    #[cfg(test)]
    pub fn is_tracking(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    /// Number of reveal tasks still running.
    pub fn active_timers(&self) -> usize {
        self.states.iter().filter(|state| state.cancel_token.is_some()).count()
    }

    pub fn cancel(&self, id: &str) {
        if let Some((_, state)) = self.states.remove(id) {
            if let Some(token) = state.cancel_token {
                log::trace!("Cancelling reveal for message {}", id);
                token.cancel();
            }
        }
    }

    /// Drops state for messages no longer in `timeline` and observes the rest.
    pub fn sync(&self, timeline: &Timeline) {
        let live: HashSet<&str> = timeline.messages().iter().map(|m| m.id.as_str()).collect();
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|entry| !live.contains(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.cancel(&id);
        }
        for message in timeline.messages() {
            self.observe(message);
        }
    }

    pub fn clear(&self) {
        let ids: Vec<String> = self.states.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.cancel(&id);
        }
    }
}

impl Drop for RevealEngine {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn drive_reveal(
    states: Arc<DashMap<String, RevealState>>,
    id: String,
    generation: u64,
    cancel_token: CancellationToken,
    tick: Duration,
    chunk_size: usize,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::trace!("Reveal for message {} cancelled", id);
                return;
            }
            _ = ticker.tick() => {
                let finished = match states.get_mut(&id) {
                    Some(mut state) if state.generation == generation => {
                        state.revealed = (state.revealed + chunk_size).min(state.total);
                        if state.revealed >= state.total {
                            state.cancel_token = None;
                            true
                        } else {
                            false
                        }
                    }
                    // Replaced or removed without our token being cancelled.
                    _ => true,
                };
                if finished {
                    log::trace!("Reveal for message {} finished", id);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn engine() -> RevealEngine {
        RevealEngine::new(RevealConfig::default())
    }

    fn tick() -> Duration {
        RevealConfig::default().tick
    }

    #[tokio::test]
    async fn old_messages_snap_to_full_length() {
        let engine = engine();
        let message = Message::model("历史回复内容").with_timestamp(Utc::now() - ChronoDuration::hours(2));

        engine.observe(&message);

        assert_eq!(engine.revealed_len(&message.id), Some(6));
        assert!(!engine.is_typing(&message.id));
        assert_eq!(engine.active_timers(), 0);
        assert_eq!(
            engine.visible(&message),
            Visible::Text { text: "历史回复内容".to_string(), typing: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recent_messages_grow_by_chunks_until_full() {
        let engine = engine();
        let content = "abcdefghijklmnopqrstuvwxyz0123";
        let message = Message::model(content);

        engine.observe(&message);
        assert_eq!(engine.revealed_len(&message.id), Some(0));
        assert_eq!(engine.active_timers(), 1);

        // Sample just after each tick rather than on it.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut previous = 0;
        let mut steps = 0;
        while engine.is_typing(&message.id) {
            tokio::time::sleep(tick()).await;
            let now = engine.revealed_len(&message.id).unwrap();
            assert!(now >= previous, "reveal went backwards: {previous} -> {now}");
            assert!(now - previous <= 3);
            previous = now;
            steps += 1;
            assert!(steps <= 20, "reveal did not terminate");
        }

        assert_eq!(previous, content.len());
        assert_eq!(engine.active_timers(), 0);
        assert_eq!(
            engine.visible(&message),
            Visible::Text { text: content.to_string(), typing: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn partial_text_is_a_char_prefix_with_cursor() {
        let engine = engine();
        let message = Message::model("关于专利申请：发明专利保护期限20年");

        engine.observe(&message);
        tokio::time::sleep(tick() * 2 + Duration::from_millis(1)).await;

        match engine.visible(&message) {
            Visible::Text { text, typing } => {
                assert!(typing);
                assert_eq!(text, "关于专利申请");
            }
            Visible::Busy => panic!("resolved message rendered as busy"),
        }
    }

    #[tokio::test]
    async fn loading_and_user_messages_are_not_revealed() {
        let engine = engine();
        let pending = Message::pending_assistant();
        let user = Message::user("如何申请专利?");

        engine.observe(&pending);
        engine.observe(&user);

        assert_eq!(engine.visible(&pending), Visible::Busy);
        assert_eq!(
            engine.visible(&user),
            Visible::Text { text: "如何申请专利?".to_string(), typing: false }
        );
        assert!(!engine.is_tracking(&pending.id));
        assert!(!engine.is_tracking(&user.id));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_observation_does_not_restart() {
        let engine = engine();
        let message = Message::model("x".repeat(30));

        engine.observe(&message);
        tokio::time::sleep(tick() * 3 + Duration::from_millis(1)).await;
        let before = engine.revealed_len(&message.id).unwrap();
        engine.observe(&message);

        assert_eq!(engine.revealed_len(&message.id), Some(before));
        assert_eq!(engine.active_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_content_restarts_reveal() {
        let engine = engine();
        let mut message = Message::model("y".repeat(30));

        engine.observe(&message);
        tokio::time::sleep(tick() * 4 + Duration::from_millis(1)).await;
        assert!(engine.revealed_len(&message.id).unwrap() > 0);

        message.content = "z".repeat(9);
        engine.observe(&message);
        assert_eq!(engine.revealed_len(&message.id), Some(0));
        assert_eq!(engine.active_timers(), 1);

        tokio::time::sleep(tick() * 10).await;
        assert_eq!(engine.revealed_len(&message.id), Some(9));
        assert_eq!(engine.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_cancels_timers_for_departed_messages() {
        let engine = engine();
        let first = Timeline::from_messages(vec![Message::model("a".repeat(60)), Message::model("b".repeat(60))]);
        engine.sync(&first);
        assert_eq!(engine.active_timers(), 2);

        let second = Timeline::from_messages(vec![
            Message::model("restored").with_timestamp(Utc::now() - ChronoDuration::days(1)),
        ]);
        engine.sync(&second);

        for message in first.messages() {
            assert!(!engine.is_tracking(&message.id));
        }
        assert_eq!(engine.active_timers(), 0);
        tokio::time::sleep(tick() * 50).await;
        for message in first.messages() {
            assert_eq!(engine.revealed_len(&message.id), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_everything() {
        let engine = engine();
        let message = Message::model("c".repeat(90));
        engine.observe(&message);

        engine.clear();

        assert_eq!(engine.active_timers(), 0);
        tokio::time::sleep(tick() * 10).await;
        assert!(!engine.is_tracking(&message.id));
    }

    #[test]
    fn settings_are_clamped() {
        let settings = RevealSettings { recency_window_ms: 500, tick_ms: 0, chunk_size: 0 };
        let config = RevealConfig::from(&settings);
        assert_eq!(config.tick, Duration::from_millis(1));
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.recency_window, Duration::from_millis(500));
    }
}
