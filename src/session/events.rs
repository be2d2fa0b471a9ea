// src/session/events.rs
// Bounded FIFO logs for change events and agent messages, plus the read
// paths (sync/messages). Evicted entries land in the session archive so the
// summarizer still sees them at close.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

use super::{AgentMessage, ChangeEvent, MessageKind, SessionState};

/// Append-only sequence capped at N live entries, oldest evicted first.
/// Evictions are handed to the archive before leaving live memory.
#[derive(Debug)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    archive: Vec<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            archive: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.archive.push(evicted);
            }
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Live entries, newest first (the read-path ordering).
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().rev()
    }

    pub fn archived(&self) -> &[T] {
        &self.archive
    }

    /// Archived then live entries, oldest first: the summarizer's view.
    pub fn full_history(&self) -> Vec<T> {
        let mut all = self.archive.clone();
        all.extend(self.entries.iter().cloned());
        all
    }
}

impl SessionState {
    /// Append a change event to the session's bounded log.
    pub fn append_change(
        &mut self,
        agent_id: &str,
        paths: Vec<String>,
        summary: String,
        structural: bool,
    ) -> ChangeEvent {
        let event = ChangeEvent {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            paths,
            summary,
            structural,
            timestamp: Utc::now(),
        };
        self.changes.push(event.clone());
        event
    }

    /// Append a message (directed or broadcast) to the session's message log.
    pub fn append_message(
        &mut self,
        from: &str,
        to: Option<String>,
        kind: MessageKind,
        body: String,
    ) -> AgentMessage {
        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to,
            kind,
            body,
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        message
    }

    /// Changes authored by *other* agents within the window, newest first.
    /// An agent never needs its own echo.
    pub fn sync_changes(
        &self,
        agent_id: &str,
        since_minutes: i64,
        now: DateTime<Utc>,
    ) -> Vec<ChangeEvent> {
        // The window is caller-supplied; a huge look-back means "everything",
        // not overflow.
        let window = Duration::try_minutes(since_minutes.max(0)).unwrap_or(Duration::MAX);
        let cutoff = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.changes
            .iter_newest_first()
            .filter(|e| e.agent_id != agent_id && e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Messages addressed to the caller or broadcast, excluding the caller's
    /// own sends, newest first, capped at `limit`.
    pub fn messages_for(&self, agent_id: &str, limit: usize) -> Vec<AgentMessage> {
        self.messages
            .iter_newest_first()
            .filter(|m| {
                m.from != agent_id
                    && match &m.to {
                        Some(target) => target == agent_id,
                        None => true,
                    }
            })
            .take(limit)
            .cloned()
            .collect()
    }
}
