use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

const TICKET_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Complete,
}

#[derive(Debug)]
struct TicketEntry {
    status: TicketStatus,
    created: Instant,
}

/// In-memory request tickets with TTL. Losing workers in a fan-out poll
/// these to learn the race is over and release their lease.
#[derive(Debug, Default)]
pub struct TicketStore {
    entries: DashMap<String, TicketEntry>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_pending(&self, request_id: &str) {
        self.entries.insert(
            request_id.to_string(),
            TicketEntry {
                status: TicketStatus::Pending,
                created: Instant::now(),
            },
        );
    }

    pub fn mark_complete(&self, request_id: &str) {
        self.entries.insert(
            request_id.to_string(),
            TicketEntry {
                status: TicketStatus::Complete,
                created: Instant::now(),
            },
        );
    }

    pub fn status(&self, request_id: &str) -> Option<TicketStatus> {
        let entry = self.entries.get(request_id)?;
        if entry.created.elapsed() > TICKET_TTL {
            drop(entry);
            self.entries.remove(request_id);
            return None;
        }
        Some(entry.status)
    }

    /// Drop tickets older than the TTL. Called by the scheduler.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created.elapsed() <= TICKET_TTL);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_then_complete() {
        let store = TicketStore::new();
        store.mark_pending("req-1");
        assert_eq!(store.status("req-1"), Some(TicketStatus::Pending));

        store.mark_complete("req-1");
        assert_eq!(store.status("req-1"), Some(TicketStatus::Complete));
    }

    #[test]
    fn unknown_ticket_is_none() {
        let store = TicketStore::new();
        assert_eq!(store.status("nope"), None);
    }
}
