//! Per-user conversation memory.
//!
//! A bounded, time-decaying ring of recent turns used as assistant context.
//! Deliberately volatile: losing it on restart degrades context, not
//! correctness. Business state lives in the form store, never here.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Maximum turns retained per user. Oldest are evicted first.
pub const MAX_TURNS: usize = 10;

/// A user's turns are purged wholesale once the most recent one is older
/// than this window.
const RETENTION_HOURS: i64 = 24;

/// Turn author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A turn as exposed to the assistant: role and text only. Timestamps are
/// internal bookkeeping for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTurn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug)]
struct Turn {
    role: Role,
    text: String,
    timestamp: DateTime<Utc>,
}

type TurnRing = Arc<Mutex<VecDeque<Turn>>>;

/// In-process conversation memory for all users.
///
/// The outer map lock is held only long enough to resolve a per-user handle,
/// never across a mutation, so concurrent traffic for unrelated users is not
/// serialized.
#[derive(Default)]
pub struct ConversationMemory {
    users: RwLock<HashMap<String, TurnRing>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn for a user, enforcing the sliding window.
    pub fn append(&self, user_id: &str, role: Role, text: &str) {
        self.append_at(user_id, role, text, Utc::now());
    }

    fn append_at(&self, user_id: &str, role: Role, text: &str, now: DateTime<Utc>) {
        let ring = self.ring(user_id);
        let mut turns = ring.lock().unwrap_or_else(PoisonError::into_inner);

        // Clamp so timestamps never decrease within a sequence, even if the
        // wall clock steps backwards.
        let timestamp = match turns.back() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        turns.push_back(Turn {
            role,
            text: text.to_string(),
            timestamp,
        });
        while turns.len() > MAX_TURNS {
            turns.pop_front();
        }
    }

    /// The user's turns in chronological order, timestamps stripped.
    pub fn context(&self, user_id: &str) -> Vec<ContextTurn> {
        let ring = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            match users.get(user_id) {
                Some(ring) => Arc::clone(ring),
                None => return Vec::new(),
            }
        };
        let turns = ring.lock().unwrap_or_else(PoisonError::into_inner);
        turns
            .iter()
            .map(|turn| ContextTurn {
                role: turn.role,
                text: turn.text.clone(),
            })
            .collect()
    }

    /// Drop every user whose last turn is older than the retention window.
    ///
    /// Called opportunistically on the hot path; precision on the order of
    /// one request's delay is acceptable. Never touches the form store.
    pub fn evict_stale(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(RETENTION_HOURS);

        let stale: Vec<String> = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            users
                .iter()
                .filter(|(_, ring)| {
                    let turns = ring.lock().unwrap_or_else(PoisonError::into_inner);
                    turns.back().is_none_or(|last| last.timestamp < cutoff)
                })
                .map(|(user_id, _)| user_id.clone())
                .collect()
        };

        if stale.is_empty() {
            return;
        }

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        for user_id in stale {
            // Re-check under the write lock; an append may have raced in.
            let still_stale = users.get(&user_id).is_some_and(|ring| {
                let turns = ring.lock().unwrap_or_else(PoisonError::into_inner);
                turns.back().is_none_or(|last| last.timestamp < cutoff)
            });
            if still_stale {
                users.remove(&user_id);
                tracing::debug!(user_id, "evicted stale conversation");
            }
        }
    }

    fn ring(&self, user_id: &str) -> TurnRing {
        {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(ring) = users.get(user_id) {
                return Arc::clone(ring);
            }
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(users.entry(user_id.to_string()).or_default())
    }
}
