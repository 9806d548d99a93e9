//! Per-session conversation memory.
//!
//! Sessions live only in process memory and are lost on restart. Each one
//! holds a bounded history and a bounded list of facts the user volunteered
//! about themselves. Idle sessions and the facts of idle users are evicted
//! lazily.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

use crate::chatbot::message::Turn;

/// Phrases that mark a message as a stated preference.
pub const PREFERENCE_KEYWORDS: &[&str] = &["like", "love", "hate", "prefer", "enjoy", "fan of"];

/// Longest assistant reply kept in history, in characters.
pub const MAX_STORED_REPLY_CHARS: usize = 4096;

/// Whether history is kept per user or shared by everyone talking to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    #[default]
    PerUser,
    /// One room-wide history for everyone.
    Shared,
}

/// Limits for the session registry.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub scope: MemoryScope,
    pub max_turns: usize,
    pub max_facts: usize,
    pub session_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            scope: MemoryScope::PerUser,
            max_turns: 40,
            max_facts: 20,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

/// Key of a session in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    User(i64),
    Shared,
}

#[derive(Debug)]
struct Session {
    history: VecDeque<Turn>,
    last_active: Instant,
}

impl Session {
    fn new() -> Self {
        Self { history: VecDeque::new(), last_active: Instant::now() }
    }
}

#[derive(Debug)]
struct UserFacts {
    items: VecDeque<String>,
    last_active: Instant,
}

/// Returns true if `text` looks like the user telling us what they like.
pub fn is_preference(text: &str) -> bool {
    let lower = text.to_lowercase();
    PREFERENCE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Owns every session plus the per-user fact lists.
pub struct SessionRegistry {
    config: MemoryConfig,
    sessions: HashMap<SessionKey, Session>,
    /// Facts are always per user, regardless of history scope.
    facts: HashMap<i64, UserFacts>,
}

impl SessionRegistry {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            facts: HashMap::new(),
        }
    }

    /// Session key for a user under the configured scope.
    pub fn key_for(&self, user_id: i64) -> SessionKey {
        match self.config.scope {
            MemoryScope::PerUser => SessionKey::User(user_id),
            MemoryScope::Shared => SessionKey::Shared,
        }
    }

    /// History for a user's session, oldest first.
    pub fn history(&self, user_id: i64) -> Vec<Turn> {
        self.sessions
            .get(&self.key_for(user_id))
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a completed exchange. Assistant text is capped at
    /// [`MAX_STORED_REPLY_CHARS`].
    pub fn commit_exchange(&mut self, user_id: i64, user_text: &str, reply: &str) {
        let key = self.key_for(user_id);
        let max_turns = self.config.max_turns;
        let session = self.sessions.entry(key).or_insert_with(Session::new);

        session.history.push_back(Turn::user(user_text));
        let stored: String = reply.chars().take(MAX_STORED_REPLY_CHARS).collect();
        session.history.push_back(Turn::assistant(stored));
        session.last_active = Instant::now();

        while session.history.len() > max_turns {
            session.history.pop_front();
        }

        if let Some(facts) = self.facts.get_mut(&user_id) {
            facts.last_active = Instant::now();
        }
    }

    /// Store the message as a fact if it states a preference.
    /// Returns whether anything was stored.
    pub fn remember_preference(&mut self, user_id: i64, text: &str) -> bool {
        if !is_preference(text) {
            return false;
        }
        let facts = self.facts.entry(user_id).or_insert_with(|| UserFacts {
            items: VecDeque::new(),
            last_active: Instant::now(),
        });
        facts.items.push_back(text.to_string());
        facts.last_active = Instant::now();
        while facts.items.len() > self.config.max_facts {
            facts.items.pop_front();
        }
        info!("🧠 Stored preference for user {}", user_id);
        true
    }

    /// All stored facts for a user, oldest first.
    pub fn facts(&self, user_id: i64) -> Vec<String> {
        self.facts
            .get(&user_id)
            .map(|f| f.items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop sessions, and the facts of users, idle for longer than the TTL.
    /// Returns how many sessions were removed.
    pub fn evict_idle(&mut self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&mut self, now: Instant) -> usize {
        let ttl = self.config.session_ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| now.saturating_duration_since(s.last_active) <= ttl);
        let removed = before - self.sessions.len();

        let facts_before = self.facts.len();
        self.facts
            .retain(|_, f| now.saturating_duration_since(f.last_active) <= ttl);
        let facts_removed = facts_before - self.facts.len();

        if removed > 0 || facts_removed > 0 {
            debug!("Evicted {} idle session(s), facts of {} user(s)", removed, facts_removed);
        }
        removed
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Tracks which users have a turn in progress.
#[derive(Clone, Default)]
pub struct InFlight {
    users: Arc<Mutex<HashSet<i64>>>,
}

/// Held for the duration of one turn. Releases the user on drop.
pub struct InFlightGuard {
    users: Arc<Mutex<HashSet<i64>>>,
    user_id: i64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user_id` busy. None if they already have a turn running.
    pub fn try_acquire(&self, user_id: i64) -> Option<InFlightGuard> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if !users.insert(user_id) {
            return None;
        }
        Some(InFlightGuard { users: self.users.clone(), user_id })
    }

    pub fn is_busy(&self, user_id: i64) -> bool {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&user_id)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.remove(&self.user_id);
    }
}
