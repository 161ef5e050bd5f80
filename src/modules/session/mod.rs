//! Browsing-session bookkeeping and rotation decisions.
//!
//! Each logical browsing identity carries usage and challenge counters. A
//! session is retired preemptively once it has done enough work, or
//! reactively once the target site starts challenging it. The cleanup sweep
//! snapshots ids before mutating so concurrent rotation checks never observe
//! a half-swept map.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Rotation thresholds.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Preemptive rotation: retire before the site has a reason to look.
    pub max_requests: u32,
    /// Reactive rotation: retire once challenges start appearing.
    pub max_challenges: u32,
    /// Sessions older than this are swept by `cleanup_old_sessions`.
    pub max_age: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_requests: 100,
            max_challenges: 2,
            max_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Counters for one logical browsing identity.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub challenge_count: u32,
    pub last_challenge_at: Option<DateTime<Utc>>,
    started: Instant,
}

impl SessionMetadata {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            challenge_count: 0,
            last_challenge_at: None,
            started: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Aggregate view across live sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionManagerStats {
    pub active_sessions: usize,
    pub total_requests: u64,
    pub total_challenges: u64,
    pub rotations: u64,
    pub swept: u64,
}

/// Tracks sessions and decides when each must be rotated.
#[derive(Debug, Default)]
pub struct SessionManager {
    policy: SessionPolicy,
    sessions: RwLock<HashMap<String, SessionMetadata>>,
    next_id: AtomicU64,
    rotations: AtomicU64,
    swept: AtomicU64,
}

impl SessionManager {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Register a fresh session and return its id.
    pub fn create_session(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("sess-{seq}-{}", Utc::now().timestamp_millis());
        let mut guard = self.write();
        guard.insert(id.clone(), SessionMetadata::new(id.clone()));
        id
    }

    /// True once the session should be retired, preemptively or reactively.
    pub fn should_rotate(&self, session_id: &str) -> bool {
        let guard = self.read();
        let Some(session) = guard.get(session_id) else {
            // Unknown id: already swept or never registered, rotate.
            return true;
        };
        let rotate = session.request_count >= self.policy.max_requests
            || session.challenge_count >= self.policy.max_challenges;
        if rotate {
            log::debug!(
                "session {} due for rotation (requests {}, challenges {})",
                session_id,
                session.request_count,
                session.challenge_count
            );
        }
        rotate
    }

    pub fn record_request(&self, session_id: &str) {
        self.update(session_id, |session| session.request_count += 1);
    }

    pub fn record_success(&self, session_id: &str) {
        self.update(session_id, |session| session.success_count += 1);
    }

    pub fn record_failure(&self, session_id: &str) {
        self.update(session_id, |session| session.failure_count += 1);
    }

    pub fn record_challenge(&self, session_id: &str) {
        self.update(session_id, |session| {
            session.challenge_count += 1;
            session.last_challenge_at = Some(Utc::now());
        });
    }

    /// Remove the session entirely (its browser context was retired).
    pub fn retire_session(&self, session_id: &str) {
        if self.write().remove(session_id).is_some() {
            self.rotations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Evict sessions older than `max_age`; returns how many were removed.
    ///
    /// Ids are snapshotted first so the write lock is only held for the
    /// removals themselves.
    pub fn cleanup_old_sessions(&self, max_age: Duration) -> usize {
        let stale: Vec<String> = {
            let guard = self.read();
            guard
                .values()
                .filter(|session| session.age() > max_age)
                .map(|session| session.id.clone())
                .collect()
        };

        if stale.is_empty() {
            return 0;
        }

        let mut guard = self.write();
        let mut removed = 0;
        for id in stale {
            if guard.remove(&id).is_some() {
                removed += 1;
            }
        }
        drop(guard);
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        log::debug!("swept {removed} stale sessions");
        removed
    }

    /// Sweep using the policy's configured age.
    pub fn cleanup(&self) -> usize {
        self.cleanup_old_sessions(self.policy.max_age)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionMetadata> {
        self.read().get(session_id).cloned()
    }

    pub fn stats(&self) -> SessionManagerStats {
        let guard = self.read();
        SessionManagerStats {
            active_sessions: guard.len(),
            total_requests: guard.values().map(|s| s.request_count as u64).sum(),
            total_challenges: guard.values().map(|s| s.challenge_count as u64).sum(),
            rotations: self.rotations.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.write().clear();
        self.rotations.store(0, Ordering::Relaxed);
        self.swept.store(0, Ordering::Relaxed);
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionMetadata)) {
        if let Some(session) = self.write().get_mut(session_id) {
            f(session);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionMetadata>> {
        self.sessions.read().expect("session lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionMetadata>> {
        self.sessions.write().expect("session lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_preemptively_on_request_count() {
        let manager = SessionManager::new(SessionPolicy::default());
        let id = manager.create_session();
        for _ in 0..99 {
            manager.record_request(&id);
        }
        assert!(!manager.should_rotate(&id));
        manager.record_request(&id);
        assert!(manager.should_rotate(&id));
    }

    #[test]
    fn rotates_reactively_on_challenges() {
        let manager = SessionManager::new(SessionPolicy::default());
        let id = manager.create_session();
        manager.record_challenge(&id);
        assert!(!manager.should_rotate(&id));
        manager.record_challenge(&id);
        assert!(manager.should_rotate(&id));
        assert!(manager.get(&id).unwrap().last_challenge_at.is_some());
    }

    #[test]
    fn unknown_session_rotates() {
        let manager = SessionManager::new(SessionPolicy::default());
        assert!(manager.should_rotate("sess-gone"));
    }

    #[test]
    fn sweep_removes_only_aged_sessions() {
        let manager = SessionManager::new(SessionPolicy::default());
        let id = manager.create_session();
        assert_eq!(manager.cleanup_old_sessions(Duration::from_secs(60)), 0);
        assert_eq!(manager.cleanup_old_sessions(Duration::ZERO), 1);
        assert!(manager.get(&id).is_none());
        assert_eq!(manager.stats().swept, 1);
    }

    #[test]
    fn retire_counts_rotations() {
        let manager = SessionManager::new(SessionPolicy::default());
        let id = manager.create_session();
        manager.retire_session(&id);
        manager.retire_session(&id);
        let stats = manager.stats();
        assert_eq!(stats.rotations, 1);
        assert_eq!(stats.active_sessions, 0);
    }
}
