//! Repository seam between the ingestion core and the relational store.
//!
//! The core never issues queries directly; it talks to two narrow traits
//! covering exactly the operations it needs. `MemoryStore` backs tests and
//! ephemeral runs, `RedbStore` is the embedded default.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod redb_store;

pub use redb_store::RedbStore;

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure surfaced by a repository implementation.
///
/// History and flag writes are money-safety critical: callers must propagate
/// these instead of swallowing them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("record encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Stable identifier for a real-world team.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TeamId(pub u64);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team-{}", self.0)
    }
}

/// One row per real-world team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEntity {
    pub id: TeamId,
    pub canonical_name: String,
}

/// Source-specific spelling of a team name. Unique per (team, alias, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAlias {
    pub team_id: TeamId,
    pub alias: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only odds history row. The newest row doubles as the previous
/// snapshot for the next anomaly evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsRecord {
    pub event_id: String,
    pub home: f64,
    pub draw: Option<f64>,
    pub away: f64,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only score history row; written for every update, valid or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub event_id: String,
    pub home: Option<i32>,
    pub away: Option<i32>,
    pub period: Option<String>,
    pub minute: Option<i32>,
    pub source: String,
    pub valid: bool,
    pub scraped_at: DateTime<Utc>,
}

/// Severity-tagged review flag. Idempotent per (event, reason).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFlag {
    pub event_id: String,
    pub severity: String,
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
}

/// Team/alias operations used by the resolver.
pub trait TeamStore: Send + Sync {
    /// Exact alias lookup, case-insensitive, scoped to a source.
    fn alias_lookup(&self, alias: &str, source: &str) -> StoreResult<Option<TeamId>>;
    /// Case-insensitive lookup by canonical name.
    fn team_by_canonical(&self, canonical: &str) -> StoreResult<Option<TeamEntity>>;
    fn all_teams(&self) -> StoreResult<Vec<TeamEntity>>;
    fn insert_team(&self, canonical_name: &str) -> StoreResult<TeamEntity>;
    /// Idempotent upsert; the unique constraint lives here, not in caches.
    fn insert_alias(&self, team: TeamId, alias: &str, source: &str) -> StoreResult<()>;
    /// Reassign every alias of `from` to `to`; returns how many moved.
    fn reassign_aliases(&self, from: TeamId, to: TeamId) -> StoreResult<usize>;
}

/// Odds/score history and flag operations used by the validators.
pub trait EventDataStore: Send + Sync {
    fn latest_odds(&self, event_id: &str) -> StoreResult<Option<OddsRecord>>;
    fn append_odds(&self, record: &OddsRecord) -> StoreResult<()>;
    /// Most recent first, at most `limit` rows.
    fn score_history(&self, event_id: &str, limit: usize) -> StoreResult<Vec<ScoreRecord>>;
    fn append_score(&self, record: &ScoreRecord) -> StoreResult<()>;
    /// Idempotent per (event, reason): re-flagging overwrites the timestamp.
    fn flag_event(&self, flag: &EventFlag) -> StoreResult<()>;
    fn flags(&self, event_id: &str) -> StoreResult<Vec<EventFlag>>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_team_id: u64,
    teams: HashMap<u64, TeamEntity>,
    // (alias_lower, source) -> team id
    aliases: HashMap<(String, String), TeamAlias>,
    odds: HashMap<String, Vec<OddsRecord>>,
    scores: HashMap<String, Vec<ScoreRecord>>,
    // (event_id, reason) -> flag
    flags: HashMap<(String, String), EventFlag>,
}

/// In-memory store with the same semantics as the embedded backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

impl TeamStore for MemoryStore {
    fn alias_lookup(&self, alias: &str, source: &str) -> StoreResult<Option<TeamId>> {
        let guard = self.lock();
        Ok(guard
            .aliases
            .get(&(alias.to_lowercase(), source.to_string()))
            .map(|row| row.team_id))
    }

    fn team_by_canonical(&self, canonical: &str) -> StoreResult<Option<TeamEntity>> {
        let needle = canonical.to_lowercase();
        let guard = self.lock();
        Ok(guard
            .teams
            .values()
            .find(|team| team.canonical_name.to_lowercase() == needle)
            .cloned())
    }

    fn all_teams(&self) -> StoreResult<Vec<TeamEntity>> {
        let guard = self.lock();
        let mut teams: Vec<_> = guard.teams.values().cloned().collect();
        teams.sort_by_key(|team| team.id);
        Ok(teams)
    }

    fn insert_team(&self, canonical_name: &str) -> StoreResult<TeamEntity> {
        let mut guard = self.lock();
        guard.next_team_id += 1;
        let team = TeamEntity {
            id: TeamId(guard.next_team_id),
            canonical_name: canonical_name.to_string(),
        };
        guard.teams.insert(team.id.0, team.clone());
        Ok(team)
    }

    fn insert_alias(&self, team: TeamId, alias: &str, source: &str) -> StoreResult<()> {
        let mut guard = self.lock();
        guard
            .aliases
            .insert(
                (alias.to_lowercase(), source.to_string()),
                TeamAlias {
                    team_id: team,
                    alias: alias.to_string(),
                    source: source.to_string(),
                    created_at: Utc::now(),
                },
            );
        Ok(())
    }

    fn reassign_aliases(&self, from: TeamId, to: TeamId) -> StoreResult<usize> {
        let mut guard = self.lock();
        let mut moved = 0;
        for row in guard.aliases.values_mut() {
            if row.team_id == from {
                row.team_id = to;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

impl EventDataStore for MemoryStore {
    fn latest_odds(&self, event_id: &str) -> StoreResult<Option<OddsRecord>> {
        let guard = self.lock();
        Ok(guard
            .odds
            .get(event_id)
            .and_then(|rows| rows.last())
            .cloned())
    }

    fn append_odds(&self, record: &OddsRecord) -> StoreResult<()> {
        let mut guard = self.lock();
        guard
            .odds
            .entry(record.event_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn score_history(&self, event_id: &str, limit: usize) -> StoreResult<Vec<ScoreRecord>> {
        let guard = self.lock();
        Ok(guard
            .scores
            .get(event_id)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn append_score(&self, record: &ScoreRecord) -> StoreResult<()> {
        let mut guard = self.lock();
        guard
            .scores
            .entry(record.event_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn flag_event(&self, flag: &EventFlag) -> StoreResult<()> {
        let mut guard = self.lock();
        guard
            .flags
            .insert((flag.event_id.clone(), flag.reason.clone()), flag.clone());
        Ok(())
    }

    fn flags(&self, event_id: &str) -> StoreResult<Vec<EventFlag>> {
        let guard = self.lock();
        let mut rows: Vec<_> = guard
            .flags
            .values()
            .filter(|flag| flag.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.flagged_at.cmp(&b.flagged_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let team = store.insert_team("Arsenal").unwrap();
        store.insert_alias(team.id, "Arsenal FC", "flashscore").unwrap();
        store.insert_alias(team.id, "Arsenal FC", "flashscore").unwrap();
        assert_eq!(
            store.alias_lookup("arsenal fc", "flashscore").unwrap(),
            Some(team.id)
        );
        assert_eq!(store.lock().aliases.len(), 1);
    }

    #[test]
    fn reassign_moves_all_aliases() {
        let store = MemoryStore::new();
        let a = store.insert_team("Arsenal").unwrap();
        let b = store.insert_team("Arsenal London").unwrap();
        store.insert_alias(b.id, "Arsenal LDN", "oddschecker").unwrap();
        store.insert_alias(b.id, "The Arsenal", "flashscore").unwrap();
        let moved = store.reassign_aliases(b.id, a.id).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(
            store.alias_lookup("the arsenal", "flashscore").unwrap(),
            Some(a.id)
        );
    }

    #[test]
    fn flags_are_idempotent_per_reason() {
        let store = MemoryStore::new();
        let flag = EventFlag {
            event_id: "ev-1".into(),
            severity: "high".into(),
            reason: "outcomes too similar".into(),
            flagged_at: Utc::now(),
        };
        store.flag_event(&flag).unwrap();
        store.flag_event(&flag).unwrap();
        assert_eq!(store.flags("ev-1").unwrap().len(), 1);
    }
}
