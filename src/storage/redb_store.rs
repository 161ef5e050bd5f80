//! Embedded `redb` implementation of the repository traits.
//!
//! History tables are append-only: rows are keyed by a monotonic sequence so
//! a prefix range scan returns them in insertion order. Alias and flag
//! tables are keyed by their uniqueness constraint, which makes upserts
//! idempotent by construction.

use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use super::{
    EventDataStore, EventFlag, OddsRecord, ScoreRecord, StoreError, StoreResult, TeamAlias,
    TeamEntity, TeamId, TeamStore,
};

const TEAMS: TableDefinition<u64, &str> = TableDefinition::new("teams");
const TEAMS_BY_CANONICAL: TableDefinition<&str, u64> = TableDefinition::new("teams_by_canonical");
// key: "<source>\x1f<alias lowercased>"
const ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("team_aliases");
// key: "<event_id>\x1f<zero-padded sequence>"
const ODDS: TableDefinition<&str, &[u8]> = TableDefinition::new("odds_history");
const SCORES: TableDefinition<&str, &[u8]> = TableDefinition::new("score_history");
// key: "<event_id>\x1f<reason>"
const FLAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("event_flags");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const KEY_SEP: char = '\u{1f}';

fn be(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn prefix_bounds(event_id: &str) -> (String, String) {
    // '\u{1f}' sorts directly below '\u{20}', so this pair brackets every
    // sequenced key for the event and nothing else.
    (
        format!("{event_id}{KEY_SEP}"),
        format!("{event_id}\u{20}"),
    )
}

/// `redb`-backed store; the default persistence layer.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path).map_err(be)?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Fully in-memory database, used by tests.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(be)?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(be)?;
        {
            txn.open_table(TEAMS).map_err(be)?;
            txn.open_table(TEAMS_BY_CANONICAL).map_err(be)?;
            txn.open_table(ALIASES).map_err(be)?;
            txn.open_table(ODDS).map_err(be)?;
            txn.open_table(SCORES).map_err(be)?;
            txn.open_table(FLAGS).map_err(be)?;
            txn.open_table(META).map_err(be)?;
        }
        txn.commit().map_err(be)?;
        Ok(())
    }

    fn alias_key(alias: &str, source: &str) -> String {
        format!("{source}{KEY_SEP}{}", alias.to_lowercase())
    }

    fn next_seq(txn: &redb::WriteTransaction, counter: &str) -> StoreResult<u64> {
        let mut meta = txn.open_table(META).map_err(be)?;
        let next = meta
            .get(counter)
            .map_err(be)?
            .map(|guard| guard.value())
            .unwrap_or(0)
            + 1;
        meta.insert(counter, next).map_err(be)?;
        Ok(next)
    }

    fn append_record<T: serde::Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        counter: &str,
        event_id: &str,
        record: &T,
    ) -> StoreResult<()> {
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db.begin_write().map_err(be)?;
        {
            let seq = Self::next_seq(&txn, counter)?;
            let mut rows = txn.open_table(table).map_err(be)?;
            let key = format!("{event_id}{KEY_SEP}{seq:020}");
            rows.insert(key.as_str(), encoded.as_slice()).map_err(be)?;
        }
        txn.commit().map_err(be)?;
        Ok(())
    }
}

impl TeamStore for RedbStore {
    fn alias_lookup(&self, alias: &str, source: &str) -> StoreResult<Option<TeamId>> {
        let txn = self.db.begin_read().map_err(be)?;
        let table = txn.open_table(ALIASES).map_err(be)?;
        let key = Self::alias_key(alias, source);
        match table.get(key.as_str()).map_err(be)? {
            Some(guard) => {
                let row: TeamAlias = serde_json::from_slice(guard.value())?;
                Ok(Some(row.team_id))
            }
            None => Ok(None),
        }
    }

    fn team_by_canonical(&self, canonical: &str) -> StoreResult<Option<TeamEntity>> {
        let needle = canonical.to_lowercase();
        let txn = self.db.begin_read().map_err(be)?;
        let index = txn.open_table(TEAMS_BY_CANONICAL).map_err(be)?;
        let Some(id) = index.get(needle.as_str()).map_err(be)?.map(|g| g.value()) else {
            return Ok(None);
        };
        let teams = txn.open_table(TEAMS).map_err(be)?;
        Ok(teams.get(id).map_err(be)?.map(|guard| TeamEntity {
            id: TeamId(id),
            canonical_name: guard.value().to_string(),
        }))
    }

    fn all_teams(&self) -> StoreResult<Vec<TeamEntity>> {
        let txn = self.db.begin_read().map_err(be)?;
        let teams = txn.open_table(TEAMS).map_err(be)?;
        let mut out = Vec::new();
        for entry in teams.iter().map_err(be)? {
            let (id, name) = entry.map_err(be)?;
            out.push(TeamEntity {
                id: TeamId(id.value()),
                canonical_name: name.value().to_string(),
            });
        }
        Ok(out)
    }

    fn insert_team(&self, canonical_name: &str) -> StoreResult<TeamEntity> {
        let txn = self.db.begin_write().map_err(be)?;
        let team = {
            let id = Self::next_seq(&txn, "team_seq")?;
            let mut teams = txn.open_table(TEAMS).map_err(be)?;
            teams.insert(id, canonical_name).map_err(be)?;
            let mut index = txn.open_table(TEAMS_BY_CANONICAL).map_err(be)?;
            index
                .insert(canonical_name.to_lowercase().as_str(), id)
                .map_err(be)?;
            TeamEntity {
                id: TeamId(id),
                canonical_name: canonical_name.to_string(),
            }
        };
        txn.commit().map_err(be)?;
        Ok(team)
    }

    fn insert_alias(&self, team: TeamId, alias: &str, source: &str) -> StoreResult<()> {
        let row = TeamAlias {
            team_id: team,
            alias: alias.to_string(),
            source: source.to_string(),
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&row)?;
        let txn = self.db.begin_write().map_err(be)?;
        {
            let mut aliases = txn.open_table(ALIASES).map_err(be)?;
            let key = Self::alias_key(alias, source);
            aliases.insert(key.as_str(), encoded.as_slice()).map_err(be)?;
        }
        txn.commit().map_err(be)?;
        Ok(())
    }

    fn reassign_aliases(&self, from: TeamId, to: TeamId) -> StoreResult<usize> {
        let txn = self.db.begin_write().map_err(be)?;
        let moved = {
            let mut aliases = txn.open_table(ALIASES).map_err(be)?;
            let mut updates: Vec<(String, TeamAlias)> = Vec::new();
            for entry in aliases.iter().map_err(be)? {
                let (key, value) = entry.map_err(be)?;
                let row: TeamAlias = serde_json::from_slice(value.value())?;
                if row.team_id == from {
                    updates.push((key.value().to_string(), row));
                }
            }
            for (key, mut row) in updates.iter().cloned() {
                row.team_id = to;
                let encoded = serde_json::to_vec(&row)?;
                aliases.insert(key.as_str(), encoded.as_slice()).map_err(be)?;
            }
            updates.len()
        };
        txn.commit().map_err(be)?;
        Ok(moved)
    }
}

impl EventDataStore for RedbStore {
    fn latest_odds(&self, event_id: &str) -> StoreResult<Option<OddsRecord>> {
        let txn = self.db.begin_read().map_err(be)?;
        let table = txn.open_table(ODDS).map_err(be)?;
        let (start, end) = prefix_bounds(event_id);
        let mut range = table.range(start.as_str()..end.as_str()).map_err(be)?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(be)?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }

    fn append_odds(&self, record: &OddsRecord) -> StoreResult<()> {
        self.append_record(ODDS, "odds_seq", &record.event_id, record)
    }

    fn score_history(&self, event_id: &str, limit: usize) -> StoreResult<Vec<ScoreRecord>> {
        let txn = self.db.begin_read().map_err(be)?;
        let table = txn.open_table(SCORES).map_err(be)?;
        let (start, end) = prefix_bounds(event_id);
        let range = table.range(start.as_str()..end.as_str()).map_err(be)?;
        let mut out = Vec::new();
        for entry in range.rev().take(limit) {
            let (_, value) = entry.map_err(be)?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn append_score(&self, record: &ScoreRecord) -> StoreResult<()> {
        self.append_record(SCORES, "score_seq", &record.event_id, record)
    }

    fn flag_event(&self, flag: &EventFlag) -> StoreResult<()> {
        let encoded = serde_json::to_vec(flag)?;
        let txn = self.db.begin_write().map_err(be)?;
        {
            let mut flags = txn.open_table(FLAGS).map_err(be)?;
            let key = format!("{}{KEY_SEP}{}", flag.event_id, flag.reason);
            flags.insert(key.as_str(), encoded.as_slice()).map_err(be)?;
        }
        txn.commit().map_err(be)?;
        Ok(())
    }

    fn flags(&self, event_id: &str) -> StoreResult<Vec<EventFlag>> {
        let txn = self.db.begin_read().map_err(be)?;
        let table = txn.open_table(FLAGS).map_err(be)?;
        let (start, end) = prefix_bounds(event_id);
        let range = table.range(start.as_str()..end.as_str()).map_err(be)?;
        let mut out = Vec::new();
        for entry in range {
            let (_, value) = entry.map_err(be)?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }
}
