//! Team-name normalization and entity resolution.
//!
//! Maps the many source-specific spellings of a team onto one stable id.
//! Lookups go cache -> store; misses fall through progressively stricter
//! match stages before a new entity is created. The storage unique
//! constraint is the real guard; caches are advisory.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::storage::{StoreResult, TeamId, TeamStore};

pub mod similarity;

pub use similarity::name_similarity;

/// Generic club prefix/suffix tokens stripped during normalization.
/// Deliberately language-agnostic abbreviations only, no team-specific
/// entries.
const CLUB_TOKENS: &[&str] = &[
    "fc", "cf", "afc", "ac", "as", "sc", "ssc", "bk", "fk", "sk", "cd", "ca", "rc", "rcd",
    "sv", "spvgg", "tsv", "vfb", "vfl", "bsc", "nk", "hnk", "ud", "cp", "us", "kv", "sl",
    "if", "bc",
];

static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[(\[][^)\]]*[)\]]").expect("bracketed pattern"));
static TRAILING_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+(19|20)\d{2}\s*$").expect("year pattern"));

/// Canonicalize a raw team name.
///
/// Order matters: qualifiers come off before token stripping so "FC" inside
/// a bracket does not survive, and the year check runs last so a stripped
/// suffix cannot expose a second year.
pub fn normalize(name: &str) -> String {
    let mut value = BRACKETED.replace_all(name.trim(), "").to_string();
    value = value.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(rest) = strip_leading_the(&value) {
        value = rest;
    }

    let mut words: Vec<&str> = value.split_whitespace().collect();
    while words.len() > 1 && CLUB_TOKENS.contains(&words[0].to_lowercase().as_str()) {
        words.remove(0);
    }
    while words.len() > 1
        && CLUB_TOKENS.contains(&words[words.len() - 1].to_lowercase().as_str())
    {
        words.pop();
    }
    value = words.join(" ");

    value = TRAILING_YEAR.replace(&value, "").to_string();
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_the(value: &str) -> Option<String> {
    if value.len() >= 4
        && value.is_char_boundary(4)
        && value[..4].eq_ignore_ascii_case("the ")
    {
        Some(value[4..].trim_start().to_string())
    } else {
        None
    }
}

/// Resolver tunables.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum blended similarity for an automatic fuzzy merge.
    pub fuzzy_threshold: f64,
    pub alias_cache_capacity: usize,
    pub team_cache_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            alias_cache_capacity: 2048,
            team_cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Bounded (alias, source) -> team cache, evicting oldest on overflow.
#[derive(Debug, Default)]
struct AliasCache {
    map: HashMap<(String, String), TeamId>,
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl AliasCache {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &(String, String)) -> Option<TeamId> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: (String, String), team: TeamId) {
        if self.map.insert(key.clone(), team).is_none() {
            self.order.push_back(key);
            while self.map.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

#[derive(Debug, Clone)]
struct CachedTeam {
    id: TeamId,
    normalized: String,
}

#[derive(Debug)]
struct TeamListCache {
    teams: Vec<CachedTeam>,
    fetched_at: Instant,
}

/// Resolver counters for the monitoring surface.
#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    pub alias_cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub teams_created: u64,
    pub aliases_created: u64,
    pub fuzzy_matches: u64,
}

/// Canonicalizes and resolves team names against the team store.
pub struct TeamResolver<S: TeamStore + ?Sized> {
    store: std::sync::Arc<S>,
    config: ResolverConfig,
    alias_cache: Mutex<AliasCache>,
    team_cache: Mutex<Option<TeamListCache>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    teams_created: AtomicU64,
    aliases_created: AtomicU64,
    fuzzy_matches: AtomicU64,
}

impl<S: TeamStore + ?Sized> TeamResolver<S> {
    pub fn new(store: std::sync::Arc<S>, config: ResolverConfig) -> Self {
        let capacity = config.alias_cache_capacity;
        Self {
            store,
            config,
            alias_cache: Mutex::new(AliasCache::with_capacity(capacity)),
            team_cache: Mutex::new(None),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            teams_created: AtomicU64::new(0),
            aliases_created: AtomicU64::new(0),
            fuzzy_matches: AtomicU64::new(0),
        }
    }

    /// Resolve a raw `(name, source)` sighting to a stable team id,
    /// creating aliases and teams as needed.
    pub fn find_or_create_team(&self, name: &str, source: &str) -> StoreResult<TeamId> {
        let key = (name.to_lowercase(), source.to_string());

        if let Some(team) = self.alias_lock().get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(team);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Exact alias row in the store.
        if let Some(team) = self.store.alias_lookup(name, source)? {
            self.alias_lock().insert(key, team);
            return Ok(team);
        }

        // Exact canonical match on the normalized name.
        let normalized = normalize(name);
        if let Some(team) = self.store.team_by_canonical(&normalized)? {
            self.store.insert_alias(team.id, name, source)?;
            self.aliases_created.fetch_add(1, Ordering::Relaxed);
            self.alias_lock().insert(key, team.id);
            return Ok(team.id);
        }

        // Fuzzy match against the cached team list.
        if let Some(team) = self.fuzzy_match(&normalized)? {
            self.store.insert_alias(team, name, source)?;
            self.aliases_created.fetch_add(1, Ordering::Relaxed);
            self.fuzzy_matches.fetch_add(1, Ordering::Relaxed);
            self.alias_lock().insert(key, team);
            return Ok(team);
        }

        // First sighting: new entity under the normalized canonical name,
        // aliased by the raw spelling.
        let team = self.store.insert_team(&normalized)?;
        self.store.insert_alias(team.id, name, source)?;
        self.teams_created.fetch_add(1, Ordering::Relaxed);
        self.aliases_created.fetch_add(1, Ordering::Relaxed);
        self.invalidate_caches();
        self.alias_lock().insert(key, team.id);
        log::debug!("created team {} for '{}' ({})", team.id, name, source);
        Ok(team.id)
    }

    /// Resolve a batch from one source: cache hits first, then sequential
    /// store fallback. Deliberately unbatched against storage.
    pub fn bulk_find_or_create_teams(
        &self,
        names: &[&str],
        source: &str,
    ) -> StoreResult<HashMap<String, TeamId>> {
        let mut resolved = HashMap::new();
        let mut misses = Vec::new();

        {
            let cache = self.alias_lock();
            for name in names {
                let key = (name.to_lowercase(), source.to_string());
                match cache.get(&key) {
                    Some(team) => {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        resolved.insert(name.to_string(), team);
                    }
                    None => misses.push(*name),
                }
            }
        }

        for name in misses {
            let team = self.find_or_create_team(name, source)?;
            resolved.insert(name.to_string(), team);
        }

        Ok(resolved)
    }

    /// Reassign every alias from `source_team` onto `target`, then drop the
    /// caches so stale mappings cannot survive the merge.
    pub fn merge_teams(&self, target: TeamId, source_team: TeamId) -> StoreResult<usize> {
        let moved = self.store.reassign_aliases(source_team, target)?;
        self.invalidate_caches();
        log::info!("merged {source_team} into {target} ({moved} aliases moved)");
        Ok(moved)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            alias_cache_entries: self.alias_lock().map.len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            teams_created: self.teams_created.load(Ordering::Relaxed),
            aliases_created: self.aliases_created.load(Ordering::Relaxed),
            fuzzy_matches: self.fuzzy_matches.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.invalidate_caches();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.teams_created.store(0, Ordering::Relaxed);
        self.aliases_created.store(0, Ordering::Relaxed);
        self.fuzzy_matches.store(0, Ordering::Relaxed);
    }

    fn fuzzy_match(&self, normalized: &str) -> StoreResult<Option<TeamId>> {
        let mut guard = self.team_cache.lock().expect("team cache lock poisoned");
        let expired = guard
            .as_ref()
            .is_none_or(|cache| cache.fetched_at.elapsed() > self.config.team_cache_ttl);
        if expired {
            let teams = self
                .store
                .all_teams()?
                .into_iter()
                .map(|team| CachedTeam {
                    id: team.id,
                    normalized: normalize(&team.canonical_name),
                })
                .collect();
            *guard = Some(TeamListCache {
                teams,
                fetched_at: Instant::now(),
            });
        }

        let cache = guard.as_ref().expect("team cache populated above");
        let mut best: Option<(TeamId, f64)> = None;
        for team in &cache.teams {
            let score = name_similarity(normalized, &team.normalized);
            if score >= self.config.fuzzy_threshold
                && best.is_none_or(|(_, current)| score > current)
            {
                best = Some((team.id, score));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    fn invalidate_caches(&self) {
        self.alias_lock().clear();
        *self.team_cache.lock().expect("team cache lock poisoned") = None;
    }

    fn alias_lock(&self) -> std::sync::MutexGuard<'_, AliasCache> {
        self.alias_cache.lock().expect("alias cache lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn resolver() -> TeamResolver<MemoryStore> {
        TeamResolver::new(Arc::new(MemoryStore::new()), ResolverConfig::default())
    }

    #[test]
    fn normalize_strips_club_tokens() {
        assert_eq!(normalize("FC Barcelona"), "Barcelona");
        assert_eq!(normalize("Arsenal FC"), "Arsenal");
        assert_eq!(normalize("AFC Ajax"), "Ajax");
        assert_eq!(normalize("SSC Napoli"), "Napoli");
    }

    #[test]
    fn normalize_strips_qualifiers_and_years() {
        assert_eq!(normalize("The Arsenal"), "Arsenal");
        assert_eq!(normalize("Arsenal (England)"), "Arsenal");
        assert_eq!(normalize("Arsenal [ENG] 2024"), "Arsenal");
        assert_eq!(normalize("  Borussia   Dortmund  "), "Borussia Dortmund");
    }

    #[test]
    fn normalize_keeps_single_token_names() {
        // A lone club token must not normalize to the empty string.
        assert_eq!(normalize("AC"), "AC");
        assert_eq!(normalize("Ajax"), "Ajax");
    }

    #[test]
    fn same_team_across_sources_resolves_to_one_id() {
        let resolver = resolver();
        let a = resolver.find_or_create_team("Arsenal FC", "flashscore").unwrap();
        let b = resolver.find_or_create_team("Arsenal", "oddschecker").unwrap();
        assert_eq!(a, b);

        let stats = resolver.stats();
        assert_eq!(stats.teams_created, 1);
        // One alias per source spelling.
        assert_eq!(stats.aliases_created, 2);
    }

    #[test]
    fn repeated_sighting_hits_cache_and_creates_nothing() {
        let resolver = resolver();
        let first = resolver.find_or_create_team("Arsenal FC", "flashscore").unwrap();
        let before = resolver.stats();
        let second = resolver.find_or_create_team("Arsenal FC", "flashscore").unwrap();
        let after = resolver.stats();

        assert_eq!(first, second);
        assert_eq!(before.aliases_created, after.aliases_created);
        assert_eq!(after.cache_hits, 1);
    }

    #[test]
    fn fuzzy_match_links_near_identical_spelling() {
        let resolver = resolver();
        let original = resolver
            .find_or_create_team("Paris Saint Germain", "flashscore")
            .unwrap();
        let fuzzy = resolver
            .find_or_create_team("Paris Saint-Germain", "oddschecker")
            .unwrap();
        assert_eq!(original, fuzzy);
        assert_eq!(resolver.stats().fuzzy_matches, 1);
        assert_eq!(resolver.stats().teams_created, 1);
    }

    #[test]
    fn unrelated_names_create_separate_teams() {
        let resolver = resolver();
        let a = resolver.find_or_create_team("Arsenal", "flashscore").unwrap();
        let b = resolver.find_or_create_team("Chelsea", "flashscore").unwrap();
        assert_ne!(a, b);
        assert_eq!(resolver.stats().teams_created, 2);
    }

    #[test]
    fn merge_redirects_future_lookups() {
        let resolver = resolver();
        let keep = resolver.find_or_create_team("Bayern", "flashscore").unwrap();
        let dup = resolver
            .find_or_create_team("Bayern Munchen 1900", "oddschecker")
            .unwrap();
        assert_ne!(keep, dup);

        resolver.merge_teams(keep, dup).unwrap();
        let resolved = resolver
            .find_or_create_team("Bayern Munchen 1900", "oddschecker")
            .unwrap();
        assert_eq!(resolved, keep);
    }

    #[test]
    fn alias_cache_evicts_oldest_when_full() {
        let store = Arc::new(MemoryStore::new());
        let resolver = TeamResolver::new(
            store,
            ResolverConfig {
                alias_cache_capacity: 2,
                ..Default::default()
            },
        );
        resolver.find_or_create_team("Arsenal", "a").unwrap();
        resolver.find_or_create_team("Chelsea", "a").unwrap();
        resolver.find_or_create_team("Liverpool", "a").unwrap();
        assert!(resolver.stats().alias_cache_entries <= 2);

        // Evicted entries still resolve through the store.
        let again = resolver.find_or_create_team("Arsenal", "a").unwrap();
        assert_eq!(resolver.stats().teams_created, 3);
        assert_eq!(again, TeamId(1));
    }

    #[test]
    fn bulk_resolves_cache_hits_then_store() {
        let resolver = resolver();
        resolver.find_or_create_team("Arsenal", "flashscore").unwrap();
        let map = resolver
            .bulk_find_or_create_teams(&["Arsenal", "Chelsea", "Everton"], "flashscore")
            .unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(resolver.stats().teams_created, 3);
        assert_eq!(map["Arsenal"], TeamId(1));
    }
}
