//! Layout Cache Engine - learned card positions per screen resolution
//!
//! Provides:
//! - LayoutStore: persisted card regions with an enable/disable toggle
//! - LayoutValidator: tolerance-based comparison of fresh regions against the cache
//! - refresh_layout: the cache policy the host runs every cycle

use crate::config::{EngineConfig, LayoutConfig, MatchThresholds};
use crate::error::EngineError;
use crate::observation::{dedup_and_sort, Rect, ScreenSize};
use crate::store::KeyValueStore;
use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ENABLED_KEY: &str = "layout_cache_enabled";
pub const LAYOUT_KEY_PREFIX: &str = "board_layout.";

fn layout_key(screen: ScreenSize) -> String {
    format!("{}{}", LAYOUT_KEY_PREFIX, screen)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Persisted snapshot of card positions (no identities)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLayout {
    pub regions: Vec<Rect>,
    pub screen_width: i32,
    pub screen_height: i32,
    pub saved_at_ms: u64,
}

impl BoardLayout {
    pub fn screen(&self) -> ScreenSize {
        ScreenSize::new(self.screen_width, self.screen_height)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Layout cache backed by a key-value store.
///
/// The in-memory copy is authoritative for the life of the process: a failed
/// write is logged and the cached layout is still served. Likewise a failed
/// removal: once a clear could not delete every record, the backend is no
/// longer read until a later clear succeeds.
pub struct LayoutStore<S: KeyValueStore> {
    backend: S,
    enabled: bool,
    tolerance: i32,
    layouts: FxHashMap<ScreenSize, BoardLayout>,
    backend_stale: bool,
}

impl<S: KeyValueStore> LayoutStore<S> {
    pub fn new(backend: S, config: &LayoutConfig) -> Self {
        let enabled = match backend.get(ENABLED_KEY) {
            Ok(Some(flag)) => flag.trim().parse::<bool>().unwrap_or_else(|_| {
                warn!("Unreadable cache flag {:?}, using default {}", flag, config.cache_enabled);
                config.cache_enabled
            }),
            Ok(None) => config.cache_enabled,
            Err(e) => {
                warn!("Failed to read cache flag: {}", e);
                config.cache_enabled
            }
        };

        Self {
            backend,
            enabled,
            tolerance: config.tolerance,
            layouts: FxHashMap::default(),
            backend_stale: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle the cache. Disabling drops every stored layout right away.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if let Err(e) = self.backend.put(ENABLED_KEY, if enabled { "true" } else { "false" }) {
            warn!("Failed to persist cache flag: {}", e);
        }
        if !enabled {
            self.clear();
        }
        info!("Layout cache {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Layout saved for `screen`, loading it from the backend on first use.
    pub fn current_layout(&mut self, screen: ScreenSize) -> Option<&BoardLayout> {
        if !self.enabled {
            return None;
        }
        if !self.layouts.contains_key(&screen) && !self.backend_stale {
            if let Some(layout) = self.load(screen) {
                self.layouts.insert(screen, layout);
            }
        }
        self.layouts.get(&screen)
    }

    fn load(&self, screen: ScreenSize) -> Option<BoardLayout> {
        let json = match self.backend.get(&layout_key(screen)) {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load layout for {}: {}", screen, e);
                return None;
            }
        };

        match serde_json::from_str::<BoardLayout>(&json) {
            Ok(layout) if layout.screen() == screen => {
                debug!("Loaded {} cached regions for {}", layout.len(), screen);
                Some(layout)
            }
            Ok(layout) => {
                warn!("Stored layout is for {}, expected {}", layout.screen(), screen);
                None
            }
            Err(e) => {
                warn!("Corrupt layout record for {}: {}", screen, e);
                None
            }
        }
    }

    /// Replace the layout for `screen`. Returns true when the record was
    /// written durably; false when disabled or the write failed.
    pub fn save(&mut self, regions: &[Rect], screen: ScreenSize) -> bool {
        if !self.enabled {
            debug!("Layout cache disabled, not saving {} regions", regions.len());
            return false;
        }

        let layout = BoardLayout {
            regions: dedup_and_sort(regions, self.tolerance),
            screen_width: screen.width,
            screen_height: screen.height,
            saved_at_ms: now_millis(),
        };

        let persisted = match serde_json::to_string(&layout)
            .map_err(EngineError::from)
            .and_then(|json| self.backend.put(&layout_key(screen), &json))
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist layout for {}: {}", screen, e);
                false
            }
        };

        info!("Saved layout of {} regions for {}", layout.len(), screen);
        self.layouts.insert(screen, layout);
        persisted
    }

    /// Remove every layout, in memory and persisted.
    pub fn clear(&mut self) {
        self.layouts.clear();
        let mut removed_all = true;
        match self.backend.keys_with_prefix(LAYOUT_KEY_PREFIX) {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.backend.remove(&key) {
                        warn!("Failed to remove {}: {}", key, e);
                        removed_all = false;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to list stored layouts: {}", e);
                removed_all = false;
            }
        }
        if !removed_all {
            warn!("Stored layouts may survive the clear; ignoring them from now on");
        }
        self.backend_stale = !removed_all;
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }
}

/// Relationship between observed regions and the cached layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutVerdict {
    Match,
    PartialMatch,
    Mismatch,
    NoCache,
}

#[derive(Debug, Clone)]
pub struct LayoutValidator {
    tolerance: i32,
    thresholds: MatchThresholds,
}

impl LayoutValidator {
    pub fn new(tolerance: i32, thresholds: MatchThresholds) -> Self {
        Self {
            tolerance,
            thresholds,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.layout.tolerance, config.thresholds.clone())
    }

    /// Fraction of cached regions that have a similar observed region.
    pub fn match_rate(&self, observed: &[Rect], cached: &[Rect]) -> f32 {
        if cached.is_empty() {
            return 0.0;
        }
        let matched = cached
            .par_iter()
            .filter(|c| observed.iter().any(|o| o.is_similar(c, self.tolerance)))
            .count();
        matched as f32 / cached.len() as f32
    }

    pub fn validate(&self, observed: &[Rect], cached: Option<&[Rect]>) -> LayoutVerdict {
        let cached = match cached {
            Some(cached) if !cached.is_empty() => cached,
            _ => return LayoutVerdict::NoCache,
        };

        if self.thresholds.require_equal_count && observed.len() != cached.len() {
            debug!("Region count changed: {} cached, {} observed", cached.len(), observed.len());
            return LayoutVerdict::Mismatch;
        }

        let rate = self.match_rate(observed, cached);
        let verdict = if rate >= self.thresholds.match_rate {
            LayoutVerdict::Match
        } else if rate >= self.thresholds.partial_rate {
            LayoutVerdict::PartialMatch
        } else {
            LayoutVerdict::Mismatch
        };
        debug!("Layout match rate {:.2} => {:?}", rate, verdict);
        verdict
    }
}

/// What the cache policy did with this cycle's regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheAction {
    /// Cache trusted as-is (MATCH, or PARTIAL_MATCH to avoid thrashing)
    Kept,
    /// No cache existed; the observation became the baseline
    SavedBaseline,
    /// Geometry drifted; the cache was replaced wholesale
    Replaced,
    /// Nothing to do: cache disabled or nothing observed
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCheck {
    pub verdict: LayoutVerdict,
    pub action: CacheAction,
    pub persisted: bool,
}

/// Validate `observed` against the cache for `screen` and apply the policy:
/// NO_CACHE saves a baseline, MISMATCH replaces, anything else keeps.
pub fn refresh_layout<S: KeyValueStore>(
    store: &mut LayoutStore<S>,
    validator: &LayoutValidator,
    observed: &[Rect],
    screen: ScreenSize,
) -> LayoutCheck {
    let verdict = {
        let cached = store.current_layout(screen).map(|l| l.regions.as_slice());
        validator.validate(observed, cached)
    };

    let (action, persisted) = match verdict {
        LayoutVerdict::Match | LayoutVerdict::PartialMatch => (CacheAction::Kept, false),
        _ if !store.is_enabled() || observed.is_empty() => (CacheAction::Skipped, false),
        LayoutVerdict::NoCache => (CacheAction::SavedBaseline, store.save(observed, screen)),
        LayoutVerdict::Mismatch => (CacheAction::Replaced, store.save(observed, screen)),
    };

    LayoutCheck {
        verdict,
        action,
        persisted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use crate::store::MemoryStore;
    use std::io;

    const SCREEN: ScreenSize = ScreenSize {
        width: 1080,
        height: 2400,
    };

    fn grid(cols: i32, rows: i32, offset: i32) -> Vec<Rect> {
        let mut regions = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                regions.push(Rect::new(offset + col * 200, offset + row * 250, 160, 220));
            }
        }
        regions
    }

    fn store() -> LayoutStore<MemoryStore> {
        LayoutStore::new(MemoryStore::new(), &LayoutConfig::default())
    }

    fn validator() -> LayoutValidator {
        LayoutValidator::new(25, MatchThresholds::default())
    }

    /// Backend whose every operation fails
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> EngineResult<Option<String>> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone").into())
        }

        fn put(&mut self, _key: &str, _value: &str) -> EngineResult<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full").into())
        }

        fn remove(&mut self, _key: &str) -> EngineResult<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone").into())
        }

        fn keys_with_prefix(&self, _prefix: &str) -> EngineResult<Vec<String>> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone").into())
        }
    }

    /// Backend that reads and writes fine but never deletes anything
    struct StickyStore(MemoryStore);

    impl KeyValueStore for StickyStore {
        fn get(&self, key: &str) -> EngineResult<Option<String>> {
            self.0.get(key)
        }

        fn put(&mut self, key: &str, value: &str) -> EngineResult<()> {
            self.0.put(key, value)
        }

        fn remove(&mut self, _key: &str) -> EngineResult<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
            self.0.keys_with_prefix(prefix)
        }
    }

    #[test]
    fn test_save_then_validate_same_regions_matches() {
        let mut store = store();
        let regions = grid(4, 4, 40);
        assert!(store.save(&regions, SCREEN));

        let cached = store.current_layout(SCREEN).map(|l| l.regions.clone());
        assert_eq!(validator().validate(&regions, cached.as_deref()), LayoutVerdict::Match);
    }

    #[test]
    fn test_save_dedups_and_sorts() {
        let mut store = store();
        let regions = vec![
            Rect::new(500, 900, 160, 220),
            Rect::new(100, 100, 160, 220),
            Rect::new(110, 95, 150, 225),
        ];
        store.save(&regions, SCREEN);

        let layout = store.current_layout(SCREEN).unwrap();
        assert_eq!(
            layout.regions,
            vec![Rect::new(100, 100, 160, 220), Rect::new(500, 900, 160, 220)]
        );
        assert_eq!(layout.screen(), SCREEN);
    }

    #[test]
    fn test_no_cache_when_nothing_saved() {
        let mut store = store();
        assert!(store.current_layout(SCREEN).is_none());
        assert_eq!(validator().validate(&grid(2, 2, 0), None), LayoutVerdict::NoCache);
        assert_eq!(validator().validate(&grid(2, 2, 0), Some(&[])), LayoutVerdict::NoCache);
    }

    #[test]
    fn test_partial_and_mismatch_thresholds() {
        let v = validator();
        let cached = grid(5, 2, 0); // 10 regions
        let mut observed = cached.clone();

        observed.truncate(8);
        assert_eq!(v.validate(&observed, Some(&cached)), LayoutVerdict::Match);

        observed.truncate(7);
        assert_eq!(v.validate(&observed, Some(&cached)), LayoutVerdict::PartialMatch);

        observed.truncate(5);
        assert_eq!(v.validate(&observed, Some(&cached)), LayoutVerdict::PartialMatch);

        observed.truncate(4);
        assert_eq!(v.validate(&observed, Some(&cached)), LayoutVerdict::Mismatch);

        assert_eq!(v.validate(&[], Some(&cached)), LayoutVerdict::Mismatch);
    }

    #[test]
    fn test_tolerance_boundary_in_validation() {
        let v = LayoutValidator::new(
            20,
            MatchThresholds {
                match_rate: 1.0,
                partial_rate: 1.0,
                require_equal_count: false,
            },
        );
        let cached = [Rect::new(100, 100, 50, 50)];
        assert_eq!(
            v.validate(&[Rect::new(100, 120, 50, 50)], Some(&cached)),
            LayoutVerdict::Match
        );
        assert_eq!(
            v.validate(&[Rect::new(100, 121, 50, 50)], Some(&cached)),
            LayoutVerdict::Mismatch
        );
    }

    #[test]
    fn test_strict_count_mode() {
        let v = LayoutValidator::new(
            25,
            MatchThresholds {
                match_rate: 0.9,
                partial_rate: 0.7,
                require_equal_count: true,
            },
        );
        let cached = grid(4, 4, 0);
        let mut observed = cached.clone();
        observed.push(Rect::new(2000, 2000, 160, 220));
        assert_eq!(v.validate(&observed, Some(&cached)), LayoutVerdict::Mismatch);
        assert_eq!(v.validate(&cached, Some(&cached)), LayoutVerdict::Match);
    }

    #[test]
    fn test_mismatch_replaces_instead_of_merging() {
        let mut store = store();
        let v = validator();
        let old = grid(3, 3, 0);
        let new = grid(2, 2, 1000);

        store.save(&old, SCREEN);
        let check = refresh_layout(&mut store, &v, &new, SCREEN);
        assert_eq!(check.verdict, LayoutVerdict::Mismatch);
        assert_eq!(check.action, CacheAction::Replaced);
        assert!(check.persisted);

        let layout = store.current_layout(SCREEN).unwrap();
        assert_eq!(layout.regions, dedup_and_sort(&new, 25));
    }

    #[test]
    fn test_partial_match_keeps_cache() {
        let mut store = store();
        let v = validator();
        let cached = grid(5, 2, 0);
        store.save(&cached, SCREEN);

        let mut observed = cached[..6].to_vec();
        observed.push(Rect::new(3000, 3000, 10, 10));
        let check = refresh_layout(&mut store, &v, &observed, SCREEN);
        assert_eq!(check.verdict, LayoutVerdict::PartialMatch);
        assert_eq!(check.action, CacheAction::Kept);
        assert_eq!(store.current_layout(SCREEN).unwrap().regions, cached);
    }

    #[test]
    fn test_no_cache_saves_baseline() {
        let mut store = store();
        let observed = grid(2, 3, 10);
        let check = refresh_layout(&mut store, &validator(), &observed, SCREEN);
        assert_eq!(check.verdict, LayoutVerdict::NoCache);
        assert_eq!(check.action, CacheAction::SavedBaseline);
        assert_eq!(store.current_layout(SCREEN).unwrap().len(), 6);

        let empty = refresh_layout(&mut store, &validator(), &[], ScreenSize::new(720, 1280));
        assert_eq!(empty.action, CacheAction::Skipped);
    }

    #[test]
    fn test_disable_mid_session_drops_layout() {
        let mut store = store();
        let regions = grid(4, 4, 0);
        store.save(&regions, SCREEN);
        assert!(store.current_layout(SCREEN).is_some());

        store.set_enabled(false);
        assert!(!store.is_enabled());
        assert!(store.current_layout(SCREEN).is_none());
        let cached = store.current_layout(SCREEN).map(|l| l.regions.clone());
        assert_eq!(validator().validate(&regions, cached.as_deref()), LayoutVerdict::NoCache);

        // saving while disabled is a no-op, and refresh does nothing
        assert!(!store.save(&regions, SCREEN));
        let check = refresh_layout(&mut store, &validator(), &regions, SCREEN);
        assert_eq!(check.action, CacheAction::Skipped);

        // re-enabling does not resurrect the old layout
        store.set_enabled(true);
        assert!(store.current_layout(SCREEN).is_none());
        assert!(store.backend().keys_with_prefix(LAYOUT_KEY_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn test_layout_and_flag_reload_from_backend() {
        let mut first = store();
        first.save(&grid(2, 2, 0), SCREEN);
        first.set_enabled(true);
        let backend = first.backend().clone();

        let mut second = LayoutStore::new(backend, &LayoutConfig::default());
        assert_eq!(second.current_layout(SCREEN).unwrap().regions, grid(2, 2, 0));
        assert!(second.current_layout(ScreenSize::new(720, 1280)).is_none());

        let mut backend = second.backend().clone();
        backend.put(ENABLED_KEY, "false").unwrap();
        let mut third = LayoutStore::new(backend, &LayoutConfig::default());
        assert!(!third.is_enabled());
        assert!(third.current_layout(SCREEN).is_none());
    }

    #[test]
    fn test_corrupt_record_is_no_cache() {
        let mut backend = MemoryStore::new();
        backend.put(&layout_key(SCREEN), "not json").unwrap();
        let mut store = LayoutStore::new(backend, &LayoutConfig::default());
        assert!(store.current_layout(SCREEN).is_none());
    }

    #[test]
    fn test_write_failure_keeps_memory_copy() {
        let mut store = LayoutStore::new(BrokenStore, &LayoutConfig::default());
        assert!(store.is_enabled());
        assert!(store.current_layout(SCREEN).is_none());

        let regions = grid(3, 2, 0);
        assert!(!store.save(&regions, SCREEN));
        assert_eq!(store.current_layout(SCREEN).unwrap().regions, regions);

        store.clear();
        assert!(store.current_layout(SCREEN).is_none());
    }

    #[test]
    fn test_failed_removal_does_not_resurrect_layout() {
        let mut store = LayoutStore::new(StickyStore(MemoryStore::new()), &LayoutConfig::default());
        let regions = grid(4, 4, 0);
        assert!(store.save(&regions, SCREEN));

        store.set_enabled(false);
        store.set_enabled(true);
        assert_eq!(store.backend().keys_with_prefix(LAYOUT_KEY_PREFIX).unwrap().len(), 1);
        assert!(store.current_layout(SCREEN).is_none());

        let check = refresh_layout(&mut store, &validator(), &regions, SCREEN);
        assert_eq!(check.verdict, LayoutVerdict::NoCache);
        assert_eq!(check.action, CacheAction::SavedBaseline);
        assert_eq!(store.current_layout(SCREEN).unwrap().regions, regions);
        assert!(store.current_layout(ScreenSize::new(720, 1280)).is_none());
    }

    #[test]
    fn test_extreme_region_is_mismatch() {
        let mut store = store();
        let v = validator();
        let cached = grid(2, 2, 0);
        store.save(&cached, SCREEN);

        let garbage = vec![Rect::new(i32::MIN, 100, 50, 50)];
        let check = refresh_layout(&mut store, &v, &garbage, SCREEN);
        assert_eq!(check.verdict, LayoutVerdict::Mismatch);
        assert_eq!(check.action, CacheAction::Replaced);
        assert_eq!(v.match_rate(&cached, &garbage), 0.0);
    }
}
