//! Match Session - one observation cycle in, one decision out
//!
//! Ties the layout cache, the board memory and the move selector together
//! the way the host drives them: validate the cache, refresh it when the
//! board geometry drifted, ingest the batch, pick the next action.

use crate::config::EngineConfig;
use crate::layout_engine::{refresh_layout, CacheAction, LayoutStore, LayoutValidator, LayoutVerdict};
use crate::memory_engine::{BoardMemory, BoardStats, IngestReport};
use crate::observation::{CardObservation, Rect, ScreenSize};
use crate::store::KeyValueStore;
use crate::strategy_engine::{Action, MoveSelector};
use log::info;
use serde::{Deserialize, Serialize};

/// Everything the host needs after one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub verdict: LayoutVerdict,
    pub cache_action: CacheAction,
    pub cache_persisted: bool,
    pub ingest: IngestReport,
    pub next_move: Option<Action>,
    pub stats: BoardStats,
    pub complete: bool,
}

pub struct MatchSession<S: KeyValueStore> {
    layout: LayoutStore<S>,
    validator: LayoutValidator,
    memory: BoardMemory,
}

impl<S: KeyValueStore> MatchSession<S> {
    pub fn new(config: &EngineConfig, backend: S) -> Self {
        Self {
            layout: LayoutStore::new(backend, &config.layout),
            validator: LayoutValidator::from_config(config),
            memory: BoardMemory::new(config.memory.clone()),
        }
    }

    pub fn process_cycle(&mut self, observations: &[CardObservation], screen: ScreenSize) -> CycleReport {
        let regions: Vec<Rect> = observations.iter().map(|o| o.region).collect();
        let check = refresh_layout(&mut self.layout, &self.validator, &regions, screen);
        if check.action == CacheAction::Replaced {
            info!("Board geometry changed on {}, layout cache replaced", screen);
        }

        let ingest = self.memory.ingest(observations);
        let next_move = MoveSelector::next_move(&self.memory);

        CycleReport {
            verdict: check.verdict,
            cache_action: check.action,
            cache_persisted: check.persisted,
            ingest,
            next_move,
            stats: self.memory.stats(),
            complete: self.memory.is_complete(),
        }
    }

    /// Cached card regions the recognizer can search on the next capture.
    pub fn search_regions(&mut self, screen: ScreenSize) -> Vec<Rect> {
        self.layout
            .current_layout(screen)
            .map(|l| l.regions.clone())
            .unwrap_or_default()
    }

    /// Both taps of a commit were carried out.
    pub fn record_match_committed(&mut self, first: Rect, second: Rect) -> usize {
        let removed = self.memory.record_match_committed(first, second);
        if self.memory.is_complete() {
            info!("Board cleared: {:?}", self.memory.stats());
        }
        removed
    }

    pub fn record_move_made(&mut self) {
        self.memory.record_move_made();
    }

    /// New game. The layout cache is kept; the board usually sits in the
    /// same place.
    pub fn reset(&mut self) {
        self.memory.reset();
        info!("Session reset");
    }

    pub fn stats(&self) -> BoardStats {
        self.memory.stats()
    }

    pub fn is_complete(&self) -> bool {
        self.memory.is_complete()
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.layout.set_enabled(enabled);
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.layout.is_enabled()
    }

    pub fn clear_cache(&mut self) {
        self.layout.clear();
    }

    pub fn memory(&self) -> &BoardMemory {
        &self.memory
    }

    pub fn layout_store(&mut self) -> &mut LayoutStore<S> {
        &mut self.layout
    }
}
