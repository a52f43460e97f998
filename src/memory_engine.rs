//! Board Memory Engine - what the assistant remembers about the board
//!
//! Provides:
//! - Per-region card state (identity, orientation, confidence, last seen)
//! - Revealed-pair index: identity -> regions currently face up
//! - Transition events for every observation batch
//! - Move / match counters for the current game

use crate::config::MemoryConfig;
use crate::observation::{CardId, CardObservation, Rect};
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Last known state of one board cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardState {
    pub region: Rect,
    pub identity: CardId,
    pub face_up: bool,
    pub confidence: f32,
    /// Milliseconds since the memory was created
    pub last_seen_ms: u64,
    /// Discovery order
    pub first_seen: u64,
}

impl CardState {
    #[inline]
    pub fn is_revealed(&self) -> bool {
        self.face_up && self.identity.is_known()
    }
}

/// State change of a single region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Discovered {
        region: Rect,
        identity: CardId,
        face_up: bool,
    },
    FlippedUp {
        region: Rect,
        identity: CardId,
    },
    FlippedDown {
        region: Rect,
        identity: CardId,
    },
    /// Same orientation, different identity than last time
    Relabeled {
        region: Rect,
        from: CardId,
        to: CardId,
    },
}

/// Two face-up regions showing the same identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
    pub first: Rect,
    pub second: Rect,
    pub identity: CardId,
}

/// Result of one `ingest` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub transitions: Vec<Transition>,
    pub revealed: Vec<CardState>,
    pub available_matches: Vec<MatchPair>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStats {
    pub total_moves: u32,
    pub matches_made: u32,
    pub cards_remaining: usize,
    pub revealed_count: usize,
    pub known_identity_count: usize,
}

/// Authoritative map from region to card state for one game.
///
/// The revealed index holds exactly the regions whose state is face up with a
/// known identity, bucketed by identity, in the order they were revealed.
/// Empty buckets are removed.
pub struct BoardMemory {
    config: MemoryConfig,
    cards: FxHashMap<Rect, CardState>,
    revealed_index: BTreeMap<CardId, Vec<Rect>>,
    total_moves: u32,
    matches_made: u32,
    next_seq: u64,
    epoch: Instant,
}

impl Default for BoardMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl BoardMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            cards: FxHashMap::default(),
            revealed_index: BTreeMap::new(),
            total_moves: 0,
            matches_made: 0,
            next_seq: 0,
            epoch: Instant::now(),
        }
    }

    /// Absorb one observation batch and report what changed. Transitions
    /// come out in region order.
    pub fn ingest(&mut self, observations: &[CardObservation]) -> IngestReport {
        let now = self.epoch.elapsed().as_millis() as u64;

        // Collapse duplicate regions, last write wins
        let mut batch: Vec<CardObservation> = Vec::with_capacity(observations.len());
        let mut slot: FxHashMap<Rect, usize> = FxHashMap::default();
        for obs in observations {
            let region = self.resolve_region(&obs.region);
            let obs = CardObservation { region, ..*obs };
            match slot.get(&region) {
                Some(&i) => {
                    warn!("Region {} reported twice in one batch, keeping the last", region);
                    batch[i] = obs;
                }
                None => {
                    slot.insert(region, batch.len());
                    batch.push(obs);
                }
            }
        }

        // Region order within a batch, so the host's listing order never
        // decides which of two cards revealed together is "first"
        batch.sort_by_key(|obs| obs.region.sort_key());

        let mut transitions = Vec::new();
        for obs in &batch {
            if let Some(t) = self.apply(obs, now) {
                debug!("{:?}", t);
                transitions.push(t);
            }
        }

        IngestReport {
            transitions,
            revealed: self.revealed(),
            available_matches: self.available_matches(),
        }
    }

    /// Map an observed region onto a tracked one when snapping is enabled.
    fn resolve_region(&self, region: &Rect) -> Rect {
        if self.cards.contains_key(region) || self.config.snap_tolerance == 0 {
            return *region;
        }
        self.cards
            .keys()
            .filter(|tracked| tracked.is_similar(region, self.config.snap_tolerance))
            .min_by_key(|tracked| tracked.sort_key())
            .copied()
            .unwrap_or(*region)
    }

    fn apply(&mut self, obs: &CardObservation, now: u64) -> Option<Transition> {
        let confidence = if obs.confidence.is_nan() {
            warn!("NaN confidence for {}, treating as 0", obs.region);
            0.0
        } else {
            obs.confidence.clamp(0.0, 1.0)
        };

        let region = obs.region;
        let previous = self.cards.get(&region).copied();

        // A back-side report does not erase an identity learned earlier
        let identity = match previous {
            Some(prev) if obs.identity.is_back() => prev.identity,
            _ => obs.identity,
        };

        let (first_seen, transition) = match previous {
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (
                    seq,
                    Some(Transition::Discovered {
                        region,
                        identity,
                        face_up: obs.face_up,
                    }),
                )
            }
            Some(prev) => {
                let transition = match (prev.face_up, obs.face_up) {
                    (false, true) => Some(Transition::FlippedUp { region, identity }),
                    (true, false) => Some(Transition::FlippedDown {
                        region,
                        identity: prev.identity,
                    }),
                    _ if prev.identity != identity => Some(Transition::Relabeled {
                        region,
                        from: prev.identity,
                        to: identity,
                    }),
                    _ => None,
                };
                (prev.first_seen, transition)
            }
        };

        let state = CardState {
            region,
            identity,
            face_up: obs.face_up,
            confidence,
            last_seen_ms: now,
            first_seen,
        };
        // Keep reveal order stable: only drop the old entry if it no longer holds
        if let Some(prev) = previous.filter(CardState::is_revealed) {
            if !state.is_revealed() || prev.identity != identity {
                self.unindex(prev.identity, &region);
            }
        }
        if state.is_revealed() {
            self.index(identity, region);
        }
        self.cards.insert(region, state);

        transition
    }

    fn index(&mut self, identity: CardId, region: Rect) {
        let bucket = self.revealed_index.entry(identity).or_default();
        if !bucket.contains(&region) {
            bucket.push(region);
        }
    }

    fn unindex(&mut self, identity: CardId, region: &Rect) {
        if let Some(bucket) = self.revealed_index.get_mut(&identity) {
            bucket.retain(|r| r != region);
            if bucket.is_empty() {
                self.revealed_index.remove(&identity);
            }
        }
    }

    /// Face-up cards with a known identity, in region order.
    pub fn revealed(&self) -> Vec<CardState> {
        let mut revealed: Vec<CardState> = self
            .cards
            .values()
            .filter(|c| c.is_revealed())
            .copied()
            .collect();
        revealed.sort_by_key(|c| c.region.sort_key());
        revealed
    }

    /// Every pair of face-up regions sharing an identity: identity ascending,
    /// then reveal order within the identity. Regions revealed in the same
    /// batch count as revealed in region order.
    pub fn available_matches(&self) -> Vec<MatchPair> {
        let mut pairs = Vec::new();
        for (&identity, regions) in &self.revealed_index {
            if regions.len() < 2 {
                continue;
            }
            if regions.len() > 2 {
                warn!(
                    "{} face-up cards share identity {}, likely a detector error",
                    regions.len(),
                    identity
                );
            }
            for i in 0..regions.len() {
                for j in i + 1..regions.len() {
                    pairs.push(MatchPair {
                        first: regions[i],
                        second: regions[j],
                        identity,
                    });
                }
            }
        }
        pairs
    }

    /// Face-down cards in region order.
    pub fn face_down_cards(&self) -> Vec<CardState> {
        let mut cards: Vec<CardState> = self
            .cards
            .values()
            .filter(|c| !c.face_up)
            .copied()
            .collect();
        cards.sort_by_key(|c| c.region.sort_key());
        cards
    }

    pub fn card(&self, region: &Rect) -> Option<&CardState> {
        self.cards.get(region)
    }

    /// The pair was tapped and cleared from the board. Returns how many of the
    /// two regions were tracked.
    pub fn record_match_committed(&mut self, first: Rect, second: Rect) -> usize {
        let mut removed = 0;
        let regions: FxHashSet<Rect> = [first, second].into_iter().collect();
        for region in regions {
            let region = self.resolve_region(&region);
            if let Some(state) = self.cards.remove(&region) {
                if state.is_revealed() {
                    self.unindex(state.identity, &region);
                }
                removed += 1;
            }
        }

        self.matches_made += 1;
        self.total_moves += 1;
        debug!(
            "Match committed {} + {} ({} tracked), {} matches in {} moves",
            first, second, removed, self.matches_made, self.total_moves
        );
        removed
    }

    /// A flip (not a match) was carried out.
    pub fn record_move_made(&mut self) {
        self.total_moves += 1;
    }

    /// No card with a known identity is left on the board.
    pub fn is_complete(&self) -> bool {
        !self.cards.values().any(|c| c.identity.is_known())
    }

    /// Forget everything, for a new game.
    pub fn reset(&mut self) {
        self.cards.clear();
        self.revealed_index.clear();
        self.total_moves = 0;
        self.matches_made = 0;
        self.next_seq = 0;
    }

    pub fn stats(&self) -> BoardStats {
        let known: FxHashSet<CardId> = self
            .cards
            .values()
            .map(|c| c.identity)
            .filter(CardId::is_known)
            .collect();

        BoardStats {
            total_moves: self.total_moves,
            matches_made: self.matches_made,
            cards_remaining: self.cards.len(),
            revealed_count: self.revealed_index.values().map(Vec::len).sum(),
            known_identity_count: known.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    #[cfg(test)]
    fn index_is_consistent(&self) -> bool {
        let indexed: usize = self.revealed_index.values().map(Vec::len).sum();
        let revealed = self.cards.values().filter(|c| c.is_revealed()).count();

        indexed == revealed
            && self.revealed_index.iter().all(|(id, bucket)| {
                id.is_known()
                    && !bucket.is_empty()
                    && bucket.iter().all(|r| {
                        self.cards
                            .get(r)
                            .map_or(false, |c| c.face_up && c.identity == *id)
                    })
            })
    }
}
