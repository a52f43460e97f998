//! Strategy Engine - next move for the memory card game
//!
//! Provides:
//! - Known-pair commits (always first priority)
//! - Strategic flips toward a remembered partner of the revealed card
//! - Deterministic exploration of unknown cards

use crate::memory_engine::{BoardMemory, CardState};
use crate::observation::{CardId, Rect};
use log::debug;
use serde::{Deserialize, Serialize};

/// Why a single card is being flipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipReason {
    /// Its remembered identity matches the card currently revealed
    Strategic,
    /// One card is revealed but its partner has not been seen yet
    Unknown,
    /// Nothing revealed; opening a new turn
    Explore,
}

/// What the host should tap next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Commit {
        first: Rect,
        second: Rect,
        identity: CardId,
    },
    Flip {
        region: Rect,
        reason: FlipReason,
    },
}

impl Action {
    /// Tap targets in order (centre of each region).
    pub fn tap_points(&self) -> Vec<(i32, i32)> {
        match self {
            Action::Commit { first, second, .. } => vec![
                (first.center_x(), first.center_y()),
                (second.center_x(), second.center_y()),
            ],
            Action::Flip { region, .. } => vec![(region.center_x(), region.center_y())],
        }
    }
}

/// Move selection over the board memory. Pure: never mutates, never fails.
pub struct MoveSelector;

impl MoveSelector {
    pub fn next_move(memory: &BoardMemory) -> Option<Action> {
        if let Some(pair) = memory.available_matches().into_iter().next() {
            debug!("Committing {} pair {} + {}", pair.identity, pair.first, pair.second);
            return Some(Action::Commit {
                first: pair.first,
                second: pair.second,
                identity: pair.identity,
            });
        }

        let revealed = memory.revealed();
        let face_down = memory.face_down_cards();

        let action = match revealed.as_slice() {
            [] => face_down.first().map(|card| Action::Flip {
                region: card.region,
                reason: FlipReason::Explore,
            }),
            [open] => Self::partner_flip(open, &face_down),
            _ => {
                debug!("{} cards revealed without a pair, waiting", revealed.len());
                None
            }
        };

        if let Some(action) = &action {
            debug!("Next move: {:?}", action);
        }
        action
    }

    fn partner_flip(open: &CardState, face_down: &[CardState]) -> Option<Action> {
        let candidates = || face_down.iter().filter(|c| c.region != open.region);

        if let Some(card) = candidates().find(|c| c.identity == open.identity) {
            return Some(Action::Flip {
                region: card.region,
                reason: FlipReason::Strategic,
            });
        }

        candidates()
            .find(|c| c.identity.is_back())
            .or_else(|| candidates().next())
            .map(|card| Action::Flip {
                region: card.region,
                reason: FlipReason::Unknown,
            })
    }
}
