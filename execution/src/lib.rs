//! Ludo execution layer.
//!
//! This crate contains the deterministic referee: board geometry, match state, the pure rules
//! engine and the per-match turn controller ([`TurnController`]) driven by the match server.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside execution. Deadlines are described by
//!   [`TurnController::timer_plan`] and fired by the caller.
//! - Do not use ambient randomness; every roll comes from the injected [`DiceSource`].
//! - Avoid iteration order of hash-based collections influencing outputs.
//!
//! ## Atomicity
//! Controller operations validate before mutating and run on a working copy, so a rejected
//! action leaves the match exactly as it was. Internal faults finish the affected match and
//! never propagate to the caller as panics.
//!
//! ## Minimal match (example)
//! ```rust
//! use std::sync::Arc;
//! use ludo_execution::{Rules, SeededDice, TurnController, TurnPolicy};
//! use ludo_types::{MatchStatus, PlayerId, Ruleset};
//!
//! let rules = Arc::new(Rules::new(Ruleset::classic()).unwrap());
//! let mut game = TurnController::new(
//!     "table-1",
//!     2,
//!     rules,
//!     TurnPolicy::default(),
//!     Box::new(SeededDice::new(7)),
//! )
//! .unwrap();
//! let alice = game.join("alice-token", PlayerId::new("alice")).unwrap();
//! game.join("bob-token", PlayerId::new("bob")).unwrap();
//! assert_eq!(game.snapshot().status, MatchStatus::InProgress);
//! let events = game.roll_dice(&alice.player_id).unwrap();
//! assert!(!events.is_empty());
//! ```

pub mod controller;
pub mod dice;
pub mod geometry;
pub mod rules;
pub mod state;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use controller::{InvalidSeatCount, Joined, TimerCause, TurnController, TurnPolicy, TurnTimer};
pub use dice::{DiceSource, SeededDice};
pub use geometry::BoardGeometry;
pub use rules::{MoveOutcome, Rules, RulesError};
pub use state::{InvariantViolation, MatchState, Seat, SeatedPlayer};
