//! Ludo domain and wire types.
//!
//! Shared by the deterministic execution layer and the match server: colors, board rulesets,
//! pawn positions, the websocket protocol and the history records written after a match ends.

pub mod codec;
mod color;
mod error;
pub mod protocol;
mod policy;
mod position;
pub mod record;
mod ruleset;

pub use color::Color;
pub use error::ActionError;
pub use policy::TimeoutPolicy;
pub use position::{MatchId, PawnId, PawnPosition, PawnRef, PlayerId};
pub use protocol::{
    ClientMessage, FinishReason, LegalMove, MatchEvent, MatchSnapshot, MatchStatus, PassReason,
    SeatView, ServerResponse, TurnPhase,
};
pub use record::{MatchRecord, SeatResult};
pub use ruleset::{Ruleset, RulesetError, RulesetPreset, StartCellPolicy};

/// Pawns owned by each color.
pub const PAWNS_PER_COLOR: usize = 4;

/// Faces on the single die.
pub const DICE_FACES: u8 = 6;

/// Fewest seats a match can be created with.
pub const MIN_SEATS: usize = 2;

/// Most seats a match can be created with.
pub const MAX_SEATS: usize = 4;
