use serde::{Deserialize, Serialize};

/// What happens when a turn deadline passes without the current player acting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Skip the rest of the turn.
    Pass,
    /// Roll if needed, then play the first legal move in pawn order.
    AutoPlay,
    /// Remove the player from the match.
    Forfeit,
}
