use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an action was refused.
///
/// Every variant is recoverable: a refused action leaves match state exactly as it was and is
/// reported to the acting connection only.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionError {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("dice already rolled this turn")]
    AlreadyRolled,
    #[error("no dice roll is awaiting a move")]
    NoActiveRoll,
    #[error("move is not in the current legal set")]
    StaleOrInvalidChoice,
    #[error("match is over")]
    MatchOver,
    #[error("match not found")]
    MatchNotFound,
    #[error("player is not seated in this match")]
    PlayerNotInMatch,
    #[error("match is still waiting for players")]
    MatchNotStarted,
    #[error("match has no free seat")]
    MatchFull,
    #[error("connection already joined a match")]
    AlreadyJoined,
    #[error("message could not be parsed")]
    InvalidMessage,
}

impl ActionError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::NotYourTurn => "NOT_YOUR_TURN",
            ActionError::AlreadyRolled => "ALREADY_ROLLED",
            ActionError::NoActiveRoll => "NO_ACTIVE_ROLL",
            ActionError::StaleOrInvalidChoice => "STALE_OR_INVALID_CHOICE",
            ActionError::MatchOver => "MATCH_OVER",
            ActionError::MatchNotFound => "MATCH_NOT_FOUND",
            ActionError::PlayerNotInMatch => "PLAYER_NOT_IN_MATCH",
            ActionError::MatchNotStarted => "MATCH_NOT_STARTED",
            ActionError::MatchFull => "MATCH_FULL",
            ActionError::AlreadyJoined => "ALREADY_JOINED",
            ActionError::InvalidMessage => "INVALID_MESSAGE",
        }
    }

    /// Whether the client should discard its local view and request a fresh snapshot.
    pub fn resync(&self) -> bool {
        matches!(self, ActionError::StaleOrInvalidChoice)
    }

    /// Whether the connection must (re)join before sending further actions.
    pub fn requires_rejoin(&self) -> bool {
        matches!(
            self,
            ActionError::MatchNotFound | ActionError::PlayerNotInMatch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_serde_names() {
        for err in [
            ActionError::NotYourTurn,
            ActionError::AlreadyRolled,
            ActionError::NoActiveRoll,
            ActionError::StaleOrInvalidChoice,
            ActionError::MatchOver,
            ActionError::MatchNotFound,
            ActionError::PlayerNotInMatch,
            ActionError::MatchNotStarted,
            ActionError::MatchFull,
            ActionError::AlreadyJoined,
            ActionError::InvalidMessage,
        ] {
            let json = serde_json::to_string(&err).unwrap();
            assert_eq!(json, format!("\"{}\"", err.code()));
        }
    }

    #[test]
    fn only_desync_requests_resync() {
        assert!(ActionError::StaleOrInvalidChoice.resync());
        assert!(!ActionError::NotYourTurn.resync());
        assert!(ActionError::MatchNotFound.requires_rejoin());
        assert!(!ActionError::MatchOver.requires_rejoin());
    }
}
