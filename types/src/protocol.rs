//! Websocket protocol between clients and the match server.
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames never name a player: the
//! server binds a connection to `(matchId, playerId)` on `join` and scopes every later action
//! to that binding.

use serde::{Deserialize, Serialize};

use crate::{ActionError, Color, MatchId, PawnId, PawnPosition, PawnRef, PlayerId, PAWNS_PER_COLOR};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default)]
        request_id: Option<String>,
        match_id: MatchId,
        player_token: String,
    },
    #[serde(rename_all = "camelCase")]
    RollDice {
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChooseMove {
        #[serde(default)]
        request_id: Option<String>,
        pawn_id: PawnId,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Resync {
        #[serde(default)]
        request_id: Option<String>,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Join { request_id, .. }
            | ClientMessage::RollDice { request_id }
            | ClientMessage::ChooseMove { request_id, .. }
            | ClientMessage::Leave { request_id }
            | ClientMessage::Resync { request_id } => request_id.as_deref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    WaitingForPlayers,
    InProgress,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnPhase {
    AwaitingPlayers,
    AwaitingRoll,
    AwaitingMoveChoice,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishReason {
    /// A player brought every pawn to the goal.
    AllPawnsHome,
    /// Everyone else forfeited.
    LastPlayerStanding,
    /// Every seated player left.
    Abandoned,
    /// The engine hit an internal inconsistency and stopped the match.
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassReason {
    NoLegalMove,
    Timeout,
}

/// One candidate move offered after a roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalMove {
    pub pawn_id: PawnId,
    pub from: PawnPosition,
    pub to: PawnPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    pub color: Color,
    pub connected: bool,
    pub forfeited: bool,
    pub pawns: [PawnPosition; PAWNS_PER_COLOR],
}

/// Consistent point-in-time copy of a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub match_id: MatchId,
    pub ruleset: String,
    pub status: MatchStatus,
    pub phase: TurnPhase,
    pub seats: Vec<SeatView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_player: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice_value: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub legal_moves: Vec<LegalMove>,
    pub extra_turn_pending: bool,
    pub turn_serial: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// State changes broadcast to every connection of a match, in resolution order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MatchEvent {
    MatchSnapshot(MatchSnapshot),
    #[serde(rename_all = "camelCase")]
    DiceRolled {
        player_id: PlayerId,
        color: Color,
        value: u8,
    },
    #[serde(rename_all = "camelCase")]
    LegalMoves {
        player_id: PlayerId,
        pawn_ids: Vec<PawnId>,
        moves: Vec<LegalMove>,
    },
    #[serde(rename_all = "camelCase")]
    PawnMoved {
        player_id: PlayerId,
        color: Color,
        pawn_id: PawnId,
        from: PawnPosition,
        to: PawnPosition,
        /// Absolute track cell of `to`, when it is on the shared track.
        #[serde(skip_serializing_if = "Option::is_none")]
        cell: Option<u8>,
        captured: Vec<PawnRef>,
    },
    #[serde(rename_all = "camelCase")]
    TurnChanged { player_id: PlayerId, color: Color },
    #[serde(rename_all = "camelCase")]
    TurnPassed {
        player_id: PlayerId,
        color: Color,
        reason: PassReason,
    },
    #[serde(rename_all = "camelCase")]
    MatchFinished {
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_id: Option<PlayerId>,
        reason: FinishReason,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: PlayerId, color: Color },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    PlayerReconnected { player_id: PlayerId },
}

/// Replies addressed to the acting connection only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerResponse {
    #[serde(rename_all = "camelCase")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        match_id: MatchId,
        player_id: PlayerId,
        color: Color,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
        resync: bool,
    },
}

impl ServerResponse {
    pub fn error(request_id: Option<String>, err: ActionError) -> Self {
        ServerResponse::Error {
            request_id,
            code: err.code().to_string(),
            message: err.to_string(),
            resync: err.resync(),
        }
    }
}
