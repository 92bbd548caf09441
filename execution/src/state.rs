//! In-memory state of one match.
//!
//! A [MatchState] is owned by exactly one controller and is only mutated from inside its
//! serialization context. Readers get a [MatchSnapshot] copy instead of a reference.

use crate::geometry::BoardGeometry;
use ludo_types::{
    Color, FinishReason, LegalMove, MatchId, MatchSnapshot, MatchStatus, PawnId, PawnPosition,
    PlayerId, SeatView, TurnPhase, PAWNS_PER_COLOR,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// A player holding a seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatedPlayer {
    pub id: PlayerId,
    token: String,
    pub connected: bool,
    pub forfeited: bool,
}

impl SeatedPlayer {
    pub fn new(id: PlayerId, token: impl Into<String>) -> Self {
        Self {
            id,
            token: token.into(),
            connected: true,
            forfeited: false,
        }
    }

    /// Private join token. Never leaves the server.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seat {
    pub color: Color,
    pub player: Option<SeatedPlayer>,
    pub pawns: [PawnPosition; PAWNS_PER_COLOR],
}

impl Seat {
    pub fn new(color: Color) -> Self {
        Self {
            color,
            player: None,
            pawns: [PawnPosition::Home; PAWNS_PER_COLOR],
        }
    }

    /// Seated and not forfeited.
    pub fn is_active(&self) -> bool {
        self.player.as_ref().is_some_and(|player| !player.forfeited)
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player.as_ref().map(|player| &player.id)
    }

    pub fn pawns_in_goal(&self) -> u8 {
        self.pawns.iter().filter(|pawn| pawn.is_goal()).count() as u8
    }

    fn view(&self) -> SeatView {
        SeatView {
            player_id: self.player_id().cloned(),
            color: self.color,
            connected: self.player.as_ref().is_some_and(|player| player.connected),
            forfeited: self.player.as_ref().is_some_and(|player| player.forfeited),
            pawns: self.pawns,
        }
    }
}

/// Broken internal consistency. Always a bug in the engine, never a player error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("status {status:?} does not allow phase {phase:?}")]
    PhaseMismatch {
        status: MatchStatus,
        phase: TurnPhase,
    },
    #[error("turn index {0} does not point at an active seat")]
    TurnOnInactiveSeat(usize),
    #[error("dice value and legal moves disagree with phase {0:?}")]
    RollStateMismatch(TurnPhase),
    #[error("pawn {color}/{pawn_id} is at an unreachable position {position:?}")]
    InvalidPosition {
        color: Color,
        pawn_id: PawnId,
        position: PawnPosition,
    },
    #[error("home stretch cell {index} of {color} holds more than one pawn")]
    CrowdedHomeStretch { color: Color, index: u8 },
    #[error("forfeited or empty seat {0} still has pawns in play")]
    IdlePawnInPlay(Color),
    #[error("track cell {0} holds unprotected pawns of more than one color")]
    ContestedCell(u8),
    #[error("winner and finish reason disagree")]
    WinnerMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchState {
    pub match_id: MatchId,
    pub seats: Vec<Seat>,
    pub status: MatchStatus,
    pub phase: TurnPhase,
    /// Seat whose turn it is. Meaningful only while in progress.
    pub turn_index: usize,
    pub dice_value: Option<u8>,
    pub legal_moves: Vec<LegalMove>,
    pub extra_turn_pending: bool,
    /// Bumped on every phase change. Keys turn timers.
    pub turn_serial: u64,
    /// Moves applied since the current player's turn began, extra turns included.
    pub moves_this_turn: u32,
    /// Rolls resolved over the whole match.
    pub turns: u64,
    pub winner: Option<usize>,
    pub finish_reason: Option<FinishReason>,
}

impl MatchState {
    /// Empty lobby with one seat per color in `colors`, in turn order.
    pub fn new(match_id: impl Into<MatchId>, colors: &[Color]) -> Self {
        Self {
            match_id: match_id.into(),
            seats: colors.iter().copied().map(Seat::new).collect(),
            status: MatchStatus::WaitingForPlayers,
            phase: TurnPhase::AwaitingPlayers,
            turn_index: 0,
            dice_value: None,
            legal_moves: Vec::new(),
            extra_turn_pending: false,
            turn_serial: 0,
            moves_this_turn: 0,
            turns: 0,
            winner: None,
            finish_reason: None,
        }
    }

    pub fn current_seat(&self) -> &Seat {
        &self.seats[self.turn_index]
    }

    pub fn current_player(&self) -> Option<&PlayerId> {
        match self.status {
            MatchStatus::InProgress => self.current_seat().player_id(),
            _ => None,
        }
    }

    pub fn seat_of(&self, player_id: &PlayerId) -> Option<usize> {
        self.seats
            .iter()
            .position(|seat| seat.player_id() == Some(player_id))
    }

    pub fn seat_of_token(&self, token: &str) -> Option<usize> {
        self.seats.iter().position(|seat| {
            seat.player
                .as_ref()
                .is_some_and(|player| player.token() == token)
        })
    }

    pub fn seat_of_color(&self, color: Color) -> Option<usize> {
        self.seats.iter().position(|seat| seat.color == color)
    }

    pub fn active_seats(&self) -> impl Iterator<Item = usize> + '_ {
        self.seats
            .iter()
            .enumerate()
            .filter(|(_, seat)| seat.is_active())
            .map(|(index, _)| index)
    }

    pub fn open_seat(&self) -> Option<usize> {
        self.seats.iter().position(|seat| seat.player.is_none())
    }

    pub fn is_full(&self) -> bool {
        self.open_seat().is_none()
    }

    pub fn seated_count(&self) -> usize {
        self.seats.iter().filter(|seat| seat.player.is_some()).count()
    }

    pub fn winner_id(&self) -> Option<&PlayerId> {
        self.winner.and_then(|seat| self.seats[seat].player_id())
    }

    /// Clears the roll and starts a new phase.
    pub fn enter_phase(&mut self, phase: TurnPhase) {
        self.phase = phase;
        if phase != TurnPhase::AwaitingMoveChoice {
            self.dice_value = None;
            self.legal_moves.clear();
        }
        self.turn_serial += 1;
    }

    pub fn snapshot(&self, ruleset: &str) -> MatchSnapshot {
        MatchSnapshot {
            match_id: self.match_id.clone(),
            ruleset: ruleset.to_string(),
            status: self.status,
            phase: self.phase,
            seats: self.seats.iter().map(Seat::view).collect(),
            current_player: self.current_player().cloned(),
            dice_value: self.dice_value,
            legal_moves: self.legal_moves.clone(),
            extra_turn_pending: self.extra_turn_pending,
            turn_serial: self.turn_serial,
            winner_id: self.winner_id().cloned(),
            finish_reason: self.finish_reason,
        }
    }

    pub fn check_invariants(&self, geometry: &BoardGeometry) -> Result<(), InvariantViolation> {
        let phase_ok = matches!(
            (self.status, self.phase),
            (MatchStatus::WaitingForPlayers, TurnPhase::AwaitingPlayers)
                | (MatchStatus::InProgress, TurnPhase::AwaitingRoll)
                | (MatchStatus::InProgress, TurnPhase::AwaitingMoveChoice)
                | (MatchStatus::Finished, TurnPhase::Finished)
        );
        if !phase_ok {
            return Err(InvariantViolation::PhaseMismatch {
                status: self.status,
                phase: self.phase,
            });
        }

        if self.status == MatchStatus::InProgress
            && !self
                .seats
                .get(self.turn_index)
                .is_some_and(Seat::is_active)
        {
            return Err(InvariantViolation::TurnOnInactiveSeat(self.turn_index));
        }

        let choosing = self.phase == TurnPhase::AwaitingMoveChoice;
        if choosing != self.dice_value.is_some() || choosing == self.legal_moves.is_empty() {
            return Err(InvariantViolation::RollStateMismatch(self.phase));
        }

        let mut unprotected: BTreeMap<u8, Color> = BTreeMap::new();
        for seat in &self.seats {
            let mut stretch = Vec::new();
            for (pawn_id, position) in seat.pawns.iter().enumerate() {
                let pawn_id = pawn_id as PawnId;
                if !geometry.is_valid_position(*position) {
                    return Err(InvariantViolation::InvalidPosition {
                        color: seat.color,
                        pawn_id,
                        position: *position,
                    });
                }
                match position {
                    PawnPosition::Home | PawnPosition::Goal => {}
                    _ if !seat.is_active() => {
                        return Err(InvariantViolation::IdlePawnInPlay(seat.color));
                    }
                    PawnPosition::HomeStretch { index } => {
                        if stretch.contains(index) {
                            return Err(InvariantViolation::CrowdedHomeStretch {
                                color: seat.color,
                                index: *index,
                            });
                        }
                        stretch.push(*index);
                    }
                    PawnPosition::Track { .. } => {
                        let Some(cell) = geometry.cell_of(seat.color, *position) else {
                            continue;
                        };
                        if geometry.protects(seat.color, cell) {
                            continue;
                        }
                        match unprotected.insert(cell, seat.color) {
                            Some(other) if other != seat.color => {
                                return Err(InvariantViolation::ContestedCell(cell));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        let winner_ok = match self.finish_reason {
            Some(FinishReason::AllPawnsHome) => self
                .winner
                .is_some_and(|seat| self.seats[seat].pawns_in_goal() as usize == PAWNS_PER_COLOR),
            Some(FinishReason::LastPlayerStanding) => {
                self.winner.is_some_and(|seat| self.seats[seat].is_active())
            }
            Some(FinishReason::Abandoned) | Some(FinishReason::Fault) | None => {
                self.winner.is_none()
            }
        };
        if !winner_ok || (self.status == MatchStatus::Finished) != self.finish_reason.is_some() {
            return Err(InvariantViolation::WinnerMismatch);
        }
        Ok(())
    }
}
