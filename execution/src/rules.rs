//! Pure rule functions over a [MatchState].
//!
//! Nothing here performs I/O or decides phases: the controller sequences calls and owns the
//! turn state machine. Every check that can reject an action runs before the first write, so a
//! rejected call leaves the state untouched.

use crate::{dice::DiceSource, geometry::BoardGeometry, state::MatchState};
use ludo_types::{
    ActionError, LegalMove, MatchStatus, PawnId, PawnPosition, PawnRef, Ruleset, RulesetError,
    TurnPhase, DICE_FACES, PAWNS_PER_COLOR,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RulesError {
    #[error(transparent)]
    Action(#[from] ActionError),
    /// Internal inconsistency. Fatal to the match, never to the process.
    #[error("engine fault: {0}")]
    Fault(String),
}

/// A validated ruleset and the geometry derived from it.
///
/// Immutable once built; shared by every match created with it.
#[derive(Clone, Debug)]
pub struct Rules {
    ruleset: Ruleset,
    geometry: BoardGeometry,
}

impl Rules {
    pub fn new(ruleset: Ruleset) -> Result<Self, RulesetError> {
        let geometry = BoardGeometry::new(&ruleset)?;
        Ok(Self { ruleset, geometry })
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn geometry(&self) -> &BoardGeometry {
        &self.geometry
    }
}

/// Result of relocating one pawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub pawn_id: PawnId,
    pub from: PawnPosition,
    pub to: PawnPosition,
    /// Absolute track cell of `to`, when on the shared track.
    pub cell: Option<u8>,
    pub captured: Vec<PawnRef>,
    pub reached_goal: bool,
    pub extra_turn: bool,
    pub won: bool,
}

fn ensure_running(state: &MatchState) -> Result<(), ActionError> {
    match state.status {
        MatchStatus::Finished => Err(ActionError::MatchOver),
        MatchStatus::WaitingForPlayers => Err(ActionError::MatchNotStarted),
        MatchStatus::InProgress => Ok(()),
    }
}

/// Rolls for `seat`, which must hold the turn and not have rolled yet.
pub fn roll_dice(
    state: &MatchState,
    seat: usize,
    dice: &mut dyn DiceSource,
) -> Result<u8, RulesError> {
    ensure_running(state)?;
    if seat != state.turn_index {
        return Err(ActionError::NotYourTurn.into());
    }
    if state.phase != TurnPhase::AwaitingRoll {
        return Err(ActionError::AlreadyRolled.into());
    }
    let value = dice.roll();
    if !(1..=DICE_FACES).contains(&value) {
        return Err(RulesError::Fault(format!("dice produced {value}")));
    }
    Ok(value)
}

/// Where `pawn_id` of `seat` would land with `dice_value`, if it may move at all.
pub fn destination(
    rules: &Rules,
    state: &MatchState,
    seat: usize,
    pawn_id: PawnId,
    dice_value: u8,
) -> Result<Option<PawnPosition>, RulesError> {
    let geometry = rules.geometry();
    let pawns = &state.seats[seat].pawns;
    let position = *pawns
        .get(pawn_id as usize)
        .ok_or(ActionError::StaleOrInvalidChoice)?;
    if !geometry.is_valid_position(position) {
        return Err(RulesError::Fault(format!(
            "pawn {pawn_id} of seat {seat} at {position:?}"
        )));
    }

    let target = match geometry.progress_of(position) {
        None if dice_value == rules.ruleset().release_value => Some(PawnPosition::Track { progress: 0 }),
        None => None,
        Some(_) if position.is_goal() => None,
        Some(progress) => geometry.position_for_progress(progress as u16 + dice_value as u16),
    };

    // A home stretch cell holds one pawn.
    Ok(target.filter(|to| match to {
        PawnPosition::HomeStretch { .. } => !pawns.contains(to),
        _ => true,
    }))
}

/// Candidate moves for `seat` with `dice_value`, in pawn order. May be empty.
pub fn compute_legal_moves(
    rules: &Rules,
    state: &MatchState,
    seat: usize,
    dice_value: u8,
) -> Result<Vec<LegalMove>, RulesError> {
    let mut moves = Vec::with_capacity(PAWNS_PER_COLOR);
    for pawn_id in 0..PAWNS_PER_COLOR as PawnId {
        if let Some(to) = destination(rules, state, seat, pawn_id, dice_value)? {
            moves.push(LegalMove {
                pawn_id,
                from: state.seats[seat].pawns[pawn_id as usize],
                to,
            });
        }
    }
    Ok(moves)
}

/// Applies the chosen pawn move from the last computed candidate set.
///
/// Relocates the pawn, captures unprotected opponents on the landing cell and sets
/// `extra_turn_pending`. Turn advancement is left to the caller.
pub fn apply_move(
    rules: &Rules,
    state: &mut MatchState,
    seat: usize,
    pawn_id: PawnId,
) -> Result<MoveOutcome, RulesError> {
    ensure_running(state)?;
    if seat != state.turn_index {
        return Err(ActionError::NotYourTurn.into());
    }
    let dice_value = match (state.phase, state.dice_value) {
        (TurnPhase::AwaitingMoveChoice, Some(value)) => value,
        // A choice arriving after this player's earlier move resolved.
        _ if state.moves_this_turn > 0 => return Err(ActionError::StaleOrInvalidChoice.into()),
        _ => return Err(ActionError::NoActiveRoll.into()),
    };
    let Some(chosen) = state
        .legal_moves
        .iter()
        .find(|candidate| candidate.pawn_id == pawn_id)
        .copied()
    else {
        return Err(ActionError::StaleOrInvalidChoice.into());
    };
    let to = destination(rules, state, seat, pawn_id, dice_value)?;
    if to != Some(chosen.to) {
        return Err(RulesError::Fault(format!(
            "offered move {chosen:?} no longer matches destination {to:?}"
        )));
    }

    let geometry = rules.geometry();
    let ruleset = rules.ruleset();
    let color = state.seats[seat].color;
    let cell = match chosen.to {
        PawnPosition::Track { progress } => Some(
            geometry
                .checked_absolute(color, progress)
                .ok_or_else(|| RulesError::Fault(format!("progress {progress} off track")))?,
        ),
        _ => None,
    };

    state.seats[seat].pawns[pawn_id as usize] = chosen.to;

    let mut captured = Vec::new();
    if let Some(cell) = cell {
        for (index, other) in state.seats.iter_mut().enumerate() {
            if index == seat || geometry.protects(other.color, cell) {
                continue;
            }
            for (other_id, position) in other.pawns.iter_mut().enumerate() {
                if geometry.cell_of(other.color, *position) == Some(cell) {
                    *position = PawnPosition::Home;
                    captured.push(PawnRef {
                        color: other.color,
                        pawn_id: other_id as PawnId,
                    });
                }
            }
        }
    }

    let reached_goal = chosen.to.is_goal();
    let extra_turn = (dice_value == ruleset.release_value && ruleset.extra_turn_on_release_value)
        || (!captured.is_empty() && ruleset.extra_turn_on_capture)
        || (reached_goal && ruleset.extra_turn_on_goal);
    state.extra_turn_pending = extra_turn;
    let won = has_won(state, seat);

    debug!(
        match_id = %state.match_id,
        %color,
        pawn_id,
        dice_value,
        captured = captured.len(),
        extra_turn,
        won,
        "applied move"
    );
    Ok(MoveOutcome {
        pawn_id,
        from: chosen.from,
        to: chosen.to,
        cell,
        captured,
        reached_goal,
        extra_turn,
        won,
    })
}

/// Whether a pass with `dice_value` still grants another roll.
pub fn pass_grants_extra_turn(rules: &Rules, dice_value: u8) -> bool {
    let ruleset = rules.ruleset();
    dice_value == ruleset.release_value && ruleset.extra_turn_on_release_value
}

/// Next active seat after `from` in turn order, wrapping. Returns `from` itself only when it
/// is the sole active seat.
pub fn next_active_seat(state: &MatchState, from: usize) -> Option<usize> {
    let count = state.seats.len();
    (1..=count)
        .map(|step| (from + step) % count)
        .find(|index| state.seats[*index].is_active())
}

pub fn has_won(state: &MatchState, seat: usize) -> bool {
    state.seats[seat].pawns.iter().all(PawnPosition::is_goal)
}
