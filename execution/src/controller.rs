//! Turn/session state machine for one match.
//!
//! ```text
//! AwaitingPlayers --(last seat filled)--> AwaitingRoll
//! AwaitingRoll --(roll, no legal move)--> AwaitingRoll (next player, or same on a release pass)
//! AwaitingRoll --(roll)--> AwaitingMoveChoice --(choose)--> AwaitingRoll (next or same player)
//! any running phase --(win, last player standing, abandon, fault)--> Finished
//! ```
//!
//! Every public operation runs against a working copy of the state that is committed only
//! when the operation succeeds, so a rejected action never leaves a trace. The controller
//! reads no clock: deadlines are described by [TurnController::timer_plan] and fired by the
//! owner through [TurnController::expire_turn].

use crate::{
    dice::DiceSource,
    rules::{self, Rules, RulesError},
    state::{MatchState, SeatedPlayer},
};
use ludo_types::{
    ActionError, Color, FinishReason, MatchEvent, MatchId, MatchRecord, MatchSnapshot,
    MatchStatus, PassReason, PawnId, PawnPosition, PlayerId, SeatResult, TimeoutPolicy,
    TurnPhase, MAX_SEATS, MIN_SEATS,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("a match needs 2 to 4 seats, got {0}")]
pub struct InvalidSeatCount(pub usize);

/// Deadlines applied to the current player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnPolicy {
    /// Limit for a connected player to act. `None` waits forever.
    pub turn_timeout: Option<Duration>,
    pub on_turn_timeout: TimeoutPolicy,
    /// Time a disconnected current player gets to come back.
    pub disconnect_grace: Duration,
    pub on_disconnect: TimeoutPolicy,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            turn_timeout: None,
            on_turn_timeout: TimeoutPolicy::AutoPlay,
            disconnect_grace: Duration::from_secs(30),
            on_disconnect: TimeoutPolicy::Forfeit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerCause {
    TurnTimeout,
    DisconnectGrace,
}

/// A deadline the owner should arm for the current phase.
///
/// Keyed by `serial`: once the phase changes the timer is stale and firing it is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnTimer {
    pub serial: u64,
    pub after: Duration,
    pub cause: TimerCause,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Joined {
    pub player_id: PlayerId,
    pub color: Color,
    /// The token already held a seat.
    pub rejoined: bool,
    pub events: Vec<MatchEvent>,
}

pub struct TurnController {
    rules: Arc<Rules>,
    policy: TurnPolicy,
    state: MatchState,
    dice: Box<dyn DiceSource>,
}

impl TurnController {
    pub fn new(
        match_id: impl Into<MatchId>,
        seats: usize,
        rules: Arc<Rules>,
        policy: TurnPolicy,
        dice: Box<dyn DiceSource>,
    ) -> Result<Self, InvalidSeatCount> {
        if !(MIN_SEATS..=MAX_SEATS).contains(&seats) {
            return Err(InvalidSeatCount(seats));
        }
        Ok(Self {
            rules,
            policy,
            state: MatchState::new(match_id, Color::for_seats(seats)),
            dice,
        })
    }

    pub fn match_id(&self) -> &str {
        &self.state.match_id
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Direct access for arranging board positions in tests.
    #[cfg(any(test, feature = "mocks"))]
    pub fn state_mut(&mut self) -> &mut MatchState {
        &mut self.state
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn policy(&self) -> &TurnPolicy {
        &self.policy
    }

    pub fn is_finished(&self) -> bool {
        self.state.status == MatchStatus::Finished
    }

    /// No seat is held. Only possible before the match starts.
    pub fn is_empty(&self) -> bool {
        self.state.seated_count() == 0
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        self.state.snapshot(&self.rules.ruleset().name)
    }

    /// Seats the holder of `token`, or reconnects them if they already hold a seat.
    ///
    /// `fresh_id` becomes the public identity of a newly seated player and is ignored on
    /// reconnect.
    pub fn join(&mut self, token: &str, fresh_id: PlayerId) -> Result<Joined, ActionError> {
        if let Some(seat) = self.state.seat_of_token(token) {
            return self.rejoin(seat);
        }
        match self.state.status {
            MatchStatus::Finished => return Err(ActionError::MatchOver),
            MatchStatus::InProgress => return Err(ActionError::MatchFull),
            MatchStatus::WaitingForPlayers => {}
        }
        if self.state.seat_of(&fresh_id).is_some() {
            return Err(ActionError::AlreadyJoined);
        }
        let seat = self.state.open_seat().ok_or(ActionError::MatchFull)?;
        let color = self.state.seats[seat].color;
        let player_id = fresh_id.clone();
        let events = self.transact(|turn| {
            turn.state.seats[seat].player = Some(SeatedPlayer::new(fresh_id, token));
            if turn.state.is_full() {
                turn.start()?;
            }
            turn.push_snapshot();
            Ok(())
        })?;
        debug!(match_id = %self.state.match_id, %player_id, %color, "seated player");
        Ok(Joined {
            player_id,
            color,
            rejoined: false,
            events,
        })
    }

    fn rejoin(&mut self, seat: usize) -> Result<Joined, ActionError> {
        let Some(player) = self.state.seats[seat].player.as_ref() else {
            return Err(ActionError::PlayerNotInMatch);
        };
        if player.forfeited {
            return Err(ActionError::PlayerNotInMatch);
        }
        let player_id = player.id.clone();
        let color = self.state.seats[seat].color;
        let was_connected = player.connected;
        let events = self.transact(|turn| {
            if let Some(player) = turn.state.seats[seat].player.as_mut() {
                player.connected = true;
            }
            if !was_connected {
                turn.events.push(MatchEvent::PlayerReconnected {
                    player_id: player_id.clone(),
                });
            }
            Ok(())
        })?;
        Ok(Joined {
            player_id,
            color,
            rejoined: true,
            events,
        })
    }

    /// Voluntary exit. Frees the seat in a lobby, forfeits in a running match.
    pub fn leave(&mut self, player_id: &PlayerId) -> Result<Vec<MatchEvent>, ActionError> {
        let seat = self
            .state
            .seat_of(player_id)
            .ok_or(ActionError::PlayerNotInMatch)?;
        match self.state.status {
            MatchStatus::Finished => Ok(Vec::new()),
            MatchStatus::WaitingForPlayers => self.transact(|turn| {
                turn.vacate(seat);
                Ok(())
            }),
            MatchStatus::InProgress => {
                if !self.state.seats[seat].is_active() {
                    return Ok(Vec::new());
                }
                self.transact(|turn| turn.forfeit(seat))
            }
        }
    }

    /// Connection lost without a `leave`. Starts the grace period when in progress.
    pub fn disconnect(&mut self, player_id: &PlayerId) -> Result<Vec<MatchEvent>, ActionError> {
        let seat = self
            .state
            .seat_of(player_id)
            .ok_or(ActionError::PlayerNotInMatch)?;
        self.transact(|turn| {
            match turn.state.status {
                MatchStatus::WaitingForPlayers => turn.vacate(seat),
                MatchStatus::InProgress | MatchStatus::Finished => {
                    let running = turn.state.status == MatchStatus::InProgress;
                    if let Some(player) = turn.state.seats[seat].player.as_mut() {
                        let notify = running && player.connected && !player.forfeited;
                        player.connected = false;
                        if notify {
                            turn.events.push(MatchEvent::PlayerDisconnected {
                                player_id: player.id.clone(),
                            });
                        }
                    }
                }
            }
            Ok(())
        })
    }

    pub fn roll_dice(&mut self, player_id: &PlayerId) -> Result<Vec<MatchEvent>, ActionError> {
        let seat = self.acting_seat(player_id)?;
        self.transact(|turn| turn.roll(seat))
    }

    pub fn choose_move(
        &mut self,
        player_id: &PlayerId,
        pawn_id: PawnId,
    ) -> Result<Vec<MatchEvent>, ActionError> {
        let seat = self.acting_seat(player_id)?;
        self.transact(|turn| turn.choose(seat, pawn_id))
    }

    /// Deadline the current phase needs, if any.
    pub fn timer_plan(&self) -> Option<TurnTimer> {
        if self.state.status != MatchStatus::InProgress {
            return None;
        }
        let player = self.state.current_seat().player.as_ref()?;
        if !player.connected {
            return Some(TurnTimer {
                serial: self.state.turn_serial,
                after: self.policy.disconnect_grace,
                cause: TimerCause::DisconnectGrace,
            });
        }
        self.policy.turn_timeout.map(|after| TurnTimer {
            serial: self.state.turn_serial,
            after,
            cause: TimerCause::TurnTimeout,
        })
    }

    /// Fires the deadline armed for `serial`. Stale serials are ignored.
    pub fn expire_turn(&mut self, serial: u64) -> Vec<MatchEvent> {
        let Some(timer) = self.timer_plan() else {
            return Vec::new();
        };
        if timer.serial != serial {
            debug!(match_id = %self.state.match_id, serial, current = timer.serial, "ignoring stale timer");
            return Vec::new();
        }
        let policy = match timer.cause {
            TimerCause::TurnTimeout => self.policy.on_turn_timeout,
            TimerCause::DisconnectGrace => self.policy.on_disconnect,
        };
        let seat = self.state.turn_index;
        debug!(match_id = %self.state.match_id, seat, ?policy, cause = ?timer.cause, "turn expired");
        // Timer-driven actions cannot be rejected: the current seat always holds the turn.
        self.transact(|turn| turn.expire(seat, policy))
            .unwrap_or_default()
    }

    /// Ends a match that is not finished yet, e.g. on shutdown.
    pub fn abandon(&mut self) -> Vec<MatchEvent> {
        if self.is_finished() {
            return Vec::new();
        }
        self.transact(|turn| {
            turn.finish(None, FinishReason::Abandoned);
            Ok(())
        })
        .unwrap_or_default()
    }

    /// History record, once the match has finished.
    pub fn record(&self, finished_at_ms: u64) -> Option<MatchRecord> {
        let reason = self.state.finish_reason?;
        Some(MatchRecord {
            match_id: self.state.match_id.clone(),
            ruleset: self.rules.ruleset().name.clone(),
            winner_id: self.state.winner_id().map(|id| id.as_str().to_string()),
            reason,
            turns: self.state.turns,
            finished_at_ms,
            seats: self
                .state
                .seats
                .iter()
                .map(|seat| SeatResult {
                    color: seat.color,
                    player_id: seat.player_id().map(|id| id.as_str().to_string()),
                    pawns_in_goal: seat.pawns_in_goal(),
                    forfeited: seat.player.as_ref().is_some_and(|player| player.forfeited),
                })
                .collect(),
        })
    }

    fn acting_seat(&self, player_id: &PlayerId) -> Result<usize, ActionError> {
        match self.state.status {
            MatchStatus::Finished => return Err(ActionError::MatchOver),
            MatchStatus::WaitingForPlayers => return Err(ActionError::MatchNotStarted),
            MatchStatus::InProgress => {}
        }
        self.state
            .seat_of(player_id)
            .filter(|seat| self.state.seats[*seat].is_active())
            .ok_or(ActionError::PlayerNotInMatch)
    }

    /// Runs `op` on a working copy and commits it on success.
    ///
    /// Rule rejections discard the copy. Faults, including invariant violations found after
    /// `op`, discard it too and finish the match instead.
    fn transact<F>(&mut self, op: F) -> Result<Vec<MatchEvent>, ActionError>
    where
        F: FnOnce(&mut Turn<'_>) -> Result<(), RulesError>,
    {
        let mut turn = Turn {
            rules: self.rules.as_ref(),
            state: self.state.clone(),
            dice: self.dice.as_mut(),
            events: Vec::new(),
        };
        let result = op(&mut turn).and_then(|()| {
            turn.state
                .check_invariants(turn.rules.geometry())
                .map_err(|violation| RulesError::Fault(violation.to_string()))
        });
        match result {
            Ok(()) => {}
            Err(RulesError::Action(err)) => return Err(err),
            Err(RulesError::Fault(reason)) => {
                warn!(match_id = %self.state.match_id, %reason, "engine fault, stopping match");
                turn.state = self.state.clone();
                turn.events.clear();
                turn.finish(None, FinishReason::Fault);
            }
        }
        let Turn { state, events, .. } = turn;
        self.state = state;
        Ok(events)
    }
}

/// One in-flight transition over a working copy of the state.
struct Turn<'a> {
    rules: &'a Rules,
    state: MatchState,
    dice: &'a mut dyn DiceSource,
    events: Vec<MatchEvent>,
}

impl Turn<'_> {
    fn player(&self, seat: usize) -> Result<PlayerId, RulesError> {
        self.state.seats[seat]
            .player_id()
            .cloned()
            .ok_or_else(|| RulesError::Fault(format!("seat {seat} is empty")))
    }

    fn push_snapshot(&mut self) {
        let snapshot = self.state.snapshot(&self.rules.ruleset().name);
        self.events.push(MatchEvent::MatchSnapshot(snapshot));
    }

    fn push_turn_changed(&mut self) -> Result<(), RulesError> {
        let seat = self.state.turn_index;
        let player_id = self.player(seat)?;
        self.events.push(MatchEvent::TurnChanged {
            player_id,
            color: self.state.seats[seat].color,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), RulesError> {
        self.state.status = MatchStatus::InProgress;
        self.state.turn_index = 0;
        self.state.moves_this_turn = 0;
        self.state.extra_turn_pending = false;
        self.state.enter_phase(TurnPhase::AwaitingRoll);
        self.push_turn_changed()
    }

    fn vacate(&mut self, seat: usize) {
        if let Some(player) = self.state.seats[seat].player.take() {
            self.events.push(MatchEvent::PlayerLeft {
                player_id: player.id,
                color: self.state.seats[seat].color,
            });
            self.push_snapshot();
        }
    }

    fn roll(&mut self, seat: usize) -> Result<(), RulesError> {
        let value = rules::roll_dice(&self.state, seat, &mut *self.dice)?;
        let player_id = self.player(seat)?;
        let color = self.state.seats[seat].color;
        self.state.extra_turn_pending = false;
        self.events.push(MatchEvent::DiceRolled {
            player_id: player_id.clone(),
            color,
            value,
        });

        let moves = rules::compute_legal_moves(self.rules, &self.state, seat, value)?;
        if moves.is_empty() {
            self.state.turns += 1;
            self.events.push(MatchEvent::TurnPassed {
                player_id,
                color,
                reason: PassReason::NoLegalMove,
            });
            let extra = rules::pass_grants_extra_turn(self.rules, value);
            return self.end_turn(seat, extra);
        }

        self.events.push(MatchEvent::LegalMoves {
            player_id,
            pawn_ids: moves.iter().map(|candidate| candidate.pawn_id).collect(),
            moves: moves.clone(),
        });
        self.state.enter_phase(TurnPhase::AwaitingMoveChoice);
        self.state.dice_value = Some(value);
        self.state.legal_moves = moves;
        Ok(())
    }

    fn choose(&mut self, seat: usize, pawn_id: PawnId) -> Result<(), RulesError> {
        let outcome = rules::apply_move(self.rules, &mut self.state, seat, pawn_id)?;
        let player_id = self.player(seat)?;
        self.state.turns += 1;
        self.state.moves_this_turn += 1;
        self.events.push(MatchEvent::PawnMoved {
            player_id,
            color: self.state.seats[seat].color,
            pawn_id,
            from: outcome.from,
            to: outcome.to,
            cell: outcome.cell,
            captured: outcome.captured,
        });
        if outcome.won {
            self.finish(Some(seat), FinishReason::AllPawnsHome);
            return Ok(());
        }
        self.end_turn(seat, outcome.extra_turn)
    }

    /// Hands the roll back to `seat` on an extra turn, otherwise to the next active seat.
    fn end_turn(&mut self, seat: usize, extra: bool) -> Result<(), RulesError> {
        if extra && self.state.seats[seat].is_active() {
            self.state.extra_turn_pending = true;
        } else {
            let next = rules::next_active_seat(&self.state, seat)
                .ok_or_else(|| RulesError::Fault("no active seat left".to_string()))?;
            self.state.turn_index = next;
            self.state.moves_this_turn = 0;
            self.state.extra_turn_pending = false;
        }
        self.state.enter_phase(TurnPhase::AwaitingRoll);
        self.push_turn_changed()
    }

    fn forfeit(&mut self, seat: usize) -> Result<(), RulesError> {
        let player_id = self.player(seat)?;
        let color = self.state.seats[seat].color;
        let entry = &mut self.state.seats[seat];
        if let Some(player) = entry.player.as_mut() {
            player.forfeited = true;
        }
        for pawn in entry.pawns.iter_mut().filter(|pawn| !pawn.is_goal()) {
            *pawn = PawnPosition::Home;
        }
        self.events.push(MatchEvent::PlayerLeft { player_id, color });

        let active: Vec<usize> = self.state.active_seats().collect();
        match (active.first().copied(), active.get(1).copied()) {
            (Some(last), None) => {
                self.finish(Some(last), FinishReason::LastPlayerStanding);
                return Ok(());
            }
            (None, _) => {
                self.finish(None, FinishReason::Abandoned);
                return Ok(());
            }
            _ => {}
        }
        if seat == self.state.turn_index {
            self.end_turn(seat, false)?;
        }
        self.push_snapshot();
        Ok(())
    }

    fn expire(&mut self, seat: usize, policy: TimeoutPolicy) -> Result<(), RulesError> {
        match policy {
            TimeoutPolicy::Pass => {
                let player_id = self.player(seat)?;
                self.events.push(MatchEvent::TurnPassed {
                    player_id,
                    color: self.state.seats[seat].color,
                    reason: PassReason::Timeout,
                });
                self.end_turn(seat, false)
            }
            TimeoutPolicy::AutoPlay => {
                if self.state.phase == TurnPhase::AwaitingRoll {
                    self.roll(seat)?;
                }
                let pending = self.state.phase == TurnPhase::AwaitingMoveChoice
                    && self.state.turn_index == seat;
                match self.state.legal_moves.first() {
                    Some(first) if pending => {
                        let pawn_id = first.pawn_id;
                        self.choose(seat, pawn_id)
                    }
                    _ => Ok(()),
                }
            }
            TimeoutPolicy::Forfeit => self.forfeit(seat),
        }
    }

    fn finish(&mut self, winner: Option<usize>, reason: FinishReason) {
        self.state.status = MatchStatus::Finished;
        self.state.winner = winner;
        self.state.finish_reason = Some(reason);
        self.state.extra_turn_pending = false;
        self.state.enter_phase(TurnPhase::Finished);
        self.events.push(MatchEvent::MatchFinished {
            winner_id: self.state.winner_id().cloned(),
            reason,
        });
        self.push_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{controller, join_all, seat_player, ScriptedDice};
    use ludo_types::{PawnRef, Ruleset, PAWNS_PER_COLOR};

    fn kinds(events: &[MatchEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|event| match event {
                MatchEvent::MatchSnapshot(_) => "snapshot",
                MatchEvent::DiceRolled { .. } => "diceRolled",
                MatchEvent::LegalMoves { .. } => "legalMoves",
                MatchEvent::PawnMoved { .. } => "pawnMoved",
                MatchEvent::TurnChanged { .. } => "turnChanged",
                MatchEvent::TurnPassed { .. } => "turnPassed",
                MatchEvent::MatchFinished { .. } => "matchFinished",
                MatchEvent::PlayerLeft { .. } => "playerLeft",
                MatchEvent::PlayerDisconnected { .. } => "playerDisconnected",
                MatchEvent::PlayerReconnected { .. } => "playerReconnected",
            })
            .collect()
    }

    #[test]
    fn rejects_bad_seat_counts() {
        let rules = Arc::new(Rules::new(Ruleset::classic()).unwrap());
        for seats in [0, 1, 5] {
            let result = TurnController::new(
                "m",
                seats,
                rules.clone(),
                TurnPolicy::default(),
                Box::new(ScriptedDice::new([1])),
            );
            assert_eq!(result.err(), Some(InvalidSeatCount(seats)));
        }
    }

    #[test]
    fn lobby_starts_when_full() {
        let mut match_ = controller(Ruleset::classic(), 2, []);
        let first = match_.join("tok-a", "a".into()).unwrap();
        assert_eq!(first.color, Color::Red);
        assert_eq!(kinds(&first.events), ["snapshot"]);
        assert_eq!(
            match_.roll_dice(&"a".into()),
            Err(ActionError::MatchNotStarted)
        );

        let second = match_.join("tok-b", "b".into()).unwrap();
        assert_eq!(second.color, Color::Yellow);
        assert_eq!(kinds(&second.events), ["turnChanged", "snapshot"]);
        let snapshot = match_.snapshot();
        assert_eq!(snapshot.status, MatchStatus::InProgress);
        assert_eq!(snapshot.phase, TurnPhase::AwaitingRoll);
        assert_eq!(snapshot.current_player, Some(PlayerId::from("a")));

        assert_eq!(
            match_.join("tok-c", "c".into()).err(),
            Some(ActionError::MatchFull)
        );
    }

    #[test]
    fn lobby_leave_frees_seat() {
        let mut match_ = controller(Ruleset::classic(), 3, []);
        match_.join("tok-a", "a".into()).unwrap();
        let events = match_.leave(&"a".into()).unwrap();
        assert_eq!(kinds(&events), ["playerLeft", "snapshot"]);
        assert!(match_.is_empty());
        let again = match_.join("tok-b", "b".into()).unwrap();
        assert_eq!(again.color, Color::Red);
    }

    #[test]
    fn rejoin_keeps_identity() {
        let mut match_ = controller(Ruleset::classic(), 2, []);
        join_all(&mut match_);
        match_.disconnect(&seat_player(0)).unwrap();
        let joined = match_.join("tok-0", "ignored".into()).unwrap();
        assert!(joined.rejoined);
        assert_eq!(joined.player_id, seat_player(0));
        assert_eq!(kinds(&joined.events), ["playerReconnected"]);
    }

    #[test]
    fn release_and_capture_on_open_board() {
        // Red rolls 6 and releases onto its start, where a green pawn sits.
        let mut match_ = controller(Ruleset::open56(), 4, [6, 2]);
        join_all(&mut match_);
        let green = match_.state().seat_of_color(Color::Green).unwrap();
        match_.state.seats[green].pawns[1] = PawnPosition::Track { progress: 42 };

        let red = seat_player(0);
        let events = match_.roll_dice(&red).unwrap();
        assert_eq!(kinds(&events), ["diceRolled", "legalMoves"]);
        let snapshot = match_.snapshot();
        assert_eq!(snapshot.phase, TurnPhase::AwaitingMoveChoice);
        assert_eq!(snapshot.dice_value, Some(6));
        assert!(snapshot
            .legal_moves
            .iter()
            .all(|candidate| candidate.to == PawnPosition::Track { progress: 0 }));

        let events = match_.choose_move(&red, 0).unwrap();
        assert_eq!(kinds(&events), ["pawnMoved", "turnChanged"]);
        match &events[0] {
            MatchEvent::PawnMoved { cell, captured, .. } => {
                assert_eq!(*cell, Some(0));
                assert_eq!(
                    captured,
                    &vec![PawnRef {
                        color: Color::Green,
                        pawn_id: 1
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = match_.state();
        assert_eq!(state.seats[green].pawns[1], PawnPosition::Home);
        assert_eq!(state.seats[0].pawns[0], PawnPosition::Track { progress: 0 });
        // Release value and capture both grant another roll to Red.
        assert_eq!(state.turn_index, 0);
        assert!(state.extra_turn_pending);
    }

    #[test]
    fn plain_move_advances_turn_and_wraps() {
        let mut match_ = controller(Ruleset::classic(), 3, [3, 4, 2, 5]);
        join_all(&mut match_);
        for seat in 0..3 {
            match_.state.seats[seat].pawns[0] = PawnPosition::Track { progress: 1 };
        }
        for (seat, expected_next) in [(0, 1), (1, 2), (2, 0)] {
            let player = seat_player(seat);
            match_.roll_dice(&player).unwrap();
            let events = match_.choose_move(&player, 0).unwrap();
            assert_eq!(kinds(&events), ["pawnMoved", "turnChanged"]);
            assert_eq!(match_.state().turn_index, expected_next);
            assert!(!match_.state().extra_turn_pending);
        }
    }

    #[test]
    fn no_legal_move_passes_turn() {
        let mut match_ = controller(Ruleset::classic(), 2, [4]);
        join_all(&mut match_);
        let events = match_.roll_dice(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["diceRolled", "turnPassed", "turnChanged"]);
        assert_eq!(match_.state().turn_index, 1);
        assert_eq!(match_.state().phase, TurnPhase::AwaitingRoll);
    }

    #[test]
    fn release_pass_keeps_the_turn() {
        let mut match_ = controller(Ruleset::classic(), 2, [6]);
        join_all(&mut match_);
        match_.state.seats[0].pawns = [PawnPosition::Goal; PAWNS_PER_COLOR];
        match_.state.seats[0].pawns[0] = PawnPosition::HomeStretch { index: 4 };
        let events = match_.roll_dice(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["diceRolled", "turnPassed", "turnChanged"]);
        assert_eq!(match_.state().turn_index, 0);
        assert!(match_.state().extra_turn_pending);
    }

    #[test]
    fn sequencing_errors_leave_state_untouched() {
        let mut match_ = controller(Ruleset::classic(), 2, [6]);
        join_all(&mut match_);
        let red = seat_player(0);
        let yellow = seat_player(1);

        let before = match_.state().clone();
        assert_eq!(match_.roll_dice(&yellow), Err(ActionError::NotYourTurn));
        assert_eq!(match_.choose_move(&red, 0), Err(ActionError::NoActiveRoll));
        assert_eq!(
            match_.roll_dice(&"stranger".into()),
            Err(ActionError::PlayerNotInMatch)
        );
        assert_eq!(match_.state(), &before);

        match_.roll_dice(&red).unwrap();
        let before = match_.state().clone();
        assert_eq!(match_.roll_dice(&red), Err(ActionError::AlreadyRolled));
        assert_eq!(match_.choose_move(&yellow, 0), Err(ActionError::NotYourTurn));
        assert_eq!(
            match_.choose_move(&red, 7),
            Err(ActionError::StaleOrInvalidChoice)
        );
        assert_eq!(match_.state(), &before);
    }

    #[test]
    fn resubmitted_move_is_never_applied_twice() {
        let mut match_ = controller(Ruleset::classic(), 2, [6, 6]);
        join_all(&mut match_);
        let red = seat_player(0);
        match_.roll_dice(&red).unwrap();
        match_.choose_move(&red, 0).unwrap();
        // Extra turn: Red is awaiting a roll again, the replay must not move pawn 0.
        let before = match_.state().clone();
        assert_eq!(
            match_.choose_move(&red, 0),
            Err(ActionError::StaleOrInvalidChoice)
        );
        assert_eq!(match_.state(), &before);
    }

    #[test]
    fn replay_after_turn_passed_is_not_your_turn() {
        let mut match_ = controller(Ruleset::classic(), 2, [2]);
        join_all(&mut match_);
        match_.state.seats[0].pawns[0] = PawnPosition::Track { progress: 9 };
        let red = seat_player(0);
        match_.roll_dice(&red).unwrap();
        match_.choose_move(&red, 0).unwrap();
        assert_eq!(match_.choose_move(&red, 0), Err(ActionError::NotYourTurn));
        assert_eq!(
            match_.state().seats[0].pawns[0],
            PawnPosition::Track { progress: 11 }
        );
    }

    #[test]
    fn fourth_pawn_home_finishes_match() {
        let mut match_ = controller(Ruleset::classic(), 2, [1, 3]);
        join_all(&mut match_);
        match_.state.seats[0].pawns = [
            PawnPosition::Goal,
            PawnPosition::Goal,
            PawnPosition::Goal,
            PawnPosition::HomeStretch { index: 4 },
        ];
        let red = seat_player(0);
        match_.roll_dice(&red).unwrap();
        let events = match_.choose_move(&red, 3).unwrap();
        assert_eq!(kinds(&events), ["pawnMoved", "matchFinished", "snapshot"]);
        assert!(match_.is_finished());
        let snapshot = match_.snapshot();
        assert_eq!(snapshot.winner_id, Some(red.clone()));
        assert_eq!(snapshot.finish_reason, Some(FinishReason::AllPawnsHome));

        assert_eq!(match_.roll_dice(&red), Err(ActionError::MatchOver));
        assert_eq!(
            match_.roll_dice(&seat_player(1)),
            Err(ActionError::MatchOver)
        );
        assert_eq!(match_.choose_move(&red, 0), Err(ActionError::MatchOver));
        assert_eq!(match_.timer_plan(), None);

        let record = match_.record(1_700_000_000_000).unwrap();
        assert_eq!(record.reason, FinishReason::AllPawnsHome);
        assert_eq!(record.winner_id.as_deref(), Some(red.as_str()));
        assert_eq!(record.seats[0].pawns_in_goal, 4);
        assert_eq!(record.turns, 1);
    }

    #[test]
    fn forfeit_returns_pawns_and_skips_seat() {
        let mut match_ = controller(Ruleset::classic(), 3, [3]);
        join_all(&mut match_);
        match_.state.seats[1].pawns = [
            PawnPosition::Goal,
            PawnPosition::Track { progress: 20 },
            PawnPosition::HomeStretch { index: 1 },
            PawnPosition::Home,
        ];
        let events = match_.leave(&seat_player(1)).unwrap();
        assert_eq!(kinds(&events), ["playerLeft", "snapshot"]);
        assert_eq!(
            match_.state().seats[1].pawns,
            [
                PawnPosition::Goal,
                PawnPosition::Home,
                PawnPosition::Home,
                PawnPosition::Home
            ]
        );
        assert_eq!(
            match_.roll_dice(&seat_player(1)),
            Err(ActionError::PlayerNotInMatch)
        );

        // Red passes with a 3, the turn skips the forfeited seat.
        match_.roll_dice(&seat_player(0)).unwrap();
        assert_eq!(match_.state().turn_index, 2);
    }

    #[test]
    fn forfeit_of_current_player_moves_turn_on() {
        let mut match_ = controller(Ruleset::classic(), 3, []);
        join_all(&mut match_);
        let events = match_.leave(&seat_player(0)).unwrap();
        assert_eq!(
            kinds(&events),
            ["playerLeft", "turnChanged", "snapshot"]
        );
        assert_eq!(match_.state().turn_index, 1);
    }

    #[test]
    fn last_player_standing_wins() {
        let mut match_ = controller(Ruleset::classic(), 2, []);
        join_all(&mut match_);
        let events = match_.leave(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["playerLeft", "matchFinished", "snapshot"]);
        let snapshot = match_.snapshot();
        assert_eq!(snapshot.winner_id, Some(seat_player(1)));
        assert_eq!(
            snapshot.finish_reason,
            Some(FinishReason::LastPlayerStanding)
        );
    }

    #[test]
    fn disconnect_uses_grace_period() {
        let policy = TurnPolicy {
            turn_timeout: Some(Duration::from_secs(20)),
            on_turn_timeout: TimeoutPolicy::Pass,
            disconnect_grace: Duration::from_secs(5),
            on_disconnect: TimeoutPolicy::Forfeit,
        };
        let mut match_ = crate::mocks::controller_with_policy(Ruleset::classic(), 2, [], policy);
        join_all(&mut match_);

        let timer = match_.timer_plan().unwrap();
        assert_eq!(timer.cause, TimerCause::TurnTimeout);
        assert_eq!(timer.after, Duration::from_secs(20));

        let events = match_.disconnect(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["playerDisconnected"]);
        let timer = match_.timer_plan().unwrap();
        assert_eq!(timer.cause, TimerCause::DisconnectGrace);
        assert_eq!(timer.after, Duration::from_secs(5));

        let events = match_.expire_turn(timer.serial);
        assert_eq!(kinds(&events), ["playerLeft", "matchFinished", "snapshot"]);
        assert_eq!(match_.snapshot().winner_id, Some(seat_player(1)));
    }

    #[test]
    fn timer_never_fires_twice() {
        let policy = TurnPolicy {
            turn_timeout: Some(Duration::from_secs(10)),
            on_turn_timeout: TimeoutPolicy::Pass,
            ..TurnPolicy::default()
        };
        let mut match_ = crate::mocks::controller_with_policy(Ruleset::classic(), 2, [], policy);
        join_all(&mut match_);
        let timer = match_.timer_plan().unwrap();

        let events = match_.expire_turn(timer.serial);
        assert_eq!(kinds(&events), ["turnPassed", "turnChanged"]);
        assert_eq!(match_.state().turn_index, 1);

        let before = match_.state().clone();
        assert!(match_.expire_turn(timer.serial).is_empty());
        assert_eq!(match_.state(), &before);
    }

    #[test]
    fn acting_cancels_pending_timer() {
        let policy = TurnPolicy {
            turn_timeout: Some(Duration::from_secs(10)),
            on_turn_timeout: TimeoutPolicy::Forfeit,
            ..TurnPolicy::default()
        };
        let mut match_ =
            crate::mocks::controller_with_policy(Ruleset::classic(), 2, [6], policy);
        join_all(&mut match_);
        let timer = match_.timer_plan().unwrap();
        match_.roll_dice(&seat_player(0)).unwrap();
        assert!(match_.expire_turn(timer.serial).is_empty());
        assert_eq!(match_.state().status, MatchStatus::InProgress);
    }

    #[test]
    fn auto_play_rolls_and_moves_first_pawn() {
        let policy = TurnPolicy {
            turn_timeout: Some(Duration::from_secs(10)),
            on_turn_timeout: TimeoutPolicy::AutoPlay,
            ..TurnPolicy::default()
        };
        let mut match_ =
            crate::mocks::controller_with_policy(Ruleset::classic(), 2, [6], policy);
        join_all(&mut match_);
        let timer = match_.timer_plan().unwrap();
        let events = match_.expire_turn(timer.serial);
        assert_eq!(
            kinds(&events),
            ["diceRolled", "legalMoves", "pawnMoved", "turnChanged"]
        );
        assert_eq!(
            match_.state().seats[0].pawns[0],
            PawnPosition::Track { progress: 0 }
        );
    }

    #[test]
    fn abandon_finishes_without_winner() {
        let mut match_ = controller(Ruleset::classic(), 2, []);
        join_all(&mut match_);
        let events = match_.abandon();
        assert_eq!(kinds(&events), ["matchFinished", "snapshot"]);
        assert_eq!(match_.snapshot().winner_id, None);
        assert_eq!(
            match_.snapshot().finish_reason,
            Some(FinishReason::Abandoned)
        );
        assert!(match_.abandon().is_empty());
    }

    #[test]
    fn broken_dice_fault_the_match() {
        let mut match_ = controller(Ruleset::classic(), 2, [0]);
        join_all(&mut match_);
        let events = match_.roll_dice(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["matchFinished", "snapshot"]);
        assert_eq!(match_.snapshot().finish_reason, Some(FinishReason::Fault));
        assert_eq!(match_.roll_dice(&seat_player(0)), Err(ActionError::MatchOver));
    }

    #[test]
    fn corrupted_state_faults_instead_of_spreading() {
        let mut match_ = controller(Ruleset::classic(), 2, [2]);
        join_all(&mut match_);
        match_.state.seats[0].pawns[0] = PawnPosition::Track { progress: 200 };
        let events = match_.roll_dice(&seat_player(0)).unwrap();
        assert_eq!(kinds(&events), ["matchFinished", "snapshot"]);
        assert_eq!(match_.snapshot().finish_reason, Some(FinishReason::Fault));
    }
}
