//! Fixtures for driving matches deterministically in tests.

use crate::{
    controller::{TurnController, TurnPolicy},
    dice::DiceSource,
    rules::Rules,
    state::{MatchState, SeatedPlayer},
};
use ludo_types::{Color, MatchStatus, PlayerId, Ruleset, TurnPhase};
use std::sync::Arc;

/// Dice that replay a fixed script, cycling when it runs out.
///
/// An empty script always rolls 1.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDice {
    values: Vec<u8>,
    next: usize,
}

impl ScriptedDice {
    pub fn new(values: impl IntoIterator<Item = u8>) -> Self {
        Self {
            values: values.into_iter().collect(),
            next: 0,
        }
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self) -> u8 {
        if self.values.is_empty() {
            return 1;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value
    }
}

/// Public id given to the player in `seat` by [join_all].
pub fn seat_player(seat: usize) -> PlayerId {
    PlayerId::new(format!("player-{seat}"))
}

/// Join token used for `seat` by [join_all].
pub fn seat_token(seat: usize) -> String {
    format!("tok-{seat}")
}

/// A running match with every seat filled and the first seat to roll.
pub fn in_progress(ruleset: Ruleset, seats: usize) -> (Rules, MatchState) {
    let rules = Rules::new(ruleset).expect("valid ruleset");
    let mut state = MatchState::new("mock-match", Color::for_seats(seats));
    for (index, seat) in state.seats.iter_mut().enumerate() {
        seat.player = Some(SeatedPlayer::new(seat_player(index), seat_token(index)));
    }
    state.status = MatchStatus::InProgress;
    state.enter_phase(TurnPhase::AwaitingRoll);
    (rules, state)
}

pub fn controller(
    ruleset: Ruleset,
    seats: usize,
    rolls: impl IntoIterator<Item = u8>,
) -> TurnController {
    controller_with_policy(ruleset, seats, rolls, TurnPolicy::default())
}

pub fn controller_with_policy(
    ruleset: Ruleset,
    seats: usize,
    rolls: impl IntoIterator<Item = u8>,
    policy: TurnPolicy,
) -> TurnController {
    let rules = Arc::new(Rules::new(ruleset).expect("valid ruleset"));
    TurnController::new(
        "mock-match",
        seats,
        rules,
        policy,
        Box::new(ScriptedDice::new(rolls)),
    )
    .expect("valid seat count")
}

/// Fills every open seat, which starts the match.
pub fn join_all(controller: &mut TurnController) {
    let seats = controller.state().seats.len();
    for seat in 0..seats {
        controller
            .join(&seat_token(seat), seat_player(seat))
            .expect("seat available");
    }
}
