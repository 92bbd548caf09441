//! The task that owns one match.
//!
//! Mailbox messages and turn deadlines are handled strictly one at a time, and the events each
//! produces are published before the next one is looked at, so subscribers see the match in
//! the order it was resolved.

use crate::{
    history::HistorySink,
    metrics::Metrics,
    store::{Command, Message, Release, Reply},
};
use ludo_execution::{TurnController, TurnTimer};
use ludo_types::{ActionError, MatchEvent, MatchStatus, PlayerId};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{broadcast, mpsc},
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
struct Armed {
    timer: TurnTimer,
    deadline: Instant,
}

enum Wake {
    Message(Option<Message>),
    Deadline,
}

pub(crate) struct MatchActor {
    pub(crate) controller: TurnController,
    pub(crate) mailbox: mpsc::Receiver<Message>,
    pub(crate) events: broadcast::Sender<MatchEvent>,
    pub(crate) history: Option<HistorySink>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) finished_linger: Duration,
    pub(crate) on_exit: Release,
}

impl MatchActor {
    pub(crate) async fn run(mut self) {
        let mut armed: Option<Armed> = None;
        let mut linger_until: Option<Instant> = None;
        // Live connections per seated player; a reconnect can overlap the old socket closing.
        let mut bindings: HashMap<PlayerId, usize> = HashMap::new();

        loop {
            armed = self.rearm(armed);
            let deadline = armed.map(|armed| armed.deadline).or(linger_until);
            let wake = match deadline {
                Some(deadline) => tokio::select! {
                    message = self.mailbox.recv() => Wake::Message(message),
                    _ = sleep_until(deadline) => Wake::Deadline,
                },
                None => Wake::Message(self.mailbox.recv().await),
            };

            match wake {
                Wake::Deadline => {
                    if let Some(fired) = armed.take() {
                        self.metrics.timer_fired();
                        let events = self.controller.expire_turn(fired.timer.serial);
                        debug!(
                            match_id = %self.controller.match_id(),
                            cause = ?fired.timer.cause,
                            events = events.len(),
                            "turn deadline fired"
                        );
                        self.publish(events);
                    } else {
                        debug!(match_id = %self.controller.match_id(), "finished match expired");
                        break;
                    }
                }
                Wake::Message(None) => break,
                Wake::Message(Some(Message::Snapshot { response })) => {
                    let _ = response.send(self.controller.snapshot());
                    continue;
                }
                Wake::Message(Some(Message::Resync { response })) => {
                    let _ = response.send((self.controller.snapshot(), self.events.subscribe()));
                    continue;
                }
                Wake::Message(Some(Message::Shutdown { response })) => {
                    if self.controller.state().status == MatchStatus::InProgress {
                        let events = self.controller.abandon();
                        self.publish(events);
                        self.on_finished();
                    }
                    let _ = response.send(());
                    break;
                }
                Wake::Message(Some(Message::Mutate { command, response })) => {
                    let result = self.apply(command, &mut bindings);
                    match result {
                        Ok((reply, events)) => {
                            self.metrics.action(true);
                            self.publish(events);
                            let _ = response.send(Ok(reply));
                        }
                        Err(err) => {
                            self.metrics.action(false);
                            let _ = response.send(Err(err));
                        }
                    }
                    if self.controller.state().status == MatchStatus::WaitingForPlayers
                        && self.controller.is_empty()
                    {
                        debug!(match_id = %self.controller.match_id(), "lobby emptied");
                        break;
                    }
                }
            }

            if self.controller.is_finished() && linger_until.is_none() {
                self.on_finished();
                linger_until = Some(Instant::now() + self.finished_linger);
            }
            if linger_until.is_some() && self.events.receiver_count() == 0 {
                break;
            }
        }

        debug!(match_id = %self.on_exit.match_id(), "match actor stopped");
        self.on_exit.run();
    }

    fn apply(
        &mut self,
        command: Command,
        bindings: &mut HashMap<PlayerId, usize>,
    ) -> Result<(Reply, Vec<MatchEvent>), ActionError> {
        match command {
            Command::Join { token } => {
                let fresh_id = PlayerId::new(Uuid::new_v4().to_string());
                let joined = self.controller.join(&token, fresh_id)?;
                *bindings.entry(joined.player_id.clone()).or_default() += 1;
                info!(
                    match_id = %self.controller.match_id(),
                    player_id = %joined.player_id,
                    color = %joined.color,
                    rejoined = joined.rejoined,
                    "player joined"
                );
                let reply = Reply::Joined {
                    player_id: joined.player_id,
                    color: joined.color,
                    rejoined: joined.rejoined,
                    snapshot: self.controller.snapshot(),
                };
                Ok((reply, joined.events))
            }
            Command::RollDice { player_id } => {
                let events = self.controller.roll_dice(&player_id)?;
                Ok((Reply::Applied, events))
            }
            Command::ChooseMove { player_id, pawn_id } => {
                let events = self.controller.choose_move(&player_id, pawn_id)?;
                Ok((Reply::Applied, events))
            }
            Command::Leave { player_id } => {
                let events = self.controller.leave(&player_id)?;
                bindings.remove(&player_id);
                Ok((Reply::Applied, events))
            }
            Command::Disconnect { player_id } => {
                if let Some(count) = bindings.get_mut(&player_id) {
                    *count = count.saturating_sub(1);
                    if *count > 0 {
                        return Ok((Reply::Applied, Vec::new()));
                    }
                    bindings.remove(&player_id);
                }
                let events = self.controller.disconnect(&player_id)?;
                Ok((Reply::Applied, events))
            }
        }
    }

    fn publish(&self, events: Vec<MatchEvent>) {
        for event in events {
            // No subscribers is fine; late joiners start from a snapshot.
            let _ = self.events.send(event);
        }
    }

    // Keeps the running deadline while the same phase is waiting on the same cause.
    fn rearm(&self, armed: Option<Armed>) -> Option<Armed> {
        let timer = self.controller.timer_plan()?;
        match armed {
            Some(armed) if armed.timer.serial == timer.serial && armed.timer.cause == timer.cause => {
                Some(armed)
            }
            _ => Some(Armed {
                timer,
                deadline: Instant::now() + timer.after,
            }),
        }
    }

    fn on_finished(&self) {
        let finished_at_ms = now_ms();
        let Some(record) = self.controller.record(finished_at_ms) else {
            return;
        };
        self.metrics.match_finished();
        info!(
            match_id = %record.match_id,
            winner_id = ?record.winner_id,
            reason = ?record.reason,
            turns = record.turns,
            "match finished"
        );
        if let Some(history) = &self.history {
            history.record(record);
        }
    }
}

fn now_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as u64,
        Err(err) => {
            warn!(?err, "system clock before unix epoch");
            0
        }
    }
}
