//! In-memory table of running matches.
//!
//! Each match is owned by its own actor task (see [crate::actor]); the table only routes. Its
//! lock is held for insert, lookup and remove, never across a mutation, so matches never wait
//! on one another.

use crate::{actor::MatchActor, config::ValidatedConfig, history::HistorySink, metrics::Metrics};
use ludo_execution::{DiceSource, InvalidSeatCount, Rules, SeededDice, TurnController, TurnPolicy};
use ludo_types::{ActionError, Color, MatchEvent, MatchId, MatchSnapshot, PawnId, PlayerId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Builds the dice for the match created with the given generation number.
pub type DiceFactory = Arc<dyn Fn(u64) -> Box<dyn DiceSource> + Send + Sync>;

// A join can race an emptied lobby shutting down; retrying lands in a fresh one.
const JOIN_ATTEMPTS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("match {0} not found")]
    NotFound(MatchId),
    #[error("match {0} already exists")]
    AlreadyExists(MatchId),
    #[error(transparent)]
    InvalidSeats(#[from] InvalidSeatCount),
    #[error(transparent)]
    Rejected(#[from] ActionError),
}

impl StoreError {
    /// The error reported to a client.
    pub fn action_error(&self) -> ActionError {
        match self {
            StoreError::Rejected(err) => *err,
            StoreError::NotFound(_) => ActionError::MatchNotFound,
            StoreError::AlreadyExists(_) => ActionError::MatchFull,
            StoreError::InvalidSeats(_) => ActionError::MatchNotFound,
        }
    }
}

/// State transitions a match actor applies, one at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Join { token: String },
    RollDice { player_id: PlayerId },
    ChooseMove { player_id: PlayerId, pawn_id: PawnId },
    Leave { player_id: PlayerId },
    /// The connection bound to this player went away.
    Disconnect { player_id: PlayerId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Joined {
        player_id: PlayerId,
        color: Color,
        rejoined: bool,
        snapshot: MatchSnapshot,
    },
    Applied,
}

/// Messages sent to a match actor.
pub enum Message {
    Mutate {
        command: Command,
        response: oneshot::Sender<Result<Reply, ActionError>>,
    },
    Snapshot {
        response: oneshot::Sender<MatchSnapshot>,
    },
    /// A snapshot plus a receiver that starts right after it.
    Resync {
        response: oneshot::Sender<(MatchSnapshot, broadcast::Receiver<MatchEvent>)>,
    },
    /// Abandon the match and stop.
    Shutdown { response: oneshot::Sender<()> },
}

/// Route to one match actor.
#[derive(Clone)]
pub struct MatchHandle {
    match_id: MatchId,
    mailbox: mpsc::Sender<Message>,
    events: broadcast::Sender<MatchEvent>,
    generation: u64,
}

impl MatchHandle {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Events published after this call, in resolution order.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub async fn mutate(&self, command: Command) -> Result<Reply, StoreError> {
        let (response, receiver) = oneshot::channel();
        if self
            .mailbox
            .send(Message::Mutate { command, response })
            .await
            .is_err()
        {
            debug!(match_id = %self.match_id, "match mailbox closed; mutation dropped");
            return Err(StoreError::NotFound(self.match_id.clone()));
        }
        receiver
            .await
            .map_err(|_| StoreError::NotFound(self.match_id.clone()))?
            .map_err(StoreError::Rejected)
    }

    /// Consistent copy taken between two mutations.
    pub async fn snapshot(&self) -> Result<MatchSnapshot, StoreError> {
        let (response, receiver) = oneshot::channel();
        if self
            .mailbox
            .send(Message::Snapshot { response })
            .await
            .is_err()
        {
            return Err(StoreError::NotFound(self.match_id.clone()));
        }
        receiver
            .await
            .map_err(|_| StoreError::NotFound(self.match_id.clone()))
    }

    /// Fresh snapshot and a receiver holding only the events published after it.
    pub async fn resync(
        &self,
    ) -> Result<(MatchSnapshot, broadcast::Receiver<MatchEvent>), StoreError> {
        let (response, receiver) = oneshot::channel();
        if self
            .mailbox
            .send(Message::Resync { response })
            .await
            .is_err()
        {
            return Err(StoreError::NotFound(self.match_id.clone()));
        }
        receiver
            .await
            .map_err(|_| StoreError::NotFound(self.match_id.clone()))
    }

    async fn shutdown(&self) {
        let (response, receiver) = oneshot::channel();
        if self
            .mailbox
            .send(Message::Shutdown { response })
            .await
            .is_err()
        {
            return;
        }
        if receiver.await.is_err() {
            warn!(match_id = %self.match_id, "match actor dropped shutdown response");
        }
    }
}

/// A seat taken (or retaken) through [MatchStore::join].
pub struct Session {
    pub handle: MatchHandle,
    /// Subscribed before the join was applied, so it sees the join's own events.
    pub events: broadcast::Receiver<MatchEvent>,
    pub player_id: PlayerId,
    pub color: Color,
    pub rejoined: bool,
    pub snapshot: MatchSnapshot,
}

/// Knobs applied to every match the store creates.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub seats_per_match: usize,
    pub policy: TurnPolicy,
    pub finished_linger: Duration,
    pub mailbox_size: usize,
    pub broadcast_buffer: usize,
}

impl StoreSettings {
    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self {
            seats_per_match: config.seats_per_match,
            policy: config.policy,
            finished_linger: config.finished_linger,
            mailbox_size: config.mailbox_size,
            broadcast_buffer: config.broadcast_buffer,
        }
    }
}

/// Seeded dice are offset by the match generation so every match rolls its own sequence.
pub fn dice_factory(seed: Option<u64>) -> DiceFactory {
    match seed {
        Some(seed) => Arc::new(move |generation| {
            Box::new(SeededDice::new(seed.wrapping_add(generation))) as Box<dyn DiceSource>
        }),
        None => Arc::new(|_| Box::new(SeededDice::random()) as Box<dyn DiceSource>),
    }
}

pub(crate) struct Inner {
    matches: Mutex<HashMap<MatchId, MatchHandle>>,
    next_generation: AtomicU64,
    rules: Arc<Rules>,
    settings: StoreSettings,
    dice: DiceFactory,
    history: Option<HistorySink>,
    metrics: Arc<Metrics>,
}

impl Inner {
    fn matches(&self) -> MutexGuard<'_, HashMap<MatchId, MatchHandle>> {
        self.matches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct MatchStore {
    inner: Arc<Inner>,
}

impl MatchStore {
    pub fn new(
        rules: Arc<Rules>,
        settings: StoreSettings,
        dice: DiceFactory,
        history: Option<HistorySink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                matches: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                rules,
                settings,
                dice,
                history,
                metrics,
            }),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Opens an empty lobby under `match_id`.
    pub fn create(&self, match_id: &str) -> Result<MatchHandle, StoreError> {
        let mut matches = self.inner.matches();
        if matches.contains_key(match_id) {
            return Err(StoreError::AlreadyExists(match_id.to_string()));
        }
        let handle = self.spawn(match_id)?;
        matches.insert(match_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn get_or_create(&self, match_id: &str) -> Result<MatchHandle, StoreError> {
        let mut matches = self.inner.matches();
        if let Some(handle) = matches.get(match_id) {
            return Ok(handle.clone());
        }
        let handle = self.spawn(match_id)?;
        matches.insert(match_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn handle(&self, match_id: &str) -> Option<MatchHandle> {
        self.inner.matches().get(match_id).cloned()
    }

    pub async fn get(&self, match_id: &str) -> Result<MatchSnapshot, StoreError> {
        let handle = self
            .handle(match_id)
            .ok_or_else(|| StoreError::NotFound(match_id.to_string()))?;
        handle.snapshot().await
    }

    pub async fn mutate(&self, match_id: &str, command: Command) -> Result<Reply, StoreError> {
        let handle = self
            .handle(match_id)
            .ok_or_else(|| StoreError::NotFound(match_id.to_string()))?;
        handle.mutate(command).await
    }

    /// Seats `token` in `match_id`, creating the lobby on first use.
    pub async fn join(&self, match_id: &str, token: &str) -> Result<Session, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let handle = self.get_or_create(match_id)?;
            let events = handle.subscribe();
            let command = Command::Join {
                token: token.to_string(),
            };
            match handle.mutate(command).await {
                Ok(Reply::Joined {
                    player_id,
                    color,
                    rejoined,
                    snapshot,
                }) => {
                    return Ok(Session {
                        handle,
                        events,
                        player_id,
                        color,
                        rejoined,
                        snapshot,
                    })
                }
                Ok(Reply::Applied) => {
                    warn!(%match_id, "join answered without a seat");
                    return Err(StoreError::NotFound(match_id.to_string()));
                }
                Err(StoreError::NotFound(_)) if attempt < JOIN_ATTEMPTS => {
                    debug!(%match_id, attempt, "lobby closed during join; retrying");
                    self.forget(&handle);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Abandons the match and drops it from the table.
    pub async fn remove(&self, match_id: &str) -> bool {
        let Some(handle) = self.inner.matches().remove(match_id) else {
            return false;
        };
        self.inner.metrics.match_dropped();
        handle.shutdown().await;
        true
    }

    /// Abandons every running match and waits for their actors to stop.
    pub async fn shutdown_all(&self) {
        let handles: Vec<MatchHandle> = self.inner.matches().drain().map(|(_, h)| h).collect();
        info!(matches = handles.len(), "shutting down matches");
        for handle in handles {
            self.inner.metrics.match_dropped();
            handle.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.matches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Drops an entry whose actor is gone without releasing it.
    fn forget(&self, handle: &MatchHandle) {
        let mut matches = self.inner.matches();
        if matches
            .get(&handle.match_id)
            .is_some_and(|current| current.generation == handle.generation)
        {
            matches.remove(&handle.match_id);
            self.inner.metrics.match_dropped();
        }
    }

    // Called with the table lock held.
    fn spawn(&self, match_id: &str) -> Result<MatchHandle, StoreError> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let settings = &self.inner.settings;
        let controller = TurnController::new(
            match_id,
            settings.seats_per_match,
            self.inner.rules.clone(),
            settings.policy,
            (self.inner.dice)(generation),
        )?;
        let (sender, mailbox) = mpsc::channel(settings.mailbox_size.max(1));
        let (events, _) = broadcast::channel(settings.broadcast_buffer.max(1));
        let handle = MatchHandle {
            match_id: match_id.to_string(),
            mailbox: sender,
            events: events.clone(),
            generation,
        };
        let actor = MatchActor {
            controller,
            mailbox,
            events,
            history: self.inner.history.clone(),
            metrics: self.inner.metrics.clone(),
            finished_linger: settings.finished_linger,
            on_exit: Release {
                store: Arc::downgrade(&self.inner),
                match_id: match_id.to_string(),
                generation,
            },
        };
        tokio::spawn(actor.run());
        self.inner.metrics.match_created();
        info!(%match_id, generation, "match created");
        Ok(handle)
    }
}

/// Removes a stopped actor's entry, unless the id has since been reused.
pub(crate) struct Release {
    store: Weak<Inner>,
    match_id: MatchId,
    generation: u64,
}

impl Release {
    pub(crate) fn match_id(&self) -> &str {
        &self.match_id
    }

    pub(crate) fn run(self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut matches = inner.matches();
        if matches
            .get(&self.match_id)
            .is_some_and(|handle| handle.generation == self.generation)
        {
            matches.remove(&self.match_id);
            inner.metrics.match_dropped();
            debug!(match_id = %self.match_id, "match released");
        }
    }
}
