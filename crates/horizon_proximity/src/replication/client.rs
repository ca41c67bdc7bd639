//! Async front end of the replication worker.
//!
//! [`ReplicationClient`] enqueues commands for a single worker task that
//! owns the [`ReplicationState`]. Besides commands the worker wakes for the
//! earliest unobserved-node deadline, the orphan sweep and orphan expiry.

use super::cache::ReplicatedObjectCache;
use super::state::{ReplicationState, ReplicationStats};
use crate::config::ReplicationConfig;
use crate::context::{ReplicationOwner, TimeSynced};
use crate::error::ReplicationError;
use crate::protocol::{LocationUpdate, ProximityUpdate};
use crate::types::{EntityId, TreeId};
use crate::utils::millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

enum Command {
    Message(Vec<u8>),
    ProximityUpdate(ProximityUpdate),
    LocationUpdate(LocationUpdate),
    Observing(TreeId, EntityId),
    StoppedObserving(TreeId, EntityId),
    NodeRemoved(TreeId, EntityId),
    InitQuery,
    DestroyQuery,
    Cache(TreeId, oneshot::Sender<Option<ReplicatedObjectCache>>),
    Stats(oneshot::Sender<ReplicationStats>),
    Shutdown,
}

/// Handle to a running replication worker.
pub struct ReplicationClient {
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationClient {
    /// Validates `config` and spawns the worker task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Timeouts and sweep intervals for unobserved nodes and orphans
    /// * `owner` - Receives tree lifecycle callbacks and outgoing index requests
    /// * `time_sync` - Converts server timestamps into local time
    ///
    /// # Returns
    ///
    /// The client handle, or `ReplicationError::Config` if `config` fails
    /// validation.
    pub fn spawn(
        config: ReplicationConfig,
        owner: Arc<dyn ReplicationOwner>,
        time_sync: Arc<dyn TimeSynced>,
    ) -> Result<Self, ReplicationError> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = ReplicationState::new(config.clone(), owner, time_sync);
        let worker = tokio::spawn(run_worker(state, config, command_rx));

        Ok(Self {
            commands,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, command: Command) -> Result<(), ReplicationError> {
        self.commands.send(command).map_err(|_| ReplicationError::ClientStopped)
    }

    /// Raw message from the remote owner. Undecodable payloads are logged
    /// and dropped by the worker.
    pub fn receive_message(&self, payload: Vec<u8>) -> Result<(), ReplicationError> {
        self.send(Command::Message(payload))
    }

    pub fn proximity_update(&self, update: ProximityUpdate) -> Result<(), ReplicationError> {
        self.send(Command::ProximityUpdate(update))
    }

    pub fn location_update(&self, update: LocationUpdate) -> Result<(), ReplicationError> {
        self.send(Command::LocationUpdate(update))
    }

    pub fn queriers_are_observing(
        &self,
        tree: TreeId,
        node: EntityId,
    ) -> Result<(), ReplicationError> {
        self.send(Command::Observing(tree, node))
    }

    pub fn queriers_stopped_observing(
        &self,
        tree: TreeId,
        node: EntityId,
    ) -> Result<(), ReplicationError> {
        self.send(Command::StoppedObserving(tree, node))
    }

    pub fn replicated_node_removed(
        &self,
        tree: TreeId,
        node: EntityId,
    ) -> Result<(), ReplicationError> {
        self.send(Command::NodeRemoved(tree, node))
    }

    pub fn init_query(&self) -> Result<(), ReplicationError> {
        self.send(Command::InitQuery)
    }

    pub fn destroy_query(&self) -> Result<(), ReplicationError> {
        self.send(Command::DestroyQuery)
    }

    /// The local mirror of `tree`, if the tree is currently known.
    pub async fn cache(
        &self,
        tree: TreeId,
    ) -> Result<Option<ReplicatedObjectCache>, ReplicationError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Cache(tree, reply))?;
        response.await.map_err(|_| ReplicationError::ClientStopped)
    }

    pub async fn stats(&self) -> Result<ReplicationStats, ReplicationError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        response.await.map_err(|_| ReplicationError::ClientStopped)
    }

    /// Stops the worker after it processes already-queued commands.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        if let Err(e) = worker.await {
            warn!("Replication worker ended abnormally: {}", e);
        }
    }
}

fn handle_command(state: &mut ReplicationState, command: Command) {
    let now = Instant::now();
    match command {
        Command::Message(payload) => {
            if let Err(e) = state.handle_message(&payload, now) {
                warn!("Discarding replication message: {}", e);
            }
        }
        Command::ProximityUpdate(update) => state.handle_proximity_update(&update, now),
        Command::LocationUpdate(update) => state.handle_location_update(&update, now),
        Command::Observing(tree, node) => state.queriers_are_observing(tree, node),
        Command::StoppedObserving(tree, node) => state.queriers_stopped_observing(tree, node, now),
        Command::NodeRemoved(tree, node) => state.replicated_node_removed(tree, node),
        Command::InitQuery => state.init_query(),
        Command::DestroyQuery => state.destroy_query(),
        Command::Cache(tree, reply) => {
            let _ = reply.send(state.cache(tree));
        }
        Command::Stats(reply) => {
            let _ = reply.send(state.stats());
        }
        Command::Shutdown => {}
    }
}

async fn run_worker(
    mut state: ReplicationState,
    config: ReplicationConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut sweep = interval(millis(config.orphan_sweep_interval_ms));
    let mut expiry = interval(millis(config.orphan_expiry_interval_ms));
    for timer in [&mut sweep, &mut expiry] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    info!("🔗 Replication worker started");

    loop {
        let next_expiry = state.next_unobserved_expiry();
        let deadline = next_expiry.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => handle_command(&mut state, command),
            },
            _ = sleep_until(deadline), if next_expiry.is_some() => {
                state.process_expired_nodes(Instant::now());
            }
            _ = sweep.tick() => {
                state.cleanup_orphans();
            }
            _ = expiry.tick() => {
                state.expire_orphans(Instant::now());
            }
        }
    }

    let mut drained = 0usize;
    while let Ok(command) = commands.try_recv() {
        handle_command(&mut state, command);
        drained += 1;
    }
    if drained > 0 {
        debug!("Processed {} queued commands during shutdown", drained);
    }

    info!("🛑 Replication worker stopped");
}
