//! Async front end of the proximity worker.
//!
//! [`ProximityCoordinator`] is a cheap handle: every call enqueues a command
//! for the worker task, which owns the [`ProximityState`] and also runs the
//! periodic duties on independent timers:
//!
//! 1. server-query push to peers
//! 2. query index tick
//! 3. event harvesting for server and object queries
//! 4. result delivery (also retried after every other duty)
//!
//! Location-service effects produced by the worker are executed on a second,
//! caller-facing task so the worker never calls into the location service.

use super::state::{ProximityState, ProximityStats};
use crate::config::ProximityConfig;
use crate::context::{LocationService, LocationServiceOp, ProximityContext};
use crate::error::ProximityError;
use crate::protocol::MigrationData;
use crate::spatial::LocationChange;
use crate::types::{BoundingSphere, EntityId, ServerId, SolidAngle, TimedMotionVector};
use crate::utils::{current_timestamp, millis};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

enum Command {
    UpdateServerQuery {
        server: ServerId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: SolidAngle,
    },
    RemoveServerQuery(ServerId),
    UpdateObjectQuery {
        id: EntityId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: Option<SolidAngle>,
    },
    RemoveObjectQuery(EntityId),
    LocationChanged(LocationChange),
    ServerMessage {
        source: ServerId,
        payload: Vec<u8>,
    },
    TakeMigrationData {
        id: EntityId,
        reply: oneshot::Sender<Option<MigrationData>>,
    },
    Stats(oneshot::Sender<ProximityStats>),
    Shutdown,
}

/// Handle to a running proximity worker.
pub struct ProximityCoordinator {
    server_id: ServerId,
    commands: mpsc::UnboundedSender<Command>,
    location_service: Arc<dyn LocationService>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl ProximityCoordinator {
    /// Validates `config` and spawns the worker and caller-facing tasks.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Intervals, batching limits and index choices for this server
    /// * `context` - Collaborators for routing, streams, location and segmentation
    ///
    /// # Returns
    ///
    /// The coordinator handle, or `ProximityError::Config` if `config` fails
    /// validation.
    pub fn spawn(
        config: ProximityConfig,
        context: ProximityContext,
    ) -> Result<Self, ProximityError> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ops_tx, mut ops_rx) = mpsc::unbounded_channel::<Vec<LocationServiceOp>>();

        let service = context.location_service.clone();
        let frontend = tokio::spawn(async move {
            while let Some(ops) = ops_rx.recv().await {
                for op in ops {
                    op.apply(service.as_ref());
                }
            }
        });

        let state = ProximityState::new(config.clone(), &context);
        let worker = tokio::spawn(run_worker(state, config, command_rx, ops_tx));

        Ok(Self {
            server_id: context.server_id,
            commands,
            location_service: context.location_service,
            tasks: Mutex::new(Some((worker, frontend))),
        })
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    fn send(&self, command: Command) -> Result<(), ProximityError> {
        self.commands.send(command).map_err(|_| ProximityError::WorkerStopped)
    }

    /// Adds or updates the coarse query `server` placed on our region.
    pub fn update_server_query(
        &self,
        server: ServerId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: SolidAngle,
    ) -> Result<(), ProximityError> {
        self.send(Command::UpdateServerQuery { server, location, bounds, angle })
    }

    pub fn remove_server_query(&self, server: ServerId) -> Result<(), ProximityError> {
        self.send(Command::RemoveServerQuery(server))
    }

    /// Adds or updates an object query. With `angle == None` only location
    /// and bounds of an existing query are refreshed.
    pub fn update_object_query(
        &self,
        id: EntityId,
        location: TimedMotionVector,
        bounds: BoundingSphere,
        angle: Option<SolidAngle>,
    ) -> Result<(), ProximityError> {
        self.send(Command::UpdateObjectQuery { id, location, bounds, angle })
    }

    pub fn remove_object_query(&self, id: EntityId) -> Result<(), ProximityError> {
        self.send(Command::RemoveObjectQuery(id))
    }

    /// Registers an object query seeded from the location service.
    pub fn add_query(&self, id: EntityId, angle: SolidAngle) -> Result<(), ProximityError> {
        let location = self
            .location_service
            .location(id)
            .ok_or(ProximityError::UnknownEntity(id))?;
        let bounds = self
            .location_service
            .bounds(id)
            .ok_or(ProximityError::UnknownEntity(id))?;
        self.update_object_query(id, location, bounds, Some(angle))
    }

    /// Forwards a change reported by the location service.
    pub fn location_changed(&self, change: LocationChange) -> Result<(), ProximityError> {
        self.send(Command::LocationChanged(change))
    }

    /// Hands a proximity payload received from `source` to the worker.
    /// Malformed payloads are logged and dropped by the worker.
    pub fn receive_server_message(
        &self,
        source: ServerId,
        payload: Vec<u8>,
    ) -> Result<(), ProximityError> {
        self.send(Command::ServerMessage { source, payload })
    }

    /// Removes the object's query ahead of migration.
    pub async fn generate_migration_data(
        &self,
        id: EntityId,
    ) -> Result<Option<MigrationData>, ProximityError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::TakeMigrationData { id, reply })?;
        response.await.map_err(|_| ProximityError::WorkerStopped)
    }

    /// Recreates the query of an object that migrated here.
    pub fn receive_migration_data(
        &self,
        id: EntityId,
        data: MigrationData,
    ) -> Result<(), ProximityError> {
        self.add_query(id, data.min_angle)
    }

    pub async fn stats(&self) -> Result<ProximityStats, ProximityError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        response.await.map_err(|_| ProximityError::WorkerStopped)
    }

    /// Stops the worker after it processes already-queued commands, then
    /// waits for pending location-service effects to run.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let Some((worker, frontend)) = self.tasks.lock().await.take() else {
            return;
        };
        if let Err(e) = worker.await {
            warn!("Proximity worker ended abnormally: {}", e);
        }
        if let Err(e) = frontend.await {
            warn!("Proximity location task ended abnormally: {}", e);
        }
    }
}

fn handle_command(state: &mut ProximityState, command: Command) {
    match command {
        Command::UpdateServerQuery { server, location, bounds, angle } => {
            state.update_server_query(server, location, bounds, angle)
        }
        Command::RemoveServerQuery(server) => state.remove_server_query(server),
        Command::UpdateObjectQuery { id, location, bounds, angle } => {
            state.update_object_query(id, location, bounds, angle)
        }
        Command::RemoveObjectQuery(id) => {
            state.remove_object_query(id);
        }
        Command::LocationChanged(change) => state.apply_location_change(&change),
        Command::ServerMessage { source, payload } => {
            if let Err(e) = state.handle_server_message(source, &payload) {
                warn!("Discarding proximity message from {}: {}", source, e);
            }
        }
        Command::TakeMigrationData { id, reply } => {
            let _ = reply.send(state.take_migration_data(id));
        }
        Command::Stats(reply) => {
            let _ = reply.send(state.stats());
        }
        Command::Shutdown => {}
    }
}

fn forward_ops(state: &mut ProximityState, ops: &mpsc::UnboundedSender<Vec<LocationServiceOp>>) {
    let pending = state.take_location_ops();
    if !pending.is_empty() && ops.send(pending).is_err() {
        warn!("Location task is gone, dropping location service updates");
    }
}

async fn run_worker(
    mut state: ProximityState,
    config: ProximityConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ops: mpsc::UnboundedSender<Vec<LocationServiceOp>>,
) {
    let mut push = interval(millis(config.server_query_push_interval_ms));
    let mut index_tick = interval(millis(config.index_tick_interval_ms));
    let mut events = interval(millis(config.event_interval_ms));
    let mut delivery = interval(millis(config.delivery_interval_ms));
    for timer in [&mut push, &mut index_tick, &mut events, &mut delivery] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    info!("🛰️ Proximity worker started for {}", state.server_id());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => handle_command(&mut state, command),
            },
            _ = push.tick() => state.push_server_queries(current_timestamp()),
            _ = index_tick.tick() => state.tick_indexes(current_timestamp()),
            _ = events.tick() => {
                let now = current_timestamp();
                state.generate_server_events(now);
                state.generate_object_events(now);
            }
            _ = delivery.tick() => {}
        }

        state.deliver_results();
        forward_ops(&mut state, &ops);
    }

    let mut drained = 0usize;
    while let Ok(command) = commands.try_recv() {
        handle_command(&mut state, command);
        drained += 1;
    }
    state.deliver_results();
    forward_ops(&mut state, &ops);
    if drained > 0 {
        debug!("Processed {} queued commands during shutdown", drained);
    }

    info!("🛑 Proximity worker stopped for {}", state.server_id());
}
