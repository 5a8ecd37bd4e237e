//! Engine session
//!
//! One [`Engine`] owns the graph model, the canvas and the optional server
//! session. Every graph mutation happens on the task that owns the engine:
//! server events via [`Engine::drain`], user gestures via
//! [`Engine::handle_action`], and the two status polls on their timers.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use patchconf::PatchConfig;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapter::ActionReply;
use crate::alias::AliasPreference;
use crate::canvas::{Canvas, CanvasAction};
use crate::event::EventReceiver;
use crate::layout::GroupPosition;
use crate::model::{GraphModel, GraphSnapshot, ModelError};
use crate::server::{PatchServer, ServerError};
use crate::status::{EngineStatus, TransportView};
use crate::types::{GroupId, PortDirection};

/// The DSP load poll runs this many times slower than the transport poll.
pub const DSP_LOAD_POLL_FACTOR: u32 = 5;

/// Failures the engine reports. None of them are fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An event or gesture named something the model does not have
    #[error("lookup miss: {0}")]
    LookupMiss(String),

    #[error("not connected to a server")]
    ServerUnavailable,

    #[error("server rejected request: {0}")]
    RejectedRequest(String),

    #[error("malformed position metadata: {0}")]
    MalformedMetadata(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<ServerError> for EngineError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Disconnected => Self::ServerUnavailable,
            other => Self::RejectedRequest(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub alias_preference: AliasPreference,
    /// Transport poll period; DSP load is polled at a multiple of it
    pub refresh_interval: Duration,
}

impl EngineOptions {
    pub fn from_config(config: &PatchConfig) -> Self {
        let alias_preference = AliasPreference::try_from(config.main.alias_preference)
            .unwrap_or_else(|err| {
                warn!("{}, using default", err);
                AliasPreference::default()
            });
        Self {
            alias_preference,
            refresh_interval: Duration::from_millis(config.main.refresh_interval_ms.max(1)),
        }
    }

    pub fn dsp_load_interval(&self) -> Duration {
        self.refresh_interval * DSP_LOAD_POLL_FACTOR
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            alias_preference: AliasPreference::default(),
            refresh_interval: Duration::from_millis(120),
        }
    }
}

/// Requests other tasks can send into a running engine
#[derive(Debug)]
pub enum EngineCommand {
    Gesture {
        action: CanvasAction,
        reply: Option<oneshot::Sender<Result<ActionReply, EngineError>>>,
    },
    Snapshot(oneshot::Sender<GraphSnapshot>),
    Status(oneshot::Sender<EngineStatus>),
    /// Position currently stored on the server for a group
    StoredPosition {
        group_id: GroupId,
        reply: oneshot::Sender<Result<Option<GroupPosition>, EngineError>>,
    },
    SetTransportView(TransportView),
    ClearXruns,
}

pub struct Engine<S, C> {
    pub(crate) model: GraphModel,
    pub(crate) canvas: C,
    pub(crate) session: Option<S>,
    pub(crate) options: EngineOptions,
    /// Physical groups already forced into split layout this session
    pub(crate) forced_split: HashSet<GroupId>,
    pub(crate) status: EngineStatus,
}

impl<S: PatchServer, C: Canvas> Engine<S, C> {
    pub fn new(canvas: C, options: EngineOptions) -> Self {
        Self {
            model: GraphModel::new(),
            canvas,
            session: None,
            options,
            forced_split: HashSet::new(),
            status: EngineStatus::default(),
        }
    }

    /// Start a session and mirror the server's current graph.
    pub fn attach(&mut self, server: S) {
        if self.session.is_some() {
            self.detach();
        }

        self.status.connected = true;
        self.status.xruns = 0;
        self.status.buffer_size = server.buffer_size();
        self.status.sample_rate = server.sample_rate();
        self.status.realtime = server.is_realtime();
        self.status.transport = server.transport();
        self.status.dsp_load = server.dsp_load();
        self.session = Some(server);

        self.sync_from_server();
        info!(
            groups = self.model.group_count(),
            ports = self.model.port_count(),
            connections = self.model.connection_count(),
            "attached to server ({} frames @ {} Hz)",
            self.status.buffer_size,
            self.status.sample_rate
        );
    }

    /// End the session: canvas and model cleared, ids reset, gestures disabled.
    pub fn detach(&mut self) -> Option<S> {
        self.canvas.clear();
        self.model.reset();
        self.forced_split.clear();
        self.status.reset();
        let server = self.session.take();
        if server.is_some() {
            info!("detached from server");
        }
        server
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn server(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.model.snapshot()
    }

    pub fn clear_xruns(&mut self) {
        if self.session.is_some() {
            self.status.clear_xruns();
        }
    }

    /// Pick how the transport position is rendered. Kept across sessions.
    pub fn set_transport_view(&mut self, view: TransportView) {
        self.status.transport_view = view;
    }

    /// Switch alias preference and rebuild the canvas with the new names.
    pub fn set_alias_preference(&mut self, preference: AliasPreference) {
        if self.options.alias_preference == preference {
            return;
        }
        self.options.alias_preference = preference;
        self.resync();
    }

    /// Throw away the mirrored graph and query it again.
    ///
    /// Ids keep growing across a resync; only a detach resets them.
    pub fn resync(&mut self) {
        self.canvas.clear();
        self.model.clear();
        self.forced_split.clear();
        if self.session.is_some() {
            self.sync_from_server();
        }
    }

    /// Mirror all ports, then the connections of every non-input port.
    fn sync_from_server(&mut self) {
        let names = match &self.session {
            Some(server) => server.ports(),
            None => return,
        };

        for name in &names {
            if let Err(err) = self.register_port(name) {
                debug!("initial sync skipped {}: {}", name, err);
            }
        }

        for name in &names {
            let Some(port) = self.model.port_by_name(name) else {
                continue;
            };
            if port.direction == PortDirection::Input {
                continue;
            }
            let peers = match &self.session {
                Some(server) => server.port_connections(name),
                None => return,
            };
            for peer in peers {
                if let Err(err) = self.connect_by_name(name, &peer) {
                    debug!("initial sync skipped {} -> {}: {}", name, peer, err);
                }
            }
        }
    }

    /// Apply every queued event in arrival order. Returns how many were applied.
    pub fn drain(&mut self, events: &mut EventReceiver) -> usize {
        let mut applied = 0;
        while let Some(event) = events.try_next() {
            self.apply_event(event);
            applied += 1;
        }
        if events.take_overflow() {
            warn!("events were dropped, resyncing graph");
            self.resync();
        }
        applied
    }

    pub fn refresh_transport(&mut self) {
        if let Some(server) = &self.session {
            self.status.transport = server.transport();
        }
    }

    pub fn refresh_dsp_load(&mut self) {
        if let Some(server) = &self.session {
            self.status.dsp_load = server.dsp_load();
        }
    }

    /// Handle one command from another task.
    pub fn execute(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Gesture { action, reply } => {
                let result = self.handle_action(action);
                if let Err(err) = &result {
                    warn!("gesture failed: {}", err);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status.clone());
            }
            EngineCommand::StoredPosition { group_id, reply } => {
                let _ = reply.send(self.stored_position(group_id));
            }
            EngineCommand::SetTransportView(view) => self.set_transport_view(view),
            EngineCommand::ClearXruns => self.clear_xruns(),
        }
    }

    /// Run until `shutdown` resolves or the server's event stream ends.
    ///
    /// Events, commands and both polls are serialized onto this one task.
    pub async fn run<F>(
        &mut self,
        events: &mut EventReceiver,
        commands: &mut mpsc::Receiver<EngineCommand>,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        let mut transport_tick = tokio::time::interval(self.options.refresh_interval);
        transport_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dsp_tick = tokio::time::interval(self.options.dsp_load_interval());
        dsp_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut commands_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("engine shutting down");
                    break;
                }

                event = events.next() => match event {
                    Some(event) => {
                        self.apply_event(event);
                        self.drain(events);
                    }
                    None => {
                        info!("server event stream closed");
                        self.detach();
                        break;
                    }
                },

                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.execute(command),
                    None => commands_open = false,
                },

                _ = transport_tick.tick() => self.refresh_transport(),

                _ = dsp_tick.tick() => self.refresh_dsp_load(),
            }
        }
    }
}
