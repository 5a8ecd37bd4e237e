//! Patch graph synchronization engine
//!
//! Mirrors an audio server's port graph into an in-memory model and keeps a
//! canvas in step with it. Server notifications arrive on a bounded queue
//! and are applied in order on the task that owns the [`Engine`]; canvas
//! gestures go out as server requests and come back as notifications.

pub mod adapter;
pub mod alias;
pub mod canvas;
pub mod engine;
pub mod event;
pub mod ids;
pub mod layout;
pub mod loopback;
pub mod model;
pub mod server;
pub mod status;
mod translator;
pub mod types;

#[cfg(feature = "pipewire")]
pub mod backend;

pub use adapter::{ActionReply, PortDetails};
pub use alias::AliasPreference;
pub use canvas::{Canvas, CanvasAction, CanvasCall, RecordingCanvas, TracingCanvas};
pub use engine::{Engine, EngineCommand, EngineError, EngineOptions};
pub use event::{event_channel, EventReceiver, EventSender, PropertyChange, ServerEvent};
pub use layout::{GroupLayout, GroupPosition, SplitMode};
pub use loopback::LoopbackServer;
pub use model::{GraphModel, GraphSnapshot, ModelError};
pub use server::{ClientUuid, PatchServer, PortFlags, ServerError, ServerPort};
pub use status::{EngineStatus, TransportInfo, TransportView};
pub use types::*;
