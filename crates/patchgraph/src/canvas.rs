//! Canvas boundary
//!
//! The engine drives a [`Canvas`] with draw/update calls and receives user
//! gestures back as [`CanvasAction`]s. Drawing itself lives elsewhere.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::layout::{GroupPosition, SplitMode};
use crate::types::{ConnectionId, ConnectionKey, GroupId, MediaType, PortDirection, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupIcon {
    Application,
    Hardware,
    Plugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Null,
    Input,
    Output,
}

impl From<PortDirection> for PortMode {
    fn from(direction: PortDirection) -> Self {
        match direction {
            PortDirection::Input => Self::Input,
            PortDirection::Output => Self::Output,
            PortDirection::None => Self::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Null,
    Audio,
    Midi,
}

impl From<MediaType> for PortKind {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Audio => Self::Audio,
            MediaType::Midi => Self::Midi,
            MediaType::Unknown => Self::Null,
        }
    }
}

/// Draw/update calls the engine makes.
///
/// Split/join for a group always arrives before its position.
pub trait Canvas {
    fn clear(&mut self);

    fn add_group(&mut self, group_id: GroupId, name: &str, split: SplitMode, icon: GroupIcon);

    fn remove_group(&mut self, group_id: GroupId);

    fn set_group_icon(&mut self, group_id: GroupId, icon: GroupIcon);

    fn split_group(&mut self, group_id: GroupId);

    fn join_group(&mut self, group_id: GroupId);

    fn set_group_position(&mut self, group_id: GroupId, position: GroupPosition);

    fn add_port(
        &mut self,
        group_id: GroupId,
        port_id: PortId,
        name: &str,
        mode: PortMode,
        kind: PortKind,
    );

    fn remove_port(&mut self, group_id: GroupId, port_id: PortId);

    fn rename_port(&mut self, group_id: GroupId, port_id: PortId, name: &str);

    fn connect_ports(&mut self, connection_id: ConnectionId, key: ConnectionKey);

    fn disconnect_ports(&mut self, connection_id: ConnectionId);
}

/// User gestures coming back from the canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CanvasAction {
    /// Split the group; `position` is where it currently sits
    GroupSplit {
        group_id: GroupId,
        position: GroupPosition,
    },
    GroupJoin {
        group_id: GroupId,
        position: GroupPosition,
    },
    GroupMoved {
        group_id: GroupId,
        position: GroupPosition,
    },
    PortInfo {
        group_id: GroupId,
        port_id: PortId,
    },
    PortRename {
        group_id: GroupId,
        port_id: PortId,
        new_name: String,
    },
    PortsConnect {
        out_group: GroupId,
        out_port: PortId,
        in_group: GroupId,
        in_port: PortId,
    },
    PortsDisconnect {
        connection_id: ConnectionId,
    },
}

/// One recorded canvas call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum CanvasCall {
    Clear,
    AddGroup {
        group_id: GroupId,
        name: String,
        split: SplitMode,
        icon: GroupIcon,
    },
    RemoveGroup {
        group_id: GroupId,
    },
    SetGroupIcon {
        group_id: GroupId,
        icon: GroupIcon,
    },
    SplitGroup {
        group_id: GroupId,
    },
    JoinGroup {
        group_id: GroupId,
    },
    SetGroupPosition {
        group_id: GroupId,
        position: GroupPosition,
    },
    AddPort {
        group_id: GroupId,
        port_id: PortId,
        name: String,
        mode: PortMode,
        kind: PortKind,
    },
    RemovePort {
        group_id: GroupId,
        port_id: PortId,
    },
    RenamePort {
        group_id: GroupId,
        port_id: PortId,
        name: String,
    },
    ConnectPorts {
        connection_id: ConnectionId,
        key: ConnectionKey,
    },
    DisconnectPorts {
        connection_id: ConnectionId,
    },
}

/// Canvas that keeps every call it receives
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    calls: Vec<CanvasCall>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[CanvasCall] {
        &self.calls
    }

    /// Drain the recorded calls
    pub fn take(&mut self) -> Vec<CanvasCall> {
        std::mem::take(&mut self.calls)
    }
}

impl Canvas for RecordingCanvas {
    fn clear(&mut self) {
        self.calls.push(CanvasCall::Clear);
    }

    fn add_group(&mut self, group_id: GroupId, name: &str, split: SplitMode, icon: GroupIcon) {
        self.calls.push(CanvasCall::AddGroup {
            group_id,
            name: name.to_string(),
            split,
            icon,
        });
    }

    fn remove_group(&mut self, group_id: GroupId) {
        self.calls.push(CanvasCall::RemoveGroup { group_id });
    }

    fn set_group_icon(&mut self, group_id: GroupId, icon: GroupIcon) {
        self.calls.push(CanvasCall::SetGroupIcon { group_id, icon });
    }

    fn split_group(&mut self, group_id: GroupId) {
        self.calls.push(CanvasCall::SplitGroup { group_id });
    }

    fn join_group(&mut self, group_id: GroupId) {
        self.calls.push(CanvasCall::JoinGroup { group_id });
    }

    fn set_group_position(&mut self, group_id: GroupId, position: GroupPosition) {
        self.calls
            .push(CanvasCall::SetGroupPosition { group_id, position });
    }

    fn add_port(
        &mut self,
        group_id: GroupId,
        port_id: PortId,
        name: &str,
        mode: PortMode,
        kind: PortKind,
    ) {
        self.calls.push(CanvasCall::AddPort {
            group_id,
            port_id,
            name: name.to_string(),
            mode,
            kind,
        });
    }

    fn remove_port(&mut self, group_id: GroupId, port_id: PortId) {
        self.calls.push(CanvasCall::RemovePort { group_id, port_id });
    }

    fn rename_port(&mut self, group_id: GroupId, port_id: PortId, name: &str) {
        self.calls.push(CanvasCall::RenamePort {
            group_id,
            port_id,
            name: name.to_string(),
        });
    }

    fn connect_ports(&mut self, connection_id: ConnectionId, key: ConnectionKey) {
        self.calls
            .push(CanvasCall::ConnectPorts { connection_id, key });
    }

    fn disconnect_ports(&mut self, connection_id: ConnectionId) {
        self.calls.push(CanvasCall::DisconnectPorts { connection_id });
    }
}

/// Headless canvas that logs every call
#[derive(Debug, Default)]
pub struct TracingCanvas;

impl Canvas for TracingCanvas {
    fn clear(&mut self) {
        info!("canvas cleared");
    }

    fn add_group(&mut self, group_id: GroupId, name: &str, split: SplitMode, icon: GroupIcon) {
        info!(%group_id, name, ?split, ?icon, "group added");
    }

    fn remove_group(&mut self, group_id: GroupId) {
        info!(%group_id, "group removed");
    }

    fn set_group_icon(&mut self, group_id: GroupId, icon: GroupIcon) {
        debug!(%group_id, ?icon, "group icon");
    }

    fn split_group(&mut self, group_id: GroupId) {
        debug!(%group_id, "group split");
    }

    fn join_group(&mut self, group_id: GroupId) {
        debug!(%group_id, "group joined");
    }

    fn set_group_position(&mut self, group_id: GroupId, position: GroupPosition) {
        debug!(%group_id, %position, "group position");
    }

    fn add_port(
        &mut self,
        group_id: GroupId,
        port_id: PortId,
        name: &str,
        mode: PortMode,
        kind: PortKind,
    ) {
        info!(%group_id, %port_id, name, ?mode, ?kind, "port added");
    }

    fn remove_port(&mut self, group_id: GroupId, port_id: PortId) {
        info!(%group_id, %port_id, "port removed");
    }

    fn rename_port(&mut self, group_id: GroupId, port_id: PortId, name: &str) {
        info!(%group_id, %port_id, name, "port renamed");
    }

    fn connect_ports(&mut self, connection_id: ConnectionId, key: ConnectionKey) {
        info!(
            %connection_id,
            "connected {}/{} -> {}/{}",
            key.out_group, key.out_port, key.in_group, key.in_port
        );
    }

    fn disconnect_ports(&mut self, connection_id: ConnectionId) {
        info!(%connection_id, "disconnected");
    }
}
