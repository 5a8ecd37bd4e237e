//! Canvas gestures into server requests
//!
//! Gestures never change the model directly. They resolve ids to server
//! names and issue requests; the server's own notifications bring the
//! result back through the translator. Port info and rename are the two
//! exceptions that answer immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::alias::{rename_plan, AliasEdit};
use crate::canvas::{Canvas, CanvasAction};
use crate::engine::{Engine, EngineError};
use crate::layout::GroupPosition;
use crate::server::{PatchServer, URI_POSITION, URI_TYPE_STRING};
use crate::types::{ConnectionId, GroupId, MediaType, PortId};

/// Shown in alias slots that are empty
const NO_ALIAS: &str = "(none)";

/// Everything the port info gesture reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDetails {
    pub group_name: String,
    pub short_name: String,
    pub full_name: String,
    pub alias_1: Option<String>,
    pub alias_2: Option<String>,
    pub flags: String,
    pub media_type: MediaType,
    pub latency_frames: u32,
    pub latency_ms: f64,
    pub total_latency_frames: u32,
    pub total_latency_ms: f64,
}

impl PortDetails {
    pub fn type_label(&self) -> &'static str {
        match self.media_type {
            MediaType::Audio => "JACK Audio",
            MediaType::Midi => "JACK MIDI",
            MediaType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PortDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group Name:         {}", self.group_name)?;
        writeln!(f, "Port Name:          {}", self.short_name)?;
        writeln!(f, "Full Port Name:     {}", self.full_name)?;
        writeln!(
            f,
            "Port Alias #1:      {}",
            self.alias_1.as_deref().unwrap_or(NO_ALIAS)
        )?;
        writeln!(
            f,
            "Port Alias #2:      {}",
            self.alias_2.as_deref().unwrap_or(NO_ALIAS)
        )?;
        writeln!(f, "Port Flags:         {}", self.flags)?;
        writeln!(f, "Port Type:          {}", self.type_label())?;
        writeln!(
            f,
            "Port Latency:       {:.1} ms ({} frames)",
            self.latency_ms, self.latency_frames
        )?;
        write!(
            f,
            "Total Port Latency: {:.1} ms ({} frames)",
            self.total_latency_ms, self.total_latency_frames
        )
    }
}

/// What a gesture did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ActionReply {
    /// Request sent; the server's notification will complete it
    Requested,
    /// Alias written and display name updated
    Renamed { port_id: PortId, name: String },
    Info(PortDetails),
    /// Nothing to do
    Ignored,
}

fn frames_to_ms(frames: u32, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    f64::from(frames) * 1000.0 / f64::from(sample_rate)
}

impl<S: PatchServer, C: Canvas> Engine<S, C> {
    /// Handle one user gesture from the canvas.
    pub fn handle_action(&mut self, action: CanvasAction) -> Result<ActionReply, EngineError> {
        if self.session.is_none() {
            return Err(EngineError::ServerUnavailable);
        }

        match action {
            CanvasAction::GroupSplit { group_id, position } => {
                self.write_position(group_id, position.split_from())
            }
            CanvasAction::GroupJoin { group_id, position } => {
                self.write_position(group_id, position.joined())
            }
            CanvasAction::GroupMoved { group_id, position } => {
                self.write_position(group_id, position)
            }
            CanvasAction::PortInfo { group_id, port_id } => {
                self.port_details(group_id, port_id).map(ActionReply::Info)
            }
            CanvasAction::PortRename {
                group_id,
                port_id,
                new_name,
            } => self.rename_port(group_id, port_id, &new_name),
            CanvasAction::PortsConnect {
                out_group,
                out_port,
                in_group,
                in_port,
            } => self.request_connect(out_group, out_port, in_group, in_port),
            CanvasAction::PortsDisconnect { connection_id } => {
                self.request_disconnect(connection_id)
            }
        }
    }

    fn port_names(
        &self,
        group_id: GroupId,
        port_id: PortId,
    ) -> Result<(String, String), EngineError> {
        self.model
            .port_in_group(group_id, port_id)
            .map(|p| (p.canonical_name.clone(), p.group_name.clone()))
            .ok_or_else(|| EngineError::LookupMiss(format!("{}/{}", group_id, port_id)))
    }

    fn request_connect(
        &mut self,
        out_group: GroupId,
        out_port: PortId,
        in_group: GroupId,
        in_port: PortId,
    ) -> Result<ActionReply, EngineError> {
        let (output, _) = self.port_names(out_group, out_port)?;
        let (input, _) = self.port_names(in_group, in_port)?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;

        debug!("requesting connect {} -> {}", output, input);
        server.connect(&output, &input)?;
        Ok(ActionReply::Requested)
    }

    fn request_disconnect(&mut self, connection_id: ConnectionId) -> Result<ActionReply, EngineError> {
        let key = self
            .model
            .connection(connection_id)
            .map(|c| c.key)
            .ok_or_else(|| EngineError::LookupMiss(connection_id.to_string()))?;
        let (output, _) = self.port_names(key.out_group, key.out_port)?;
        let (input, _) = self.port_names(key.in_group, key.in_port)?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;

        debug!("requesting disconnect {} -> {}", output, input);
        server.disconnect(&output, &input)?;
        Ok(ActionReply::Requested)
    }

    /// Store a group's position on the server; the property change
    /// notification then drives the canvas.
    fn write_position(
        &mut self,
        group_id: GroupId,
        position: GroupPosition,
    ) -> Result<ActionReply, EngineError> {
        let name = self
            .model
            .group(group_id)
            .map(|g| g.name.clone())
            .ok_or_else(|| EngineError::LookupMiss(group_id.to_string()))?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;
        let uuid = server
            .client_uuid(&name)
            .ok_or_else(|| EngineError::LookupMiss(format!("client uuid for {}", name)))?;

        debug!(group = %group_id, %position, "writing position for {}", name);
        server.set_property(uuid, URI_POSITION, &position.to_string(), URI_TYPE_STRING)?;
        Ok(ActionReply::Requested)
    }

    /// The group's position as stored on the server, if it has one.
    pub fn stored_position(&self, group_id: GroupId) -> Result<Option<GroupPosition>, EngineError> {
        let name = self
            .model
            .group(group_id)
            .map(|g| g.name.as_str())
            .ok_or_else(|| EngineError::LookupMiss(group_id.to_string()))?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;
        let Some(uuid) = server.client_uuid(name) else {
            return Ok(None);
        };

        server
            .property(uuid, URI_POSITION)
            .map(|value| {
                value
                    .parse()
                    .map_err(|err| EngineError::MalformedMetadata(format!("{}: {}", name, err)))
            })
            .transpose()
    }

    fn port_details(&self, group_id: GroupId, port_id: PortId) -> Result<PortDetails, EngineError> {
        let (full_name, group_name) = self.port_names(group_id, port_id)?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;
        let info = server
            .port_info(&full_name)
            .ok_or_else(|| EngineError::LookupMiss(full_name.clone()))?;
        let rate = self.status.sample_rate;

        Ok(PortDetails {
            group_name,
            short_name: info.short_name.clone(),
            full_name,
            alias_1: info.aliases.first().cloned(),
            alias_2: info.aliases.get(1).cloned(),
            flags: info.flags.describe(),
            media_type: info.media_type,
            latency_frames: info.latency_frames,
            latency_ms: frames_to_ms(info.latency_frames, rate),
            total_latency_frames: info.total_latency_frames,
            total_latency_ms: frames_to_ms(info.total_latency_frames, rate),
        })
    }

    /// Rename by writing an alias. The display name only changes once the
    /// server accepts the final set.
    fn rename_port(
        &mut self,
        group_id: GroupId,
        port_id: PortId,
        new_name: &str,
    ) -> Result<ActionReply, EngineError> {
        let preference = self.options.alias_preference;
        if !preference.allows_rename() {
            debug!("rename ignored, aliases are not shown");
            return Ok(ActionReply::Ignored);
        }

        let new_name = new_name.trim();
        let current = self
            .model
            .port_in_group(group_id, port_id)
            .map(|p| p.display_name.clone())
            .ok_or_else(|| EngineError::LookupMiss(format!("{}/{}", group_id, port_id)))?;
        if new_name.is_empty() || new_name == current {
            return Ok(ActionReply::Ignored);
        }

        let (full_name, group_name) = self.port_names(group_id, port_id)?;
        let server = self.session.as_ref().ok_or(EngineError::ServerUnavailable)?;
        let info = server
            .port_info(&full_name)
            .ok_or_else(|| EngineError::LookupMiss(full_name.clone()))?;
        let alias = format!("{}:{}", group_name, new_name);

        let plan = rename_plan(&info.aliases, preference, &alias);
        let last = plan.len().saturating_sub(1);
        for (index, edit) in plan.iter().enumerate() {
            let result = match edit {
                AliasEdit::Unset(old) => server.unset_alias(&full_name, old),
                AliasEdit::Set(value) => server.set_alias(&full_name, value),
            };
            match result {
                Ok(()) => {}
                Err(err) if index == last => {
                    warn!("alias for {} rejected: {}", full_name, err);
                    return Err(err.into());
                }
                Err(err) => debug!("alias edit {:?} on {} failed: {}", edit, full_name, err),
            }
        }

        self.model.rename_port(port_id, new_name)?;
        self.canvas.rename_port(group_id, port_id, new_name);
        Ok(ActionReply::Renamed {
            port_id,
            name: new_name.to_string(),
        })
    }
}
