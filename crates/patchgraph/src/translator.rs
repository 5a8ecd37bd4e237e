//! Server events into model mutations
//!
//! Each handler resolves names against the model, mutates it, then mirrors
//! the change onto the canvas. A handler that cannot resolve what an event
//! names reports a lookup miss and leaves the model untouched.

use tracing::{debug, info, warn};

use crate::alias::{resolve_display_name, selected_alias};
use crate::canvas::{Canvas, GroupIcon, PortKind, PortMode};
use crate::engine::{Engine, EngineError};
use crate::event::{PropertyChange, ServerEvent};
use crate::layout::{GroupLayout, SplitMode};
use crate::model::ModelError;
use crate::server::{ClientUuid, PatchServer, ServerPort, URI_PLUGIN_ID, URI_POSITION};
use crate::types::{split_port_name, GroupId, PortDirection, PortId};

impl<S: PatchServer, C: Canvas> Engine<S, C> {
    /// Apply one server event. Failures are logged and dropped.
    pub fn apply_event(&mut self, event: ServerEvent) {
        debug!(kind = event.kind(), "server event");
        let result = match event {
            ServerEvent::PortRegistered { name } => self.register_port(&name).map(|_| ()),
            ServerEvent::PortUnregistered { name } => self.unregister_port(&name),
            ServerEvent::PortsConnected { a, b } => self.connect_by_name(&a, &b),
            ServerEvent::PortsDisconnected { a, b } => self.disconnect_by_name(&a, &b),
            ServerEvent::PortRenamed { old, new } => self.port_renamed(&old, &new),
            ServerEvent::ClientRenamed { old, new } => {
                debug!("client renamed {} -> {}, ignored", old, new);
                Ok(())
            }
            ServerEvent::PropertyChanged {
                subject,
                key,
                change,
            } => self.property_changed(subject, &key, change),
            ServerEvent::Xrun => {
                self.status.xruns += 1;
                Ok(())
            }
            ServerEvent::BufferSizeChanged { frames } => {
                self.status.buffer_size = frames;
                Ok(())
            }
            ServerEvent::SampleRateChanged { rate } => {
                self.status.sample_rate = rate;
                self.status.xruns = 0;
                if let Some(server) = &self.session {
                    self.status.realtime = server.is_realtime();
                }
                Ok(())
            }
            ServerEvent::Shutdown => {
                info!("server shut down");
                self.detach();
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(EngineError::LookupMiss(what)) => {
                warn!("dropping event, not in model: {}", what);
            }
            Err(EngineError::Model(ModelError::DuplicatePort { name, .. })) => {
                debug!("port {} already mirrored", name);
            }
            Err(err) => warn!("dropping event: {}", err),
        }
    }

    fn server_ref(&self) -> Result<&S, EngineError> {
        self.session.as_ref().ok_or(EngineError::ServerUnavailable)
    }

    /// Mirror a server port into the model and onto the canvas.
    pub(crate) fn register_port(&mut self, name: &str) -> Result<PortId, EngineError> {
        let info = self
            .server_ref()?
            .port_info(name)
            .ok_or_else(|| EngineError::LookupMiss(name.to_string()))?;

        let group_name = if info.client_name.is_empty() {
            split_port_name(name).0.to_string()
        } else {
            info.client_name.clone()
        };

        let added =
            self.model
                .add_port(&group_name, name, info.direction(), info.media_type)?;

        if added.group_created {
            self.add_canvas_group(added.group_id, &group_name);
        }

        let display = resolve_display_name(
            &info.short_name,
            &info.aliases,
            self.options.alias_preference,
        );
        self.model.rename_port(added.port_id, &display)?;

        self.canvas.add_port(
            added.group_id,
            added.port_id,
            &display,
            PortMode::from(info.direction()),
            PortKind::from(info.media_type),
        );

        if info.flags.is_physical && self.forced_split.insert(added.group_id) {
            self.canvas.split_group(added.group_id);
            self.canvas.set_group_icon(added.group_id, GroupIcon::Hardware);
        }

        debug!(port = %added.port_id, group = %added.group_id, "registered {}", name);
        Ok(added.port_id)
    }

    fn add_canvas_group(&mut self, group_id: GroupId, name: &str) {
        let mut icon = GroupIcon::Application;
        let mut layout = GroupLayout::Undefined;

        if let Some(server) = &self.session {
            if let Some(uuid) = server.client_uuid(name) {
                if server.property(uuid, URI_PLUGIN_ID).is_some() {
                    icon = GroupIcon::Plugin;
                }
                let position = server.property(uuid, URI_POSITION);
                layout = GroupLayout::resolve(position.as_deref()).unwrap_or_else(|err| {
                    warn!("{}: {}", name, EngineError::MalformedMetadata(err.to_string()));
                    GroupLayout::Undefined
                });
            }
        }

        self.canvas
            .add_group(group_id, name, layout.split_mode(), icon);
        self.apply_layout(group_id, layout);
    }

    /// Split or join first, then place.
    fn apply_layout(&mut self, group_id: GroupId, layout: GroupLayout) {
        let Some(position) = layout.position() else {
            return;
        };
        match layout.split_mode() {
            SplitMode::Yes => self.canvas.split_group(group_id),
            SplitMode::No => self.canvas.join_group(group_id),
            SplitMode::Undefined => return,
        }
        self.canvas.set_group_position(group_id, position);
    }

    fn unregister_port(&mut self, name: &str) -> Result<(), EngineError> {
        let id = self
            .model
            .port_by_name(name)
            .map(|p| p.id)
            .ok_or_else(|| EngineError::LookupMiss(name.to_string()))?;
        self.remove_port(id)
    }

    fn remove_port(&mut self, id: PortId) -> Result<(), EngineError> {
        let removal = self.model.remove_port(id)?;

        for connection in &removal.connections {
            self.canvas.disconnect_ports(connection.id);
        }
        self.canvas.remove_port(removal.port.group_id, removal.port.id);

        if let Some(group) = removal.group {
            self.forced_split.remove(&group.id);
            self.canvas.remove_group(group.id);
            debug!(group = %group.id, "group {} emptied", group.name);
        }
        Ok(())
    }

    /// Resolve two canonical names, in either order, to (output, input).
    fn resolve_pair(&self, a: &str, b: &str) -> Result<(PortId, PortId), EngineError> {
        let port_a = self
            .model
            .port_by_name(a)
            .ok_or_else(|| EngineError::LookupMiss(a.to_string()))?;
        let port_b = self
            .model
            .port_by_name(b)
            .ok_or_else(|| EngineError::LookupMiss(b.to_string()))?;

        if port_a.direction == PortDirection::Input && port_b.direction == PortDirection::Output {
            Ok((port_b.id, port_a.id))
        } else {
            Ok((port_a.id, port_b.id))
        }
    }

    pub(crate) fn connect_by_name(&mut self, a: &str, b: &str) -> Result<(), EngineError> {
        let (out_port, in_port) = self.resolve_pair(a, b)?;
        let added = self.model.add_connection(out_port, in_port)?;
        if added.created {
            if let Some(connection) = self.model.connection(added.id) {
                self.canvas.connect_ports(connection.id, connection.key);
            }
        }
        Ok(())
    }

    fn disconnect_by_name(&mut self, a: &str, b: &str) -> Result<(), EngineError> {
        let (out_port, in_port) = self.resolve_pair(a, b)?;
        match self.model.remove_connection(out_port, in_port) {
            Some(connection) => {
                self.canvas.disconnect_ports(connection.id);
                Ok(())
            }
            None => Err(EngineError::LookupMiss(format!("{} -> {}", a, b))),
        }
    }

    /// A changed canonical name is a new identity; an unchanged one only
    /// refreshes the display name.
    fn port_renamed(&mut self, old: &str, new: &str) -> Result<(), EngineError> {
        let (port_id, group_id) = self
            .model
            .port_by_name(old)
            .map(|p| (p.id, p.group_id))
            .ok_or_else(|| EngineError::LookupMiss(old.to_string()))?;

        if old != new {
            self.remove_port(port_id)?;
            self.register_port(new)?;
            // peers still queued behind this event connect when their own events arrive
            let peers = self.server_ref()?.port_connections(new);
            for peer in peers {
                if let Err(err) = self.connect_by_name(new, &peer) {
                    debug!("reconnect after rename skipped {} -> {}: {}", new, peer, err);
                }
            }
            return Ok(());
        }

        let info: ServerPort = self
            .server_ref()?
            .port_info(new)
            .ok_or_else(|| EngineError::LookupMiss(new.to_string()))?;

        if selected_alias(&info.aliases, self.options.alias_preference).is_some() {
            debug!("{} renamed but an alias is shown, canvas unchanged", new);
            return Ok(());
        }

        self.model.rename_port(port_id, &info.short_name)?;
        self.canvas.rename_port(group_id, port_id, &info.short_name);
        Ok(())
    }

    fn property_changed(
        &mut self,
        subject: ClientUuid,
        key: &str,
        change: PropertyChange,
    ) -> Result<(), EngineError> {
        if key != URI_POSITION && key != URI_PLUGIN_ID {
            return Ok(());
        }

        let server = self.server_ref()?;
        let client = server
            .client_name(subject)
            .ok_or_else(|| EngineError::LookupMiss(format!("client {}", subject)))?;
        let value = server.property(subject, key);
        let group_id = self
            .model
            .group_id(&client)
            .ok_or_else(|| EngineError::LookupMiss(client.clone()))?;

        if key == URI_PLUGIN_ID {
            let icon = match (change, value) {
                (PropertyChange::Deleted, _) | (_, None) if self.forced_split.contains(&group_id) => {
                    GroupIcon::Hardware
                }
                (PropertyChange::Deleted, _) | (_, None) => GroupIcon::Application,
                (_, Some(_)) => GroupIcon::Plugin,
            };
            self.canvas.set_group_icon(group_id, icon);
            return Ok(());
        }

        let Some(value) = value else {
            return Ok(());
        };
        let layout = GroupLayout::resolve(Some(&value))
            .map_err(|err| EngineError::MalformedMetadata(format!("{}: {}", client, err)))?;
        self.apply_layout(group_id, layout);
        Ok(())
    }
}
