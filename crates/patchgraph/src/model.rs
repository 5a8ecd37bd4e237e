//! In-memory patch graph
//!
//! Groups, ports and connections with hash indexes by id and by name.
//! Every lookup the translator performs on a notification is O(1); removals
//! cascade (connections with a port, groups with their last port).

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::IdAllocator;
use crate::types::{
    split_port_name, Connection, ConnectionId, ConnectionKey, Group, GroupId, MediaType, Port,
    PortDirection, PortId,
};

/// Contract violations reported by the graph model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("group not found: {0}")]
    UnknownGroup(String),

    #[error("port not found: {0}")]
    UnknownPort(String),

    #[error("group {name} still has {ports} port(s)")]
    GroupNotEmpty { name: String, ports: usize },

    #[error("port already registered: {name} ({id})")]
    DuplicatePort { name: String, id: PortId },

    #[error("{0} ids exhausted for this session")]
    IdsExhausted(&'static str),

    #[error("cannot connect {out_port} ({out_dir}) to {in_port} ({in_dir})")]
    DirectionMismatch {
        out_port: String,
        out_dir: PortDirection,
        in_port: String,
        in_dir: PortDirection,
    },
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added<T> {
    pub id: T,
    /// false when the entity already existed and its id was returned instead
    pub created: bool,
}

/// Result of adding a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAdded {
    pub port_id: PortId,
    pub group_id: GroupId,
    pub group_created: bool,
}

/// Everything a port removal took with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRemoval {
    pub port: Port,
    pub connections: Vec<Connection>,
    pub group: Option<Group>,
}

/// Serializable view of the whole model, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub groups: Vec<Group>,
    pub ports: Vec<Port>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Default)]
pub struct GraphModel {
    ids: IdAllocator,
    groups: HashMap<GroupId, Group>,
    group_index: HashMap<String, GroupId>,
    group_ports: HashMap<GroupId, BTreeSet<PortId>>,
    ports: HashMap<PortId, Port>,
    port_index: HashMap<String, PortId>,
    connections: HashMap<ConnectionId, Connection>,
    connection_index: HashMap<ConnectionKey, ConnectionId>,
    port_connections: HashMap<PortId, BTreeSet<ConnectionId>>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    // Groups

    /// Insert a group, or return the id of the live group with that name.
    pub fn add_group(&mut self, name: &str) -> Result<Added<GroupId>, ModelError> {
        if let Some(id) = self.group_index.get(name) {
            return Ok(Added {
                id: *id,
                created: false,
            });
        }

        let id = self
            .ids
            .next_group_id()
            .ok_or(ModelError::IdsExhausted("group"))?;
        self.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
            },
        );
        self.group_index.insert(name.to_string(), id);
        self.group_ports.insert(id, BTreeSet::new());
        Ok(Added { id, created: true })
    }

    /// Remove an empty group. Groups with ports go away with their last port instead.
    pub fn remove_group(&mut self, name: &str) -> Result<Group, ModelError> {
        let id = *self
            .group_index
            .get(name)
            .ok_or_else(|| ModelError::UnknownGroup(name.to_string()))?;

        let ports = self.group_ports.get(&id).map_or(0, |p| p.len());
        if ports > 0 {
            return Err(ModelError::GroupNotEmpty {
                name: name.to_string(),
                ports,
            });
        }

        self.drop_group(id)
            .ok_or_else(|| ModelError::UnknownGroup(name.to_string()))
    }

    fn drop_group(&mut self, id: GroupId) -> Option<Group> {
        self.group_ports.remove(&id);
        let group = self.groups.remove(&id)?;
        self.group_index.remove(&group.name);
        Some(group)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.group_index.get(name).and_then(|id| self.groups.get(id))
    }

    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.group_index.get(name).copied()
    }

    /// Ports of a group, in id order
    pub fn group_ports(&self, id: GroupId) -> impl Iterator<Item = &Port> + '_ {
        self.group_ports
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|pid| self.ports.get(pid))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    // Ports

    /// Register a port, creating its group on first use.
    ///
    /// The display name starts out as the canonical short name.
    pub fn add_port(
        &mut self,
        group_name: &str,
        canonical_name: &str,
        direction: PortDirection,
        media_type: MediaType,
    ) -> Result<PortAdded, ModelError> {
        if let Some(id) = self.port_index.get(canonical_name) {
            return Err(ModelError::DuplicatePort {
                name: canonical_name.to_string(),
                id: *id,
            });
        }

        // port id first, so running out never leaves an empty group behind
        let port_id = self
            .ids
            .next_port_id()
            .ok_or(ModelError::IdsExhausted("port"))?;
        let group = self.add_group(group_name)?;

        let short_name = canonical_name
            .strip_prefix(group_name)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or_else(|| split_port_name(canonical_name).1);

        self.ports.insert(
            port_id,
            Port {
                id: port_id,
                canonical_name: canonical_name.to_string(),
                display_name: short_name.to_string(),
                group_id: group.id,
                group_name: group_name.to_string(),
                direction,
                media_type,
            },
        );
        self.port_index.insert(canonical_name.to_string(), port_id);
        self.group_ports.entry(group.id).or_default().insert(port_id);

        Ok(PortAdded {
            port_id,
            group_id: group.id,
            group_created: group.created,
        })
    }

    /// Remove a port along with its connections, and its group if it was the last port.
    pub fn remove_port(&mut self, id: PortId) -> Result<PortRemoval, ModelError> {
        let port = self
            .ports
            .remove(&id)
            .ok_or_else(|| ModelError::UnknownPort(id.to_string()))?;
        self.port_index.remove(&port.canonical_name);

        let connections = self
            .port_connections
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|cid| self.drop_connection(cid))
            .collect();

        let now_empty = match self.group_ports.get_mut(&port.group_id) {
            Some(ports) => {
                ports.remove(&id);
                ports.is_empty()
            }
            None => false,
        };
        let group = if now_empty {
            self.drop_group(port.group_id)
        } else {
            None
        };

        Ok(PortRemoval {
            port,
            connections,
            group,
        })
    }

    /// Change only the display name; the canonical name never changes.
    pub fn rename_port(&mut self, id: PortId, display_name: &str) -> Result<String, ModelError> {
        let port = self
            .ports
            .get_mut(&id)
            .ok_or_else(|| ModelError::UnknownPort(id.to_string()))?;
        Ok(std::mem::replace(
            &mut port.display_name,
            display_name.to_string(),
        ))
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port_by_name(&self, canonical_name: &str) -> Option<&Port> {
        self.port_index
            .get(canonical_name)
            .and_then(|id| self.ports.get(id))
    }

    /// Port lookup that also checks group membership, the way canvas gestures address ports
    pub fn port_in_group(&self, group_id: GroupId, port_id: PortId) -> Option<&Port> {
        self.ports.get(&port_id).filter(|p| p.group_id == group_id)
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    // Connections

    /// Connect an output port to an input port. Idempotent per 4-tuple.
    pub fn add_connection(
        &mut self,
        out_port: PortId,
        in_port: PortId,
    ) -> Result<Added<ConnectionId>, ModelError> {
        let key = self.connection_key(out_port, in_port)?;

        if let Some(id) = self.connection_index.get(&key) {
            return Ok(Added {
                id: *id,
                created: false,
            });
        }

        let id = self
            .ids
            .next_connection_id()
            .ok_or(ModelError::IdsExhausted("connection"))?;
        self.connections.insert(id, Connection { id, key });
        self.connection_index.insert(key, id);
        self.port_connections.entry(out_port).or_default().insert(id);
        self.port_connections.entry(in_port).or_default().insert(id);
        Ok(Added { id, created: true })
    }

    /// Remove the connection between two ports, if there is one.
    pub fn remove_connection(&mut self, out_port: PortId, in_port: PortId) -> Option<Connection> {
        let key = self.connection_key(out_port, in_port).ok()?;
        let id = *self.connection_index.get(&key)?;
        self.drop_connection(id)
    }

    fn drop_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.connection_index.remove(&connection.key);
        for port in [connection.key.out_port, connection.key.in_port] {
            if let Some(set) = self.port_connections.get_mut(&port) {
                set.remove(&id);
                if set.is_empty() {
                    self.port_connections.remove(&port);
                }
            }
        }
        Some(connection)
    }

    fn connection_key(&self, out_port: PortId, in_port: PortId) -> Result<ConnectionKey, ModelError> {
        let out = self
            .ports
            .get(&out_port)
            .ok_or_else(|| ModelError::UnknownPort(out_port.to_string()))?;
        let inp = self
            .ports
            .get(&in_port)
            .ok_or_else(|| ModelError::UnknownPort(in_port.to_string()))?;

        if out.direction != PortDirection::Output || inp.direction != PortDirection::Input {
            return Err(ModelError::DirectionMismatch {
                out_port: out.canonical_name.clone(),
                out_dir: out.direction,
                in_port: inp.canonical_name.clone(),
                in_dir: inp.direction,
            });
        }

        Ok(ConnectionKey {
            out_group: out.group_id,
            out_port,
            in_group: inp.group_id,
            in_port,
        })
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_between(&self, out_port: PortId, in_port: PortId) -> Option<&Connection> {
        let key = self.connection_key(out_port, in_port).ok()?;
        self.connection_index
            .get(&key)
            .and_then(|id| self.connections.get(id))
    }

    /// Connections touching a port, in id order
    pub fn port_connections(&self, id: PortId) -> impl Iterator<Item = &Connection> + '_ {
        self.port_connections
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|cid| self.connections.get(cid))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // Whole model

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.ports.is_empty() && self.connections.is_empty()
    }

    /// Drop everything and restart id allocation. Used when the server goes away.
    pub fn reset(&mut self) {
        self.clear();
        self.ids.reset();
    }

    /// Drop everything but keep allocating fresh ids.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.group_index.clear();
        self.group_ports.clear();
        self.ports.clear();
        self.port_index.clear();
        self.connections.clear();
        self.connection_index.clear();
        self.port_connections.clear();
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut groups: Vec<Group> = self.groups.values().cloned().collect();
        groups.sort_by_key(|g| g.id);
        let mut ports: Vec<Port> = self.ports.values().cloned().collect();
        ports.sort_by_key(|p| p.id);
        let mut connections: Vec<Connection> = self.connections.values().cloned().collect();
        connections.sort_by_key(|c| c.id);
        GraphSnapshot {
            groups,
            ports,
            connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_out(model: &mut GraphModel, name: &str) -> PortAdded {
        let (group, _) = split_port_name(name);
        model
            .add_port(group, name, PortDirection::Output, MediaType::Audio)
            .unwrap()
    }

    fn audio_in(model: &mut GraphModel, name: &str) -> PortAdded {
        let (group, _) = split_port_name(name);
        model
            .add_port(group, name, PortDirection::Input, MediaType::Audio)
            .unwrap()
    }

    #[test]
    fn test_add_group_is_idempotent() {
        let mut model = GraphModel::new();
        let a = model.add_group("app").unwrap();
        let b = model.add_group("app").unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.id, b.id);
        assert_eq!(model.group_count(), 1);
    }

    #[test]
    fn test_ports_create_one_group_per_name() {
        let mut model = GraphModel::new();
        let names = [
            "system:capture_1",
            "system:capture_2",
            "app:out_1",
            "synth:midi_in",
            "app:in_1",
        ];
        for name in names {
            audio_out(&mut model, name);
        }

        assert_eq!(model.group_count(), 3);
        for group_name in ["system", "app", "synth"] {
            let group = model.group_by_name(group_name).unwrap();
            let ports: Vec<_> = model.group_ports(group.id).collect();
            assert!(!ports.is_empty());
            assert!(ports.iter().all(|p| p.group_name == group_name));
            assert!(ports.iter().all(|p| p.group_id == group.id));
        }
        let system = model.group_id("system").unwrap();
        assert_eq!(model.group_ports(system).count(), 2);
    }

    #[test]
    fn test_display_name_starts_as_short_name() {
        let mut model = GraphModel::new();
        let added = audio_out(&mut model, "app:out_1");
        let port = model.port(added.port_id).unwrap();
        assert_eq!(port.canonical_name, "app:out_1");
        assert_eq!(port.display_name, "out_1");
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut model = GraphModel::new();
        let first = audio_out(&mut model, "app:out_1");
        let err = model
            .add_port("app", "app:out_1", PortDirection::Output, MediaType::Audio)
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicatePort {
                name: "app:out_1".to_string(),
                id: first.port_id
            }
        );
        assert_eq!(model.port_count(), 1);
    }

    #[test]
    fn test_remove_last_port_removes_group() {
        let mut model = GraphModel::new();
        let a = audio_out(&mut model, "app:out_1");
        let b = audio_out(&mut model, "app:out_2");

        let removal = model.remove_port(a.port_id).unwrap();
        assert!(removal.group.is_none());
        assert!(model.group_by_name("app").is_some());
        assert_eq!(model.group_ports(b.group_id).count(), 1);

        let removal = model.remove_port(b.port_id).unwrap();
        assert_eq!(removal.group.map(|g| g.name), Some("app".to_string()));
        assert!(model.group_by_name("app").is_none());
        assert!(model.is_empty());
    }

    #[test]
    fn test_remove_group_requires_empty() {
        let mut model = GraphModel::new();
        audio_out(&mut model, "app:out_1");
        assert_eq!(
            model.remove_group("app"),
            Err(ModelError::GroupNotEmpty {
                name: "app".to_string(),
                ports: 1
            })
        );
        model.add_group("empty").unwrap();
        assert!(model.remove_group("empty").is_ok());
        assert!(matches!(
            model.remove_group("empty"),
            Err(ModelError::UnknownGroup(_))
        ));
    }

    #[test]
    fn test_add_connection_is_idempotent() {
        let mut model = GraphModel::new();
        let out = audio_out(&mut model, "app:out_1");
        let inp = audio_in(&mut model, "sink:in_1");

        let first = model.add_connection(out.port_id, inp.port_id).unwrap();
        let second = model.add_connection(out.port_id, inp.port_id).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(model.connection_count(), 1);

        let conn = model.connection(first.id).unwrap();
        assert_eq!(conn.key.out_group, out.group_id);
        assert_eq!(conn.key.in_group, inp.group_id);
    }

    #[test]
    fn test_connection_direction_checked() {
        let mut model = GraphModel::new();
        let out = audio_out(&mut model, "app:out_1");
        let inp = audio_in(&mut model, "sink:in_1");

        let err = model.add_connection(inp.port_id, out.port_id).unwrap_err();
        assert!(matches!(err, ModelError::DirectionMismatch { .. }));
        assert_eq!(model.connection_count(), 0);
    }

    #[test]
    fn test_remove_connection_missing_is_noop() {
        let mut model = GraphModel::new();
        let out = audio_out(&mut model, "app:out_1");
        let inp = audio_in(&mut model, "sink:in_1");
        assert!(model.remove_connection(out.port_id, inp.port_id).is_none());
        assert!(model.remove_connection(PortId(99), inp.port_id).is_none());
    }

    #[test]
    fn test_remove_port_cascades_connections() {
        let mut model = GraphModel::new();
        let out = audio_out(&mut model, "app:out_1");
        let in1 = audio_in(&mut model, "sink:in_1");
        let in2 = audio_in(&mut model, "sink:in_2");
        model.add_connection(out.port_id, in1.port_id).unwrap();
        model.add_connection(out.port_id, in2.port_id).unwrap();

        let removal = model.remove_port(out.port_id).unwrap();
        assert_eq!(removal.connections.len(), 2);
        assert_eq!(model.connection_count(), 0);
        assert_eq!(model.port_connections(in1.port_id).count(), 0);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut model = GraphModel::new();
        let a = audio_out(&mut model, "solo:out");
        model.remove_port(a.port_id).unwrap();
        let b = audio_out(&mut model, "solo:out");
        assert_ne!(a.port_id, b.port_id);
        assert_ne!(a.group_id, b.group_id);
    }

    #[test]
    fn test_rename_keeps_canonical() {
        let mut model = GraphModel::new();
        let a = audio_out(&mut model, "app:out_1");
        let old = model.rename_port(a.port_id, "Left").unwrap();
        assert_eq!(old, "out_1");
        let port = model.port_by_name("app:out_1").unwrap();
        assert_eq!(port.display_name, "Left");
        assert_eq!(port.canonical_name, "app:out_1");
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut model = GraphModel::new();
        audio_out(&mut model, "app:out_1");
        audio_out(&mut model, "app:out_2");
        model.reset();
        assert!(model.is_empty());
        let again = audio_out(&mut model, "app:out_1");
        assert_eq!(again.port_id, PortId(1));
        assert_eq!(again.group_id, GroupId(1));
    }

    #[test]
    fn test_clear_keeps_ids_growing() {
        let mut model = GraphModel::new();
        audio_out(&mut model, "app:out_1");
        model.clear();
        assert!(model.is_empty());
        let again = audio_out(&mut model, "app:out_1");
        assert_eq!(again.port_id, PortId(2));
        assert_eq!(again.group_id, GroupId(2));
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut model = GraphModel::new();
        audio_out(&mut model, "b:out");
        audio_out(&mut model, "a:out");
        let snap = model.snapshot();
        assert_eq!(snap.groups[0].name, "b");
        assert_eq!(snap.groups[1].name, "a");
        assert!(snap.ports.windows(2).all(|w| w[0].id < w[1].id));
    }
}
