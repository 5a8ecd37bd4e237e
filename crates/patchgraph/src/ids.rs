//! Identity allocation for groups, ports and connections.
//!
//! Ids start at 1 and only ever grow within a session. `reset` starts a
//! new session once the server connection has been torn down. A category
//! that runs out of ids stops allocating rather than handing one out twice.

use crate::types::{ConnectionId, GroupId, PortId};

#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_group: u32,
    next_port: u32,
    next_connection: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_group: 1,
            next_port: 1,
            next_connection: 1,
        }
    }

    pub fn next_group_id(&mut self) -> Option<GroupId> {
        bump(&mut self.next_group).map(GroupId)
    }

    pub fn next_port_id(&mut self) -> Option<PortId> {
        bump(&mut self.next_port).map(PortId)
    }

    pub fn next_connection_id(&mut self) -> Option<ConnectionId> {
        bump(&mut self.next_connection).map(ConnectionId)
    }

    /// Forget every issued id. Only valid once the model is empty.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &mut u32) -> Option<u32> {
    let id = *counter;
    *counter = counter.checked_add(1)?;
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_per_category() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_group_id(), Some(GroupId(1)));
        assert_eq!(ids.next_port_id(), Some(PortId(1)));
        assert_eq!(ids.next_port_id(), Some(PortId(2)));
        assert_eq!(ids.next_connection_id(), Some(ConnectionId(1)));
        assert_eq!(ids.next_group_id(), Some(GroupId(2)));
    }

    #[test]
    fn test_reset_restarts_session() {
        let mut ids = IdAllocator::new();
        for _ in 0..5 {
            ids.next_port_id();
        }
        ids.reset();
        assert_eq!(ids.next_port_id(), Some(PortId(1)));
        assert_eq!(ids.next_group_id(), Some(GroupId(1)));
    }

    #[test]
    fn test_exhausted_category_never_repeats() {
        let mut ids = IdAllocator::new();
        ids.next_port = u32::MAX - 1;
        assert_eq!(ids.next_port_id(), Some(PortId(u32::MAX - 1)));
        assert_eq!(ids.next_port_id(), None);
        assert_eq!(ids.next_port_id(), None);
        // other categories are unaffected
        assert_eq!(ids.next_group_id(), Some(GroupId(1)));

        ids.reset();
        assert_eq!(ids.next_port_id(), Some(PortId(1)));
    }
}
