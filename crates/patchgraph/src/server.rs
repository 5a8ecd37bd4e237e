//! Server boundary
//!
//! Everything the engine needs from the audio server: queries that run on
//! the consumer thread, and fire-and-forget requests whose effect only
//! lands in the model once the server's own notification comes back.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::status::TransportInfo;
use crate::types::{MediaType, PortDirection};

pub const URI_POSITION: &str = "https://kx.studio/ns/carla/position";
pub const URI_PLUGIN_ID: &str = "https://kx.studio/ns/carla/plugin-id";
pub const URI_TYPE_STRING: &str = "text/plain";

/// Errors a backend reports synchronously. Most rejections never surface
/// this way; the confirming notification simply never arrives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server connection lost")]
    Disconnected,
}

/// Server-side client identity used for metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientUuid(pub u64);

impl fmt::Display for ClientUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortFlags {
    pub is_input: bool,
    pub is_output: bool,
    pub is_physical: bool,
    pub can_monitor: bool,
    pub is_terminal: bool,
}

impl PortFlags {
    pub fn input() -> Self {
        Self {
            is_input: true,
            ..Self::default()
        }
    }

    pub fn output() -> Self {
        Self {
            is_output: true,
            ..Self::default()
        }
    }

    pub fn physical(mut self) -> Self {
        self.is_physical = true;
        self
    }

    pub fn direction(&self) -> PortDirection {
        if self.is_input {
            PortDirection::Input
        } else if self.is_output {
            PortDirection::Output
        } else {
            PortDirection::None
        }
    }

    /// Human-readable flag list, e.g. `Output | Physical`
    pub fn describe(&self) -> String {
        let mut flags = Vec::new();
        if self.is_input {
            flags.push("Input");
        }
        if self.is_output {
            flags.push("Output");
        }
        if self.is_physical {
            flags.push("Physical");
        }
        if self.can_monitor {
            flags.push("Can Monitor");
        }
        if self.is_terminal {
            flags.push("Terminal");
        }
        flags.join(" | ")
    }
}

/// What the server knows about one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPort {
    /// Full `client:port` name
    pub name: String,
    pub short_name: String,
    pub client_name: String,
    pub flags: PortFlags,
    pub media_type: MediaType,
    /// Zero, one or two aliases, in slot order
    pub aliases: Vec<String>,
    pub latency_frames: u32,
    pub total_latency_frames: u32,
}

impl ServerPort {
    pub fn direction(&self) -> PortDirection {
        self.flags.direction()
    }
}

/// The audio server as the engine sees it.
pub trait PatchServer: Send {
    /// Full names of every port
    fn ports(&self) -> Vec<String>;

    fn port_info(&self, name: &str) -> Option<ServerPort>;

    /// Full names of every port connected to `name`
    fn port_connections(&self, name: &str) -> Vec<String>;

    fn connect(&self, output: &str, input: &str) -> Result<(), ServerError>;

    fn disconnect(&self, output: &str, input: &str) -> Result<(), ServerError>;

    fn set_alias(&self, port: &str, alias: &str) -> Result<(), ServerError>;

    fn unset_alias(&self, port: &str, alias: &str) -> Result<(), ServerError>;

    fn client_uuid(&self, client_name: &str) -> Option<ClientUuid>;

    fn client_name(&self, uuid: ClientUuid) -> Option<String>;

    fn property(&self, subject: ClientUuid, key: &str) -> Option<String>;

    fn set_property(
        &self,
        subject: ClientUuid,
        key: &str,
        value: &str,
        value_type: &str,
    ) -> Result<(), ServerError>;

    fn buffer_size(&self) -> u32;

    fn sample_rate(&self) -> u32;

    fn is_realtime(&self) -> bool;

    /// DSP load in percent
    fn dsp_load(&self) -> f32;

    fn transport(&self) -> TransportInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_direction() {
        assert_eq!(PortFlags::input().direction(), PortDirection::Input);
        assert_eq!(PortFlags::output().direction(), PortDirection::Output);
        assert_eq!(PortFlags::default().direction(), PortDirection::None);
    }

    #[test]
    fn test_flags_describe() {
        assert_eq!(PortFlags::output().physical().describe(), "Output | Physical");
        assert_eq!(PortFlags::default().describe(), "");
    }
}
