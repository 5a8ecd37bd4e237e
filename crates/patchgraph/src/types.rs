use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Canvas-facing group id. Never reused within a session.
    GroupId,
    "g"
);
id_type!(
    /// Canvas-facing port id. Never reused within a session.
    PortId,
    "p"
);
id_type!(
    /// Surrogate key handed to the canvas for a connection.
    ConnectionId,
    "c"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
    None,
}

impl PortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::None => "none",
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Midi,
    Unknown,
}

/// JACK's type string for audio ports.
pub const JACK_DEFAULT_AUDIO_TYPE: &str = "32 bit float mono audio";
/// JACK's type string for MIDI ports.
pub const JACK_DEFAULT_MIDI_TYPE: &str = "8 bit raw midi";

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Midi => "midi",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a server port type string.
    pub fn from_port_type(port_type: &str) -> Self {
        match port_type {
            JACK_DEFAULT_AUDIO_TYPE => Self::Audio,
            JACK_DEFAULT_MIDI_TYPE => Self::Midi,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "midi" => Ok(Self::Midi),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown media type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    /// Server's fully-qualified `group:port` name. Immutable for the life of the port.
    pub canonical_name: String,
    pub display_name: String,
    pub group_id: GroupId,
    pub group_name: String,
    pub direction: PortDirection,
    pub media_type: MediaType,
}

/// Lookup identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub out_group: GroupId,
    pub out_port: PortId,
    pub in_group: GroupId,
    pub in_port: PortId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    #[serde(flatten)]
    pub key: ConnectionKey,
}

/// Split `group:port` at the first colon.
///
/// Names without a colon are treated as a bare short name with an empty group.
pub fn split_port_name(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((group, short)) => (group, short),
        None => ("", name),
    }
}
