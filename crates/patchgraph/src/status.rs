//! Server status polled on timers
//!
//! Nothing here touches the graph. The two polls only read scalars from the
//! server, so they can interleave with event draining on the consumer task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bbt {
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransportInfo {
    pub rolling: bool,
    pub frame: u64,
    /// Only present when a timebase master provides it
    pub bbt: Option<Bbt>,
    pub bpm: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportView {
    #[default]
    Hms,
    Bbt,
    Frames,
}

impl TransportView {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hms => "hms",
            Self::Bbt => "bbt",
            Self::Frames => "frames",
        }
    }

    /// Cycle to the next view
    pub fn next(self) -> Self {
        match self {
            Self::Hms => Self::Bbt,
            Self::Bbt => Self::Frames,
            Self::Frames => Self::Hms,
        }
    }

    /// What the view shows when there is no server
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Hms => "00:00:00",
            Self::Bbt => "000|0|0000",
            Self::Frames => "000'000'000",
        }
    }

    pub fn format(&self, transport: &TransportInfo, sample_rate: u32) -> String {
        match self {
            Self::Hms => {
                if sample_rate == 0 {
                    return self.placeholder().to_string();
                }
                let secs = transport.frame / u64::from(sample_rate);
                format!(
                    "{:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                )
            }
            Self::Bbt => match transport.bbt {
                Some(bbt) => format!("{:03}|{}|{:04}", bbt.bar, bbt.beat, bbt.tick),
                None => self.placeholder().to_string(),
            },
            Self::Frames => {
                let frame = transport.frame;
                format!(
                    "{:03}'{:03}'{:03}",
                    frame / 1_000_000,
                    (frame / 1000) % 1000,
                    frame % 1000
                )
            }
        }
    }
}

impl fmt::Display for TransportView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hms" => Ok(Self::Hms),
            "bbt" => Ok(Self::Bbt),
            "frames" => Ok(Self::Frames),
            _ => Err(format!("Unknown transport view: {}", s)),
        }
    }
}

/// Scalars shown next to the canvas
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    pub connected: bool,
    pub xruns: u64,
    pub buffer_size: u32,
    pub sample_rate: u32,
    pub realtime: bool,
    /// Percent
    pub dsp_load: f32,
    pub transport: TransportInfo,
    pub transport_view: TransportView,
}

impl EngineStatus {
    pub fn clear_xruns(&mut self) {
        self.xruns = 0;
    }

    /// Back to the disconnected state, keeping the user's transport view.
    pub fn reset(&mut self) {
        *self = Self {
            transport_view: self.transport_view,
            ..Self::default()
        };
    }

    pub fn transport_text(&self) -> String {
        if !self.connected {
            return self.transport_view.placeholder().to_string();
        }
        self.transport_view.format(&self.transport, self.sample_rate)
    }

    /// Buffer latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        f64::from(self.buffer_size) * 1000.0 / f64::from(self.sample_rate)
    }
}
