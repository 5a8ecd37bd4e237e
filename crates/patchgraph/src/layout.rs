//! Group split/join layout from persisted position metadata
//!
//! The position property is four colon-separated integers `x1:y1:x2:y2`.
//! `(x1, y1)` places the joined box (or the input half of a split group),
//! `(x2, y2)` the output half.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Horizontal distance between the halves when a group is split without a stored second half.
pub const SPLIT_OFFSET: i32 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("expected four colon-separated integers, got {0:?}")]
    FieldCount(String),

    #[error("invalid coordinate {field:?} in {value:?}")]
    Coordinate { field: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GroupPosition {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl GroupPosition {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Both halves explicitly placed on at least one axis.
    pub fn is_split(&self) -> bool {
        (self.x1 != 0 && self.x2 != 0) || (self.y1 != 0 && self.y2 != 0)
    }

    /// The position to persist when the user splits the group.
    pub fn split_from(self) -> Self {
        if self.is_split() {
            return self;
        }
        let x1 = if self.x1 == 0 { 1 } else { self.x1 };
        // the output half must not land on x2 == 0, or the position reads as joined
        let x2 = match x1.saturating_add(SPLIT_OFFSET) {
            0 => x1.saturating_sub(SPLIT_OFFSET),
            x2 => x2,
        };
        Self {
            x1,
            y1: self.y1,
            x2,
            y2: self.y1,
        }
    }

    /// The position to persist when the user joins the group.
    pub fn joined(self) -> Self {
        Self {
            x2: 0,
            y2: 0,
            ..self
        }
    }
}

impl fmt::Display for GroupPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.x1, self.y1, self.x2, self.y2)
    }
}

impl FromStr for GroupPosition {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let [x1, y1, x2, y2] = fields.as_slice() else {
            return Err(LayoutError::FieldCount(s.to_string()));
        };

        let coord = |field: &str| {
            field
                .trim()
                .parse::<i32>()
                .map_err(|_| LayoutError::Coordinate {
                    field: field.to_string(),
                    value: s.to_string(),
                })
        };

        Ok(Self {
            x1: coord(*x1)?,
            y1: coord(*y1)?,
            x2: coord(*x2)?,
            y2: coord(*y2)?,
        })
    }
}

/// Canvas split state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// No stored layout; the canvas picks a default
    Undefined,
    Yes,
    No,
}

/// Layout derived from a group's position metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLayout {
    Undefined,
    Joined(GroupPosition),
    Split(GroupPosition),
}

impl GroupLayout {
    pub fn from_position(position: GroupPosition) -> Self {
        if position.is_split() {
            Self::Split(position)
        } else {
            Self::Joined(position)
        }
    }

    /// Absent metadata is undefined; so is metadata that does not parse.
    pub fn resolve(metadata: Option<&str>) -> Result<Self, LayoutError> {
        match metadata {
            None => Ok(Self::Undefined),
            Some(value) => value.parse().map(Self::from_position),
        }
    }

    pub fn split_mode(&self) -> SplitMode {
        match self {
            Self::Undefined => SplitMode::Undefined,
            Self::Joined(_) => SplitMode::No,
            Self::Split(_) => SplitMode::Yes,
        }
    }

    pub fn position(&self) -> Option<GroupPosition> {
        match self {
            Self::Undefined => None,
            Self::Joined(p) | Self::Split(p) => Some(*p),
        }
    }
}
