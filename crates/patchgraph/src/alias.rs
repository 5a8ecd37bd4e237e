//! Port display names from server aliases
//!
//! A port has a canonical `group:port` name and up to two aliases. The
//! alias preference picks which one the canvas shows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Servers keep at most this many aliases per port.
pub const MAX_ALIASES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasPreference {
    /// Always show the canonical short name
    Off,
    /// Alias #1 if present
    First,
    /// Alias #2, else alias #1
    #[default]
    Second,
}

impl AliasPreference {
    pub fn level(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::First => 1,
            Self::Second => 2,
        }
    }

    /// Renaming writes an alias, so it only makes sense when aliases are shown.
    pub fn allows_rename(&self) -> bool {
        *self != Self::Off
    }
}

impl TryFrom<u8> for AliasPreference {
    type Error = String;
    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Off),
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            _ => Err(format!("alias preference must be 0, 1 or 2, got {}", level)),
        }
    }
}

impl fmt::Display for AliasPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// The alias the preference selects, if the port has it.
pub fn selected_alias(aliases: &[String], preference: AliasPreference) -> Option<&str> {
    match preference {
        AliasPreference::Off => None,
        AliasPreference::First => aliases.first(),
        AliasPreference::Second => aliases.get(1).or_else(|| aliases.first()),
    }
    .map(String::as_str)
}

/// Pick the display name for a port.
///
/// Aliases are usually full `group:port` names; only the part after the
/// first colon is shown.
pub fn resolve_display_name(
    short_name: &str,
    aliases: &[String],
    preference: AliasPreference,
) -> String {
    match selected_alias(aliases, preference) {
        Some(alias) => alias_short_name(alias).to_string(),
        None => short_name.to_string(),
    }
}

fn alias_short_name(alias: &str) -> &str {
    alias.split_once(':').map_or(alias, |(_, short)| short)
}

/// One server call of the rename protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasEdit {
    Unset(String),
    Set(String),
}

/// Server calls that make `new_alias` the alias the preference displays.
///
/// Occupied slots are cleared before the set, since the server refuses a
/// third alias. The last edit is always the `Set` whose result decides
/// whether the rename happened.
pub fn rename_plan(
    aliases: &[String],
    preference: AliasPreference,
    new_alias: &str,
) -> Vec<AliasEdit> {
    let mut plan = Vec::with_capacity(3);

    match aliases {
        [first, second, ..] => {
            plan.push(AliasEdit::Unset(second.clone()));
            if preference == AliasPreference::First {
                plan.push(AliasEdit::Unset(first.clone()));
            }
        }
        [first] if preference == AliasPreference::First => {
            plan.push(AliasEdit::Unset(first.clone()));
        }
        [] if preference == AliasPreference::Second => {
            // fill slot #1 so the real set lands in slot #2
            plan.push(AliasEdit::Set(new_alias.to_string()));
        }
        _ => {}
    }

    plan.push(AliasEdit::Set(new_alias.to_string()));
    plan
}
