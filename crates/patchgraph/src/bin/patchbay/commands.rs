//! Line commands for `patchbay watch`
//!
//! Ports and groups are named the way the server names them; they are
//! resolved to canvas ids against a fresh graph snapshot.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context as _, Result};
use patchgraph::{
    CanvasAction, ConnectionId, GraphSnapshot, GroupId, GroupPosition, Port, TransportView,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    Connect { output: String, input: String },
    Disconnect { connection: ConnectionId },
    Rename { group: String, port: String, name: String },
    Move { group: String, position: GroupPosition },
    /// Without a position the group keeps the one stored on the server
    Split { group: String, position: Option<GroupPosition> },
    Join { group: String, position: Option<GroupPosition> },
    Info { group: String, port: String },
    Dump,
    Status,
    /// `None` cycles to the next view
    View(Option<TransportView>),
    ClearXruns,
    Quit,
}

pub const HELP: &str = "\
commands:
  connect OUT IN              connect two ports by full name
  disconnect CONN             disconnect by connection id (e.g. c3)
  rename GROUP PORT NAME      set a port alias
  move GROUP x1:y1:x2:y2      store a group position
  split GROUP [x1:y1:x2:y2]   split a group
  join GROUP [x1:y1:x2:y2]    join a group
  info GROUP PORT             show port details
  dump                        print the graph as JSON
  status                      print server status
  view [hms|bbt|frames]       set or cycle the transport view
  xruns clear                 reset the xrun counter
  quit";

fn parse_connection_id(s: &str) -> Result<ConnectionId> {
    let digits = s.strip_prefix('c').unwrap_or(s);
    let id: u32 = digits
        .parse()
        .with_context(|| format!("invalid connection id: {}", s))?;
    Ok(ConnectionId(id))
}

fn parse_position(text: &str) -> Result<GroupPosition> {
    text.parse()
        .map_err(|e| anyhow!("invalid position {}: {}", text, e))
}

impl FromStr for TextCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            ["connect", output, input] => Self::Connect {
                output: output.to_string(),
                input: input.to_string(),
            },
            ["disconnect", connection] => Self::Disconnect {
                connection: parse_connection_id(connection)?,
            },
            ["rename", group, port, name @ ..] if !name.is_empty() => Self::Rename {
                group: group.to_string(),
                port: port.to_string(),
                name: name.join(" "),
            },
            ["move", group, position] => Self::Move {
                group: group.to_string(),
                position: parse_position(position)?,
            },
            ["split", group, rest @ ..] if rest.len() <= 1 => Self::Split {
                group: group.to_string(),
                position: rest.first().map(|p| parse_position(p)).transpose()?,
            },
            ["join", group, rest @ ..] if rest.len() <= 1 => Self::Join {
                group: group.to_string(),
                position: rest.first().map(|p| parse_position(p)).transpose()?,
            },
            ["info", group, port] => Self::Info {
                group: group.to_string(),
                port: port.to_string(),
            },
            ["dump"] => Self::Dump,
            ["status"] => Self::Status,
            ["view"] => Self::View(None),
            ["view", view] => Self::View(Some(view.parse().map_err(|e: String| anyhow!(e))?)),
            ["xruns", "clear"] => Self::ClearXruns,
            ["quit"] | ["exit"] => Self::Quit,
            [] => bail!("empty command"),
            _ => bail!("unrecognized command: {}", line.trim()),
        };
        Ok(command)
    }
}

fn find_port<'a>(snapshot: &'a GraphSnapshot, full_name: &str) -> Result<&'a Port> {
    snapshot
        .ports
        .iter()
        .find(|p| p.canonical_name == full_name)
        .ok_or_else(|| anyhow!("no such port: {}", full_name))
}

fn find_group(snapshot: &GraphSnapshot, name: &str) -> Result<GroupId> {
    snapshot
        .groups
        .iter()
        .find(|g| g.name == name)
        .map(|g| g.id)
        .ok_or_else(|| anyhow!("no such group: {}", name))
}

impl TextCommand {
    /// The group whose stored position a split or join without coordinates starts from.
    pub fn stored_position_target(&self, snapshot: &GraphSnapshot) -> Result<Option<GroupId>> {
        match self {
            Self::Split {
                group,
                position: None,
            }
            | Self::Join {
                group,
                position: None,
            } => find_group(snapshot, group).map(Some),
            _ => Ok(None),
        }
    }

    /// Turn a gesture command into a canvas action using snapshot ids.
    ///
    /// `stored` stands in for a split or join position that was not given.
    pub fn to_action(
        &self,
        snapshot: &GraphSnapshot,
        stored: Option<GroupPosition>,
    ) -> Result<CanvasAction> {
        let action = match self {
            Self::Connect { output, input } => {
                let out = find_port(snapshot, output)?;
                let inp = find_port(snapshot, input)?;
                CanvasAction::PortsConnect {
                    out_group: out.group_id,
                    out_port: out.id,
                    in_group: inp.group_id,
                    in_port: inp.id,
                }
            }
            Self::Disconnect { connection } => CanvasAction::PortsDisconnect {
                connection_id: *connection,
            },
            Self::Rename { group, port, name } => {
                let port = find_port(snapshot, &format!("{}:{}", group, port))?;
                CanvasAction::PortRename {
                    group_id: port.group_id,
                    port_id: port.id,
                    new_name: name.clone(),
                }
            }
            Self::Move { group, position } => CanvasAction::GroupMoved {
                group_id: find_group(snapshot, group)?,
                position: *position,
            },
            Self::Split { group, position } => CanvasAction::GroupSplit {
                group_id: find_group(snapshot, group)?,
                position: position.or(stored).unwrap_or_default(),
            },
            Self::Join { group, position } => CanvasAction::GroupJoin {
                group_id: find_group(snapshot, group)?,
                position: position.or(stored).unwrap_or_default(),
            },
            Self::Info { group, port } => {
                let port = find_port(snapshot, &format!("{}:{}", group, port))?;
                CanvasAction::PortInfo {
                    group_id: port.group_id,
                    port_id: port.id,
                }
            }
            Self::Dump | Self::Status | Self::View(_) | Self::ClearXruns | Self::Quit => {
                bail!("not a gesture")
            }
        };
        Ok(action)
    }
}
