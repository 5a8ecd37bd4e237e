//! PipeWire graph backend
//!
//! A registry listener on a dedicated thread mirrors nodes, ports, links and
//! metadata into a shared graph and turns registry changes into
//! [`ServerEvent`]s. Requests are posted to that thread over a PipeWire
//! channel and run on its loop.
//!
//! Naming follows pipewire-jack: `node.name` is the client, `node.name:port.name`
//! the full port name. PipeWire keeps a single read-only `port.alias`, exposed
//! as alias #1.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, Once, PoisonError};
use std::thread::{self, JoinHandle};

use pipewire::{
    context::ContextRc,
    link::Link,
    main_loop::MainLoopRc,
    metadata::{Metadata, MetadataListener},
    properties::properties,
    registry::{GlobalObject, RegistryRc},
    spa::utils::dict::DictRef,
    types::ObjectType,
};
use tracing::{debug, error, info, warn};

use crate::event::{EventSender, PropertyChange, ServerEvent};
use crate::server::{ClientUuid, PatchServer, PortFlags, ServerError, ServerPort};
use crate::status::TransportInfo;
use crate::types::MediaType;

static PIPEWIRE_INIT: Once = Once::new();

/// Metadata object holding per-object properties such as group positions
const DEFAULT_METADATA: &str = "default";
/// Metadata object holding the graph clock settings
const SETTINGS_METADATA: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum PipeWireError {
    #[error("Failed to initialize PipeWire: {0}")]
    Init(String),

    #[error("Failed to spawn PipeWire thread: {0}")]
    ThreadSpawn(String),
}

#[derive(Debug, Clone)]
struct PwNode {
    name: String,
}

#[derive(Debug, Clone)]
struct PwPort {
    node_id: u32,
    info: ServerPort,
}

#[derive(Debug, Clone, Copy)]
struct PwLink {
    output_port: u32,
    input_port: u32,
}

#[derive(Debug)]
struct PwGraph {
    nodes: HashMap<u32, PwNode>,
    ports: HashMap<u32, PwPort>,
    port_index: HashMap<String, u32>,
    links: HashMap<u32, PwLink>,
    properties: HashMap<(u32, String), String>,
    buffer_size: u32,
    sample_rate: u32,
    running: bool,
}

impl Default for PwGraph {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            ports: HashMap::new(),
            port_index: HashMap::new(),
            links: HashMap::new(),
            properties: HashMap::new(),
            buffer_size: 1024,
            sample_rate: 48_000,
            running: true,
        }
    }
}

impl PwGraph {
    fn port_name(&self, id: u32) -> Option<&str> {
        self.ports.get(&id).map(|p| p.info.name.as_str())
    }

    fn port_by_name(&self, name: &str) -> Option<(u32, &PwPort)> {
        let id = *self.port_index.get(name)?;
        self.ports.get(&id).map(|p| (id, p))
    }

    fn link_between(&self, output: u32, input: u32) -> Option<u32> {
        self.links
            .iter()
            .find(|(_, l)| l.output_port == output && l.input_port == input)
            .map(|(id, _)| *id)
    }
}

/// Requests executed on the PipeWire thread
enum PwCommand {
    Connect {
        output_node: u32,
        output_port: u32,
        input_node: u32,
        input_port: u32,
    },
    Disconnect {
        link: u32,
    },
    SetProperty {
        subject: u32,
        key: String,
        value_type: String,
        value: String,
    },
    Quit,
}

pub struct PipeWireServer {
    graph: Arc<Mutex<PwGraph>>,
    commands: pipewire::channel::Sender<PwCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PipeWireServer {
    /// Connect to the PipeWire daemon and start mirroring its graph.
    pub fn connect(events: EventSender) -> Result<Self, PipeWireError> {
        PIPEWIRE_INIT.call_once(|| {
            pipewire::init();
        });

        let graph = Arc::new(Mutex::new(PwGraph::default()));
        let (command_tx, command_rx) = pipewire::channel::channel::<PwCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let graph_for_thread = Arc::clone(&graph);
        let thread_handle = thread::Builder::new()
            .name("pipewire-graph".to_string())
            .spawn(move || {
                let events_on_exit = events.clone();
                if let Err(e) = run_registry_loop(graph_for_thread, events, command_rx, &ready_tx) {
                    error!("PipeWire graph thread failed: {}", e);
                    let _ = ready_tx.send(Err(e.to_string()));
                }
                events_on_exit.notify(ServerEvent::Shutdown);
            })
            .map_err(|e| PipeWireError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(PipeWireError::Init(message)),
            Err(_) => {
                return Err(PipeWireError::Init(
                    "PipeWire thread exited during startup".to_string(),
                ))
            }
        }

        info!("PipeWire graph listener started");
        Ok(Self {
            graph,
            commands: command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    fn graph(&self) -> MutexGuard<'_, PwGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: PwCommand) -> Result<(), ServerError> {
        if !self.graph().running {
            return Err(ServerError::Disconnected);
        }
        self.commands
            .send(command)
            .map_err(|_| ServerError::Disconnected)
    }

    /// Stop the listener thread
    pub fn stop(&mut self) {
        let _ = self.commands.send(PwCommand::Quit);
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for PipeWire thread to stop...");
            let _ = handle.join();
            info!("PipeWire graph listener stopped");
        }
    }
}

impl Drop for PipeWireServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PatchServer for PipeWireServer {
    fn ports(&self) -> Vec<String> {
        let graph = self.graph();
        let mut ports: Vec<(u32, String)> = graph
            .ports
            .iter()
            .map(|(id, p)| (*id, p.info.name.clone()))
            .collect();
        ports.sort_by_key(|(id, _)| *id);
        ports.into_iter().map(|(_, name)| name).collect()
    }

    fn port_info(&self, name: &str) -> Option<ServerPort> {
        self.graph().port_by_name(name).map(|(_, p)| p.info.clone())
    }

    fn port_connections(&self, name: &str) -> Vec<String> {
        let graph = self.graph();
        let Some((id, _)) = graph.port_by_name(name) else {
            return Vec::new();
        };
        graph
            .links
            .values()
            .filter_map(|link| {
                if link.output_port == id {
                    graph.port_name(link.input_port)
                } else if link.input_port == id {
                    graph.port_name(link.output_port)
                } else {
                    None
                }
            })
            .map(String::from)
            .collect()
    }

    fn connect(&self, output: &str, input: &str) -> Result<(), ServerError> {
        let command = {
            let graph = self.graph();
            let (output_port, out) = graph
                .port_by_name(output)
                .ok_or_else(|| ServerError::NotFound(output.to_string()))?;
            let (input_port, inp) = graph
                .port_by_name(input)
                .ok_or_else(|| ServerError::NotFound(input.to_string()))?;
            if !out.info.flags.is_output || !inp.info.flags.is_input {
                return Err(ServerError::Rejected(format!(
                    "{} -> {} is not output to input",
                    output, input
                )));
            }
            if graph.link_between(output_port, input_port).is_some() {
                return Err(ServerError::Rejected("already connected".to_string()));
            }
            PwCommand::Connect {
                output_node: out.node_id,
                output_port,
                input_node: inp.node_id,
                input_port,
            }
        };
        self.send(command)
    }

    fn disconnect(&self, output: &str, input: &str) -> Result<(), ServerError> {
        let link = {
            let graph = self.graph();
            let (output_port, _) = graph
                .port_by_name(output)
                .ok_or_else(|| ServerError::NotFound(output.to_string()))?;
            let (input_port, _) = graph
                .port_by_name(input)
                .ok_or_else(|| ServerError::NotFound(input.to_string()))?;
            graph
                .link_between(output_port, input_port)
                .ok_or_else(|| ServerError::Rejected(format!("{} -> {} not linked", output, input)))?
        };
        self.send(PwCommand::Disconnect { link })
    }

    fn set_alias(&self, port: &str, _alias: &str) -> Result<(), ServerError> {
        Err(ServerError::Rejected(format!(
            "PipeWire port aliases are read-only ({})",
            port
        )))
    }

    fn unset_alias(&self, port: &str, _alias: &str) -> Result<(), ServerError> {
        Err(ServerError::Rejected(format!(
            "PipeWire port aliases are read-only ({})",
            port
        )))
    }

    fn client_uuid(&self, client_name: &str) -> Option<ClientUuid> {
        self.graph()
            .nodes
            .iter()
            .find(|(_, n)| n.name == client_name)
            .map(|(id, _)| ClientUuid(u64::from(*id)))
    }

    fn client_name(&self, uuid: ClientUuid) -> Option<String> {
        let id = u32::try_from(uuid.0).ok()?;
        self.graph().nodes.get(&id).map(|n| n.name.clone())
    }

    fn property(&self, subject: ClientUuid, key: &str) -> Option<String> {
        let id = u32::try_from(subject.0).ok()?;
        self.graph().properties.get(&(id, key.to_string())).cloned()
    }

    fn set_property(
        &self,
        subject: ClientUuid,
        key: &str,
        value: &str,
        value_type: &str,
    ) -> Result<(), ServerError> {
        let subject = u32::try_from(subject.0)
            .map_err(|_| ServerError::NotFound(format!("client {}", subject)))?;
        self.send(PwCommand::SetProperty {
            subject,
            key: key.to_string(),
            value_type: value_type.to_string(),
            value: value.to_string(),
        })
    }

    fn buffer_size(&self) -> u32 {
        self.graph().buffer_size
    }

    fn sample_rate(&self) -> u32 {
        self.graph().sample_rate
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn dsp_load(&self) -> f32 {
        0.0
    }

    fn transport(&self) -> TransportInfo {
        TransportInfo::default()
    }
}

fn lock(graph: &Mutex<PwGraph>) -> MutexGuard<'_, PwGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_id(props: &DictRef, key: &str) -> Option<u32> {
    props.get(key).and_then(|s| s.parse().ok())
}

/// Bound metadata objects, kept alive for the life of the loop
#[derive(Default)]
struct MetadataSlots {
    /// Index into `bound` of the object positions are written to
    default: Option<usize>,
    bound: Vec<(Metadata, MetadataListener)>,
}

impl MetadataSlots {
    fn default_metadata(&self) -> Option<&Metadata> {
        self.default
            .and_then(|index| self.bound.get(index))
            .map(|(proxy, _)| proxy)
    }
}

/// Run the PipeWire main loop (called from thread)
fn run_registry_loop(
    graph: Arc<Mutex<PwGraph>>,
    events: EventSender,
    commands: pipewire::channel::Receiver<PwCommand>,
    ready: &std_mpsc::Sender<Result<(), String>>,
) -> Result<(), PipeWireError> {
    let mainloop = MainLoopRc::new(None)
        .map_err(|e| PipeWireError::Init(format!("Failed to create main loop: {}", e)))?;
    let context = ContextRc::new(&mainloop, None)
        .map_err(|e| PipeWireError::Init(format!("Failed to create context: {}", e)))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| PipeWireError::Init(format!("Failed to connect to PipeWire: {}", e)))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| PipeWireError::Init(format!("Failed to get registry: {}", e)))?;

    let metadata = Rc::new(RefCell::new(MetadataSlots::default()));

    let _registry_listener = registry
        .add_listener_local()
        .global({
            let graph = Arc::clone(&graph);
            let events = events.clone();
            let registry = registry.clone();
            let metadata = Rc::clone(&metadata);
            move |global| {
                process_global(&graph, &events, &registry, &metadata, global);
            }
        })
        .global_remove({
            let graph = Arc::clone(&graph);
            let events = events.clone();
            move |id| {
                process_global_remove(&graph, &events, id);
            }
        })
        .register();

    let mainloop_weak = mainloop.downgrade();
    let _commands = commands.attach(mainloop.loop_(), {
        let core = core.clone();
        let registry = registry.clone();
        let metadata = Rc::clone(&metadata);
        let graph = Arc::clone(&graph);
        move |command| match command {
            PwCommand::Connect {
                output_node,
                output_port,
                input_node,
                input_port,
            } => {
                let props = properties! {
                    "link.output.node" => output_node.to_string(),
                    "link.output.port" => output_port.to_string(),
                    "link.input.node" => input_node.to_string(),
                    "link.input.port" => input_port.to_string(),
                    "object.linger" => "true",
                };
                // lingering links outlive the proxy
                if let Err(e) = core.create_object::<Link>("link-factory", &props) {
                    warn!("link {} -> {} rejected: {}", output_port, input_port, e);
                }
            }
            PwCommand::Disconnect { link } => {
                if let Err(e) = registry.destroy_global(link).into_result() {
                    warn!("unlink {} rejected: {}", link, e);
                }
            }
            PwCommand::SetProperty {
                subject,
                key,
                value_type,
                value,
            } => match metadata.borrow().default_metadata() {
                Some(default) => {
                    default.set_property(subject, &key, Some(&value_type), Some(&value));
                }
                None => warn!("no default metadata, dropping {} for {}", key, subject),
            },
            PwCommand::Quit => {
                lock(&graph).running = false;
                if let Some(ml) = mainloop_weak.upgrade() {
                    ml.quit();
                }
            }
        }
    });

    let _ = ready.send(Ok(()));
    info!("PipeWire registry connected, entering main loop");

    // Run the main loop - this blocks until quit
    mainloop.run();

    lock(&graph).running = false;
    info!("PipeWire main loop exited");
    Ok(())
}

fn process_global<P: AsRef<DictRef>>(
    graph: &Arc<Mutex<PwGraph>>,
    events: &EventSender,
    registry: &RegistryRc,
    metadata: &Rc<RefCell<MetadataSlots>>,
    global: &GlobalObject<P>,
) {
    let props = match &global.props {
        Some(p) => p.as_ref(),
        None => return,
    };

    match global.type_ {
        ObjectType::Node => {
            let name = props
                .get(*pipewire::keys::NODE_NAME)
                .map(String::from)
                .unwrap_or_else(|| format!("node-{}", global.id));
            lock(graph).nodes.insert(global.id, PwNode { name });
        }
        ObjectType::Port => {
            let Some(node_id) = parse_id(props, *pipewire::keys::NODE_ID) else {
                return;
            };
            let short_name = props
                .get(*pipewire::keys::PORT_NAME)
                .map(String::from)
                .unwrap_or_else(|| format!("port-{}", global.id));
            let mut flags = match props.get(*pipewire::keys::PORT_DIRECTION) {
                Some("in") => PortFlags::input(),
                _ => PortFlags::output(),
            };
            flags.is_physical = props.get("port.physical") == Some("true");
            flags.is_terminal = props.get("port.terminal") == Some("true");
            flags.can_monitor = props.get("port.monitor") == Some("true");
            let media_type = match props.get(*pipewire::keys::FORMAT_DSP) {
                Some(format) if format.contains("audio") => MediaType::Audio,
                Some(format) if format.contains("midi") => MediaType::Midi,
                _ => MediaType::Unknown,
            };
            let aliases: Vec<String> = props
                .get("port.alias")
                .map(|a| vec![a.to_string()])
                .unwrap_or_default();

            let name = {
                let mut g = lock(graph);
                let client_name = g
                    .nodes
                    .get(&node_id)
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|| format!("node-{}", node_id));
                let name = format!("{}:{}", client_name, short_name);
                g.port_index.insert(name.clone(), global.id);
                g.ports.insert(
                    global.id,
                    PwPort {
                        node_id,
                        info: ServerPort {
                            name: name.clone(),
                            short_name,
                            client_name,
                            flags,
                            media_type,
                            aliases,
                            latency_frames: 0,
                            total_latency_frames: 0,
                        },
                    },
                );
                name
            };
            events.notify(ServerEvent::PortRegistered { name });
        }
        ObjectType::Link => {
            let (Some(output_port), Some(input_port)) = (
                parse_id(props, *pipewire::keys::LINK_OUTPUT_PORT),
                parse_id(props, *pipewire::keys::LINK_INPUT_PORT),
            ) else {
                return;
            };
            let names = {
                let mut g = lock(graph);
                g.links.insert(
                    global.id,
                    PwLink {
                        output_port,
                        input_port,
                    },
                );
                g.port_name(output_port)
                    .zip(g.port_name(input_port))
                    .map(|(a, b)| (a.to_string(), b.to_string()))
            };
            if let Some((a, b)) = names {
                events.notify(ServerEvent::PortsConnected { a, b });
            }
        }
        ObjectType::Metadata => {
            let Some(name) = props.get("metadata.name") else {
                return;
            };
            if name != DEFAULT_METADATA && name != SETTINGS_METADATA {
                return;
            }
            bind_metadata(graph, events, registry, metadata, global, name == SETTINGS_METADATA);
        }
        _ => {}
    }
}

fn bind_metadata<P: AsRef<DictRef>>(
    graph: &Arc<Mutex<PwGraph>>,
    events: &EventSender,
    registry: &RegistryRc,
    slots: &Rc<RefCell<MetadataSlots>>,
    global: &GlobalObject<P>,
    is_settings: bool,
) {
    let proxy: Metadata = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("failed to bind metadata {}: {}", global.id, e);
            return;
        }
    };

    let graph = Arc::clone(graph);
    let events = events.clone();
    let listener = proxy
        .add_listener_local()
        .property(move |subject, key, _type, value| {
            let Some(key) = key else {
                return 0;
            };
            if is_settings {
                apply_setting(&graph, &events, key, value);
            } else {
                apply_property(&graph, &events, subject, key, value);
            }
            0
        })
        .register();

    let mut slots = slots.borrow_mut();
    slots.bound.push((proxy, listener));
    if !is_settings {
        slots.default = Some(slots.bound.len() - 1);
    }
    debug!(id = global.id, settings = is_settings, "bound metadata");
}

fn apply_property(
    graph: &Mutex<PwGraph>,
    events: &EventSender,
    subject: u32,
    key: &str,
    value: Option<&str>,
) {
    let change = {
        let mut g = lock(graph);
        let slot = (subject, key.to_string());
        match value {
            Some(value) => match g.properties.insert(slot, value.to_string()) {
                Some(_) => PropertyChange::Changed,
                None => PropertyChange::Created,
            },
            None => {
                if g.properties.remove(&slot).is_none() {
                    return;
                }
                PropertyChange::Deleted
            }
        }
    };
    events.notify(ServerEvent::PropertyChanged {
        subject: ClientUuid(u64::from(subject)),
        key: key.to_string(),
        change,
    });
}

fn apply_setting(graph: &Mutex<PwGraph>, events: &EventSender, key: &str, value: Option<&str>) {
    let Some(number) = value.and_then(|v| v.parse::<u32>().ok()) else {
        return;
    };
    if number == 0 {
        return;
    }
    match key {
        "clock.rate" | "clock.force-rate" => {
            lock(graph).sample_rate = number;
            events.notify(ServerEvent::SampleRateChanged { rate: number });
        }
        "clock.quantum" | "clock.force-quantum" => {
            lock(graph).buffer_size = number;
            events.notify(ServerEvent::BufferSizeChanged { frames: number });
        }
        _ => {}
    }
}

fn process_global_remove(graph: &Mutex<PwGraph>, events: &EventSender, id: u32) {
    let event = {
        let mut g = lock(graph);
        if let Some(link) = g.links.remove(&id) {
            g.port_name(link.output_port)
                .zip(g.port_name(link.input_port))
                .map(|(a, b)| ServerEvent::PortsDisconnected {
                    a: a.to_string(),
                    b: b.to_string(),
                })
        } else if let Some(port) = g.ports.remove(&id) {
            g.port_index.remove(&port.info.name);
            Some(ServerEvent::PortUnregistered {
                name: port.info.name,
            })
        } else if g.nodes.remove(&id).is_some() {
            g.properties.retain(|(subject, _), _| *subject != id);
            None
        } else {
            None
        }
    };
    if let Some(event) = event {
        events.notify(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_ports() -> PwGraph {
        let mut graph = PwGraph::default();
        graph.nodes.insert(
            10,
            PwNode {
                name: "synth".into(),
            },
        );
        for (id, short, flags) in [
            (11, "out_l", PortFlags::output()),
            (12, "in_l", PortFlags::input()),
        ] {
            let name = format!("synth:{}", short);
            graph.port_index.insert(name.clone(), id);
            graph.ports.insert(
                id,
                PwPort {
                    node_id: 10,
                    info: ServerPort {
                        name,
                        short_name: short.into(),
                        client_name: "synth".into(),
                        flags,
                        media_type: MediaType::Audio,
                        aliases: Vec::new(),
                        latency_frames: 0,
                        total_latency_frames: 0,
                    },
                },
            );
        }
        graph
    }

    #[test]
    fn test_global_remove_link_then_port() {
        let (tx, mut rx) = crate::event::event_channel(8);
        let mut graph = graph_with_ports();
        graph.links.insert(
            20,
            PwLink {
                output_port: 11,
                input_port: 12,
            },
        );
        let graph = Mutex::new(graph);

        process_global_remove(&graph, &tx, 20);
        process_global_remove(&graph, &tx, 11);
        process_global_remove(&graph, &tx, 999);

        assert_eq!(
            rx.try_next(),
            Some(ServerEvent::PortsDisconnected {
                a: "synth:out_l".into(),
                b: "synth:in_l".into()
            })
        );
        assert_eq!(
            rx.try_next(),
            Some(ServerEvent::PortUnregistered {
                name: "synth:out_l".into()
            })
        );
        assert_eq!(rx.try_next(), None);
    }

    #[test]
    fn test_property_changes() {
        let (tx, mut rx) = crate::event::event_channel(8);
        let graph = Mutex::new(PwGraph::default());

        apply_property(&graph, &tx, 10, "pos", Some("1:2:3:4"));
        apply_property(&graph, &tx, 10, "pos", Some("5:6:7:8"));
        apply_property(&graph, &tx, 10, "pos", None);
        apply_property(&graph, &tx, 10, "pos", None);

        let changes: Vec<_> = std::iter::from_fn(|| rx.try_next())
            .filter_map(|e| match e {
                ServerEvent::PropertyChanged { change, .. } => Some(change),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                PropertyChange::Created,
                PropertyChange::Changed,
                PropertyChange::Deleted
            ]
        );
    }

    #[test]
    fn test_settings_update_clock() {
        let (tx, mut rx) = crate::event::event_channel(8);
        let graph = Mutex::new(PwGraph::default());

        apply_setting(&graph, &tx, "clock.rate", Some("44100"));
        apply_setting(&graph, &tx, "clock.quantum", Some("256"));
        apply_setting(&graph, &tx, "clock.quantum", Some("0"));

        assert_eq!(lock(&graph).sample_rate, 44_100);
        assert_eq!(lock(&graph).buffer_size, 256);
        assert_eq!(
            rx.try_next(),
            Some(ServerEvent::SampleRateChanged { rate: 44_100 })
        );
        assert_eq!(
            rx.try_next(),
            Some(ServerEvent::BufferSizeChanged { frames: 256 })
        );
        assert_eq!(rx.try_next(), None);
    }
}
