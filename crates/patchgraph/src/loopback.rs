//! In-process server
//!
//! `LoopbackServer` keeps a JACK-style graph in memory: `client:port`
//! names, two alias slots per port, output to input connections, and
//! per-client properties keyed by uuid. Every mutation emits the same
//! notification a real server's callback thread would.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::alias::MAX_ALIASES;
use crate::event::{EventSender, PropertyChange, ServerEvent};
use crate::server::{ClientUuid, PatchServer, PortFlags, ServerError, ServerPort};
use crate::status::TransportInfo;
use crate::types::MediaType;

#[derive(Debug)]
struct Client {
    uuid: ClientUuid,
    /// key -> (value, type)
    properties: BTreeMap<String, (String, String)>,
}

#[derive(Debug)]
struct LoopbackState {
    clients: BTreeMap<String, Client>,
    /// Registration order
    ports: Vec<ServerPort>,
    /// (output, input)
    connections: BTreeSet<(String, String)>,
    next_uuid: u64,
    running: bool,
    buffer_size: u32,
    sample_rate: u32,
    realtime: bool,
    dsp_load: f32,
    transport: TransportInfo,
}

impl LoopbackState {
    fn port(&self, name: &str) -> Option<&ServerPort> {
        self.ports.iter().find(|p| p.name == name)
    }

    fn port_mut(&mut self, name: &str) -> Option<&mut ServerPort> {
        self.ports.iter_mut().find(|p| p.name == name)
    }

    fn ensure_running(&self) -> Result<(), ServerError> {
        if self.running {
            Ok(())
        } else {
            Err(ServerError::Disconnected)
        }
    }

    fn client_uuid(&mut self, name: &str) -> ClientUuid {
        if let Some(client) = self.clients.get(name) {
            return client.uuid;
        }
        let uuid = ClientUuid(self.next_uuid);
        self.next_uuid += 1;
        self.clients.insert(
            name.to_string(),
            Client {
                uuid,
                properties: BTreeMap::new(),
            },
        );
        uuid
    }

    fn client_by_uuid(&mut self, uuid: ClientUuid) -> Option<&mut Client> {
        self.clients.values_mut().find(|c| c.uuid == uuid)
    }
}

/// Shared handle; clones drive the same server.
#[derive(Debug, Clone)]
pub struct LoopbackServer {
    state: Arc<Mutex<LoopbackState>>,
    events: EventSender,
}

impl LoopbackServer {
    pub fn new(events: EventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                clients: BTreeMap::new(),
                ports: Vec::new(),
                connections: BTreeSet::new(),
                next_uuid: 1,
                running: true,
                buffer_size: 1024,
                sample_rate: 48_000,
                realtime: true,
                dsp_load: 0.0,
                transport: TransportInfo::default(),
            })),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ServerEvent) {
        self.events.notify(event);
    }

    /// Register a client without ports, returning its uuid.
    pub fn add_client(&self, name: &str) -> ClientUuid {
        self.state().client_uuid(name)
    }

    /// Register `client:short_name`, creating the client on first use.
    pub fn register_port(
        &self,
        client: &str,
        short_name: &str,
        flags: PortFlags,
        media_type: MediaType,
    ) -> Result<String, ServerError> {
        let name = format!("{}:{}", client, short_name);
        {
            let mut state = self.state();
            state.ensure_running()?;
            if state.port(&name).is_some() {
                return Err(ServerError::Rejected(format!("port exists: {}", name)));
            }
            state.client_uuid(client);
            let latency = if flags.is_physical { state.buffer_size } else { 0 };
            state.ports.push(ServerPort {
                name: name.clone(),
                short_name: short_name.to_string(),
                client_name: client.to_string(),
                flags,
                media_type,
                aliases: Vec::new(),
                latency_frames: latency,
                total_latency_frames: latency,
            });
        }
        self.emit(ServerEvent::PortRegistered { name: name.clone() });
        Ok(name)
    }

    /// Unregister a port; its connections go first, as on a real server.
    pub fn unregister_port(&self, name: &str) -> Result<(), ServerError> {
        let dropped: Vec<(String, String)> = {
            let mut state = self.state();
            state.ensure_running()?;
            let index = state
                .ports
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| ServerError::NotFound(name.to_string()))?;
            state.ports.remove(index);
            let dropped: Vec<_> = state
                .connections
                .iter()
                .filter(|(out, inp)| out == name || inp == name)
                .cloned()
                .collect();
            for pair in &dropped {
                state.connections.remove(pair);
            }
            dropped
        };

        for (a, b) in dropped {
            self.emit(ServerEvent::PortsDisconnected { a, b });
        }
        self.emit(ServerEvent::PortUnregistered {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Change a port's short name, which changes its full name too.
    pub fn rename_port(&self, name: &str, new_short_name: &str) -> Result<String, ServerError> {
        let new_name = {
            let mut state = self.state();
            state.ensure_running()?;
            let port = state
                .port_mut(name)
                .ok_or_else(|| ServerError::NotFound(name.to_string()))?;
            let new_name = format!("{}:{}", port.client_name, new_short_name);
            port.name = new_name.clone();
            port.short_name = new_short_name.to_string();

            let renamed: BTreeSet<(String, String)> = state
                .connections
                .iter()
                .map(|(out, inp)| {
                    let out = if out == name { new_name.clone() } else { out.clone() };
                    let inp = if inp == name { new_name.clone() } else { inp.clone() };
                    (out, inp)
                })
                .collect();
            state.connections = renamed;
            new_name
        };

        self.emit(ServerEvent::PortRenamed {
            old: name.to_string(),
            new: new_name.clone(),
        });
        Ok(new_name)
    }

    /// Remove a stored client property.
    pub fn delete_property(&self, subject: ClientUuid, key: &str) -> Result<(), ServerError> {
        {
            let mut state = self.state();
            state.ensure_running()?;
            let client = state
                .client_by_uuid(subject)
                .ok_or_else(|| ServerError::NotFound(format!("client {}", subject)))?;
            if client.properties.remove(key).is_none() {
                return Err(ServerError::NotFound(key.to_string()));
            }
        }
        self.emit(ServerEvent::PropertyChanged {
            subject,
            key: key.to_string(),
            change: PropertyChange::Deleted,
        });
        Ok(())
    }

    pub fn is_connected(&self, output: &str, input: &str) -> bool {
        self.state()
            .connections
            .contains(&(output.to_string(), input.to_string()))
    }

    pub fn xrun(&self) {
        self.emit(ServerEvent::Xrun);
    }

    pub fn set_buffer_size(&self, frames: u32) {
        self.state().buffer_size = frames;
        self.emit(ServerEvent::BufferSizeChanged { frames });
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.state().sample_rate = rate;
        self.emit(ServerEvent::SampleRateChanged { rate });
    }

    pub fn set_dsp_load(&self, load: f32) {
        self.state().dsp_load = load;
    }

    pub fn set_transport(&self, transport: TransportInfo) {
        self.state().transport = transport;
    }

    /// Stop the server. Later requests fail with `Disconnected`.
    pub fn shutdown(&self) {
        self.state().running = false;
        self.emit(ServerEvent::Shutdown);
    }

    /// Stock hardware client: stereo capture/playback and a MIDI pair.
    pub fn seed_system(&self) -> Result<(), ServerError> {
        let capture = PortFlags {
            is_terminal: true,
            ..PortFlags::output().physical()
        };
        let playback = PortFlags {
            is_terminal: true,
            ..PortFlags::input().physical()
        };

        for i in 1..=2 {
            let name =
                self.register_port("system", &format!("capture_{}", i), capture, MediaType::Audio)?;
            self.set_alias(&name, &format!("alsa_pcm:capture_{}", i))?;
        }
        for i in 1..=2 {
            let name = self.register_port(
                "system",
                &format!("playback_{}", i),
                playback,
                MediaType::Audio,
            )?;
            self.set_alias(&name, &format!("alsa_pcm:playback_{}", i))?;
        }
        self.register_port("system", "midi_capture_1", capture, MediaType::Midi)?;
        self.register_port("system", "midi_playback_1", playback, MediaType::Midi)?;
        Ok(())
    }
}

impl PatchServer for LoopbackServer {
    fn ports(&self) -> Vec<String> {
        self.state().ports.iter().map(|p| p.name.clone()).collect()
    }

    fn port_info(&self, name: &str) -> Option<ServerPort> {
        self.state().port(name).cloned()
    }

    fn port_connections(&self, name: &str) -> Vec<String> {
        self.state()
            .connections
            .iter()
            .filter_map(|(out, inp)| {
                if out == name {
                    Some(inp.clone())
                } else if inp == name {
                    Some(out.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn connect(&self, output: &str, input: &str) -> Result<(), ServerError> {
        {
            let mut state = self.state();
            state.ensure_running()?;
            let out = state
                .port(output)
                .ok_or_else(|| ServerError::NotFound(output.to_string()))?;
            let inp = state
                .port(input)
                .ok_or_else(|| ServerError::NotFound(input.to_string()))?;
            if !out.flags.is_output || !inp.flags.is_input {
                return Err(ServerError::Rejected(format!(
                    "{} -> {} is not output to input",
                    output, input
                )));
            }
            if out.media_type != inp.media_type {
                return Err(ServerError::Rejected(format!(
                    "{} and {} carry different media",
                    output, input
                )));
            }
            let pair = (output.to_string(), input.to_string());
            if !state.connections.insert(pair) {
                return Err(ServerError::Rejected("already connected".to_string()));
            }
        }
        self.emit(ServerEvent::PortsConnected {
            a: output.to_string(),
            b: input.to_string(),
        });
        Ok(())
    }

    fn disconnect(&self, output: &str, input: &str) -> Result<(), ServerError> {
        {
            let mut state = self.state();
            state.ensure_running()?;
            if !state
                .connections
                .remove(&(output.to_string(), input.to_string()))
            {
                return Err(ServerError::Rejected(format!(
                    "{} -> {} not connected",
                    output, input
                )));
            }
        }
        self.emit(ServerEvent::PortsDisconnected {
            a: output.to_string(),
            b: input.to_string(),
        });
        Ok(())
    }

    fn set_alias(&self, port: &str, alias: &str) -> Result<(), ServerError> {
        let mut state = self.state();
        state.ensure_running()?;
        let info = state
            .port_mut(port)
            .ok_or_else(|| ServerError::NotFound(port.to_string()))?;
        if info.aliases.len() >= MAX_ALIASES {
            return Err(ServerError::Rejected(format!("{} has no free alias slot", port)));
        }
        info.aliases.push(alias.to_string());
        debug!("alias {} set on {}", alias, port);
        Ok(())
    }

    fn unset_alias(&self, port: &str, alias: &str) -> Result<(), ServerError> {
        let mut state = self.state();
        state.ensure_running()?;
        let info = state
            .port_mut(port)
            .ok_or_else(|| ServerError::NotFound(port.to_string()))?;
        let index = info
            .aliases
            .iter()
            .position(|a| a == alias)
            .ok_or_else(|| ServerError::NotFound(alias.to_string()))?;
        info.aliases.remove(index);
        Ok(())
    }

    fn client_uuid(&self, client_name: &str) -> Option<ClientUuid> {
        self.state().clients.get(client_name).map(|c| c.uuid)
    }

    fn client_name(&self, uuid: ClientUuid) -> Option<String> {
        self.state()
            .clients
            .iter()
            .find(|(_, c)| c.uuid == uuid)
            .map(|(name, _)| name.clone())
    }

    fn property(&self, subject: ClientUuid, key: &str) -> Option<String> {
        self.state()
            .client_by_uuid(subject)
            .and_then(|c| c.properties.get(key))
            .map(|(value, _)| value.clone())
    }

    fn set_property(
        &self,
        subject: ClientUuid,
        key: &str,
        value: &str,
        value_type: &str,
    ) -> Result<(), ServerError> {
        let change = {
            let mut state = self.state();
            state.ensure_running()?;
            let client = state
                .client_by_uuid(subject)
                .ok_or_else(|| ServerError::NotFound(format!("client {}", subject)))?;
            match client
                .properties
                .insert(key.to_string(), (value.to_string(), value_type.to_string()))
            {
                Some(_) => PropertyChange::Changed,
                None => PropertyChange::Created,
            }
        };
        self.emit(ServerEvent::PropertyChanged {
            subject,
            key: key.to_string(),
            change,
        });
        Ok(())
    }

    fn buffer_size(&self) -> u32 {
        self.state().buffer_size
    }

    fn sample_rate(&self) -> u32 {
        self.state().sample_rate
    }

    fn is_realtime(&self) -> bool {
        self.state().realtime
    }

    fn dsp_load(&self) -> f32 {
        self.state().dsp_load
    }

    fn transport(&self) -> TransportInfo {
        self.state().transport
    }
}
