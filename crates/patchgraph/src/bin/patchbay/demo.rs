//! Scripted loopback session for `patchbay demo`

use anyhow::{anyhow, Context as _, Result};
use patchconf::PatchConfig;
use patchgraph::{
    event_channel, ActionReply, CanvasAction, Engine, EngineOptions, GraphSnapshot,
    GroupPosition, LoopbackServer, MediaType, PatchServer, PortFlags, TracingCanvas,
};
use tracing::info;

type DemoEngine = Engine<LoopbackServer, TracingCanvas>;

fn port_ids(engine: &DemoEngine, name: &str) -> Result<(patchgraph::GroupId, patchgraph::PortId)> {
    engine
        .model()
        .port_by_name(name)
        .map(|p| (p.group_id, p.id))
        .ok_or_else(|| anyhow!("demo port missing: {}", name))
}

fn gesture(engine: &mut DemoEngine, action: CanvasAction) -> Result<ActionReply> {
    engine
        .handle_action(action)
        .map_err(|e| anyhow!("demo gesture failed: {}", e))
}

pub fn run(config: &PatchConfig) -> Result<GraphSnapshot> {
    let (events_tx, mut events) = event_channel(config.engine.event_queue_capacity);
    let server = LoopbackServer::new(events_tx);
    server.seed_system().context("seed system ports")?;

    let mut engine = Engine::new(TracingCanvas, EngineOptions::from_config(config));
    engine.attach(server.clone());
    // the attach already mirrored everything queued so far
    engine.drain(&mut events);

    for short in ["out_l", "out_r"] {
        server.register_port("synth", short, PortFlags::output(), MediaType::Audio)?;
    }
    server.register_port("synth", "midi_in", PortFlags::input(), MediaType::Midi)?;
    for short in ["in_l", "in_r", "out_l", "out_r"] {
        let flags = if short.starts_with("in") {
            PortFlags::input()
        } else {
            PortFlags::output()
        };
        server.register_port("reverb", short, flags, MediaType::Audio)?;
    }
    server.connect("system:midi_capture_1", "synth:midi_in")?;
    let applied = engine.drain(&mut events);
    info!(applied, "clients registered");

    let route = [
        ("synth:out_l", "reverb:in_l"),
        ("synth:out_r", "reverb:in_r"),
        ("reverb:out_l", "system:playback_1"),
        ("reverb:out_r", "system:playback_2"),
    ];
    for (output, input) in route {
        let (out_group, out_port) = port_ids(&engine, output)?;
        let (in_group, in_port) = port_ids(&engine, input)?;
        gesture(
            &mut engine,
            CanvasAction::PortsConnect {
                out_group,
                out_port,
                in_group,
                in_port,
            },
        )?;
    }
    engine.drain(&mut events);

    let (group_id, port_id) = port_ids(&engine, "reverb:out_l")?;
    gesture(
        &mut engine,
        CanvasAction::PortRename {
            group_id,
            port_id,
            new_name: "Wet Left".to_string(),
        },
    )?;

    gesture(
        &mut engine,
        CanvasAction::GroupSplit {
            group_id,
            position: GroupPosition::new(400, 120, 0, 0),
        },
    )?;
    let (synth_group, _) = port_ids(&engine, "synth:out_l")?;
    gesture(
        &mut engine,
        CanvasAction::GroupMoved {
            group_id: synth_group,
            position: GroupPosition::new(80, 120, 0, 0),
        },
    )?;

    server.xrun();
    server.set_buffer_size(256);
    engine.drain(&mut events);

    let status = engine.status();
    info!(
        xruns = status.xruns,
        buffer_size = status.buffer_size,
        connections = engine.model().connection_count(),
        "demo finished; {} ports on server",
        server.ports().len()
    );
    Ok(engine.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_graph() {
        let snapshot = run(&PatchConfig::default()).unwrap();

        let names: Vec<&str> = snapshot.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["system", "synth", "reverb"]);
        assert_eq!(snapshot.connections.len(), 5);

        let wet = snapshot
            .ports
            .iter()
            .find(|p| p.canonical_name == "reverb:out_l")
            .unwrap();
        assert_eq!(wet.display_name, "Wet Left");
    }
}
