mod fixtures;

use fixtures::TestFixture;
use patchgraph::canvas::{GroupIcon, PortKind, PortMode};
use patchgraph::server::{URI_PLUGIN_ID, URI_POSITION, URI_TYPE_STRING};
use patchgraph::{
    event_channel, ActionReply, AliasPreference, CanvasAction, CanvasCall, ConnectionId,
    ConnectionKey, Engine, EngineCommand, EngineError, EngineOptions, GroupId, GroupPosition,
    LoopbackServer, PatchServer, PortId, RecordingCanvas, ServerEvent, SplitMode, TransportView,
};
use tokio::sync::{mpsc, oneshot};

#[test]
fn test_register_connect_unregister() {
    let mut fixture = TestFixture::new();
    let out = fixture.output("app", "out_1");
    let inp = fixture.input("app", "in_1");
    assert_eq!(fixture.drain(), 2);

    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::AddGroup {
                group_id: GroupId(1),
                name: "app".into(),
                split: SplitMode::Undefined,
                icon: GroupIcon::Application,
            },
            CanvasCall::AddPort {
                group_id: GroupId(1),
                port_id: PortId(1),
                name: "out_1".into(),
                mode: PortMode::Output,
                kind: PortKind::Audio,
            },
            CanvasCall::AddPort {
                group_id: GroupId(1),
                port_id: PortId(2),
                name: "in_1".into(),
                mode: PortMode::Input,
                kind: PortKind::Audio,
            },
        ]
    );

    fixture.server.connect(&out, &inp).unwrap();
    fixture.drain();
    let key = ConnectionKey {
        out_group: GroupId(1),
        out_port: PortId(1),
        in_group: GroupId(1),
        in_port: PortId(2),
    };
    assert_eq!(
        fixture.calls(),
        vec![CanvasCall::ConnectPorts {
            connection_id: ConnectionId(1),
            key
        }]
    );

    fixture.server.unregister_port(&out).unwrap();
    fixture.drain();
    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::DisconnectPorts {
                connection_id: ConnectionId(1)
            },
            CanvasCall::RemovePort {
                group_id: GroupId(1),
                port_id: PortId(1)
            },
        ]
    );
    assert_eq!(fixture.engine.model().group_count(), 1);
    assert_eq!(fixture.engine.model().connection_count(), 0);

    fixture.server.unregister_port(&inp).unwrap();
    fixture.drain();
    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::RemovePort {
                group_id: GroupId(1),
                port_id: PortId(2)
            },
            CanvasCall::RemoveGroup {
                group_id: GroupId(1)
            },
        ]
    );
    assert!(fixture.engine.model().is_empty());
}

#[test]
fn test_lookup_miss_is_noop() {
    let mut fixture = TestFixture::with_app();
    let before = fixture.engine.snapshot();

    fixture.engine.apply_event(ServerEvent::PortUnregistered {
        name: "ghost:out".into(),
    });
    fixture.engine.apply_event(ServerEvent::PortsConnected {
        a: "app:out_1".into(),
        b: "ghost:in".into(),
    });
    fixture.engine.apply_event(ServerEvent::PortsDisconnected {
        a: "app:out_1".into(),
        b: "app:in_1".into(),
    });

    assert_eq!(fixture.engine.snapshot(), before);
    assert!(fixture.calls().is_empty());
}

#[test]
fn test_connected_event_in_either_order() {
    let mut fixture = TestFixture::with_app();

    fixture.engine.apply_event(ServerEvent::PortsConnected {
        a: "app:in_1".into(),
        b: "app:out_1".into(),
    });

    let out = fixture.port("app:out_1");
    let inp = fixture.port("app:in_1");
    assert!(fixture
        .engine
        .model()
        .connection_between(out.id, inp.id)
        .is_some());

    // the duplicate is absorbed
    fixture.engine.apply_event(ServerEvent::PortsConnected {
        a: "app:out_1".into(),
        b: "app:in_1".into(),
    });
    assert_eq!(fixture.engine.model().connection_count(), 1);
    assert_eq!(fixture.calls().len(), 1);
}

#[test]
fn test_physical_group_split_once() {
    let mut fixture = TestFixture::new();
    fixture.server.seed_system().unwrap();
    fixture.drain();

    let calls = fixture.calls();
    let splits = calls
        .iter()
        .filter(|c| matches!(c, CanvasCall::SplitGroup { .. }))
        .count();
    let icons: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, CanvasCall::SetGroupIcon { .. }))
        .collect();
    assert_eq!(splits, 1);
    assert_eq!(
        icons,
        vec![&CanvasCall::SetGroupIcon {
            group_id: GroupId(1),
            icon: GroupIcon::Hardware
        }]
    );
    assert_eq!(fixture.engine.model().port_count(), 6);
}

#[test]
fn test_alias_display_names() {
    let mut fixture = TestFixture::new();
    fixture.server.seed_system().unwrap();
    fixture.drain();

    assert_eq!(fixture.port("system:capture_1").display_name, "capture_1");
    fixture
        .server
        .set_alias("system:capture_1", "hw:Front Left")
        .unwrap();
    fixture.engine.set_alias_preference(AliasPreference::Second);
    // unchanged preference does not resync
    assert_eq!(fixture.port("system:capture_1").display_name, "capture_1");

    fixture.engine.set_alias_preference(AliasPreference::First);
    fixture.engine.set_alias_preference(AliasPreference::Second);
    assert_eq!(fixture.port("system:capture_1").display_name, "Front Left");

    fixture.engine.set_alias_preference(AliasPreference::Off);
    assert_eq!(fixture.port("system:capture_1").display_name, "capture_1");
}

#[test]
fn test_position_split_before_place() {
    let mut fixture = TestFixture::with_app();
    let uuid = fixture.server.client_uuid("app").unwrap();
    let group_id = fixture.port("app:out_1").group_id;

    let split = GroupPosition::new(10, 20, 300, 20);
    fixture
        .server
        .set_property(uuid, URI_POSITION, &split.to_string(), URI_TYPE_STRING)
        .unwrap();
    fixture.drain();
    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::SplitGroup { group_id },
            CanvasCall::SetGroupPosition {
                group_id,
                position: split
            },
        ]
    );

    fixture
        .server
        .set_property(uuid, URI_POSITION, "5:5:0:0", URI_TYPE_STRING)
        .unwrap();
    fixture.drain();
    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::JoinGroup { group_id },
            CanvasCall::SetGroupPosition {
                group_id,
                position: GroupPosition::new(5, 5, 0, 0)
            },
        ]
    );
}

#[test]
fn test_malformed_position_is_ignored() {
    let mut fixture = TestFixture::with_app();
    let uuid = fixture.server.client_uuid("app").unwrap();

    fixture
        .server
        .set_property(uuid, URI_POSITION, "1:2:x:4", URI_TYPE_STRING)
        .unwrap();
    fixture.drain();
    assert!(fixture.calls().is_empty());

    let late = fixture.server.add_client("late");
    fixture
        .server
        .set_property(late, URI_POSITION, "1:2", URI_TYPE_STRING)
        .unwrap();
    fixture.output("late", "out");
    fixture.drain();

    let calls = fixture.calls();
    assert!(matches!(
        &calls[0],
        CanvasCall::AddGroup { name, split: SplitMode::Undefined, .. } if name == "late"
    ));
    assert!(!calls
        .iter()
        .any(|c| matches!(c, CanvasCall::SetGroupPosition { .. })));
}

#[test]
fn test_stored_position_on_new_group() {
    let mut fixture = TestFixture::new();
    let uuid = fixture.server.add_client("placed");
    fixture
        .server
        .set_property(uuid, URI_POSITION, "100:50:0:0", URI_TYPE_STRING)
        .unwrap();
    fixture.output("placed", "out");
    fixture.drain();

    let calls = fixture.calls();
    assert_eq!(
        calls[..3],
        [
            CanvasCall::AddGroup {
                group_id: GroupId(1),
                name: "placed".into(),
                split: SplitMode::No,
                icon: GroupIcon::Application,
            },
            CanvasCall::JoinGroup {
                group_id: GroupId(1)
            },
            CanvasCall::SetGroupPosition {
                group_id: GroupId(1),
                position: GroupPosition::new(100, 50, 0, 0)
            },
        ]
    );
}

#[test]
fn test_plugin_icon_follows_property() {
    let mut fixture = TestFixture::with_app();
    let uuid = fixture.server.client_uuid("app").unwrap();
    let group_id = fixture.port("app:out_1").group_id;

    fixture
        .server
        .set_property(uuid, URI_PLUGIN_ID, "7", URI_TYPE_STRING)
        .unwrap();
    fixture.server.delete_property(uuid, URI_PLUGIN_ID).unwrap();
    fixture.drain();

    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::SetGroupIcon {
                group_id,
                icon: GroupIcon::Plugin
            },
            CanvasCall::SetGroupIcon {
                group_id,
                icon: GroupIcon::Application
            },
        ]
    );
}

#[test]
fn test_connect_gesture_waits_for_server() {
    let mut fixture = TestFixture::with_app();
    let out = fixture.port("app:out_1");
    let inp = fixture.port("app:in_1");

    let reply = fixture
        .engine
        .handle_action(CanvasAction::PortsConnect {
            out_group: out.group_id,
            out_port: out.id,
            in_group: inp.group_id,
            in_port: inp.id,
        })
        .unwrap();
    assert_eq!(reply, ActionReply::Requested);
    assert!(fixture.server.is_connected("app:out_1", "app:in_1"));
    assert_eq!(fixture.engine.model().connection_count(), 0);

    fixture.drain();
    assert_eq!(fixture.engine.model().connection_count(), 1);

    let reply = fixture
        .engine
        .handle_action(CanvasAction::PortsDisconnect {
            connection_id: ConnectionId(1),
        })
        .unwrap();
    assert_eq!(reply, ActionReply::Requested);
    assert_eq!(fixture.engine.model().connection_count(), 1);
    fixture.drain();
    assert_eq!(fixture.engine.model().connection_count(), 0);

    let backwards = fixture.engine.handle_action(CanvasAction::PortsConnect {
        out_group: inp.group_id,
        out_port: inp.id,
        in_group: out.group_id,
        in_port: out.id,
    });
    assert!(matches!(backwards, Err(EngineError::RejectedRequest(_))));

    let missing = fixture.engine.handle_action(CanvasAction::PortsDisconnect {
        connection_id: ConnectionId(99),
    });
    assert!(matches!(missing, Err(EngineError::LookupMiss(_))));
}

#[test]
fn test_split_gesture_writes_position() {
    let mut fixture = TestFixture::with_app();
    let group_id = fixture.port("app:out_1").group_id;
    let uuid = fixture.server.client_uuid("app").unwrap();

    fixture
        .engine
        .handle_action(CanvasAction::GroupSplit {
            group_id,
            position: GroupPosition::new(0, 40, 0, 0),
        })
        .unwrap();
    assert_eq!(
        fixture.server.property(uuid, URI_POSITION).as_deref(),
        Some("1:40:251:40")
    );
    // nothing moves until the notification arrives
    assert!(fixture.calls().is_empty());

    fixture.drain();
    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::SplitGroup { group_id },
            CanvasCall::SetGroupPosition {
                group_id,
                position: GroupPosition::new(1, 40, 251, 40)
            },
        ]
    );

    fixture
        .engine
        .handle_action(CanvasAction::GroupJoin {
            group_id,
            position: GroupPosition::new(1, 40, 251, 40),
        })
        .unwrap();
    assert_eq!(
        fixture.server.property(uuid, URI_POSITION).as_deref(),
        Some("1:40:0:0")
    );
}

#[test]
fn test_split_gesture_left_of_origin() {
    let mut fixture = TestFixture::with_app();
    let group_id = fixture.port("app:out_1").group_id;
    let uuid = fixture.server.client_uuid("app").unwrap();

    fixture
        .engine
        .handle_action(CanvasAction::GroupSplit {
            group_id,
            position: GroupPosition::new(-250, 0, 0, 0),
        })
        .unwrap();
    let stored: GroupPosition = fixture
        .server
        .property(uuid, URI_POSITION)
        .unwrap()
        .parse()
        .unwrap();
    assert!(stored.is_split());
    assert_eq!(stored, GroupPosition::new(-250, 0, -500, 0));

    fixture.drain();
    assert_eq!(
        fixture.calls()[0],
        CanvasCall::SplitGroup { group_id }
    );
}

#[test]
fn test_stored_position_lookup() {
    let mut fixture = TestFixture::with_app();
    let group_id = fixture.port("app:out_1").group_id;
    let uuid = fixture.server.client_uuid("app").unwrap();

    assert_eq!(fixture.engine.stored_position(group_id), Ok(None));

    fixture
        .server
        .set_property(uuid, URI_POSITION, "10:20:0:0", URI_TYPE_STRING)
        .unwrap();
    let (tx, mut rx) = oneshot::channel();
    fixture
        .engine
        .execute(EngineCommand::StoredPosition { group_id, reply: tx });
    assert_eq!(
        rx.try_recv().unwrap(),
        Ok(Some(GroupPosition::new(10, 20, 0, 0)))
    );

    fixture
        .server
        .set_property(uuid, URI_POSITION, "junk", URI_TYPE_STRING)
        .unwrap();
    assert!(matches!(
        fixture.engine.stored_position(group_id),
        Err(EngineError::MalformedMetadata(_))
    ));
    assert!(matches!(
        fixture.engine.stored_position(GroupId(42)),
        Err(EngineError::LookupMiss(_))
    ));
}

#[test]
fn test_rename_writes_alias() {
    let mut fixture = TestFixture::with_app();
    let out = fixture.port("app:out_1");

    let reply = fixture
        .engine
        .handle_action(CanvasAction::PortRename {
            group_id: out.group_id,
            port_id: out.id,
            new_name: " Lead ".into(),
        })
        .unwrap();
    assert_eq!(
        reply,
        ActionReply::Renamed {
            port_id: out.id,
            name: "Lead".into()
        }
    );
    assert_eq!(
        fixture.server.port_info("app:out_1").unwrap().aliases,
        vec!["app:Lead", "app:Lead"]
    );
    assert_eq!(fixture.port("app:out_1").display_name, "Lead");
    assert_eq!(
        fixture.calls(),
        vec![CanvasCall::RenamePort {
            group_id: out.group_id,
            port_id: out.id,
            name: "Lead".into()
        }]
    );

    let again = fixture.engine.handle_action(CanvasAction::PortRename {
        group_id: out.group_id,
        port_id: out.id,
        new_name: "Lead".into(),
    });
    assert_eq!(again, Ok(ActionReply::Ignored));

    // a second rename replaces the displayed alias
    fixture
        .engine
        .handle_action(CanvasAction::PortRename {
            group_id: out.group_id,
            port_id: out.id,
            new_name: "Bass".into(),
        })
        .unwrap();
    assert_eq!(
        fixture.server.port_info("app:out_1").unwrap().aliases,
        vec!["app:Lead", "app:Bass"]
    );

    fixture.engine.set_alias_preference(AliasPreference::Off);
    let out = fixture.port("app:out_1");
    assert_eq!(out.display_name, "out_1");
    let off = fixture.engine.handle_action(CanvasAction::PortRename {
        group_id: out.group_id,
        port_id: out.id,
        new_name: "Other".into(),
    });
    assert_eq!(off, Ok(ActionReply::Ignored));
}

#[test]
fn test_port_info_gesture() {
    let mut fixture = TestFixture::new();
    fixture.server.seed_system().unwrap();
    fixture.drain();
    let port = fixture.port("system:capture_1");

    let reply = fixture
        .engine
        .handle_action(CanvasAction::PortInfo {
            group_id: port.group_id,
            port_id: port.id,
        })
        .unwrap();
    let ActionReply::Info(details) = reply else {
        panic!("expected port info, got {:?}", reply);
    };
    assert_eq!(details.group_name, "system");
    assert_eq!(details.full_name, "system:capture_1");
    assert_eq!(details.alias_1.as_deref(), Some("alsa_pcm:capture_1"));
    assert_eq!(details.alias_2, None);
    assert_eq!(details.latency_frames, 1024);
    assert!((details.latency_ms - 21.333).abs() < 0.01);
    assert_eq!(details.type_label(), "JACK Audio");

    let wrong_group = fixture.engine.handle_action(CanvasAction::PortInfo {
        group_id: GroupId(42),
        port_id: port.id,
    });
    assert!(matches!(wrong_group, Err(EngineError::LookupMiss(_))));
}

#[test]
fn test_server_rename_is_new_identity() {
    let mut fixture = TestFixture::with_app();
    fixture.server.connect("app:out_1", "app:in_1").unwrap();
    fixture.drain();
    fixture.calls();

    let new_name = fixture.server.rename_port("app:out_1", "main_l").unwrap();
    fixture.drain();

    let model = fixture.engine.model();
    assert!(model.port_by_name("app:out_1").is_none());
    let renamed = model.port_by_name(&new_name).unwrap();
    assert_eq!(renamed.id, PortId(3));
    assert_eq!(renamed.display_name, "main_l");
    assert_eq!(model.connection_count(), 1);
    assert!(model
        .connection_between(renamed.id, fixture.port("app:in_1").id)
        .is_some());

    let calls = fixture.calls();
    assert_eq!(
        calls[..2],
        [
            CanvasCall::DisconnectPorts {
                connection_id: ConnectionId(1)
            },
            CanvasCall::RemovePort {
                group_id: GroupId(1),
                port_id: PortId(1)
            },
        ]
    );
}

#[test]
fn test_server_rename_reconnects_every_peer() {
    let mut fixture = TestFixture::with_app();
    fixture.server.connect("app:out_1", "app:in_1").unwrap();
    fixture.drain();

    // the new peer's registration is still queued when the rename is applied
    let new_name = fixture.server.rename_port("app:out_1", "main_l").unwrap();
    fixture.input("a", "in");
    fixture.server.connect(&new_name, "a:in").unwrap();
    fixture.drain();

    let renamed = fixture.port(&new_name).id;
    let model = fixture.engine.model();
    assert_eq!(model.connection_count(), 2);
    assert!(model
        .connection_between(renamed, fixture.port("app:in_1").id)
        .is_some());
    assert!(model
        .connection_between(renamed, fixture.port("a:in").id)
        .is_some());
}

#[test]
fn test_same_name_rename_refreshes_display() {
    let mut fixture = TestFixture::new();
    let name = fixture.output("app", "out_1");
    fixture.server.set_alias(&name, "app:Lead").unwrap();
    fixture.drain();
    assert_eq!(fixture.port(&name).display_name, "Lead");
    fixture.calls();

    // the selected alias is still shown, nothing to redraw
    fixture.engine.apply_event(ServerEvent::PortRenamed {
        old: name.clone(),
        new: name.clone(),
    });
    assert!(fixture.calls().is_empty());
    assert_eq!(fixture.port(&name).display_name, "Lead");

    fixture.server.unset_alias(&name, "app:Lead").unwrap();
    fixture.engine.apply_event(ServerEvent::PortRenamed {
        old: name.clone(),
        new: name.clone(),
    });
    let port = fixture.port(&name);
    assert_eq!(port.display_name, "out_1");
    assert_eq!(port.id, PortId(1));
    assert_eq!(
        fixture.calls(),
        vec![CanvasCall::RenamePort {
            group_id: port.group_id,
            port_id: port.id,
            name: "out_1".into()
        }]
    );
}

#[test]
fn test_unregister_cascades_live_connection() {
    let mut fixture = TestFixture::with_app();
    fixture.server.connect("app:out_1", "app:in_1").unwrap();
    fixture.drain();
    fixture.calls();

    fixture.engine.apply_event(ServerEvent::PortUnregistered {
        name: "app:out_1".into(),
    });

    assert_eq!(
        fixture.calls(),
        vec![
            CanvasCall::DisconnectPorts {
                connection_id: ConnectionId(1)
            },
            CanvasCall::RemovePort {
                group_id: GroupId(1),
                port_id: PortId(1)
            },
        ]
    );
    let model = fixture.engine.model();
    assert_eq!(model.connection_count(), 0);
    assert!(model.port_by_name("app:out_1").is_none());
    assert_eq!(model.group_count(), 1);
}

#[test]
fn test_transport_view_survives_detach() {
    let mut fixture = TestFixture::new();
    fixture
        .engine
        .execute(EngineCommand::SetTransportView(TransportView::Bbt));
    assert_eq!(fixture.engine.status().transport_view, TransportView::Bbt);

    fixture.server.shutdown();
    fixture.drain();
    assert_eq!(fixture.engine.status().transport_view, TransportView::Bbt);
    assert_eq!(fixture.engine.status().transport_text(), "000|0|0000");

    fixture
        .engine
        .set_transport_view(TransportView::Bbt.next());
    assert_eq!(fixture.engine.status().transport_view, TransportView::Frames);
}

#[test]
fn test_status_events() {
    let mut fixture = TestFixture::new();
    assert!(fixture.engine.status().connected);
    assert_eq!(fixture.engine.status().sample_rate, 48_000);

    fixture.server.xrun();
    fixture.server.xrun();
    fixture.server.set_buffer_size(128);
    fixture.drain();
    assert_eq!(fixture.engine.status().xruns, 2);
    assert_eq!(fixture.engine.status().buffer_size, 128);

    fixture.server.set_sample_rate(44_100);
    fixture.drain();
    assert_eq!(fixture.engine.status().sample_rate, 44_100);
    assert_eq!(fixture.engine.status().xruns, 0);

    fixture.server.xrun();
    fixture.drain();
    fixture.engine.clear_xruns();
    assert_eq!(fixture.engine.status().xruns, 0);
}

#[test]
fn test_shutdown_clears_and_restarts_ids() {
    let mut fixture = TestFixture::with_app();
    fixture.server.shutdown();
    fixture.drain();

    assert!(!fixture.engine.is_attached());
    assert!(fixture.engine.model().is_empty());
    assert!(!fixture.engine.status().connected);
    assert_eq!(fixture.calls(), vec![CanvasCall::Clear]);

    let gesture = fixture.engine.handle_action(CanvasAction::PortsDisconnect {
        connection_id: ConnectionId(1),
    });
    assert_eq!(gesture, Err(EngineError::ServerUnavailable));

    let (tx, mut events) = event_channel(16);
    let server = LoopbackServer::new(tx);
    server
        .register_port(
            "fresh",
            "out",
            patchgraph::PortFlags::output(),
            patchgraph::MediaType::Audio,
        )
        .unwrap();
    fixture.engine.attach(server);
    fixture.engine.drain(&mut events);

    let port = fixture.engine.model().port_by_name("fresh:out").unwrap();
    assert_eq!(port.id, PortId(1));
    assert_eq!(port.group_id, GroupId(1));
}

#[test]
fn test_overflow_resyncs_graph() {
    let mut fixture = TestFixture::with_capacity(2);
    for i in 1..=5 {
        fixture.output("app", &format!("out_{}", i));
    }

    assert_eq!(fixture.drain(), 2);
    assert_eq!(fixture.engine.model().port_count(), 5);
    // ids keep growing across a resync
    assert_eq!(fixture.engine.model().group_id("app"), Some(GroupId(2)));
    assert_eq!(fixture.port("app:out_5").id, PortId(7));

    let calls = fixture.calls();
    let cleared = calls.iter().position(|c| *c == CanvasCall::Clear).unwrap();
    let added_after = calls[cleared..]
        .iter()
        .filter(|c| matches!(c, CanvasCall::AddPort { .. }))
        .count();
    assert_eq!(added_after, 5);
}

#[test]
fn test_attach_mirrors_existing_graph() {
    let (tx, mut events) = event_channel(64);
    let server = LoopbackServer::new(tx);
    server.seed_system().unwrap();
    server
        .connect("system:capture_1", "system:playback_1")
        .unwrap();

    let mut engine = Engine::new(RecordingCanvas::new(), EngineOptions::default());
    engine.attach(server.clone());
    assert_eq!(engine.model().port_count(), 6);
    assert_eq!(engine.model().connection_count(), 1);

    // queued notifications for what attach already mirrored are absorbed
    engine.drain(&mut events);
    assert_eq!(engine.model().port_count(), 6);
    assert_eq!(engine.model().connection_count(), 1);
    assert_eq!(engine.model().group_count(), 1);
}

#[tokio::test]
async fn test_run_loop_serves_commands() {
    let mut fixture = TestFixture::new();
    let server = fixture.server.clone();
    let (command_tx, mut command_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = async move {
        server
            .register_port(
                "app",
                "out_1",
                patchgraph::PortFlags::output(),
                patchgraph::MediaType::Audio,
            )
            .unwrap();
        server
            .register_port(
                "app",
                "in_1",
                patchgraph::PortFlags::input(),
                patchgraph::MediaType::Audio,
            )
            .unwrap();

        let (tx, rx) = oneshot::channel();
        command_tx.send(EngineCommand::Snapshot(tx)).await.unwrap();
        let snapshot = rx.await.unwrap();
        assert_eq!(snapshot.ports.len(), 2);

        let (tx, rx) = oneshot::channel();
        command_tx
            .send(EngineCommand::Gesture {
                action: CanvasAction::PortsConnect {
                    out_group: GroupId(1),
                    out_port: PortId(1),
                    in_group: GroupId(1),
                    in_port: PortId(2),
                },
                reply: Some(tx),
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(ActionReply::Requested));

        server.xrun();
        let (tx, rx) = oneshot::channel();
        command_tx.send(EngineCommand::Status(tx)).await.unwrap();
        let status = rx.await.unwrap();
        assert_eq!(status.xruns, 1);

        stop_tx.send(()).unwrap();
    };

    let run = fixture.engine.run(&mut fixture.events, &mut command_rx, async {
        let _ = stop_rx.await;
    });
    tokio::join!(run, driver);

    assert_eq!(fixture.engine.model().connection_count(), 1);
    assert!(fixture.engine.is_attached());
}
