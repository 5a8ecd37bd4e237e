use patchgraph::{
    event_channel, CanvasCall, Engine, EngineOptions, EventReceiver, LoopbackServer, MediaType,
    Port, PortFlags, RecordingCanvas,
};

pub type TestEngine = Engine<LoopbackServer, RecordingCanvas>;

/// A loopback server with an attached engine drawing onto a recording canvas
pub struct TestFixture {
    pub server: LoopbackServer,
    pub events: EventReceiver,
    pub engine: TestEngine,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, events) = event_channel(capacity);
        let server = LoopbackServer::new(tx);
        let mut engine = Engine::new(RecordingCanvas::new(), EngineOptions::default());
        engine.attach(server.clone());

        Self {
            server,
            events,
            engine,
        }
    }

    /// `app:out_1` and `app:in_1`, mirrored and with the canvas log cleared
    pub fn with_app() -> Self {
        let mut fixture = Self::new();
        fixture.output("app", "out_1");
        fixture.input("app", "in_1");
        fixture.drain();
        fixture.calls();
        fixture
    }

    pub fn output(&self, client: &str, short: &str) -> String {
        self.server
            .register_port(client, short, PortFlags::output(), MediaType::Audio)
            .expect("Failed to register output")
    }

    pub fn input(&self, client: &str, short: &str) -> String {
        self.server
            .register_port(client, short, PortFlags::input(), MediaType::Audio)
            .expect("Failed to register input")
    }

    pub fn drain(&mut self) -> usize {
        self.engine.drain(&mut self.events)
    }

    /// Canvas calls since the last check
    pub fn calls(&mut self) -> Vec<CanvasCall> {
        self.engine.canvas_mut().take()
    }

    pub fn port(&self, name: &str) -> Port {
        self.engine
            .model()
            .port_by_name(name)
            .cloned()
            .unwrap_or_else(|| panic!("{} not in model", name))
    }
}
