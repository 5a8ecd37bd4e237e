//! Real audio server backends
//!
//! Each backend implements [`crate::server::PatchServer`] and feeds the
//! engine's event queue from the server's own thread.

pub mod pipewire;

pub use self::pipewire::{PipeWireError, PipeWireServer};
