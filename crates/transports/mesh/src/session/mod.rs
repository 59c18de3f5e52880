//! Session orchestration: room lifecycle, peer map and application API

mod events;
mod payload;
#[allow(clippy::module_inception)]
mod session;

pub use events::SessionEvent;
pub use payload::Payload;
pub use session::{MeshSession, MeshStatus};
