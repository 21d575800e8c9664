pub mod actor;
pub mod handle;
pub mod handlers;
pub mod writer;

pub use actor::{
    Disconnect, GetStats, HEARTBEAT_TIMEOUT_CLOSURE, RealtimeActor, RealtimeActorArgs,
    RealtimeEvent,
};
pub use handle::{ConnectionHandle, connect};
pub use handlers::*;
