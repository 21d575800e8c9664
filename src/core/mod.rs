pub mod circular_buffer;
pub mod config;
pub mod envelope;
pub mod frame;
pub mod health;
pub mod heartbeat;
pub mod reconnect;
pub mod types;

pub use circular_buffer::*;
pub use config::*;
pub use envelope::*;
pub use frame::*;
pub use health::*;
pub use heartbeat::*;
pub use reconnect::*;
pub use types::*;
