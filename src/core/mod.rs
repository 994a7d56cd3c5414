pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod probe;
pub mod progress;
pub mod reaper;
pub mod results;
pub mod runtime;
pub mod session;
pub mod store;
