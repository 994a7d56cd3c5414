pub mod mcp;
pub mod monitoring;
pub mod results;
pub mod sessions;
pub mod sessions_v2;
