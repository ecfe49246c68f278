//! invigil-net — Network collaborators for the exam session engine.
//!
//! Implements the `ExamBackend` trait over the exam server's REST surface
//! and the `SyncChannel` trait over a reconnecting WebSocket, plus
//! in-memory mocks for tests and simulated runs.

pub mod channel;
pub mod config;
pub mod http;
pub mod mock;
pub mod wire;

pub use channel::{ChannelConfig, WsSyncChannel};
pub use config::{load_config, load_config_from, NetConfig};
pub use http::HttpExamBackend;
pub use mock::{MockBackend, MockChannel};
