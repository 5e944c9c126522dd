//! Control surface for the alarm scheduler: the in-process handle, the HTTP
//! server that exposes it, and a client for that server.

pub mod client;
pub mod handle;
pub mod server;

pub use client::AlarmClient;
pub use handle::{AlarmControl, AlarmStatus};
pub use server::{ControlServer, HistorySource, OperationResponse};
