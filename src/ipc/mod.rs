// IPC layer: local-socket transport, newline-delimited JSON framing, and
// request dispatch into the host-owned context.

pub mod bridge;
pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use bridge::{HostTask, UiBridge};
pub use client::IpcClient;
pub use dispatch::Dispatcher;
pub use protocol::{ErrorCode, Request, Response};
pub use server::{ConnectionId, IpcServer, IpcServerHandle};
