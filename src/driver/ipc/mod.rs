//! Out-of-process driver
//!
//! `IpcDriver` talks to an `IpcWorker` (usually the `fts-worker` binary)
//! over a Unix socket using the frame format in [`protocol`].

mod client;
pub mod protocol;
mod server;

pub use client::IpcDriver;
pub use server::{serve_connection, IpcWorker};
