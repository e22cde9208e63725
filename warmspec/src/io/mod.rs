//! Side-effecting adapters: filesystem, sockets, terminal output.

pub mod config;
pub mod history;
pub mod output;
pub mod server;
pub mod status_store;
pub mod watcher;
