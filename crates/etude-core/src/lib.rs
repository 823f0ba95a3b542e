// src/lib.rs
#[cfg(not(target_os = "linux"))]
compile_error!("etude-core drives epoll directly and only builds on Linux");

pub mod config;
pub mod conn;
pub mod cursor;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pool;
pub mod reactor;
pub mod resource;
pub mod server;
pub mod syscalls;
pub mod table;
pub mod transport;

// Re-exports for users
pub use config::Config;
pub use error::{EtudeError, EtudeResult};
pub use server::{Server, ShutdownHandle};
