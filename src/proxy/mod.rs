// proxy module - multiplexing reverse proxy in front of the scanner backend

pub mod common;            // Wire schemas and response relaying
pub mod config;
pub mod error;
pub mod handlers;          // Intercepted API endpoints
pub mod registry;          // Target/watcher bookkeeping
pub mod security;
pub mod server;
pub mod upstream;          // Backend session client

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use registry::TargetRegistry;
pub use security::SharedCredential;
pub use server::{AppState, AxumServer};
pub use upstream::{Backend, BackendClient};
