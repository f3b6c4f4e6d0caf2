pub mod config;
pub mod device_transport;
pub mod error;
pub mod http_client;
pub mod services;
pub mod types;

pub use services::sync::SyncController;
