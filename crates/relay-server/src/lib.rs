//! HTTP surface of the Copilot relay: auth endpoints, usage reporting,
//! client bootstrap and the data-plane proxy.

pub mod bundle;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod proxy;
pub mod server;
pub mod setup;
pub mod state;

pub use config::{Cli, ServerConfig};
pub use error::AppError;
pub use server::{app_config, run};
pub use state::AppState;
