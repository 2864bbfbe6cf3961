//! Domain layer for tydom-client.
//!
//! Pure types with no I/O: configuration, connection state and the error
//! vocabulary shared by the application and infrastructure layers.

pub mod config;
pub mod error;
pub mod state;

pub use config::{ClientConfig, ClientSettings, ConfigError, GatewayConfig, TimingConfig};
pub use error::{AuthError, ClientError, ConnectError, HandshakeError, RouterError, SendError};
pub use state::{AuthMode, ConnectionState, StartMode};
