pub mod connection;
pub mod settings;

pub use connection::{ConfigError, ConnectionConfig};
pub use settings::Settings;
