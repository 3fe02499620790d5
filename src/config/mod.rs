mod settings;

pub use settings::{BacklogConfig, GatewayConfig, Settings};
