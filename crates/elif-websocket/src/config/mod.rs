pub mod defaults;
pub mod websocket_config;

pub use defaults::WebSocketDefaults;
pub use websocket_config::WebSocketConfig;
