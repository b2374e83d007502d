//! Default configuration values

pub struct WebSocketDefaults;

impl WebSocketDefaults {
    pub const IDLE_TIMEOUT_SECS: u64 = 60;
    pub const CLOSE_TIMEOUT_SECS: u64 = 5;
    pub const MAX_STRICT_BYTES: usize = 64 * 1024; // 64KB
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const OUTBOUND_BUFFER: usize = 1;
    pub const STREAM_BUFFER: usize = 8;
}
