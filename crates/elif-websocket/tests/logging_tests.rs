//! Global subscriber installation; kept in its own test binary

use elif_websocket::{init_logging, LoggingConfig};

#[test]
fn test_logging_installs_once() {
    let config = LoggingConfig::test().with_env_filter("elif_websocket=warn");

    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}
