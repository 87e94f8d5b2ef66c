//! Environment variable handling.

use std::env;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Environment variable names understood by Sesame.
pub mod vars {
    /// Sesame config directory override.
    pub const SESAME_HOME: &str = "SESAME_HOME";

    /// Sesame config file override.
    pub const SESAME_CONFIG: &str = "SESAME_CONFIG";

    /// Which bus to connect to (`session` or `system`).
    pub const SESAME_BUS: &str = "SESAME_BUS";

    /// D-Bus address to connect to instead of a standard bus.
    pub const SESAME_BUS_ADDRESS: &str = "SESAME_BUS_ADDRESS";

    /// Bus name of the secret service to talk to.
    pub const SESAME_BUS_NAME: &str = "SESAME_BUS_NAME";

    /// Session algorithm preference (`auto`, `plain`, `dh-aes`).
    pub const SESAME_SESSION_ALGORITHM: &str = "SESAME_SESSION_ALGORITHM";

    /// Parent window handle passed to prompts.
    pub const SESAME_WINDOW_ID: &str = "SESAME_WINDOW_ID";

    /// Log level.
    pub const SESAME_LOG_LEVEL: &str = "SESAME_LOG_LEVEL";
}
