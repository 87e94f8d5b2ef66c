//! Path resolution utilities.

use crate::error::ConfigError;
use crate::env;
use std::path::PathBuf;

/// Get the Sesame configuration directory (~/.config/sesame).
///
/// `SESAME_HOME` overrides the platform config directory.
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Some(home) = env::get_var(env::vars::SESAME_HOME) {
        return Ok(expand_tilde(&home));
    }

    let config = dirs::config_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine config directory".to_string())
    })?;
    Ok(config.join("sesame"))
}

/// Get the main config file path (~/.config/sesame/sesame.json5).
///
/// `SESAME_CONFIG` overrides the whole path.
pub fn config_file() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::get_var(env::vars::SESAME_CONFIG) {
        return Ok(expand_tilde(&path));
    }
    Ok(base_dir()?.join("sesame.json5"))
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/test");
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/sesame"), PathBuf::from("/etc/sesame"));
    }

    #[test]
    fn test_config_file_name() {
        if env::get_var(env::vars::SESAME_CONFIG).is_none() {
            let path = config_file().unwrap();
            assert!(path.ends_with("sesame.json5"));
        }
    }
}
