//! CLI configuration.
//!
//! An optional `tarn.toml` in the working directory or under
//! `~/.config/tarn/` sets module search paths and REPL history
//! behaviour. A missing file means defaults; a malformed file is
//! reported and ignored.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directories searched by `import`, tried in order after the
    /// working directory.
    pub module_paths: Vec<PathBuf>,
    /// Where REPL history persists. Defaults to `~/.tarn_history`.
    pub history_file: Option<PathBuf>,
    /// Entries kept in REPL history.
    pub history_size: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            module_paths: Vec::new(),
            history_file: None,
            history_size: 500,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load from the working directory, then the user config directory.
    pub fn load() -> Config {
        let mut candidates = vec![PathBuf::from("tarn.toml")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(Path::new(&home).join(".config/tarn/tarn.toml"));
        }

        for path in candidates {
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            match Config::parse(&text) {
                Ok(config) => {
                    tracing::debug!(path = %path.display(), "loaded config");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config");
                }
            }
        }

        Config::default()
    }

    pub fn history_path(&self) -> PathBuf {
        if let Some(path) = &self.history_file {
            return path.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => Path::new(&home).join(".tarn_history"),
            None => PathBuf::from(".tarn_history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let c = Config::parse("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.history_size, 500);
    }

    #[test]
    fn parses_fields() {
        let c = Config::parse(
            r#"
            module_paths = ["lib", "/usr/share/tarn"]
            history_file = "/tmp/hist"
            history_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(c.module_paths.len(), 2);
        assert_eq!(c.history_file.as_deref(), Some(Path::new("/tmp/hist")));
        assert_eq!(c.history_size, 50);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Config::parse("modulepaths = []").is_err());
    }
}
