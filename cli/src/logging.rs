//! Tracing initialisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Line format written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The `log` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target not listed in `targets`.
    pub level: String,
    /// Per-crate levels, keyed by crate name (`coldchain-evm` or `coldchain_evm`).
    pub targets: BTreeMap<String, String>,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            targets: BTreeMap::new(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Raise every coldchain crate to `debug`.
    pub fn verbose(&mut self) {
        for target in ["coldchain_core", "coldchain_evm", "coldchain"] {
            self.targets.insert(target.into(), "debug".into());
        }
    }

    /// `EnvFilter` directives, e.g. `"info,coldchain_evm=debug"`.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{}={level}", target.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `config`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stderr keeps `--json` output on stdout parseable.
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_list_targets_in_order() {
        let mut cfg = LogConfig::default();
        cfg.targets.insert("coldchain-evm".into(), "debug".into());
        cfg.targets.insert("coldchain-core".into(), "warn".into());
        assert_eq!(cfg.directives(), "info,coldchain_core=warn,coldchain_evm=debug");
    }

    #[test]
    fn verbose_raises_own_crates() {
        let mut cfg = LogConfig::default();
        cfg.verbose();
        assert_eq!(
            cfg.directives(),
            "info,coldchain=debug,coldchain_core=debug,coldchain_evm=debug"
        );
    }

    #[test]
    fn partial_section_uses_defaults() {
        let cfg: LogConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.targets.is_empty());
    }
}
