//! Extension host configuration loaded from `exthost.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use exthost_rpc::{JsonlTelemetry, NullTelemetry, RpcOptions, TelemetryService};
use serde::Deserialize;
use tracing::warn;

pub const CONFIG_FILES: &[&str] = &["exthost.toml", ".exthost.toml"];

/// Set to `1` or `true` to log every RPC message.
pub const LOG_RPC_ENV: &str = "EXTHOST_LOG_RPC";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory the configuration was loaded for.
    pub root: PathBuf,
    /// Config file path (if found).
    pub config_path: Option<PathBuf>,
    pub rpc: RpcSettings,
    pub host: HostSettings,
    /// Telemetry configuration (opt-in).
    pub telemetry: TelemetryConfig,
    pub tree: TreeSettings,
}

#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Log every message exchanged with the host.
    pub log_communication: bool,
    /// Probability that a channel carries the telemetry logger.
    pub telemetry_sample_rate: f64,
    pub unresponsive_after: Duration,
    pub responsiveness_check: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            log_communication: false,
            telemetry_sample_rate: 0.0005,
            unresponsive_after: Duration::from_millis(3000),
            responsiveness_check: Duration::from_millis(1000),
        }
    }
}

impl RpcSettings {
    #[must_use]
    pub fn options(&self) -> RpcOptions {
        RpcOptions {
            unresponsive_after: self.unresponsive_after,
            responsiveness_check: self.responsiveness_check,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub startup_warning: Duration,
    pub handshake_timeout: Duration,
    pub terminate_grace: Duration,
    /// Interval of the "waiting..." log line during authority resolution.
    pub resolve_heartbeat: Duration,
    pub latency_probe_bytes: usize,
    pub latency_probe_rounds: u32,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            startup_warning: Duration::from_millis(10_000),
            handshake_timeout: Duration::from_millis(60_000),
            terminate_grace: Duration::from_millis(10_000),
            resolve_heartbeat: Duration::from_millis(1000),
            latency_probe_bytes: 10 * 1024 * 1024,
            latency_probe_rounds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub flush_every: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            flush_every: 25,
        }
    }
}

impl TelemetryConfig {
    fn from_section(root: &Path, section: TelemetrySection) -> Self {
        let enabled = section.enabled.unwrap_or(false);
        let path = section.path.map(|path| resolve_path(root, &path));
        let path = if enabled {
            Some(path.unwrap_or_else(|| resolve_path(root, ".exthost/telemetry.jsonl")))
        } else {
            path
        };
        TelemetryConfig {
            enabled,
            path,
            flush_every: section.flush_every.unwrap_or(25),
        }
    }

    /// Telemetry sink for this configuration.
    #[must_use]
    pub fn service(&self) -> Arc<dyn TelemetryService> {
        match (&self.path, self.enabled) {
            (Some(path), true) => Arc::new(JsonlTelemetry::new(path.clone(), self.flush_every)),
            _ => Arc::new(NullTelemetry),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeSettings {
    pub refresh_debounce: Duration,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            refresh_debounce: Duration::from_millis(200),
        }
    }
}

impl ManagerConfig {
    /// Load configuration for a root directory, honouring `EXTHOST_LOG_RPC`.
    pub fn load(root: &Path) -> Self {
        let config_path = find_config_file(root);
        let mut config = match config_path.clone() {
            None => ManagerConfig::base(root, None),
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(contents) => ManagerConfig::from_contents(root, config_path, &contents),
                Err(err) => {
                    warn!("Failed to read exthost config at {}: {err}", path.display());
                    ManagerConfig::base(root, config_path)
                }
            },
        };
        if std::env::var(LOG_RPC_ENV).is_ok_and(|value| value == "1" || value == "true") {
            config.rpc.log_communication = true;
        }
        config
    }

    pub fn from_contents(root: &Path, config_path: Option<PathBuf>, contents: &str) -> Self {
        let mut config = ManagerConfig::base(root, config_path);
        let parsed: ConfigFile = match toml::from_str(contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                if let Some(path) = &config.config_path {
                    warn!(
                        "Failed to parse exthost config at {}: {err}",
                        path.display()
                    );
                } else {
                    warn!("Failed to parse exthost config: {err}");
                }
                return config;
            }
        };

        let rpc = parsed.rpc;
        let defaults = RpcSettings::default();
        config.rpc = RpcSettings {
            log_communication: rpc.log_communication.unwrap_or(defaults.log_communication),
            telemetry_sample_rate: rpc
                .telemetry_sample_rate
                .unwrap_or(defaults.telemetry_sample_rate)
                .clamp(0.0, 1.0),
            unresponsive_after: millis_or(rpc.unresponsive_after_ms, defaults.unresponsive_after),
            responsiveness_check: millis_or(
                rpc.responsiveness_check_ms,
                defaults.responsiveness_check,
            ),
        };

        let host = parsed.host;
        let defaults = HostSettings::default();
        config.host = HostSettings {
            startup_warning: millis_or(host.startup_warning_ms, defaults.startup_warning),
            handshake_timeout: millis_or(host.handshake_timeout_ms, defaults.handshake_timeout),
            terminate_grace: millis_or(host.terminate_grace_ms, defaults.terminate_grace),
            resolve_heartbeat: millis_or(host.resolve_heartbeat_ms, defaults.resolve_heartbeat),
            latency_probe_bytes: host
                .latency_probe_bytes
                .unwrap_or(defaults.latency_probe_bytes),
            latency_probe_rounds: host
                .latency_probe_rounds
                .unwrap_or(defaults.latency_probe_rounds)
                .max(1),
        };

        config.telemetry = TelemetryConfig::from_section(root, parsed.telemetry);
        config.tree = TreeSettings {
            refresh_debounce: millis_or(
                parsed.tree.refresh_debounce_ms,
                TreeSettings::default().refresh_debounce,
            ),
        };
        config
    }

    fn base(root: &Path, config_path: Option<PathBuf>) -> Self {
        Self {
            root: root.to_path_buf(),
            config_path,
            rpc: RpcSettings::default(),
            host: HostSettings::default(),
            telemetry: TelemetryConfig::default(),
            tree: TreeSettings::default(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::base(Path::new("."), None)
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

pub(crate) fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

fn resolve_path(root: &Path, entry: &str) -> PathBuf {
    let path = PathBuf::from(entry);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    rpc: RpcSection,
    #[serde(default)]
    host: HostSection,
    #[serde(default)]
    telemetry: TelemetrySection,
    #[serde(default)]
    tree: TreeSection,
}

#[derive(Debug, Default, Deserialize)]
struct RpcSection {
    log_communication: Option<bool>,
    telemetry_sample_rate: Option<f64>,
    unresponsive_after_ms: Option<u64>,
    responsiveness_check_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HostSection {
    startup_warning_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    terminate_grace_ms: Option<u64>,
    resolve_heartbeat_ms: Option<u64>,
    latency_probe_bytes: Option<usize>,
    latency_probe_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TelemetrySection {
    enabled: Option<bool>,
    path: Option<String>,
    flush_every: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TreeSection {
    refresh_debounce_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{stamp}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn loads_sections_and_keeps_defaults_for_missing_keys() {
        let root = temp_dir("exthost-config");
        fs::write(
            root.join("exthost.toml"),
            r#"
[rpc]
telemetry_sample_rate = 0.25
unresponsive_after_ms = 5000

[host]
latency_probe_rounds = 3

[telemetry]
enabled = true

[tree]
refresh_debounce_ms = 50
"#,
        )
        .expect("write config");

        let config = ManagerConfig::load(&root);
        assert_eq!(config.config_path, Some(root.join("exthost.toml")));
        assert!((config.rpc.telemetry_sample_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.rpc.unresponsive_after, Duration::from_secs(5));
        assert_eq!(config.rpc.responsiveness_check, Duration::from_secs(1));
        assert_eq!(config.host.latency_probe_rounds, 3);
        assert_eq!(config.host.latency_probe_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.telemetry.path,
            Some(root.join(".exthost/telemetry.jsonl"))
        );
        assert_eq!(config.tree.refresh_debounce, Duration::from_millis(50));

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let config = ManagerConfig::from_contents(Path::new("/tmp"), None, "[rpc\nbroken");
        assert!(!config.rpc.log_communication);
        assert_eq!(config.host.startup_warning, Duration::from_secs(10));
        assert_eq!(config.tree.refresh_debounce, Duration::from_millis(200));
    }
}
