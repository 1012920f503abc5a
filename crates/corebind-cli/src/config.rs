//! Reads and writes `~/.corebind/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use corebind_runtime::LogFormat;
use corebind_types::EngineConfig;

/// Persisted settings of the `corebind` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// `"compact"` or `"json"`; `COREBIND_LOG_FORMAT` wins when set.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    pub fn log_format(&self) -> LogFormat {
        if std::env::var_os("COREBIND_LOG_FORMAT").is_some() {
            return LogFormat::from_env();
        }
        self.log_format.parse().unwrap_or_default()
    }
}

/// Return the path to `~/.corebind/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".corebind").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `COREBIND_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `COREBIND_SERVICE_TIMEOUT_MS` | `engine.service_timeout_ms` |
/// | `COREBIND_CHANNEL_DEPTH` | `engine.command_channel_depth` |
/// | `COREBIND_FIFO_DEPTH` | `engine.default_fifo_depth` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("COREBIND_SERVICE_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.engine.service_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("COREBIND_CHANNEL_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.engine.command_channel_depth = depth;
    }
    if let Ok(v) = std::env::var("COREBIND_FIFO_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.engine.default_fifo_depth = depth;
    }
}

/// Save the config to disk, creating `~/.corebind/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.engine.dsp_processors = vec![1, 2, 3];
        cfg.log_format = "json".into();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.engine.dsp_processors, vec![1, 2, 3]);
        assert_eq!(loaded.log_format, "json");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\ncommand_channel_depth = 4\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.engine.command_channel_depth, 4);
        assert_eq!(loaded.engine.default_event_queue_depth, 8);
        assert_eq!(loaded.log_format, "compact");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "engine = 3").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_corebind_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".corebind"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    // One test owns every override variable so parallel tests never race
    // on the process environment.
    #[test]
    fn env_overrides_apply_and_skip_invalid_values() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("COREBIND_SERVICE_TIMEOUT_MS", "250");
            std::env::set_var("COREBIND_CHANNEL_DEPTH", "not-a-number");
            std::env::set_var("COREBIND_FIFO_DEPTH", "16");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.engine.service_timeout_ms, 250);
        assert_eq!(cfg.engine.command_channel_depth, 32);
        assert_eq!(cfg.engine.default_fifo_depth, 16);
        unsafe {
            std::env::remove_var("COREBIND_SERVICE_TIMEOUT_MS");
            std::env::remove_var("COREBIND_CHANNEL_DEPTH");
            std::env::remove_var("COREBIND_FIFO_DEPTH");
        }
    }

    #[test]
    fn log_format_falls_back_to_compact() {
        let cfg = Config {
            log_format: "yaml".into(),
            ..Config::default()
        };
        if std::env::var_os("COREBIND_LOG_FORMAT").is_none() {
            assert_eq!(cfg.log_format(), LogFormat::Compact);
        }
    }
}
