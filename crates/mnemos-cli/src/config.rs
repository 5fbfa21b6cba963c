//! Configuration Vault – reads/writes `~/.mnemos/config.toml`.

use mnemos_memory::{ReflectionConfig, RetryPolicy, StoreConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted user configuration stored in `~/.mnemos/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `memories.db` and `vectors.db`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Length of every embedding. Cannot change once the store exists.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Maximum number of reflections per run.
    #[serde(default = "default_cluster_count")]
    pub cluster_count: usize,

    /// Recent memories considered by a reflection run.
    #[serde(default = "default_load_window")]
    pub load_window: usize,

    #[serde(default = "default_summarizer_max_attempts")]
    pub summarizer_max_attempts: u32,

    /// First retry delay; doubles on each further retry.
    #[serde(default = "default_summarizer_backoff_ms")]
    pub summarizer_backoff_ms: u64,

    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// Hits returned by `/ask`.
    #[serde(default = "default_recall_k")]
    pub recall_k: usize,

    /// Background reflection interval. `0` disables the scheduler.
    #[serde(default)]
    pub reflect_interval_secs: u64,

    /// Base URL of the Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_caption_model")]
    pub caption_model: String,

    /// Base URL of the Whisper server used by `/audio`.
    #[serde(default = "default_whisper_url")]
    pub whisper_url: String,

    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
}

fn default_data_dir() -> PathBuf {
    mnemos_dir_for_home(&home_dir()).join("data")
}
fn default_embedding_dim() -> usize {
    384
}
fn default_cluster_count() -> usize {
    3
}
fn default_load_window() -> usize {
    100
}
fn default_summarizer_max_attempts() -> u32 {
    3
}
fn default_summarizer_backoff_ms() -> u64 {
    500
}
fn default_storage_timeout_ms() -> u64 {
    5000
}
fn default_recall_k() -> usize {
    5
}
fn default_ollama_url() -> String {
    mnemos_runtime::ollama::DEFAULT_BASE_URL.to_string()
}
fn default_summary_model() -> String {
    mnemos_runtime::summarizer::DEFAULT_SUMMARY_MODEL.to_string()
}
fn default_embedding_model() -> String {
    mnemos_runtime::embedder::DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_caption_model() -> String {
    mnemos_runtime::captioner::DEFAULT_CAPTION_MODEL.to_string()
}
fn default_whisper_url() -> String {
    mnemos_runtime::transcriber::DEFAULT_WHISPER_URL.to_string()
}
fn default_whisper_model() -> String {
    mnemos_runtime::transcriber::DEFAULT_WHISPER_MODEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dim: default_embedding_dim(),
            cluster_count: default_cluster_count(),
            load_window: default_load_window(),
            summarizer_max_attempts: default_summarizer_max_attempts(),
            summarizer_backoff_ms: default_summarizer_backoff_ms(),
            storage_timeout_ms: default_storage_timeout_ms(),
            recall_k: default_recall_k(),
            reflect_interval_secs: 0,
            ollama_url: default_ollama_url(),
            summary_model: default_summary_model(),
            embedding_model: default_embedding_model(),
            caption_model: default_caption_model(),
            whisper_url: default_whisper_url(),
            whisper_model: default_whisper_model(),
        }
    }
}

impl Config {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.data_dir.clone(),
            embedding_dim: self.embedding_dim,
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
        }
    }

    pub fn reflection_config(&self) -> ReflectionConfig {
        ReflectionConfig {
            cluster_count: self.cluster_count,
            load_window: self.load_window,
            retry: RetryPolicy {
                max_attempts: self.summarizer_max_attempts,
                initial_backoff: Duration::from_millis(self.summarizer_backoff_ms),
                ..RetryPolicy::default()
            },
            ..ReflectionConfig::default()
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn mnemos_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mnemos")
}

/// Return the path to `~/.mnemos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    mnemos_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MNEMOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MNEMOS_DATA_DIR` | `data_dir` |
/// | `MNEMOS_OLLAMA_URL` | `ollama_url` |
/// | `MNEMOS_SUMMARY_MODEL` | `summary_model` |
/// | `MNEMOS_EMBEDDING_MODEL` | `embedding_model` |
/// | `MNEMOS_WHISPER_URL` | `whisper_url` |
/// | `MNEMOS_CLUSTER_COUNT` | `cluster_count` (ignored unless a positive integer) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MNEMOS_DATA_DIR") {
        cfg.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("MNEMOS_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_SUMMARY_MODEL") {
        cfg.summary_model = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_WHISPER_URL") {
        cfg.whisper_url = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_CLUSTER_COUNT")
        && let Ok(k) = v.parse::<usize>()
        && k > 0
    {
        cfg.cluster_count = k;
    }
}

/// Save the config to disk, creating `~/.mnemos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
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
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            recall_k: 7,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        // Fields with env overrides are left out; other tests set those.
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.embedding_dim, 384);
        assert_eq!(loaded.recall_k, 7);
        assert_eq!(loaded.caption_model, "llava");
        assert_eq!(loaded.reflect_interval_secs, 0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("embedding_dim = 768\n").expect("parse");
        assert_eq!(cfg.embedding_dim, 768);
        assert_eq!(cfg.cluster_count, 3);
        assert_eq!(cfg.load_window, 100);
        assert_eq!(cfg.summarizer_max_attempts, 3);
        assert_eq!(cfg.ollama_url, "http://localhost:11434");
        assert_eq!(cfg.whisper_url, "http://localhost:8000");
        assert_eq!(cfg.whisper_model, "Systran/faster-whisper-base");
    }

    #[test]
    fn derived_store_and_reflection_configs() {
        let cfg = Config {
            cluster_count: 5,
            summarizer_backoff_ms: 250,
            storage_timeout_ms: 1000,
            ..Config::default()
        };
        let store = cfg.store_config();
        assert_eq!(store.embedding_dim, 384);
        assert_eq!(store.storage_timeout, Duration::from_secs(1));

        let reflection = cfg.reflection_config();
        assert_eq!(reflection.cluster_count, 5);
        assert_eq!(reflection.load_window, 100);
        assert_eq!(reflection.retry.max_attempts, 3);
        assert_eq!(reflection.retry.initial_backoff, Duration::from_millis(250));
    }

    #[test]
    fn config_path_points_to_mnemos_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".mnemos"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "embedding_dim = \"wide\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn apply_env_overrides_changes_ollama_url() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("MNEMOS_OLLAMA_URL", "http://gpu-box:11434") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ollama_url, "http://gpu-box:11434");
        unsafe { std::env::remove_var("MNEMOS_OLLAMA_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_models() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("MNEMOS_SUMMARY_MODEL", "mistral");
            std::env::set_var("MNEMOS_EMBEDDING_MODEL", "nomic-embed-text");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.summary_model, "mistral");
        assert_eq!(cfg.embedding_model, "nomic-embed-text");
        unsafe {
            std::env::remove_var("MNEMOS_SUMMARY_MODEL");
            std::env::remove_var("MNEMOS_EMBEDDING_MODEL");
        }
    }

    #[test]
    fn apply_env_overrides_changes_whisper_url() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("MNEMOS_WHISPER_URL", "http://gpu-box:9000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.whisper_url, "http://gpu-box:9000");
        unsafe { std::env::remove_var("MNEMOS_WHISPER_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_data_dir() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("MNEMOS_DATA_DIR", "/var/lib/mnemos") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/mnemos"));
        unsafe { std::env::remove_var("MNEMOS_DATA_DIR") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_cluster_count() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("MNEMOS_CLUSTER_COUNT", "zero") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cluster_count, 3);

        unsafe { std::env::set_var("MNEMOS_CLUSTER_COUNT", "0") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cluster_count, 3);

        unsafe { std::env::set_var("MNEMOS_CLUSTER_COUNT", "4") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cluster_count, 4);
        unsafe { std::env::remove_var("MNEMOS_CLUSTER_COUNT") };
    }
}
