//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Bytes per configured megabyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML rendering error
    Render(toml::ser::Error),
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Render(e) => write!(f, "Failed to render config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Render(e)
    }
}

/// Discord webhook settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscordConfig {
    /// Webhook URL clips are posted to (empty = not configured)
    #[serde(default)]
    pub webhook_url: String,
    /// Optional message posted alongside every clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// HTTP request timeout in seconds (default 30)
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upload_timeout_secs() -> u64 {
    30
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            message: None,
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

/// Folder watching settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Custom folders to watch
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Also watch the Medal TV clip folder
    #[serde(default)]
    pub use_medal_path: bool,
    /// Also watch the NVIDIA overlay capture folder
    #[serde(default)]
    pub use_nvidia_path: bool,
    /// Watch subfolders recursively
    #[serde(default)]
    pub recursive: bool,
    /// Seconds to wait for a new file to finish writing (default 2)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Folder poll interval in milliseconds (default 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cap on subdirectories walked per root when recursive (default 10000)
    #[serde(default = "default_max_recursive_dirs")]
    pub max_recursive_dirs: usize,
}

fn default_check_interval_secs() -> u64 {
    2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_recursive_dirs() -> usize {
    10_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            use_medal_path: false,
            use_nvidia_path: false,
            recursive: false,
            check_interval_secs: default_check_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_recursive_dirs: default_max_recursive_dirs(),
        }
    }
}

/// Compression pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionConfig {
    /// Upload size ceiling in megabytes (default 10)
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Send only the extracted audio track
    #[serde(default)]
    pub audio_only: bool,
    /// Transcoder executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Media inspection executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Kill an encoder invocation after this many seconds (unbounded if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_timeout_secs: Option<u64>,
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            audio_only: false,
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            encoder_timeout_secs: None,
        }
    }
}

/// Relay job scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelayConfig {
    /// Maximum files processed at once (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Number of logical cores (auto-detected if None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_cores: Option<u32>,
    /// Where statistics are persisted (platform data dir if None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CLIPRELAY_WEBHOOK_URL -> discord.webhook_url
    /// - CLIPRELAY_MAX_FILE_SIZE_MB -> compression.max_file_size_mb
    /// - CLIPRELAY_WATCH_PATHS -> watch.paths (platform path-list syntax)
    /// - CLIPRELAY_RECURSIVE -> watch.recursive
    /// - CLIPRELAY_AUDIO_ONLY -> compression.audio_only
    /// - CLIPRELAY_ENCODER_TIMEOUT_SECS -> compression.encoder_timeout_secs
    /// - CLIPRELAY_MAX_CONCURRENT_JOBS -> relay.max_concurrent_jobs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CLIPRELAY_WEBHOOK_URL") {
            self.discord.webhook_url = val.trim().to_string();
        }

        if let Ok(val) = env::var("CLIPRELAY_MAX_FILE_SIZE_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                self.compression.max_file_size_mb = mb;
            }
        }

        if let Some(val) = env::var_os("CLIPRELAY_WATCH_PATHS") {
            let paths: Vec<PathBuf> = env::split_paths(&val)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                self.watch.paths = paths;
            }
        }

        if let Ok(val) = env::var("CLIPRELAY_RECURSIVE") {
            if let Some(flag) = parse_bool(&val) {
                self.watch.recursive = flag;
            }
        }

        if let Ok(val) = env::var("CLIPRELAY_AUDIO_ONLY") {
            if let Some(flag) = parse_bool(&val) {
                self.compression.audio_only = flag;
            }
        }

        if let Ok(val) = env::var("CLIPRELAY_ENCODER_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                // 0 means "no bound", same as leaving it unset
                self.compression.encoder_timeout_secs = (secs > 0).then_some(secs);
            }
        }

        if let Ok(val) = env::var("CLIPRELAY_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.relay.max_concurrent_jobs = jobs;
            }
        }
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression.max_file_size_mb == 0 {
            return Err(ConfigError::Invalid(
                "compression.max_file_size_mb must be greater than 0".to_string(),
            ));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The upload ceiling in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.compression.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests must not interleave
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("CLIPRELAY_WEBHOOK_URL");
        env::remove_var("CLIPRELAY_MAX_FILE_SIZE_MB");
        env::remove_var("CLIPRELAY_WATCH_PATHS");
        env::remove_var("CLIPRELAY_RECURSIVE");
        env::remove_var("CLIPRELAY_AUDIO_ONLY");
        env::remove_var("CLIPRELAY_ENCODER_TIMEOUT_SECS");
        env::remove_var("CLIPRELAY_MAX_CONCURRENT_JOBS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            max_mb in 1u64..500,
            recursive in proptest::bool::ANY,
            audio_only in proptest::bool::ANY,
            check_interval in 0u64..60,
            max_jobs in 0u32..16,
            timeout in proptest::option::of(1u64..3600),
        ) {
            let toml_str = format!(
                r#"
[discord]
webhook_url = "https://discord.com/api/webhooks/1/abc"

[watch]
paths = ["/clips"]
recursive = {}
check_interval_secs = {}

[compression]
max_file_size_mb = {}
audio_only = {}
{}

[relay]
max_concurrent_jobs = {}
"#,
                recursive,
                check_interval,
                max_mb,
                audio_only,
                timeout.map(|t| format!("encoder_timeout_secs = {}", t)).unwrap_or_default(),
                max_jobs,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.discord.webhook_url.as_str(), "https://discord.com/api/webhooks/1/abc");
            prop_assert_eq!(config.watch.paths.clone(), vec![PathBuf::from("/clips")]);
            prop_assert_eq!(config.watch.recursive, recursive);
            prop_assert_eq!(config.watch.check_interval_secs, check_interval);
            prop_assert_eq!(config.compression.max_file_size_mb, max_mb);
            prop_assert_eq!(config.compression.audio_only, audio_only);
            prop_assert_eq!(config.compression.encoder_timeout_secs, timeout);
            prop_assert_eq!(config.relay.max_concurrent_jobs, max_jobs);
            prop_assert_eq!(config.max_file_size_bytes(), max_mb * 1024 * 1024);
        }

        #[test]
        fn prop_env_overrides_max_file_size(
            initial_mb in 1u64..100,
            override_mb in 1u64..500,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[compression]\nmax_file_size_mb = {}\n", initial_mb);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CLIPRELAY_MAX_FILE_SIZE_MB", override_mb.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.compression.max_file_size_mb, override_mb);
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[relay]\nmax_concurrent_jobs = {}\n", initial_jobs);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CLIPRELAY_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.relay.max_concurrent_jobs, override_jobs);
        }

        #[test]
        fn prop_env_overrides_recursive(
            initial in proptest::bool::ANY,
            overridden in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[watch]\nrecursive = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CLIPRELAY_RECURSIVE", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.watch.recursive, overridden);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.discord.webhook_url, "");
        assert_eq!(config.discord.timeout_secs, 30);
        assert!(config.watch.paths.is_empty());
        assert_eq!(config.watch.check_interval_secs, 2);
        assert_eq!(config.watch.poll_interval_ms, 1000);
        assert_eq!(config.watch.max_recursive_dirs, 10_000);
        assert_eq!(config.compression.max_file_size_mb, 10);
        assert_eq!(config.max_file_size_bytes(), 10_485_760);
        assert_eq!(config.compression.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.compression.encoder_timeout_secs, None);
        assert_eq!(config.relay.max_concurrent_jobs, 0);
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = Config::parse_toml("[compression]\nmax_file_size_mb = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_file_size_mb"));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = Config::parse_toml("[watch]\npoll_interval_ms = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_watch_paths_split() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let joined = env::join_paths([PathBuf::from("/a"), PathBuf::from("/b")]).unwrap();
        env::set_var("CLIPRELAY_WATCH_PATHS", &joined);
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.watch.paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_env_invalid_value_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        env::set_var("CLIPRELAY_MAX_FILE_SIZE_MB", "lots");
        env::set_var("CLIPRELAY_AUDIO_ONLY", "maybe");
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.compression.max_file_size_mb, 10);
        assert!(!config.compression.audio_only);
    }

    #[test]
    fn test_env_zero_timeout_means_unbounded() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[compression]\nencoder_timeout_secs = 60\n").unwrap();
        env::set_var("CLIPRELAY_ENCODER_TIMEOUT_SECS", "0");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.compression.encoder_timeout_secs, None);
    }

    #[test]
    fn test_default_config_renders_and_reparses() {
        let config = Config::default();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = Config::parse_toml(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }
}
