//! Gather configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but holds values the engine cannot run with
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
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

fn default_sleep_secs() -> f64 {
    0.5
}

/// Input configuration for a gather engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatherConfig {
    /// Paths to watch, one independent poll loop each
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Fail at startup if any path is missing
    #[serde(default)]
    pub must_exist: bool,
    /// Keep polling after the first cycle
    #[serde(default)]
    pub watch: bool,
    /// Pause between two polls of the same path, in seconds (default 0.5)
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: f64,
    /// Stop a path after this many successful loads
    #[serde(default)]
    pub max_images_per_path: Option<u64>,
    /// Stop a path once this many seconds have passed since its first poll
    #[serde(default)]
    pub max_seconds_per_path: Option<f64>,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            must_exist: false,
            watch: false,
            sleep_secs: default_sleep_secs(),
            max_images_per_path: None,
            max_seconds_per_path: None,
        }
    }
}

impl GatherConfig {
    /// Configuration for a set of paths with every other field defaulted
    pub fn for_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    ///
    /// Missing optional fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatherConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - GATHER_WATCH -> watch
    /// - GATHER_MUST_EXIST -> must_exist
    /// - GATHER_SLEEP_SECS -> sleep_secs
    /// - GATHER_MAX_IMAGES_PER_PATH -> max_images_per_path
    /// - GATHER_MAX_SECONDS_PER_PATH -> max_seconds_per_path
    pub fn apply_env_overrides(&mut self) {
        if let Some(watch) = env_flag("GATHER_WATCH") {
            self.watch = watch;
        }

        if let Some(must_exist) = env_flag("GATHER_MUST_EXIST") {
            self.must_exist = must_exist;
        }

        if let Ok(val) = env::var("GATHER_SLEEP_SECS") {
            if let Ok(secs) = val.parse::<f64>() {
                self.sleep_secs = secs;
            }
        }

        if let Ok(val) = env::var("GATHER_MAX_IMAGES_PER_PATH") {
            if let Ok(max) = val.parse::<u64>() {
                self.max_images_per_path = Some(max);
            }
        }

        if let Ok(val) = env::var("GATHER_MAX_SECONDS_PER_PATH") {
            if let Ok(secs) = val.parse::<f64>() {
                self.max_seconds_per_path = Some(secs);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check that the configuration describes a runnable engine.
    ///
    /// Path existence is not checked here; that belongs to engine startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::Invalid("at least one path is required".into()));
        }

        if !self.sleep_secs.is_finite() || self.sleep_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sleep_secs must be a non-negative number, got {}",
                self.sleep_secs
            )));
        }

        if self.max_images_per_path == Some(0) {
            return Err(ConfigError::Invalid(
                "max_images_per_path must be at least 1".into(),
            ));
        }

        if let Some(secs) = self.max_seconds_per_path {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "max_seconds_per_path must be a positive number, got {}",
                    secs
                )));
            }
        }

        Ok(())
    }

    /// Pause between polls of one path
    ///
    /// Call after [`GatherConfig::validate`]; invalid values collapse to zero.
    pub fn sleep_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep_secs).unwrap_or(Duration::ZERO)
    }

    /// Per-path wall-clock bound, if configured
    pub fn max_duration_per_path(&self) -> Option<Duration> {
        self.max_seconds_per_path
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Read a boolean environment flag.
///
/// Accepts "true", "1", "yes" as true; "false", "0", "no" as false. Anything else is ignored.
fn env_flag(name: &str) -> Option<bool> {
    let val = env::var(name).ok()?;
    match val.to_lowercase().as_str() {
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

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("GATHER_WATCH");
        env::remove_var("GATHER_MUST_EXIST");
        env::remove_var("GATHER_SLEEP_SECS");
        env::remove_var("GATHER_MAX_IMAGES_PER_PATH");
        env::remove_var("GATHER_MAX_SECONDS_PER_PATH");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Every field written to TOML comes back unchanged.
        #[test]
        fn prop_config_parses_all_fields(
            names in proptest::collection::vec("[a-z]{1,8}\\.png", 1..4),
            must_exist in proptest::bool::ANY,
            watch in proptest::bool::ANY,
            sleep_secs in 0.0f64..10.0,
            max_images in proptest::option::of(1u64..1000),
            max_seconds in proptest::option::of(0.1f64..3600.0),
        ) {
            let paths = names
                .iter()
                .map(|n| format!("\"/images/{}\"", n))
                .collect::<Vec<_>>()
                .join(", ");
            let toml_str = format!(
                r#"
paths = [{}]
must_exist = {}
watch = {}
sleep_secs = {:?}
{}
{}
"#,
                paths,
                must_exist,
                watch,
                sleep_secs,
                max_images.map(|n| format!("max_images_per_path = {}", n)).unwrap_or_default(),
                max_seconds.map(|s| format!("max_seconds_per_path = {:?}", s)).unwrap_or_default(),
            );

            let config = GatherConfig::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.paths.len(), names.len());
            for (path, name) in config.paths.iter().zip(&names) {
                prop_assert_eq!(path, &PathBuf::from(format!("/images/{}", name)));
            }
            prop_assert_eq!(config.must_exist, must_exist);
            prop_assert_eq!(config.watch, watch);
            prop_assert!((config.sleep_secs - sleep_secs).abs() < 1e-9);
            prop_assert_eq!(config.max_images_per_path, max_images);
            match (config.max_seconds_per_path, max_seconds) {
                (Some(a), Some(b)) => prop_assert!((a - b).abs() < 1e-9),
                (a, b) => prop_assert_eq!(a, b),
            }
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_env_overrides_watch(
            initial in proptest::bool::ANY,
            override_watch in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = GatherConfig::parse_toml(&format!("watch = {}", initial))
                .expect("Valid TOML");

            env::set_var("GATHER_WATCH", override_watch.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.watch, override_watch);
        }

        #[test]
        fn prop_env_overrides_sleep_secs(
            initial in 0.0f64..5.0,
            override_secs in 0.0f64..5.0,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = GatherConfig::parse_toml(&format!("sleep_secs = {:?}", initial))
                .expect("Valid TOML");

            env::set_var("GATHER_SLEEP_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert!((config.sleep_secs - override_secs).abs() < 1e-9);
        }

        #[test]
        fn prop_env_overrides_bounds(
            override_images in 1u64..10_000,
            override_seconds in 0.5f64..600.0,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = GatherConfig::parse_toml("").expect("Valid TOML");

            env::set_var("GATHER_MAX_IMAGES_PER_PATH", override_images.to_string());
            env::set_var("GATHER_MAX_SECONDS_PER_PATH", override_seconds.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.max_images_per_path, Some(override_images));
            let secs = config.max_seconds_per_path.expect("override applied");
            prop_assert!((secs - override_seconds).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatherConfig::parse_toml("").expect("Empty TOML should parse");

        assert!(config.paths.is_empty());
        assert!(!config.must_exist);
        assert!(!config.watch);
        assert!((config.sleep_secs - 0.5).abs() < 1e-9);
        assert_eq!(config.max_images_per_path, None);
        assert_eq!(config.max_seconds_per_path, None);
        assert_eq!(config, GatherConfig::default());
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = GatherConfig::for_paths(["a.png"]);
        env::set_var("GATHER_WATCH", "maybe");
        env::set_var("GATHER_SLEEP_SECS", "soon");
        env::set_var("GATHER_MAX_IMAGES_PER_PATH", "-3");
        config.apply_env_overrides();
        clear_env_vars();

        assert!(!config.watch);
        assert!((config.sleep_secs - 0.5).abs() < 1e-9);
        assert_eq!(config.max_images_per_path, None);
    }

    #[test]
    fn test_env_flag_accepts_yes_and_zero() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = GatherConfig::for_paths(["a.png"]);
        env::set_var("GATHER_MUST_EXIST", "YES");
        env::set_var("GATHER_WATCH", "0");
        config.watch = true;
        config.apply_env_overrides();
        clear_env_vars();

        assert!(config.must_exist);
        assert!(!config.watch);
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let err = GatherConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("at least one path"));
    }

    #[test]
    fn test_validate_rejects_bad_sleep() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let config = GatherConfig {
                sleep_secs: bad,
                ..GatherConfig::for_paths(["a.png"])
            };
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let config = GatherConfig {
            max_images_per_path: Some(0),
            ..GatherConfig::for_paths(["a.png"])
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = GatherConfig {
            max_seconds_per_path: Some(0.0),
            ..GatherConfig::for_paths(["a.png"])
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_durations() {
        let config = GatherConfig {
            sleep_secs: 0.25,
            max_seconds_per_path: Some(2.5),
            ..GatherConfig::for_paths(["a.png"])
        };
        assert_eq!(config.sleep_interval(), Duration::from_millis(250));
        assert_eq!(config.max_duration_per_path(), Some(Duration::from_millis(2500)));
        assert_eq!(GatherConfig::default().max_duration_per_path(), None);
    }

    #[test]
    fn test_unknown_field_type_is_parse_error() {
        let err = GatherConfig::parse_toml("watch = \"often\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
