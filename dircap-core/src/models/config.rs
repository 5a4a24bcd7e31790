use std::path::PathBuf;
use std::time::Duration;

use crate::models::error::CaptureError;

/// Environment value naming the file captured audio is written to.
pub const OUTPUT_PATH_VAR: &str = "dircap_recpath";

/// Environment value holding the per-write throttle delay in milliseconds.
pub const DELAY_VAR: &str = "dircap_delay";

/// Environment value holding the engine's log filter.
pub const LOG_FILTER_VAR: &str = "dircap_log";

/// Configuration handed to the interception engine by the injector.
///
/// The injector sets both values in the target's environment right before
/// the engine module is loaded, so the engine reads them once at load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Destination of the captured container. `None` disables capture while
    /// keeping the hooks in place.
    pub output_path: Option<PathBuf>,

    /// Pause after every captured write. Zero means no throttling.
    pub throttle: Duration,
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name).map(|v| v.to_string_lossy().into_owned()))
    }

    /// Build the configuration from an arbitrary name -> value lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let output_path = lookup(OUTPUT_PATH_VAR)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let throttle = lookup(DELAY_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);

        Self {
            output_path,
            throttle,
        }
    }

    /// Throttle delay, if one is configured.
    pub fn throttle(&self) -> Option<Duration> {
        (!self.throttle.is_zero()).then_some(self.throttle)
    }

    /// The engine runs with the host's working directory, so a relative
    /// output path would land somewhere unpredictable.
    pub fn validate(&self) -> Result<(), CaptureError> {
        match &self.output_path {
            Some(path) if path.is_relative() => Err(CaptureError::ConfigurationFailed(format!(
                "output path must be absolute: {}",
                path.display()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_path_and_delay() {
        let config = EngineConfig::from_lookup(lookup(&[
            (OUTPUT_PATH_VAR, "/tmp/rec.wav"),
            (DELAY_VAR, "25"),
        ]));
        assert_eq!(config.output_path, Some(PathBuf::from("/tmp/rec.wav")));
        assert_eq!(config.throttle(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn missing_values_disable_capture_and_throttle() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.throttle(), None);
    }

    #[test]
    fn zero_or_garbage_delay_means_no_throttle() {
        let zero = EngineConfig::from_lookup(lookup(&[(DELAY_VAR, "0")]));
        assert_eq!(zero.throttle(), None);

        let garbage = EngineConfig::from_lookup(lookup(&[(DELAY_VAR, "soon")]));
        assert_eq!(garbage.throttle(), None);
    }

    #[test]
    fn empty_path_is_treated_as_absent() {
        let config = EngineConfig::from_lookup(lookup(&[(OUTPUT_PATH_VAR, "")]));
        assert!(config.output_path.is_none());
    }

    #[test]
    fn relative_path_fails_validation() {
        let config = EngineConfig {
            output_path: Some(PathBuf::from("rec.wav")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::ConfigurationFailed(_))));
        assert!(EngineConfig::default().validate().is_ok());
    }
}
