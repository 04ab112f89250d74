//! Runner configuration loaded from the environment.

use std::time::Duration;

/// Per-query deadline in whole seconds.
pub const QUERY_TIMEOUT_ENV: &str = "EXPRUN_QUERY_TIMEOUT_SECS";

/// Whole-run deadline in whole seconds.
pub const RUN_TIMEOUT_ENV: &str = "EXPRUN_RUN_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { var: String, value: String },
}

/// Deadlines applied by [`crate::runner::ExperimentResultsRunner`].
/// `None` means no deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    pub query_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
}

impl RunnerConfig {
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Read `EXPRUN_QUERY_TIMEOUT_SECS` and `EXPRUN_RUN_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            query_timeout: seconds(QUERY_TIMEOUT_ENV, lookup(QUERY_TIMEOUT_ENV))?,
            run_timeout: seconds(RUN_TIMEOUT_ENV, lookup(RUN_TIMEOUT_ENV))?,
        })
    }
}

fn seconds(var: &str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::InvalidSeconds {
            var: var.to_string(),
            value,
        }),
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn unset_means_no_deadline() {
        let config = RunnerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn parses_seconds() {
        let config = RunnerConfig::from_lookup(lookup(&[
            (QUERY_TIMEOUT_ENV, "30"),
            (RUN_TIMEOUT_ENV, " 600 "),
        ]))
        .unwrap();
        assert_eq!(config.query_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn rejects_invalid_values() {
        for bad in ["0", "-5", "soon", "1.5"] {
            let err = RunnerConfig::from_lookup(lookup(&[(RUN_TIMEOUT_ENV, bad)])).unwrap_err();
            assert!(err.to_string().contains(RUN_TIMEOUT_ENV), "{bad}");
        }
    }
}
