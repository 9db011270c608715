use std::time::Duration;

use thiserror::Error;

pub const POLL_INTERVAL_ENV: &str = "PFSA_POLL_INTERVAL_MS";
pub const JOB_TIMEOUT_ENV: &str = "PFSA_JOB_TIMEOUT_SECS";

pub const DEFAULT_PROC_LIMIT: usize = 15;
pub const DEFAULT_PROC_OVER_ALLOWANCE: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("proc_limit must be at least 1")]
    ZeroProcLimit,

    #[error("proc_over_allowance must be at least 1 so the next checkpoint has room")]
    ZeroProcOverAllowance,

    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Dispatcher knobs shared by every workload run of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Concurrent detailed jobs allowed.
    pub proc_limit: usize,
    /// Waitlisted checkpoints tolerated on disk beyond `proc_limit` before the controller blocks.
    pub proc_over_allowance: usize,
    pub poll_interval: Duration,
    /// `None` disables the liveness check.
    pub job_timeout: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            proc_limit: DEFAULT_PROC_LIMIT,
            proc_over_allowance: DEFAULT_PROC_OVER_ALLOWANCE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: Some(DEFAULT_JOB_TIMEOUT),
        }
    }
}

impl SamplerConfig {
    /// Overrides timing knobs from `PFSA_POLL_INTERVAL_MS` and `PFSA_JOB_TIMEOUT_SECS`.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(ms) = parse_env(&lookup, POLL_INTERVAL_ENV)? {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env(&lookup, JOB_TIMEOUT_ENV)? {
            self.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proc_limit == 0 {
            return Err(ConfigError::ZeroProcLimit);
        }
        if self.proc_over_allowance == 0 {
            return Err(ConfigError::ZeroProcOverAllowance);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    /// Most checkpoints that can exist on disk for one run at any time, counting the one the
    /// controller creates right after `submit` returns.
    pub fn max_outstanding(&self) -> usize {
        self.proc_limit + self.proc_over_allowance
    }
}

fn parse_env(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn env_overrides_timing() {
        let config = SamplerConfig::default()
            .apply_env_from(env(&[(POLL_INTERVAL_ENV, "250"), (JOB_TIMEOUT_ENV, "30")]))
            .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.proc_limit, DEFAULT_PROC_LIMIT);
    }

    #[test]
    fn zero_timeout_disables_liveness_check() {
        let config = SamplerConfig::default()
            .apply_env_from(env(&[(JOB_TIMEOUT_ENV, "0")]))
            .unwrap();
        assert_eq!(config.job_timeout, None);
    }

    #[test]
    fn unset_env_keeps_defaults() {
        let config = SamplerConfig::default().apply_env_from(env(&[])).unwrap();
        assert_eq!(config, SamplerConfig::default());
    }

    #[test]
    fn garbage_env_is_rejected() {
        let err = SamplerConfig::default()
            .apply_env_from(env(&[(POLL_INTERVAL_ENV, "ten minutes")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: POLL_INTERVAL_ENV,
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let config = SamplerConfig {
            proc_limit: 0,
            ..SamplerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroProcLimit));
        assert_eq!(SamplerConfig::default().validate(), Ok(()));
        assert_eq!(SamplerConfig::default().max_outstanding(), 20);
    }

    #[test]
    fn validate_rejects_zero_allowance() {
        let config = SamplerConfig {
            proc_over_allowance: 0,
            ..SamplerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroProcOverAllowance));
    }
}
