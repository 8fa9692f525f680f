use crate::{error::TaskError, tool::ToolVariant};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;
pub const DEFAULT_LOG_EXCERPT_BYTES: usize = 1000;
/// mafft reads a negative thread count as "use every core".
pub const DEFAULT_THREADS: i32 = -1;

const DATA_DIR_ENV: &str = "BLUEBASE_DATA_DIR";
const WEBHOOK_URL_ENV: &str = "BLUEBASE_WEBHOOK_URL";
const WEBHOOK_TIMEOUT_ENV: &str = "BLUEBASE_WEBHOOK_TIMEOUT_SECS";
const SAMPLE_INTERVAL_ENV: &str = "BLUEBASE_SAMPLE_INTERVAL_MS";
const LOG_EXCERPT_ENV: &str = "BLUEBASE_LOG_EXCERPT_BYTES";
const THREADS_ENV: &str = "BLUEBASE_THREADS";

/// Executable names of the external tools, overridable per tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinaries {
    pub mafft: String,
    pub vsearch: String,
    pub uclust: String,
}

impl Default for ToolBinaries {
    fn default() -> Self {
        Self {
            mafft: ToolVariant::PrimaryAligner.tool_name().to_string(),
            vsearch: ToolVariant::ClusterAligner.tool_name().to_string(),
            uclust: ToolVariant::GreedyClusterAligner.tool_name().to_string(),
        }
    }
}

impl ToolBinaries {
    pub fn for_variant(&self, variant: ToolVariant) -> &str {
        match variant {
            ToolVariant::PrimaryAligner => &self.mafft,
            ToolVariant::ClusterAligner => &self.vsearch,
            ToolVariant::GreedyClusterAligner => &self.uclust,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root under which every task directory lives.
    pub data_dir: PathBuf,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub sample_interval: Duration,
    /// Upper bound on the log text quoted in execution error messages.
    pub log_excerpt_bytes: usize,
    pub threads: i32,
    pub binaries: ToolBinaries,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            webhook_url: None,
            webhook_timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            log_excerpt_bytes: DEFAULT_LOG_EXCERPT_BYTES,
            threads: DEFAULT_THREADS,
            binaries: ToolBinaries::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, TaskError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TaskError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(dir) = get(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        config.webhook_url = get(WEBHOOK_URL_ENV);
        if let Some(secs) = get(WEBHOOK_TIMEOUT_ENV) {
            config.webhook_timeout = Duration::from_secs(parse_number(WEBHOOK_TIMEOUT_ENV, &secs)?);
        }
        if let Some(ms) = get(SAMPLE_INTERVAL_ENV) {
            let ms: u64 = parse_number(SAMPLE_INTERVAL_ENV, &ms)?;
            if ms == 0 {
                return Err(TaskError::configuration(format!(
                    "{SAMPLE_INTERVAL_ENV} must be greater than zero"
                )));
            }
            config.sample_interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = get(LOG_EXCERPT_ENV) {
            config.log_excerpt_bytes = parse_number(LOG_EXCERPT_ENV, &bytes)?;
        }
        if let Some(threads) = get(THREADS_ENV) {
            config.threads = parse_number(THREADS_ENV, &threads)?;
        }
        for variant in ToolVariant::ALL {
            let key = format!("BLUEBASE_{}_BIN", variant.tool_name().to_ascii_uppercase());
            if let Some(bin) = get(&key) {
                match variant {
                    ToolVariant::PrimaryAligner => config.binaries.mafft = bin,
                    ToolVariant::ClusterAligner => config.binaries.vsearch = bin,
                    ToolVariant::GreedyClusterAligner => config.binaries.uclust = bin,
                }
            }
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TaskError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| TaskError::configuration(format!("{key}='{value}' is not valid: {e}")))
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = WorkerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert!(config.webhook_url.is_none());
        assert_eq!(config.webhook_timeout, Duration::from_secs(5));
        assert_eq!(config.sample_interval, Duration::from_millis(100));
        assert_eq!(config.threads, -1);
        assert_eq!(config.binaries.for_variant(ToolVariant::ClusterAligner), "vsearch");
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("BLUEBASE_DATA_DIR", "/srv/msa"),
            ("BLUEBASE_WEBHOOK_URL", " http://hook.local/update "),
            ("BLUEBASE_SAMPLE_INTERVAL_MS", "250"),
            ("BLUEBASE_UCLUST_BIN", "/opt/uclust/bin/uclust"),
            ("BLUEBASE_THREADS", "8"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/msa"));
        assert_eq!(config.webhook_url.as_deref(), Some("http://hook.local/update"));
        assert_eq!(config.sample_interval, Duration::from_millis(250));
        assert_eq!(config.threads, 8);
        assert_eq!(
            config.binaries.for_variant(ToolVariant::GreedyClusterAligner),
            "/opt/uclust/bin/uclust"
        );
    }

    #[test]
    fn test_blank_webhook_is_unset() {
        let config = WorkerConfig::from_lookup(lookup(&[("BLUEBASE_WEBHOOK_URL", "  ")])).unwrap();
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("BLUEBASE_SAMPLE_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
        let err = WorkerConfig::from_lookup(lookup(&[("BLUEBASE_SAMPLE_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
