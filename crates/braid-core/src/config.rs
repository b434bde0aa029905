use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use braid_providers::{BreakerConfig, ChainConfig, FallbackPlan, ProviderDescriptor, RetryPolicy};
use braid_stream::StreamConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path} failed: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse braid.toml failed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fully resolved runtime configuration, ready to hand to the
/// constructors of the chain, breaker, stream manager and orchestrator.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub plan: FallbackPlan,
    pub breaker: BreakerConfig,
    pub chain: ChainConfig,
    pub stream: StreamConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Default)]
struct BraidTomlFile {
    #[serde(default)]
    providers: Vec<BraidTomlProvider>,
    #[serde(default)]
    breaker: BraidTomlBreaker,
    #[serde(default)]
    retry: BraidTomlRetry,
    #[serde(default)]
    stream: BraidTomlStream,
    #[serde(default)]
    orchestrator: BraidTomlOrchestrator,
}

#[derive(Debug, Deserialize)]
struct BraidTomlProvider {
    name: String,
    priority: u32,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct BraidTomlBreaker {
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    failure_window_ms: Option<u64>,
    #[serde(default)]
    cooldown_ms: Option<u64>,
    #[serde(default)]
    cooldown_multiplier: Option<u32>,
    #[serde(default)]
    max_cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BraidTomlRetry {
    #[serde(default)]
    base_delay_ms: Option<u64>,
    #[serde(default)]
    max_delay_ms: Option<u64>,
    #[serde(default)]
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BraidTomlStream {
    #[serde(default)]
    buffer_capacity: Option<usize>,
    #[serde(default)]
    heartbeat_interval_ms: Option<u64>,
    #[serde(default)]
    retry_hint_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BraidTomlOrchestrator {
    #[serde(default)]
    tool_timeout_ms: Option<u64>,
}

pub fn load_core_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_core_config(&content)
}

pub fn parse_core_config(content: &str) -> Result<CoreConfig, ConfigError> {
    let parsed: BraidTomlFile = toml::from_str(content)?;

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(parsed.providers.len());
    for provider in &parsed.providers {
        let name = provider.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid(
                "provider entries require a non-empty name".to_string(),
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate provider name '{name}'"
            )));
        }
        descriptors.push(ProviderDescriptor {
            name: name.to_string(),
            priority: provider.priority,
            max_retries: provider.max_retries.unwrap_or(2),
            enabled: provider.enabled.unwrap_or(true),
        });
    }
    if descriptors.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one [[providers]] entry is required".to_string(),
        ));
    }
    let plan = FallbackPlan::new(descriptors);

    let breaker_defaults = BreakerConfig::default();
    let breaker = BreakerConfig {
        failure_threshold: parsed
            .breaker
            .failure_threshold
            .unwrap_or(breaker_defaults.failure_threshold),
        failure_window: millis_or(
            parsed.breaker.failure_window_ms,
            breaker_defaults.failure_window,
        ),
        cooldown: millis_or(parsed.breaker.cooldown_ms, breaker_defaults.cooldown),
        cooldown_multiplier: parsed
            .breaker
            .cooldown_multiplier
            .unwrap_or(breaker_defaults.cooldown_multiplier),
        max_cooldown: millis_or(
            parsed.breaker.max_cooldown_ms,
            breaker_defaults.max_cooldown,
        ),
    };
    if breaker.failure_threshold == 0 {
        return Err(ConfigError::Invalid(
            "breaker.failure_threshold must be greater than 0".to_string(),
        ));
    }

    let retry_defaults = RetryPolicy::default();
    let chain_defaults = ChainConfig::default();
    let chain = ChainConfig {
        call_timeout: millis_or(parsed.retry.call_timeout_ms, chain_defaults.call_timeout),
        retry: RetryPolicy {
            base_delay_ms: parsed
                .retry
                .base_delay_ms
                .unwrap_or(retry_defaults.base_delay_ms),
            max_delay_ms: parsed
                .retry
                .max_delay_ms
                .unwrap_or(retry_defaults.max_delay_ms),
        },
    };
    if chain.call_timeout.is_zero() {
        return Err(ConfigError::Invalid(
            "retry.call_timeout_ms must be greater than 0".to_string(),
        ));
    }

    let stream_defaults = StreamConfig::default();
    let stream = StreamConfig {
        buffer_capacity: parsed
            .stream
            .buffer_capacity
            .unwrap_or(stream_defaults.buffer_capacity),
        heartbeat_interval: millis_or(
            parsed.stream.heartbeat_interval_ms,
            stream_defaults.heartbeat_interval,
        ),
        retry_hint_ms: parsed
            .stream
            .retry_hint_ms
            .unwrap_or(stream_defaults.retry_hint_ms),
    };
    if stream.buffer_capacity == 0 {
        return Err(ConfigError::Invalid(
            "stream.buffer_capacity must be greater than 0".to_string(),
        ));
    }

    let orchestrator_defaults = OrchestratorConfig::default();
    let orchestrator = OrchestratorConfig {
        tool_timeout: millis_or(
            parsed.orchestrator.tool_timeout_ms,
            orchestrator_defaults.tool_timeout,
        ),
    };

    Ok(CoreConfig {
        plan,
        breaker,
        chain,
        stream,
        orchestrator,
    })
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_core_config_resolves_providers_and_tunables() {
        let content = r#"
[[providers]]
name = "primary"
priority = 1
max_retries = 3

[[providers]]
name = "backup"
priority = 2
enabled = false

[breaker]
failure_threshold = 3
cooldown_ms = 10000

[retry]
base_delay_ms = 100
call_timeout_ms = 60000

[stream]
buffer_capacity = 512
heartbeat_interval_ms = 5000
retry_hint_ms = 1000

[orchestrator]
tool_timeout_ms = 30000
"#;

        let config = parse_core_config(content).expect("config should parse successfully");
        let names: Vec<&str> = config
            .plan
            .providers()
            .iter()
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        assert_eq!(names, vec!["primary", "backup"]);
        assert_eq!(config.plan.providers()[0].max_retries, 3);
        assert!(!config.plan.providers()[1].enabled);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(10));
        assert_eq!(config.chain.retry.base_delay_ms, 100);
        assert_eq!(config.chain.call_timeout, Duration::from_secs(60));
        assert_eq!(config.stream.buffer_capacity, 512);
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.stream.retry_hint_ms, 1_000);
        assert_eq!(config.orchestrator.tool_timeout, Duration::from_secs(30));
    }

    #[test]
    fn defaults_apply_when_sections_are_omitted() {
        let content = r#"
[[providers]]
name = "only"
priority = 1
"#;

        let config = parse_core_config(content).expect("config should parse successfully");
        assert_eq!(config.plan.providers()[0].max_retries, 2);
        assert!(config.plan.providers()[0].enabled);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.chain.call_timeout, Duration::from_secs(130));
        assert_eq!(config.chain.retry.base_delay_ms, 200);
        assert_eq!(config.chain.retry.max_delay_ms, 5_000);
        assert_eq!(config.stream.buffer_capacity, 256);
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.stream.retry_hint_ms, 3_000);
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let content = r#"
[[providers]]
name = "same"
priority = 1

[[providers]]
name = "same"
priority = 2
"#;

        let error = parse_core_config(content).expect_err("duplicate names should be rejected");
        assert!(error.to_string().contains("duplicate provider name"));
    }

    #[test]
    fn rejects_empty_provider_name() {
        let content = r#"
[[providers]]
name = "  "
priority = 1
"#;

        let error = parse_core_config(content).expect_err("blank name should be rejected");
        assert!(error.to_string().contains("non-empty name"));
    }

    #[test]
    fn rejects_config_without_providers() {
        let error = parse_core_config("").expect_err("empty provider list should be rejected");
        assert!(error.to_string().contains("[[providers]]"));
    }

    #[test]
    fn load_core_config_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        write!(
            file,
            "[[providers]]\nname = \"disk\"\npriority = 1\n"
        )
        .expect("temp file should be writable");

        let config = load_core_config(file.path()).expect("config should load from disk");
        assert_eq!(config.plan.providers()[0].name, "disk");
    }

    #[test]
    fn load_core_config_reports_missing_file() {
        let error = load_core_config(Path::new("/nonexistent/braid.toml"))
            .expect_err("missing file should error");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
