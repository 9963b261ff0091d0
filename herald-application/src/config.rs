//! 配置（HeraldConfig）
//!
//! 三种来源：`Default`、JSON 文本（缺省字段取默认值）与 `HERALD_*` 环境变量。
//!
//! | 环境变量 | 字段 |
//! |---|---|
//! | `HERALD_CONCURRENCY_LIMIT` | `bus.concurrency_limit` |
//! | `HERALD_TAP_CAPACITY` | `bus.tap_capacity` |
//! | `HERALD_DLQ_MAX_RETRIES` | `dead_letter.max_retries` |
//! | `HERALD_DLQ_RETENTION_DAYS` | `dead_letter.retention_days` |
//! | `HERALD_DLQ_MAX_QUEUE_SIZE` | `dead_letter.max_queue_size` |
//! | `HERALD_RETRY_INTERVAL_SECS` | `retry.interval_secs` |
//! | `HERALD_SNAPSHOT_EVERY` | `snapshot_policy`（0 表示不做快照） |
//! | `HERALD_LOG` | `telemetry.filter` |
//! | `HERALD_LOG_JSON` | `telemetry.json` |
//!
use crate::error::{AppError, AppResult};
use bon::Builder;
use herald_domain::eventing::{BusConfig, DeadLetterConfig};
use herald_domain::persist::SnapshotPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

fn default_retry_interval_secs() -> u64 {
    60
}

/// 死信重试任务配置
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[builder(default = default_retry_interval_secs())]
    pub interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// 日志配置；`RUST_LOG` 存在时优先于 `filter`
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[builder(into, default = default_log_filter())]
    pub filter: String,
    #[builder(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    #[builder(default)]
    pub bus: BusConfig,
    #[builder(default)]
    pub dead_letter: DeadLetterConfig,
    #[builder(default)]
    pub retry: RetryConfig,
    #[builder(default)]
    pub snapshot_policy: SnapshotPolicy,
    #[builder(default)]
    pub telemetry: TelemetryConfig,
}

impl HeraldConfig {
    pub fn from_json_str(json: &str) -> AppResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| AppError::Config {
            key: "<json>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate("dead_letter.retention_days")?;
        Ok(config)
    }

    /// 以默认值为基础，叠加进程环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 以默认值为基础，叠加 `lookup` 提供的 `HERALD_*` 变量
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Lookup(&lookup);

        if let Some(v) = env.parse("HERALD_CONCURRENCY_LIMIT")? {
            config.bus.concurrency_limit = v;
        }
        if let Some(v) = env.parse("HERALD_TAP_CAPACITY")? {
            config.bus.tap_capacity = v;
        }
        if let Some(v) = env.parse("HERALD_DLQ_MAX_RETRIES")? {
            config.dead_letter.max_retries = v;
        }
        if let Some(v) = env.parse("HERALD_DLQ_RETENTION_DAYS")? {
            config.dead_letter.retention_days = v;
        }
        if let Some(v) = env.parse("HERALD_DLQ_MAX_QUEUE_SIZE")? {
            config.dead_letter.max_queue_size = v;
        }
        if let Some(v) = env.parse("HERALD_RETRY_INTERVAL_SECS")? {
            config.retry.interval_secs = v;
        }
        if let Some(every) = env.parse::<usize>("HERALD_SNAPSHOT_EVERY")? {
            config.snapshot_policy = match every {
                0 => SnapshotPolicy::Never,
                n => SnapshotPolicy::Every(n),
            };
        }
        if let Some(filter) = lookup("HERALD_LOG") {
            config.telemetry.filter = filter;
        }
        if let Some(json) = env.parse("HERALD_LOG_JSON")? {
            config.telemetry.json = json;
        }

        config.validate("HERALD_DLQ_RETENTION_DAYS")?;
        Ok(config)
    }

    fn validate(&self, retention_key: &str) -> AppResult<()> {
        if self.dead_letter.retention_days < 0 {
            return Err(AppError::Config {
                key: retention_key.to_string(),
                reason: format!(
                    "retention must not be negative: {}",
                    self.dead_letter.retention_days
                ),
            });
        }
        Ok(())
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &str) -> AppResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.0)(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| AppError::Config {
                key: key.to_string(),
                reason: format!("{e}: {raw:?}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = HeraldConfig::default();
        assert_eq!(config.bus.concurrency_limit, 100);
        assert_eq!(config.dead_letter.max_retries, 3);
        assert_eq!(config.dead_letter.retention_days, 30);
        assert_eq!(config.dead_letter.max_queue_size, 10_000);
        assert_eq!(config.retry.interval(), Duration::from_secs(60));
        assert_eq!(config.snapshot_policy, SnapshotPolicy::Never);
        assert_eq!(config.telemetry.filter, "info");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = HeraldConfig::from_json_str(
            r#"{"bus": {"concurrency_limit": 8}, "snapshot_policy": {"every": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.bus.concurrency_limit, 8);
        assert_eq!(config.bus.tap_capacity, BusConfig::default().tap_capacity);
        assert_eq!(config.snapshot_policy, SnapshotPolicy::Every(50));
        assert_eq!(config.dead_letter, DeadLetterConfig::default());

        assert!(matches!(
            HeraldConfig::from_json_str("{not json"),
            Err(AppError::Config { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let config = HeraldConfig::from_lookup(lookup(&[
            ("HERALD_CONCURRENCY_LIMIT", "4"),
            ("HERALD_DLQ_MAX_RETRIES", " 5 "),
            ("HERALD_SNAPSHOT_EVERY", "0"),
            ("HERALD_LOG", "herald=debug"),
            ("HERALD_LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.bus.concurrency_limit, 4);
        assert_eq!(config.dead_letter.max_retries, 5);
        assert_eq!(config.snapshot_policy, SnapshotPolicy::Never);
        assert_eq!(config.telemetry.filter, "herald=debug");
        assert!(config.telemetry.json);
    }

    #[test]
    fn negative_retention_is_rejected() {
        let err = HeraldConfig::from_lookup(lookup(&[("HERALD_DLQ_RETENTION_DAYS", "-1")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config { key, .. } if key == "HERALD_DLQ_RETENTION_DAYS"));
        assert!(
            HeraldConfig::from_json_str(r#"{"dead_letter": {"retention_days": -7}}"#).is_err()
        );

        // 超大值表示永久保留
        let config =
            HeraldConfig::from_lookup(lookup(&[("HERALD_DLQ_RETENTION_DAYS", "1000000000")]))
                .unwrap();
        assert!(config.dead_letter.retention().is_none());
    }

    #[test]
    fn malformed_env_value_names_the_key() {
        let err = HeraldConfig::from_lookup(lookup(&[("HERALD_DLQ_MAX_QUEUE_SIZE", "lots")]))
            .unwrap_err();
        match err {
            AppError::Config { key, .. } => assert_eq!(key, "HERALD_DLQ_MAX_QUEUE_SIZE"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
