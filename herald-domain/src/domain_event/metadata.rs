use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// 领域事件（聚合内部状态变化）
    #[default]
    Domain,
    /// 集成事件（跨上下文通知）
    Integration,
    /// 系统事件（基础设施/运维）
    System,
}

fn default_aggregate_version() -> usize {
    1
}

/// 事件元数据，创建后不可变
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// 事件唯一标识，缺省时生成 UUID
    #[builder(into, default = Uuid::new_v4().to_string())]
    id: String,
    /// 事件发生时间，缺省时取当前时间
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    #[builder(default)]
    kind: EventKind,
    /// 所属聚合
    #[builder(into)]
    aggregate_id: Option<String>,
    /// 聚合版本，从 1 开始单调递增
    #[serde(default = "default_aggregate_version")]
    #[builder(default = default_aggregate_version())]
    aggregate_version: usize,
    /// 关联 ID，串联同一业务操作产生的事件
    #[builder(into)]
    correlation_id: Option<String>,
    /// 因果 ID，指向触发本事件的事件
    #[builder(into)]
    causation_id: Option<String>,
    #[builder(into)]
    user_id: Option<String>,
    /// 事件来源（服务/模块名）
    #[builder(into)]
    source: Option<String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EventMetadata {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn aggregate_version(&self) -> usize {
        self.aggregate_version
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// 按补丁生成新的元数据，原值保持不变
    pub fn patched(&self, patch: MetadataPatch) -> Self {
        Self {
            id: patch.id.unwrap_or_else(|| self.id.clone()),
            timestamp: patch.timestamp.unwrap_or(self.timestamp),
            kind: patch.kind.unwrap_or(self.kind),
            aggregate_id: patch.aggregate_id.or_else(|| self.aggregate_id.clone()),
            aggregate_version: patch.aggregate_version.unwrap_or(self.aggregate_version),
            correlation_id: patch
                .correlation_id
                .or_else(|| self.correlation_id.clone()),
            causation_id: patch.causation_id.or_else(|| self.causation_id.clone()),
            user_id: patch.user_id.or_else(|| self.user_id.clone()),
            source: patch.source.or_else(|| self.source.clone()),
        }
    }
}

/// 元数据覆写项（copy-on-write），未设置的字段沿用原值
#[derive(Builder, Debug, Clone, Default)]
pub struct MetadataPatch {
    #[builder(into)]
    id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    kind: Option<EventKind>,
    #[builder(into)]
    aggregate_id: Option<String>,
    aggregate_version: Option<usize>,
    #[builder(into)]
    correlation_id: Option<String>,
    #[builder(into)]
    causation_id: Option<String>,
    #[builder(into)]
    user_id: Option<String>,
    #[builder(into)]
    source: Option<String>,
}
