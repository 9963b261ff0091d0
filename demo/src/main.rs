use async_trait::async_trait;
use futures_util::StreamExt;
use herald_application::{HeraldConfig, HeraldContext, Subscriber};
use herald_domain::aggregate::Aggregate;
use herald_domain::domain_event::{Event, EventPayload, MetadataPatch};
use herald_domain::entity::Entity;
use herald_domain::error::{DomainError, DomainResult};
use herald_domain::eventing::{
    AsyncEventHandler, FailedEventFilter, FailureReason, HandledEventType, HandlerFailure,
};
use herald_macros::{entity, event};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use ulid::Ulid;

#[entity]
struct User {
    email: String,
    verified: bool,
}

#[event(event_type = "user.registered", kind = "integration")]
struct UserRegistered {
    email: String,
}

#[event(event_type = "user.verified")]
struct UserVerified {}

impl Aggregate for User {
    const TYPE: &'static str = "user";

    fn when(&mut self, event: &Event) -> DomainResult<()> {
        match event.event_type() {
            UserRegistered::EVENT_TYPE => {
                self.email = event.decode::<UserRegistered>()?.email;
            }
            UserVerified::EVENT_TYPE => self.verified = true,
            other => {
                return Err(DomainError::UnknownEventType {
                    event_type: other.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl User {
    fn register(email: &str) -> DomainResult<Self> {
        let mut user = User::new(Ulid::new().to_string());
        user.record(&UserRegistered {
            email: email.to_string(),
        })?;
        Ok(user)
    }

    fn verify(&mut self) -> DomainResult<()> {
        if self.verified {
            return Err(DomainError::invalid_state("user already verified"));
        }
        self.record(&UserVerified {})
    }
}

/// 依赖外部数据库的分析处理器，可切换健康状态
struct Analytics {
    db_up: Arc<AtomicBool>,
}

#[async_trait]
impl AsyncEventHandler for Analytics {
    fn handler_name(&self) -> &str {
        "analytics"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::from_types([UserRegistered::EVENT_TYPE, UserVerified::EVENT_TYPE])
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        anyhow::ensure!(self.db_up.load(Ordering::SeqCst), "db down");
        tracing::info!(event_type = %event.event_type(), "analytics recorded");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HeraldConfig::from_env()?;
    herald_application::telemetry::init_tracing(&config.telemetry);

    let ctx = HeraldContext::init(config);
    let dispatcher = ctx.dispatcher();
    ctx.event_store().register_payload::<UserRegistered>();
    ctx.event_store().register_payload::<UserVerified>();
    ctx.event_sourcing().register_aggregate_type::<User>();

    // 订阅者
    dispatcher.subscribe_async_fn(UserRegistered::EVENT_TYPE, "welcome", |event| async move {
        let registered: UserRegistered = event.decode()?;
        tracing::info!(email = %registered.email, "welcome email sent");
        Ok(())
    })?;
    dispatcher.subscribe_fn(UserVerified::EVENT_TYPE, "badge", |event| {
        let Some(user) = event.metadata().aggregate_id() else {
            return Err(HandlerFailure::new(
                FailureReason::ValidationError,
                "verified event without aggregate",
            )
            .into());
        };
        tracing::info!(user, "verified badge granted");
        Ok(())
    })?;

    let db_up = Arc::new(AtomicBool::new(false));
    let analytics: Arc<dyn AsyncEventHandler> = Arc::new(Analytics {
        db_up: db_up.clone(),
    });
    for event_type in [UserRegistered::EVENT_TYPE, UserVerified::EVENT_TYPE] {
        dispatcher.subscribe(event_type, Subscriber::from(analytics.clone()), None)?;
    }

    // 中间件：统一打上来源
    dispatcher.add_middleware(|event: Event| {
        Ok(Some(event.with_metadata(MetadataPatch::builder().source("demo").build())))
    });

    let mut observed = dispatcher.concurrent_bus().subscribe();
    let observer = tokio::spawn(async move {
        while let Some(Ok(event)) = observed.next().await {
            tracing::debug!(
                event_type = %event.event_type(),
                source = ?event.metadata().source(),
                "observed"
            );
        }
    });

    // 注册并验证用户，保存后发布
    let mut user = User::register("ada@example.com")?;
    user.verify()?;
    let pending = user.uncommitted_events().to_vec();
    ctx.event_sourcing().save_aggregate(&mut user).await?;

    let failed = dispatcher.publish_batch(pending.clone()).await;
    tracing::info!(failed, "events published on the concurrent bus");
    // 同步总线上只有 badge
    if let Some(verified) = pending.last() {
        dispatcher.publish(verified.clone())?;
    }

    let stats = ctx.dead_letters().stats();
    println!("dead letters after publish: {}", format_counts(&stats.by_handler));
    for entry in ctx.dead_letters().failed_events(&FailedEventFilter::default()) {
        println!(
            "  {} <- {} ({}) next retry at {:?}",
            entry.handler_name(),
            entry.event().event_type(),
            entry.failure_reason(),
            entry.next_retry_at()
        );
    }

    // 数据库恢复；退避时间未到，本轮不会重试
    db_up.store(true, Ordering::SeqCst);
    let report = ctx.retrier().retry_ready().await;
    println!("retry round before backoff elapsed: {report:?}");

    let reloaded: Option<User> = ctx.event_sourcing().load_aggregate(user.id(), Some(2)).await?;
    if let Some(reloaded) = reloaded {
        println!(
            "reloaded {} v{} email={} verified={}",
            reloaded.id(),
            reloaded.version(),
            reloaded.email,
            reloaded.verified
        );
    }

    ctx.reset()?;
    observer.abort();
    Ok(())
}

fn format_counts(map: &std::collections::BTreeMap<String, usize>) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
