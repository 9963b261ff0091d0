use async_trait::async_trait;
use herald_domain::aggregate::Aggregate;
use herald_domain::domain_event::{Event, EventPayload};
use herald_domain::entity::Entity;
use herald_domain::error::{DomainError, DomainResult};
use herald_domain::persist::{
    EventDeletion, EventQuery, EventSourcing, EventStorageBackend, EventStore,
    InMemoryEventBackend, InMemorySnapshotStore, SerializedEvent, SnapshotPolicy, SnapshotStore,
};
use herald_macros::{entity, event};
use std::sync::Arc;

#[entity]
#[derive(Clone, PartialEq)]
struct NutritionLog {
    user_id: String,
    total_calories: u32,
    meals: Vec<String>,
}

#[event(event_type = "log.opened")]
struct LogOpened {
    user_id: String,
}

#[event(event_type = "meal.logged")]
struct MealLogged {
    name: String,
    calories: u32,
}

#[event(event_type = "log.closed")]
struct LogClosed {}

impl Aggregate for NutritionLog {
    const TYPE: &'static str = "nutrition_log";

    fn when(&mut self, event: &Event) -> DomainResult<()> {
        match event.event_type() {
            LogOpened::EVENT_TYPE => {
                let opened: LogOpened = event.decode()?;
                self.user_id = opened.user_id;
            }
            MealLogged::EVENT_TYPE => {
                let meal: MealLogged = event.decode()?;
                self.total_calories += meal.calories;
                self.meals.push(meal.name);
            }
            LogClosed::EVENT_TYPE => self.set_deleted(true),
            other => {
                return Err(DomainError::UnknownEventType {
                    event_type: other.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// 读取时让出执行权的后端，模拟网络往返
struct YieldingBackend(InMemoryEventBackend);

#[async_trait]
impl EventStorageBackend for YieldingBackend {
    async fn save_raw(&self, record: SerializedEvent) -> DomainResult<()> {
        self.0.save_raw(record).await
    }

    async fn load_raw(&self, query: &EventQuery) -> DomainResult<Vec<SerializedEvent>> {
        tokio::task::yield_now().await;
        self.0.load_raw(query).await
    }

    async fn delete_raw(&self, deletion: &EventDeletion) -> DomainResult<usize> {
        self.0.delete_raw(deletion).await
    }
}

fn register_payloads(store: EventStore) -> Arc<EventStore> {
    store.register_payload::<LogOpened>();
    store.register_payload::<MealLogged>();
    store.register_payload::<LogClosed>();
    Arc::new(store)
}

fn store() -> Arc<EventStore> {
    register_payloads(EventStore::in_memory())
}

fn sourcing() -> EventSourcing {
    let sourcing = EventSourcing::new(store());
    sourcing.register_aggregate_type::<NutritionLog>();
    sourcing
}

fn new_log(id: &str) -> anyhow::Result<NutritionLog> {
    let mut log = NutritionLog::new(id.to_string());
    log.record(&LogOpened {
        user_id: "u1".into(),
    })?;
    log.record(&MealLogged {
        name: "oats".into(),
        calories: 350,
    })?;
    log.record(&MealLogged {
        name: "salad".into(),
        calories: 420,
    })?;
    Ok(log)
}

#[tokio::test]
async fn save_then_load_reproduces_state() -> anyhow::Result<()> {
    let sourcing = sourcing();
    let mut log = new_log("log-1")?;

    assert_eq!(sourcing.save_aggregate(&mut log).await?, 3);
    assert!(log.uncommitted_events().is_empty());
    assert_eq!(sourcing.save_aggregate(&mut log).await?, 0);

    let loaded: NutritionLog = sourcing
        .load_aggregate("log-1", None)
        .await?
        .expect("aggregate exists");
    assert_eq!(loaded, log);
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.total_calories, 770);

    // 一次性重放与保存/加载往返结果一致
    let history = sourcing.event_store().load_aggregate_events("log-1").await?;
    let mut replayed = NutritionLog::new("log-1".to_string());
    replayed.load_from_history(&history)?;
    assert_eq!(replayed, loaded);
    assert_eq!(
        replayed.version(),
        history
            .last()
            .map(|e| e.metadata().aggregate_version())
            .unwrap_or_default()
    );
    Ok(())
}

#[tokio::test]
async fn expected_version_mismatch_is_a_concurrency_error() -> anyhow::Result<()> {
    let sourcing = sourcing();
    let mut log = new_log("log-2")?;
    sourcing.save_aggregate(&mut log).await?;

    let ok: Option<NutritionLog> = sourcing.load_aggregate("log-2", Some(3)).await?;
    assert!(ok.is_some());

    let err = sourcing
        .load_aggregate::<NutritionLog>("log-2", Some(2))
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert!(matches!(
        err,
        DomainError::Concurrency {
            expected: 2,
            actual: 3,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn stale_writer_is_rejected() -> anyhow::Result<()> {
    let sourcing = sourcing();
    let mut log = new_log("log-3")?;
    sourcing.save_aggregate(&mut log).await?;

    let mut first: NutritionLog = sourcing.load_aggregate("log-3", None).await?.unwrap();
    let mut second: NutritionLog = sourcing.load_aggregate("log-3", None).await?.unwrap();

    first.record(&MealLogged {
        name: "apple".into(),
        calories: 95,
    })?;
    second.record(&MealLogged {
        name: "cake".into(),
        calories: 600,
    })?;

    sourcing.save_aggregate(&mut first).await?;
    let err = sourcing.save_aggregate(&mut second).await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(second.uncommitted_events().len(), 1);
    assert_eq!(sourcing.version("log-3").await?, 4);
    Ok(())
}

#[tokio::test]
async fn missing_and_unregistered_aggregates() -> anyhow::Result<()> {
    let sourcing = sourcing();
    let missing: Option<NutritionLog> = sourcing.load_aggregate("nobody", None).await?;
    assert!(missing.is_none());
    assert!(!sourcing.exists("nobody").await?);

    let bare = EventSourcing::new(store());
    let err = bare
        .load_aggregate::<NutritionLog>("log-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::UnknownAggregateType { .. }));

    // 没有未提交事件时保存是空操作，即使类型未注册
    let mut untouched = NutritionLog::new("log-1".to_string());
    assert_eq!(bare.save_aggregate(&mut untouched).await?, 0);
    Ok(())
}

#[tokio::test]
async fn interleaved_writers_cannot_both_append() -> anyhow::Result<()> {
    let backend = Arc::new(YieldingBackend(InMemoryEventBackend::new()));
    let sourcing = EventSourcing::new(register_payloads(EventStore::new(backend.clone())));
    sourcing.register_aggregate_type::<NutritionLog>();

    let mut log = new_log("log-6")?;
    sourcing.save_aggregate(&mut log).await?;

    let mut a: NutritionLog = sourcing.load_aggregate("log-6", None).await?.unwrap();
    let mut b: NutritionLog = sourcing.load_aggregate("log-6", None).await?.unwrap();
    a.record(&MealLogged {
        name: "apple".into(),
        calories: 95,
    })?;
    b.record(&MealLogged {
        name: "cake".into(),
        calories: 600,
    })?;

    let (a_saved, b_saved) = tokio::join!(
        sourcing.save_aggregate(&mut a),
        sourcing.save_aggregate(&mut b)
    );
    assert_eq!(a_saved.is_ok() as u8 + b_saved.is_ok() as u8, 1);
    let loser = a_saved.err().or(b_saved.err()).unwrap();
    assert!(loser.is_concurrency_conflict());

    let versions: Vec<usize> = backend
        .load_raw(&EventQuery::for_aggregate("log-6"))
        .await?
        .iter()
        .map(SerializedEvent::aggregate_version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn replay_timeline_and_delete() -> anyhow::Result<()> {
    let sourcing = sourcing();
    let mut log = new_log("log-4")?;
    log.record(&LogClosed {})?;
    sourcing.save_aggregate(&mut log).await?;

    let at_two: NutritionLog = sourcing.replay_aggregate("log-4", Some(2)).await?.unwrap();
    assert_eq!(at_two.version(), 2);
    assert_eq!(at_two.meals, vec!["oats".to_string()]);
    assert!(!at_two.is_deleted());

    let full: NutritionLog = sourcing.replay_aggregate("log-4", None).await?.unwrap();
    assert!(full.is_deleted());

    let meals = sourcing
        .aggregate_timeline("log-4", Some(&["meal.logged"][..]))
        .await?;
    assert_eq!(meals.len(), 2);
    assert_eq!(sourcing.aggregate_timeline("log-4", None).await?.len(), 4);

    assert!(sourcing.exists("log-4").await?);
    assert_eq!(sourcing.delete_aggregate("log-4").await?, 4);
    assert!(!sourcing.exists("log-4").await?);
    assert_eq!(
        sourcing
            .event_store()
            .event_count(&EventQuery::for_aggregate("log-4"))
            .await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn snapshots_shortcut_replay_without_changing_state() -> anyhow::Result<()> {
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let sourcing = EventSourcing::builder()
        .event_store(store())
        .snapshot_store(snapshots.clone())
        .snapshot_policy(SnapshotPolicy::Every(2))
        .build();
    sourcing.register_aggregate_type::<NutritionLog>();

    let mut log = new_log("log-5")?;
    sourcing.save_aggregate(&mut log).await?;

    let snapshot = snapshots.latest("log-5").await?.expect("snapshot written");
    assert_eq!(snapshot.version(), 3);
    assert_eq!(snapshot.aggregate_type(), NutritionLog::TYPE);

    log.record(&MealLogged {
        name: "soup".into(),
        calories: 200,
    })?;
    sourcing.save_aggregate(&mut log).await?;

    let loaded: NutritionLog = sourcing.load_aggregate("log-5", Some(4)).await?.unwrap();
    assert_eq!(loaded, log);

    sourcing.delete_aggregate("log-5").await?;
    assert!(snapshots.latest("log-5").await?.is_none());
    Ok(())
}
