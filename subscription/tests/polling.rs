use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::json;
use vitrine_descriptor::{DataKey, Datasource, SemanticType, Timewindow};
use vitrine_subscription::{
    StaticTelemetrySource, SubscriptionManager, SubscriptionOptions,
};

/// Let spawned acquisition tasks run without letting the paused clock auto-advance.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn manager(source: &StaticTelemetrySource) -> SubscriptionManager {
    SubscriptionManager::with_refresh_interval(Arc::new(source.clone()), Duration::from_secs(1))
}

fn latest(datasources: Vec<Datasource>, timewindow: Option<Timewindow>) -> SubscriptionOptions {
    SubscriptionOptions {
        kind: SemanticType::Latest,
        datasources,
        timewindow,
    }
}

#[tokio::test(start_paused = true)]
async fn failing_latest_datasource_yields_empty_data() {
    let source = StaticTelemetrySource::new();
    source.fail("d1");
    let manager = manager(&source);

    let d1 = Datasource::named("d1").with_key(DataKey::timeseries("temperature"));
    let id = manager.create(latest(vec![d1], None));
    settle().await;

    let data = manager.data(&id).unwrap();
    assert_eq!(
        serde_json::to_value(&data).unwrap(),
        json!([{
            "datasource": {
                "type": "entity",
                "name": "d1",
                "entityAliasId": "",
                "dataKeys": [{ "name": "temperature", "type": "timeseries" }]
            },
            "data": []
        }])
    );
    assert_eq!(manager.latest_data(&id).unwrap(), data);
    let state = manager.state(&id).unwrap();
    assert!(!state.loading);
    assert_eq!(state.error, None);
}

#[tokio::test(start_paused = true)]
async fn latest_fills_both_snapshots() {
    let source = StaticTelemetrySource::new();
    source.set_latest("d1", "temperature", json!(21.5));
    let manager = manager(&source);

    let id = manager.create(latest(vec![Datasource::named("d1")], None));
    settle().await;

    let data = manager.data(&id).unwrap();
    let values = data[0].latest_values.as_ref().unwrap();
    assert_eq!(values["temperature"], json!(21.5));
    assert_eq!(manager.latest_data(&id).unwrap(), data);
    let state = manager.state(&id).unwrap();
    assert_eq!((state.data_revision, state.latest_revision), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn removing_a_subscription_stops_fetches() {
    let source = StaticTelemetrySource::new();
    source.set_latest("d1", "temperature", json!(1));
    let manager = manager(&source);

    let id = manager.create(latest(
        vec![Datasource::named("d1")],
        Some(Timewindow::realtime(60_000)),
    ));
    settle().await;
    assert_eq!(source.requests(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(source.requests(), 2);

    assert!(manager.remove(&id));
    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(source.requests(), 2);
    assert!(manager.data(&id).is_none());
    assert!(manager.state(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn revisions_move_only_when_data_changes() {
    let source = StaticTelemetrySource::new();
    source.set_latest("d1", "temperature", json!(1));
    let manager = manager(&source);

    let id = manager.create(latest(
        vec![Datasource::named("d1")],
        Some(Timewindow::realtime(60_000)),
    ));
    let mut rx = manager.watch(&id).unwrap();
    settle().await;
    assert_eq!(manager.state(&id).unwrap().data_revision, 1);
    let _ = rx.borrow_and_update();

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(source.requests(), 2);
    assert!(!rx.has_changed().unwrap());
    assert_eq!(manager.state(&id).unwrap().data_revision, 1);

    source.set_latest("d1", "temperature", json!(2));
    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(rx.has_changed().unwrap());
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!((snapshot.data_revision, snapshot.latest_revision), (2, 2));
    assert_eq!(
        snapshot.data[0].latest_values.as_ref().unwrap()["temperature"],
        json!(2)
    );

    manager.remove(&id);
    assert!(rx.changed().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn timeseries_fetches_points_inside_the_window() {
    let now_ms = i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis(),
    )
    .unwrap();
    let source = StaticTelemetrySource::new();
    source.push_point("d1", json!({ "ts": now_ms - 120_000, "temperature": 1 }));
    source.push_point("d1", json!({ "ts": now_ms - 1_000, "temperature": 2 }));
    let manager = manager(&source);

    let id = manager.create(SubscriptionOptions {
        kind: SemanticType::Timeseries,
        datasources: vec![Datasource::named("d1")],
        timewindow: Some(Timewindow::realtime(60_000)),
    });
    settle().await;

    let data = manager.data(&id).unwrap();
    assert_eq!(data[0].data.len(), 1);
    assert_eq!(data[0].data[0]["temperature"], json!(2));
    assert!(manager.latest_data(&id).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn updating_the_timewindow_restarts_under_the_same_id() {
    let source = StaticTelemetrySource::new();
    let manager = manager(&source);

    let id = manager.create(SubscriptionOptions {
        kind: SemanticType::Timeseries,
        datasources: vec![Datasource::named("d1")],
        timewindow: Some(Timewindow::realtime(60_000)),
    });
    settle().await;
    assert_eq!(source.requests(), 1);

    assert!(manager.update_timewindow(&id, Timewindow::history(3_600_000, 60_000)));
    settle().await;
    assert_eq!(source.requests(), 2);
    assert!(
        manager
            .options(&id)
            .unwrap()
            .timewindow
            .unwrap()
            .is_history()
    );

    // History windows are fetched once.
    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(source.requests(), 2);
    assert!(!manager.state(&id).unwrap().loading);
}

#[tokio::test(start_paused = true)]
async fn types_without_a_data_path_report_an_error() {
    let source = StaticTelemetrySource::new();
    let manager = manager(&source);

    let id = manager.create(SubscriptionOptions {
        kind: SemanticType::Rpc,
        datasources: vec![Datasource::named("device")],
        timewindow: None,
    });
    settle().await;

    let state = manager.state(&id).unwrap();
    assert!(!state.loading);
    assert!(state.error.unwrap().contains("rpc"));
    assert_eq!(source.requests(), 0);
}
