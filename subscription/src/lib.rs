//! Data subscriptions for placed widgets.
//!
//! A subscription fetches its datasources once on creation and, for realtime
//! windows, again on every refresh tick until it is removed. Snapshots are
//! published through a `tokio::sync::watch` channel; each snapshot carries
//! revisions that only move when the data itself changes.

mod fixed;
mod http;
mod source;

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
pub use fixed::{StaticDatasource, StaticTelemetrySource};
pub use http::{HttpTelemetryOptions, HttpTelemetrySource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
pub use source::{FetchError, FetchFuture, SeriesQuery, TelemetrySource};
use tokio::{sync::watch, task::AbortHandle, time::Instant};
use vitrine_descriptor::{Datasource, SemanticType, Timewindow};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to subscribe to. Also the shape scripts pass to
/// `ctx.subscriptionApi.createSubscription`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    #[serde(rename = "type", default)]
    pub kind: SemanticType,
    #[serde(default)]
    pub datasources: Vec<Datasource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timewindow: Option<Timewindow>,
}

/// Data fetched for one datasource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceData {
    pub datasource: Datasource,
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_values: Option<Map<String, Value>>,
}

impl DatasourceData {
    pub fn empty(datasource: Datasource) -> Self {
        Self {
            datasource,
            data: Vec::new(),
            latest_values: None,
        }
    }
}

/// Everything a subscription currently holds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub data: Vec<DatasourceData>,
    pub latest_data: Vec<DatasourceData>,
    pub loading: bool,
    pub error: Option<String>,
    /// Bumped each time `data` changes.
    pub data_revision: u64,
    /// Bumped each time `latest_data` changes.
    pub latest_revision: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub loading: bool,
    pub error: Option<String>,
    pub data_revision: u64,
    pub latest_revision: u64,
}

/// Owns every subscription and its polling task. Clones share the same set.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn TelemetrySource>,
    subscriptions: DashMap<SubscriptionId, Entry>,
    counter: AtomicU64,
    refresh_interval: Duration,
    clock: Clock,
}

struct Entry {
    options: SubscriptionOptions,
    generation: u64,
    snapshot: watch::Sender<Snapshot>,
    task: Option<AbortHandle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            if let Some(task) = &entry.task {
                task.abort();
            }
        }
    }
}

/// Wall-clock milliseconds derived from the tokio clock, so window ends never
/// move backwards and follow paused time in tests.
struct Clock {
    epoch_ms: i64,
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self::with_refresh_interval(source, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(source: Arc<dyn TelemetrySource>, refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                subscriptions: DashMap::new(),
                counter: AtomicU64::new(0),
                refresh_interval,
                clock: Clock::new(),
            }),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh_interval
    }

    /// Register a subscription and start acquiring its data. Never fails: problems
    /// show up in [`SubscriptionManager::state`].
    pub fn create(&self, options: SubscriptionOptions) -> SubscriptionId {
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = SubscriptionId(format!("subscription-{n}"));
        let (snapshot, _) = watch::channel(Snapshot {
            loading: true,
            ..Snapshot::default()
        });
        self.inner.subscriptions.insert(
            id.clone(),
            Entry {
                options: options.clone(),
                generation: 0,
                snapshot,
                task: None,
            },
        );
        tracing::debug!(subscription = %id, kind = options.kind.as_str(), datasources = options.datasources.len(), "subscription created");
        self.start(&id, 0, options);
        id
    }

    /// Stop acquisition and drop the snapshots. Returns whether `id` existed.
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        match self.inner.subscriptions.remove(id) {
            Some((_, entry)) => {
                if let Some(task) = entry.task {
                    task.abort();
                }
                tracing::debug!(subscription = %id, "subscription removed");
                true
            }
            None => false,
        }
    }

    /// Swap the window and restart acquisition under the same id.
    pub fn update_timewindow(&self, id: &SubscriptionId, timewindow: Timewindow) -> bool {
        let (generation, options) = {
            let Some(mut entry) = self.inner.subscriptions.get_mut(id) else {
                return false;
            };
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.generation += 1;
            entry.options.timewindow = Some(timewindow);
            entry.snapshot.send_if_modified(|snapshot| {
                let changed = !snapshot.loading || snapshot.error.is_some();
                snapshot.loading = true;
                snapshot.error = None;
                changed
            });
            (entry.generation, entry.options.clone())
        };
        self.start(id, generation, options);
        true
    }

    pub fn data(&self, id: &SubscriptionId) -> Option<Vec<DatasourceData>> {
        let entry = self.inner.subscriptions.get(id)?;
        let data = entry.snapshot.borrow().data.clone();
        Some(data)
    }

    pub fn latest_data(&self, id: &SubscriptionId) -> Option<Vec<DatasourceData>> {
        let entry = self.inner.subscriptions.get(id)?;
        let data = entry.snapshot.borrow().latest_data.clone();
        Some(data)
    }

    pub fn state(&self, id: &SubscriptionId) -> Option<SubscriptionState> {
        let entry = self.inner.subscriptions.get(id)?;
        let snapshot = entry.snapshot.borrow();
        Some(SubscriptionState {
            loading: snapshot.loading,
            error: snapshot.error.clone(),
            data_revision: snapshot.data_revision,
            latest_revision: snapshot.latest_revision,
        })
    }

    pub fn options(&self, id: &SubscriptionId) -> Option<SubscriptionOptions> {
        let entry = self.inner.subscriptions.get(id)?;
        Some(entry.options.clone())
    }

    /// Receiver notified on every published change. Closed once `id` is removed.
    pub fn watch(&self, id: &SubscriptionId) -> Option<watch::Receiver<Snapshot>> {
        let entry = self.inner.subscriptions.get(id)?;
        Some(entry.snapshot.subscribe())
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.inner.subscriptions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscriptions.is_empty()
    }

    fn start(&self, id: &SubscriptionId, generation: u64, options: SubscriptionOptions) {
        if !options.datasources.is_empty() && !options.kind.consumes_data() {
            let message = format!("widgets of type `{}` have no data path", options.kind.as_str());
            tracing::warn!(subscription = %id, %message, "subscription cannot fetch data");
            self.inner.publish_error(id, generation, message);
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(subscription = %id, error = %err, "no async runtime for subscription");
                self.inner
                    .publish_error(id, generation, "no async runtime available".to_string());
                return;
            }
        };
        let task = handle.spawn(acquire(
            Arc::downgrade(&self.inner),
            id.clone(),
            generation,
            options,
        ));
        if let Some(mut entry) = self.inner.subscriptions.get_mut(id)
            && entry.generation == generation
        {
            entry.task = Some(task.abort_handle());
        } else {
            task.abort();
        }
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("refresh_interval", &self.inner.refresh_interval)
            .finish_non_exhaustive()
    }
}

/// Result of one acquisition round.
struct Fetched {
    data: Vec<DatasourceData>,
    latest: Option<Vec<DatasourceData>>,
}

impl Inner {
    /// Apply `update` to the snapshot of `id` if it is still alive and still on
    /// `generation`. Returns `false` when the caller should stop.
    fn publish(&self, id: &SubscriptionId, generation: u64, update: impl FnOnce(&mut Snapshot) -> bool) -> bool {
        let Some(entry) = self.subscriptions.get(id) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        entry.snapshot.send_if_modified(update);
        true
    }

    fn publish_error(&self, id: &SubscriptionId, generation: u64, message: String) {
        self.publish(id, generation, |snapshot| {
            snapshot.loading = false;
            snapshot.error = Some(message);
            true
        });
    }

    fn publish_fetched(&self, id: &SubscriptionId, generation: u64, fetched: Fetched) -> bool {
        self.publish(id, generation, |snapshot| {
            let mut changed = false;
            if snapshot.loading || snapshot.error.is_some() {
                snapshot.loading = false;
                snapshot.error = None;
                changed = true;
            }
            if snapshot.data != fetched.data {
                snapshot.data = fetched.data;
                snapshot.data_revision += 1;
                changed = true;
            }
            if let Some(latest) = fetched.latest
                && snapshot.latest_data != latest
            {
                snapshot.latest_data = latest;
                snapshot.latest_revision += 1;
                changed = true;
            }
            changed
        })
    }

    async fn fetch(&self, id: &SubscriptionId, options: &SubscriptionOptions, end_ms: i64) -> Fetched {
        let timewindow = options
            .timewindow
            .clone()
            .unwrap_or_else(|| Timewindow::realtime(Timewindow::DEFAULT_REALTIME_MS));
        let query = SeriesQuery::ending_at(&timewindow, end_ms);
        let rounds = options
            .datasources
            .iter()
            .map(|datasource| self.fetch_one(id, options.kind, datasource, &query));
        let data = futures::future::join_all(rounds).await;
        match options.kind {
            SemanticType::Latest => Fetched {
                latest: Some(data.clone()),
                data,
            },
            _ => Fetched { data, latest: None },
        }
    }

    async fn fetch_one(
        &self,
        id: &SubscriptionId,
        kind: SemanticType,
        datasource: &Datasource,
        query: &SeriesQuery,
    ) -> DatasourceData {
        let result = match kind {
            SemanticType::Latest => self
                .source
                .latest_values(datasource)
                .await
                .map(|values| DatasourceData {
                    datasource: datasource.clone(),
                    data: Vec::new(),
                    latest_values: Some(values),
                }),
            SemanticType::Alarm => self
                .source
                .alarms(datasource, query)
                .await
                .map(|alarms| DatasourceData {
                    data: alarms,
                    ..DatasourceData::empty(datasource.clone())
                }),
            _ => self
                .source
                .timeseries(datasource, query)
                .await
                .map(|points| DatasourceData {
                    data: points,
                    ..DatasourceData::empty(datasource.clone())
                }),
        };
        result.unwrap_or_else(|err| {
            tracing::warn!(subscription = %id, datasource = %datasource.name, error = %err, "datasource fetch failed; publishing empty data");
            DatasourceData::empty(datasource.clone())
        })
    }
}

/// Initial fetch, then one fetch per refresh tick while the window is realtime.
async fn acquire(inner: Weak<Inner>, id: SubscriptionId, generation: u64, options: SubscriptionOptions) {
    let polling = !options.datasources.is_empty()
        && options.timewindow.as_ref().is_some_and(Timewindow::is_realtime);
    let mut last_end = i64::MIN;
    loop {
        let Some(manager) = inner.upgrade() else {
            return;
        };
        let end_ms = manager.clock.now_ms().max(last_end);
        last_end = end_ms;
        let fetched = manager.fetch(&id, &options, end_ms).await;
        if !manager.publish_fetched(&id, generation, fetched) || !polling {
            return;
        }
        let interval = manager.refresh_interval;
        drop(manager);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use vitrine_descriptor::{Datasource, SemanticType};

    use super::{SubscriptionManager, SubscriptionOptions};
    use crate::StaticTelemetrySource;

    #[test]
    fn without_a_runtime_the_subscription_reports_an_error() {
        let manager = SubscriptionManager::new(Arc::new(StaticTelemetrySource::new()));
        let id = manager.create(SubscriptionOptions {
            kind: SemanticType::Latest,
            datasources: vec![Datasource::named("d1")],
            timewindow: None,
        });
        let state = manager.state(&id).unwrap();
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("no async runtime available"));
    }

    #[test]
    fn options_parse_from_script_shape() {
        let options: SubscriptionOptions = serde_json::from_value(json!({
            "type": "latest",
            "datasources": [{ "name": "d1", "dataKeys": [{ "name": "t" }] }],
            "timewindow": { "realtime": { "timewindowMs": 5000 } }
        }))
        .unwrap();
        assert_eq!(options.kind, SemanticType::Latest);
        assert_eq!(options.datasources[0].data_keys[0].kind, "timeseries");
        assert!(options.timewindow.unwrap().is_realtime());
    }

    #[test]
    fn ids_are_sequential() {
        let manager = SubscriptionManager::new(Arc::new(StaticTelemetrySource::new()));
        let a = manager.create(SubscriptionOptions::default());
        let b = manager.create(SubscriptionOptions::default());
        assert_eq!(a.as_str(), "subscription-1");
        assert_eq!(b.as_str(), "subscription-2");
        assert!(manager.remove(&a));
        assert!(!manager.remove(&a));
        assert_eq!(manager.len(), 1);
    }
}
