use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use vitrine_descriptor::Datasource;

use crate::source::{FetchError, FetchFuture, SeriesQuery, TelemetrySource};

/// Telemetry for one datasource name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticDatasource {
    pub latest: Map<String, Value>,
    /// Points carrying a numeric `ts`.
    pub series: Vec<Value>,
    /// Alarms carrying a numeric `createdTime`.
    pub alarms: Vec<Value>,
}

/// In-memory telemetry keyed by datasource name. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct StaticTelemetrySource {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    datasources: RwLock<HashMap<String, StaticDatasource>>,
    failing: RwLock<HashSet<String>>,
    requests: AtomicUsize,
}

impl StaticTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"<datasource name>": {"latest": {...}, "series": [...], "alarms": [...]}}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let datasources: HashMap<String, StaticDatasource> = serde_json::from_str(json)?;
        let source = Self::new();
        *source.inner.datasources.write() = datasources;
        Ok(source)
    }

    pub fn insert(&self, name: impl Into<String>, data: StaticDatasource) {
        self.inner.datasources.write().insert(name.into(), data);
    }

    pub fn set_latest(&self, name: &str, key: impl Into<String>, value: Value) {
        self.inner
            .datasources
            .write()
            .entry(name.to_string())
            .or_default()
            .latest
            .insert(key.into(), value);
    }

    pub fn push_point(&self, name: &str, point: Value) {
        self.inner
            .datasources
            .write()
            .entry(name.to_string())
            .or_default()
            .series
            .push(point);
    }

    /// Make every fetch of `name` fail until [`StaticTelemetrySource::recover`].
    pub fn fail(&self, name: impl Into<String>) {
        self.inner.failing.write().insert(name.into());
    }

    pub fn recover(&self, name: &str) {
        self.inner.failing.write().remove(name);
    }

    /// Number of fetches served or refused so far.
    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    fn lookup<T>(
        &self,
        datasource: &Datasource,
        read: impl FnOnce(&StaticDatasource) -> T,
    ) -> Result<T, FetchError>
    where
        T: Default,
    {
        self.inner.requests.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing.read().contains(&datasource.name) {
            return Err(FetchError::Unavailable {
                datasource: datasource.name.clone(),
            });
        }
        Ok(self
            .inner
            .datasources
            .read()
            .get(&datasource.name)
            .map(read)
            .unwrap_or_default())
    }
}

fn within(items: &[Value], field: &str, query: &SeriesQuery) -> Vec<Value> {
    items
        .iter()
        .filter(|item| {
            item.get(field)
                .and_then(Value::as_i64)
                .is_some_and(|ts| query.contains(ts))
        })
        .cloned()
        .collect()
}

impl TelemetrySource for StaticTelemetrySource {
    fn latest_values<'a>(&'a self, datasource: &'a Datasource) -> FetchFuture<'a, Map<String, Value>> {
        let result = self.lookup(datasource, |data| {
            let mut latest = data.latest.clone();
            if !datasource.data_keys.is_empty() {
                latest.retain(|key, _| datasource.data_keys.iter().any(|k| &k.name == key));
            }
            latest
        });
        Box::pin(async move { result })
    }

    fn timeseries<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>> {
        let result = self.lookup(datasource, |data| within(&data.series, "ts", query));
        Box::pin(async move { result })
    }

    fn alarms<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>> {
        let result = self.lookup(datasource, |data| within(&data.alarms, "createdTime", query));
        Box::pin(async move { result })
    }
}
