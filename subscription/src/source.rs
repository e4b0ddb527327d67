use std::{future::Future, pin::Pin};

use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;
use vitrine_descriptor::{Datasource, Timewindow};

pub type FetchFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Where subscriptions get their data from.
pub trait TelemetrySource: Send + Sync {
    /// Most recent value of every data key of `datasource`, keyed by data key name.
    fn latest_values<'a>(&'a self, datasource: &'a Datasource) -> FetchFuture<'a, Map<String, Value>>;

    /// Time series points of `datasource` inside the query window.
    fn timeseries<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>>;

    /// Alarms raised for `datasource` inside the query window.
    fn alarms<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>>;
}

/// A closed time range `[start_ms, end_ms]` plus the aggregation the window asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesQuery {
    pub start_ms: i64,
    pub end_ms: i64,
    pub interval_ms: u64,
    pub agg: String,
    pub limit: u32,
}

impl SeriesQuery {
    pub fn ending_at(timewindow: &Timewindow, end_ms: i64) -> Self {
        let duration = i64::try_from(timewindow.duration_ms()).unwrap_or(i64::MAX);
        let (agg, limit) = match (&timewindow.history, &timewindow.aggregation) {
            (_, Some(aggregation)) => (aggregation.kind.clone(), aggregation.limit),
            (Some(history), None) => (history.aggregation_type.clone(), history.limit),
            (None, None) => ("NONE".to_string(), 100),
        };
        let interval_ms = match &timewindow.aggregation {
            Some(aggregation) if aggregation.interval > 0 => aggregation.interval,
            _ => timewindow.interval_ms(),
        };
        Self {
            start_ms: end_ms.saturating_sub(duration),
            end_ms,
            interval_ms,
            agg,
            limit,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        (self.start_ms..=self.end_ms).contains(&ts)
    }
}

/// Failure to fetch one datasource. Subscriptions downgrade it to empty data.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum FetchError {
    #[error("datasource `{datasource}` has no resolved entity")]
    #[diagnostic(code(subscription::no_entity))]
    NoEntity { datasource: String },
    #[error("datasource `{datasource}` is unavailable")]
    #[diagnostic(code(subscription::unavailable))]
    Unavailable { datasource: String },
    #[error("unsupported URL scheme `{scheme}`")]
    #[diagnostic(code(subscription::unsupported_scheme))]
    UnsupportedScheme { scheme: String },
    #[error("`{url}` cannot be used as a telemetry base URL")]
    #[diagnostic(code(subscription::invalid_base_url))]
    InvalidBaseUrl { url: Url },
    #[error("response body from `{url}` exceeds max size {max_bytes} bytes")]
    #[diagnostic(code(subscription::response_too_large))]
    ResponseTooLarge { url: Url, max_bytes: usize },
    #[error("unexpected response from `{url}`: {message}")]
    #[diagnostic(code(subscription::invalid_response))]
    InvalidResponse { url: Url, message: String },
    #[error("http error: {0}")]
    #[diagnostic(code(subscription::http_error))]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use vitrine_descriptor::{Aggregation, Timewindow};

    use super::SeriesQuery;

    #[test]
    fn query_covers_the_window_ending_at_the_given_instant() {
        let query = SeriesQuery::ending_at(&Timewindow::realtime(60_000), 100_000);
        assert_eq!((query.start_ms, query.end_ms), (40_000, 100_000));
        assert_eq!(query.agg, "NONE");
        assert!(query.contains(40_000));
        assert!(query.contains(100_000));
        assert!(!query.contains(100_001));
    }

    #[test]
    fn explicit_aggregation_wins_over_history_defaults() {
        let mut timewindow = Timewindow::history(3_600_000, 60_000);
        let query = SeriesQuery::ending_at(&timewindow, 3_600_000);
        assert_eq!((query.agg.as_str(), query.limit, query.interval_ms), ("NONE", 100, 60_000));

        timewindow.aggregation = Some(Aggregation {
            kind: "AVG".to_string(),
            limit: 500,
            interval: 300_000,
        });
        let query = SeriesQuery::ending_at(&timewindow, 3_600_000);
        assert_eq!((query.agg.as_str(), query.limit, query.interval_ms), ("AVG", 500, 300_000));
        assert_eq!(query.start_ms, 0);
    }
}
