use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::StreamExt;
use serde_json::{Map, Value};
use url::Url;
use vitrine_descriptor::{Datasource, EntityRef};

use crate::source::{FetchError, FetchFuture, SeriesQuery, TelemetrySource};

/// Reads telemetry and alarms from the platform's REST API.
#[derive(Clone, Debug)]
pub struct HttpTelemetrySource {
    base: Url,
    client: Arc<OnceLock<reqwest::Client>>,
    options: HttpTelemetryOptions,
}

#[derive(Clone, Debug)]
pub struct HttpTelemetryOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    /// Sent as `X-Authorization: Bearer <token>` when set.
    pub token: Option<String>,
}

impl Default for HttpTelemetryOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 8 * 1024 * 1024,
            token: None,
        }
    }
}

impl HttpTelemetrySource {
    pub fn new(base: Url) -> Result<Self, FetchError> {
        Self::with_options(base, HttpTelemetryOptions::default())
    }

    pub fn with_options(base: Url, options: HttpTelemetryOptions) -> Result<Self, FetchError> {
        match base.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FetchError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                });
            }
        }
        if base.cannot_be_a_base() {
            return Err(FetchError::InvalidBaseUrl { url: base });
        }
        Ok(Self {
            base,
            client: Arc::new(OnceLock::new()),
            options,
        })
    }

    fn client(&self) -> Result<&reqwest::Client, FetchError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(self.options.connect_timeout)
            .timeout(self.options.request_timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidBaseUrl {
                url: self.base.clone(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn timeseries_url(&self, entity: &EntityRef) -> Result<Url, FetchError> {
        self.url(&[
            "api",
            "plugins",
            "telemetry",
            &entity.entity_type,
            &entity.id,
            "values",
            "timeseries",
        ])
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        let mut request = self.client()?.get(url.clone());
        if let Some(token) = &self.options.token {
            request = request.header("X-Authorization", format!("Bearer {token}"));
        }
        let res = request.send().await?.error_for_status()?;

        let max_bytes = self.options.max_body_bytes;
        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > max_bytes {
                return Err(FetchError::ResponseTooLarge { url, max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        serde_json::from_slice(&body).map_err(|err| FetchError::InvalidResponse {
            url,
            message: err.to_string(),
        })
    }

    async fn fetch_latest(&self, datasource: &Datasource) -> Result<Map<String, Value>, FetchError> {
        let entity = entity_of(datasource)?;
        let mut url = self.timeseries_url(entity)?;
        url.query_pairs_mut().append_pair("keys", &datasource.key_list());
        let body = self.get_json(url.clone()).await?;
        let series = as_series(body, &url)?;
        Ok(series
            .into_iter()
            .filter_map(|(key, points)| {
                let latest = points.as_array()?.first()?.get("value")?.clone();
                Some((key, latest))
            })
            .collect())
    }

    async fn fetch_series(
        &self,
        datasource: &Datasource,
        query: &SeriesQuery,
    ) -> Result<Vec<Value>, FetchError> {
        let entity = entity_of(datasource)?;
        let mut url = self.timeseries_url(entity)?;
        url.query_pairs_mut()
            .append_pair("keys", &datasource.key_list())
            .append_pair("startTs", &query.start_ms.to_string())
            .append_pair("endTs", &query.end_ms.to_string())
            .append_pair("interval", &query.interval_ms.to_string())
            .append_pair("agg", &query.agg)
            .append_pair("limit", &query.limit.to_string());
        let body = self.get_json(url.clone()).await?;
        Ok(flatten_series(as_series(body, &url)?))
    }

    async fn fetch_alarms(
        &self,
        datasource: &Datasource,
        query: &SeriesQuery,
    ) -> Result<Vec<Value>, FetchError> {
        let entity = entity_of(datasource)?;
        let mut url = self.url(&["api", "alarm", &entity.entity_type, &entity.id])?;
        url.query_pairs_mut()
            .append_pair("pageSize", &query.limit.to_string())
            .append_pair("page", "0")
            .append_pair("startTime", &query.start_ms.to_string())
            .append_pair("endTime", &query.end_ms.to_string());
        match self.get_json(url.clone()).await? {
            Value::Object(mut page) => match page.remove("data") {
                Some(Value::Array(alarms)) => Ok(alarms),
                _ => Err(FetchError::InvalidResponse {
                    url,
                    message: "alarm page has no `data` array".to_string(),
                }),
            },
            _ => Err(FetchError::InvalidResponse {
                url,
                message: "expected an alarm page object".to_string(),
            }),
        }
    }
}

impl TelemetrySource for HttpTelemetrySource {
    fn latest_values<'a>(&'a self, datasource: &'a Datasource) -> FetchFuture<'a, Map<String, Value>> {
        Box::pin(self.fetch_latest(datasource))
    }

    fn timeseries<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>> {
        Box::pin(self.fetch_series(datasource, query))
    }

    fn alarms<'a>(
        &'a self,
        datasource: &'a Datasource,
        query: &'a SeriesQuery,
    ) -> FetchFuture<'a, Vec<Value>> {
        Box::pin(self.fetch_alarms(datasource, query))
    }
}

fn entity_of(datasource: &Datasource) -> Result<&EntityRef, FetchError> {
    datasource.entity.as_ref().ok_or_else(|| FetchError::NoEntity {
        datasource: datasource.name.clone(),
    })
}

fn as_series(body: Value, url: &Url) -> Result<Map<String, Value>, FetchError> {
    match body {
        Value::Object(series) => Ok(series),
        _ => Err(FetchError::InvalidResponse {
            url: url.clone(),
            message: "expected an object keyed by data key".to_string(),
        }),
    }
}

/// `{key: [{ts, value}]}` to `[{ts, key, value}]`, ordered by timestamp then key.
fn flatten_series(series: Map<String, Value>) -> Vec<Value> {
    let mut points: Vec<(i64, String, Value)> = Vec::new();
    for (key, values) in series {
        let Value::Array(values) = values else {
            continue;
        };
        for point in values {
            let Some(ts) = point.get("ts").and_then(Value::as_i64) else {
                continue;
            };
            let value = point.get("value").cloned().unwrap_or(Value::Null);
            points.push((ts, key.clone(), value));
        }
    }
    points.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    points
        .into_iter()
        .map(|(ts, key, value)| {
            let mut point = Map::new();
            point.insert("ts".to_string(), Value::from(ts));
            point.insert("key".to_string(), Value::String(key));
            point.insert("value".to_string(), value);
            Value::Object(point)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read as _, Write as _},
        net::TcpListener,
        thread,
        time::Duration,
    };

    use serde_json::json;
    use url::Url;
    use vitrine_descriptor::{DataKey, Datasource, EntityRef, Timewindow};

    use super::{HttpTelemetrySource, flatten_series};
    use crate::source::{FetchError, SeriesQuery, TelemetrySource};

    /// Serves one request with a JSON `body` and hands back the request target.
    fn serve_once(body: String) -> (Url, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let read = stream.read(&mut chunk).unwrap();
                if read == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..read]);
            }
            let request = String::from_utf8_lossy(&buf).to_string();
            let target = request
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or_default()
                .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            target
        });
        (Url::parse(&format!("http://{addr}/")).unwrap(), handle)
    }

    fn datasource() -> Datasource {
        Datasource::named("d1")
            .with_key(DataKey::timeseries("temperature"))
            .with_key(DataKey::timeseries("humidity"))
            .with_entity(EntityRef {
                entity_type: "DEVICE".to_string(),
                id: "dev-1".to_string(),
            })
    }

    #[tokio::test]
    async fn latest_values_take_the_first_point_of_each_key() {
        let body = json!({
            "temperature": [{ "ts": 2, "value": "21.5" }],
            "humidity": [{ "ts": 2, "value": "40" }],
        });
        let (base, server) = serve_once(body.to_string());
        let source = HttpTelemetrySource::new(base).unwrap();

        let values = source.latest_values(&datasource()).await.unwrap();
        assert_eq!(values["temperature"], json!("21.5"));
        assert_eq!(values["humidity"], json!("40"));
        assert_eq!(
            server.join().unwrap(),
            "/api/plugins/telemetry/DEVICE/dev-1/values/timeseries?keys=temperature%2Chumidity"
        );
    }

    #[tokio::test]
    async fn timeseries_query_carries_the_window() {
        let body = json!({ "temperature": [{ "ts": 5, "value": 1 }] });
        let (base, server) = serve_once(body.to_string());
        let source = HttpTelemetrySource::new(base).unwrap();
        let query = SeriesQuery::ending_at(&Timewindow::realtime(1_000), 10_000);

        let points = source.timeseries(&datasource(), &query).await.unwrap();
        assert_eq!(points, vec![json!({ "ts": 5, "key": "temperature", "value": 1 })]);
        let target = server.join().unwrap();
        assert!(target.contains("startTs=9000&endTs=10000"), "{target}");
        assert!(target.contains("agg=NONE"), "{target}");
    }

    #[tokio::test]
    async fn missing_entity_fails_without_a_request() {
        let source = HttpTelemetrySource::new(Url::parse("http://127.0.0.1:9/").unwrap()).unwrap();
        let err = source
            .latest_values(&Datasource::named("loose"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoEntity { datasource } if datasource == "loose"));
    }

    #[test]
    fn rejects_non_http_base() {
        let err = HttpTelemetrySource::new(Url::parse("file:///tmp").unwrap()).unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { scheme } if scheme == "file"));
    }

    #[test]
    fn series_are_flattened_in_time_order() {
        let series = json!({
            "b": [{ "ts": 2, "value": "x" }, { "ts": 1, "value": "y" }],
            "a": [{ "ts": 2, "value": "z" }],
        });
        let points = flatten_series(series.as_object().unwrap().clone());
        let order: Vec<(i64, &str)> = points
            .iter()
            .map(|p| (p["ts"].as_i64().unwrap(), p["key"].as_str().unwrap()))
            .collect();
        assert_eq!(order, vec![(1, "b"), (2, "a"), (2, "b")]);
    }
}
