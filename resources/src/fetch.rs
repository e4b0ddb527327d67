use std::{
    fmt, io,
    pin::Pin,
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::StreamExt;
use reqwest::StatusCode;
use url::Url;

use crate::FetchError;

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Arc<str>, FetchError>> + Send + 'a>>;

/// Retrieves the text of a resource URL.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a>;
}

#[derive(Clone, Debug)]
pub struct HttpFetcherOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for HttpFetcherOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: Arc<OnceLock<reqwest::Client>>,
    options: HttpFetcherOptions,
}

impl HttpFetcher {
    pub fn with_options(options: HttpFetcherOptions) -> Self {
        Self {
            client: Arc::new(OnceLock::new()),
            options,
        }
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

    async fn get(&self, url: &Url) -> Result<Arc<str>, FetchError> {
        let res = self.client()?.get(url.clone()).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { url: url.clone() });
        }
        let res = res.error_for_status()?;

        let max_bytes = self.options.max_body_bytes;
        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > max_bytes {
                return Err(FetchError::ResponseTooLarge {
                    url: url.clone(),
                    max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        let text = String::from_utf8(body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(text.into())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        Box::pin(self.get(url))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        Box::pin(async move {
            let path = url.to_file_path().map_err(|()| FetchError::InvalidUrl {
                url: url.to_string(),
                message: "not a local file path".to_string(),
            })?;
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(text.into()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(FetchError::NotFound { url: url.clone() })
                }
                Err(err) => Err(err.into()),
            }
        })
    }
}

/// A fetcher registered for a set of custom URL schemes.
#[derive(Clone)]
pub struct SchemeFetcher {
    schemes: Arc<[Arc<str>]>,
    fetcher: Arc<dyn Fetcher>,
}

impl fmt::Debug for SchemeFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeFetcher")
            .field("schemes", &self.schemes)
            .finish_non_exhaustive()
    }
}

impl SchemeFetcher {
    pub fn new<I, S>(schemes: I, fetcher: Arc<dyn Fetcher>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let schemes: Vec<Arc<str>> = schemes.into_iter().map(Into::into).collect();
        Self {
            schemes: schemes.into(),
            fetcher,
        }
    }

    pub fn schemes(&self) -> &[Arc<str>] {
        &self.schemes
    }
}

/// Picks a fetcher by URL scheme. Custom fetchers take precedence over the built-in
/// `file` and `http(s)` fetchers; later registrations shadow earlier ones.
#[derive(Clone, Debug, Default)]
pub(crate) struct FetchDispatch {
    file: FileFetcher,
    http: HttpFetcher,
    custom: Vec<SchemeFetcher>,
}

impl FetchDispatch {
    pub(crate) fn with_http(&self, http: HttpFetcher) -> Self {
        Self {
            file: self.file,
            http,
            custom: self.custom.clone(),
        }
    }

    pub(crate) fn with_fetcher(&self, fetcher: SchemeFetcher) -> Self {
        let mut custom = self.custom.clone();
        custom.push(fetcher);
        Self {
            file: self.file,
            http: self.http.clone(),
            custom,
        }
    }

    pub(crate) async fn fetch(&self, url: &Url) -> Result<Arc<str>, FetchError> {
        let scheme = url.scheme();
        if let Some(custom) = self
            .custom
            .iter()
            .rev()
            .find(|custom| custom.schemes().iter().any(|s| &**s == scheme))
        {
            return custom.fetcher.fetch(url).await;
        }
        match scheme {
            "file" => self.file.fetch(url).await,
            "http" | "https" => self.http.fetch(url).await,
            scheme => Err(FetchError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_fetcher_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.js");
        std::fs::write(&path, "exports.x = 1;").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let text = FileFetcher.fetch(&url).await.unwrap();
        assert_eq!(&*text, "exports.x = 1;");

        let missing = Url::from_file_path(dir.path().join("nope.js")).unwrap();
        assert!(matches!(
            FileFetcher.fetch(&missing).await,
            Err(FetchError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let dispatch = FetchDispatch::default();
        let url = Url::parse("gopher://x/y.js").unwrap();
        assert!(matches!(
            dispatch.fetch(&url).await,
            Err(FetchError::UnsupportedScheme { scheme }) if scheme == "gopher"
        ));
    }
}
