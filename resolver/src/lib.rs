pub mod bundle;
pub mod cache;
pub mod file;
pub mod http;
pub mod remote;

use std::{fmt, sync::Arc};

pub use bundle::BundleBackend;
pub use cache::Cache;
pub use file::FileBackend;
pub use http::{HttpBackend, HttpBackendOptions};
use miette::Diagnostic;
pub use remote::{Backend, FallbackBackend};
use url::Url;
use vitrine_descriptor::{Fqn, SharedWidgetType};

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("widget type `{fqn}` not found")]
    #[diagnostic(code(resolver::not_found))]
    NotFound { fqn: Fqn },
    #[error("unsupported URL scheme `{scheme}`")]
    #[diagnostic(code(resolver::unsupported_scheme))]
    UnsupportedScheme { scheme: String },
    #[error("`{url}` cannot be used as a backend base URL")]
    #[diagnostic(code(resolver::invalid_base_url))]
    InvalidBaseUrl { url: Url },
    #[error("response body from `{url}` exceeds max size {max_bytes} bytes (got {size} bytes)")]
    #[diagnostic(code(resolver::response_too_large))]
    ResponseTooLarge {
        url: Url,
        size: u64,
        max_bytes: usize,
    },
    #[error("requested `{requested}` but the document describes `{found}`")]
    #[diagnostic(code(resolver::fqn_mismatch))]
    FqnMismatch { requested: Fqn, found: Fqn },
    #[error("http error: {0}")]
    #[diagnostic(code(resolver::http_error))]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    #[diagnostic(code(resolver::io_error))]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Descriptor(#[from] vitrine_descriptor::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Resolves widget types by FQN through a [`Backend`], memoizing successes.
#[derive(Clone)]
pub struct DescriptorResolver {
    backend: Arc<dyn Backend>,
    cache: Cache,
}

impl fmt::Debug for DescriptorResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorResolver")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl DescriptorResolver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_cache(backend, Cache::default())
    }

    /// Share an existing cache, e.g. between a resolver and a tool that preloads it.
    pub fn with_cache(backend: Arc<dyn Backend>, cache: Cache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Concurrent calls for the same FQN share one backend fetch. A failed fetch is
    /// not remembered, so the next call tries the backend again.
    pub async fn resolve(&self, fqn: &Fqn) -> Result<SharedWidgetType, Error> {
        self.cache
            .get_or_fetch(fqn, || async {
                tracing::debug!(%fqn, "fetching widget type");
                let widget_type = self.backend.fetch(fqn).await?;
                Ok(Arc::new(widget_type))
            })
            .await
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        pin::Pin,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use vitrine_descriptor::{Fqn, WidgetType};

    use super::{Backend, DescriptorResolver, Error};

    pub(crate) fn widget_type(fqn: &str) -> WidgetType {
        WidgetType::parse(&format!(
            r#"{{ "fqn": "{fqn}", "name": "{fqn}", "descriptor": {{}} }}"#
        ))
        .unwrap()
    }

    struct CountingBackend {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CountingBackend {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Backend for CountingBackend {
        fn fetch<'a>(
            &'a self,
            fqn: &'a Fqn,
        ) -> Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if call < self.fail_first {
                    return Err(Error::Io(std::io::Error::other("backend down")));
                }
                Ok(widget_type(fqn.as_str()))
            })
        }
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let backend = Arc::new(CountingBackend::new(0));
        let resolver = DescriptorResolver::new(backend.clone());
        let fqn = Fqn::new("cards.value").unwrap();

        let results =
            futures::future::join_all((0..8).map(|_| resolver.resolve(&fqn))).await;

        assert_eq!(backend.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn failures_are_retried() {
        let backend = Arc::new(CountingBackend::new(1));
        let resolver = DescriptorResolver::new(backend.clone());
        let fqn = Fqn::new("cards.value").unwrap();

        assert!(resolver.resolve(&fqn).await.is_err());
        let resolved = resolver.resolve(&fqn).await.unwrap();
        assert_eq!(resolved.fqn, fqn);
        assert_eq!(backend.calls(), 2);

        resolver.resolve(&fqn).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn clear_forces_refetch() {
        let backend = Arc::new(CountingBackend::new(0));
        let resolver = DescriptorResolver::new(backend.clone());
        let fqn = Fqn::new("cards.value").unwrap();

        let before = resolver.resolve(&fqn).await.unwrap();
        resolver.clear();
        let after = resolver.resolve(&fqn).await.unwrap();

        assert_eq!(backend.calls(), 2);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }
}
