//! Resource loading for widget descriptors.
//!
//! Stylesheets and plain scripts are attached to the host [`Head`] as passive
//! includes; the sandbox never executes them. Module resources are kept as source so
//! controllers can import them by alias.

mod error;
mod fetch;

use std::{fmt, sync::Arc};

use dashmap::DashMap;
pub use error::{Error, FetchError};
pub use fetch::{
    FetchFuture, Fetcher, FileFetcher, HttpFetcher, HttpFetcherOptions, SchemeFetcher,
};
use tokio::sync::OnceCell;
use url::Url;
use vitrine_css::Head;
use vitrine_descriptor::Resource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Stylesheet,
    Script,
    Module,
}

impl ResourceKind {
    pub fn of(resource: &Resource) -> Self {
        if resource.is_module {
            ResourceKind::Module
        } else if resource.is_stylesheet() {
            ResourceKind::Stylesheet
        } else {
            ResourceKind::Script
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadedResource {
    /// The URL as declared by the descriptor.
    pub url: String,
    pub resolved: Url,
    pub kind: ResourceKind,
    pub source: Arc<str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ResourceKey {
    url: String,
    module: bool,
}

#[derive(Clone)]
pub struct ResourceLoader {
    head: Head,
    base: Option<Url>,
    fetchers: fetch::FetchDispatch,
    loaded: Arc<DashMap<ResourceKey, Arc<OnceCell<Arc<LoadedResource>>>>>,
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("base", &self.base)
            .field("fetchers", &self.fetchers)
            .field("loaded", &self.loaded.len())
            .finish_non_exhaustive()
    }
}

impl ResourceLoader {
    pub fn new(head: Head) -> Self {
        Self {
            head,
            base: None,
            fetchers: fetch::FetchDispatch::default(),
            loaded: Arc::new(DashMap::new()),
        }
    }

    /// Relative resource URLs are resolved against `base`.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_http(mut self, http: HttpFetcher) -> Self {
        self.fetchers = self.fetchers.with_http(http);
        self
    }

    pub fn with_fetcher(mut self, fetcher: SchemeFetcher) -> Self {
        self.fetchers = self.fetchers.with_fetcher(fetcher);
        self
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    /// Make every resource available. All loads run concurrently; the error names the
    /// first failing resource in declaration order.
    pub async fn load_all(&self, resources: &[Resource]) -> Result<(), Error> {
        let results = futures::future::join_all(resources.iter().map(|r| self.load(r))).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Load one resource. Repeated and concurrent calls for the same URL share one
    /// fetch; a failed load is retried on the next call.
    pub async fn load(&self, resource: &Resource) -> Result<Arc<LoadedResource>, Error> {
        let key = ResourceKey {
            url: resource.url.clone(),
            module: resource.is_module,
        };
        let cell = self
            .loaded
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let loaded = cell
            .get_or_try_init(|| self.fetch_and_attach(resource))
            .await
            .inspect_err(|err| {
                tracing::warn!(url = %resource.url, error = %err, "resource failed to load");
            })?;
        Ok(Arc::clone(loaded))
    }

    async fn fetch_and_attach(&self, resource: &Resource) -> Result<Arc<LoadedResource>, Error> {
        let load_error = |reason: String| Error::ResourceLoadError {
            url: resource.url.clone(),
            reason,
        };
        let resolved = self.resolve_url(&resource.url).map_err(|e| load_error(e.to_string()))?;
        let source = self
            .fetchers
            .fetch(&resolved)
            .await
            .map_err(|e| load_error(e.to_string()))?;

        let kind = ResourceKind::of(resource);
        match kind {
            ResourceKind::Stylesheet => {
                self.head.add_stylesheet(resolved.as_str());
            }
            ResourceKind::Script => {
                self.head.add_script(resolved.as_str());
            }
            ResourceKind::Module => {}
        }
        tracing::debug!(url = %resolved, ?kind, "resource loaded");

        Ok(Arc::new(LoadedResource {
            url: resource.url.clone(),
            resolved,
            kind,
            source,
        }))
    }

    fn resolve_url(&self, raw: &str) -> Result<Url, FetchError> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base {
                Some(base) => base.join(raw).map_err(|err| FetchError::InvalidUrl {
                    url: raw.to_string(),
                    message: err.to_string(),
                }),
                None => Err(FetchError::InvalidUrl {
                    url: raw.to_string(),
                    message: "relative URL and no base configured".to_string(),
                }),
            },
            Err(err) => Err(FetchError::InvalidUrl {
                url: raw.to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Source of a loaded module resource, by its declared URL.
    pub fn module(&self, url: &str) -> Option<Arc<str>> {
        let key = ResourceKey {
            url: url.to_string(),
            module: true,
        };
        let cell = self.loaded.get(&key)?;
        cell.value().get().map(|loaded| Arc::clone(&loaded.source))
    }

    pub fn is_loaded(&self, resource: &Resource) -> bool {
        let key = ResourceKey {
            url: resource.url.clone(),
            module: resource.is_module,
        };
        self.loaded
            .get(&key)
            .is_some_and(|cell| cell.value().initialized())
    }

    /// Forget every loaded resource. Head includes already attached stay attached.
    pub fn clear(&self) {
        self.loaded.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use vitrine_css::HeadElement;

    use super::*;

    /// Serves `mem://` URLs from a map, counting fetches. Missing entries fail after
    /// `fail_delay`.
    struct MemFetcher {
        files: HashMap<String, &'static str>,
        fetches: AtomicUsize,
        fail_delay: HashMap<String, u64>,
    }

    impl MemFetcher {
        fn new(files: &[(&str, &'static str)]) -> Self {
            Self {
                files: files.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                fetches: AtomicUsize::new(0),
                fail_delay: HashMap::new(),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for MemFetcher {
        fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let path = url.path().trim_start_matches('/').to_string();
                match self.files.get(&path) {
                    Some(text) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(Arc::from(*text))
                    }
                    None => {
                        let delay = self.fail_delay.get(&path).copied().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        Err(FetchError::NotFound { url: url.clone() })
                    }
                }
            })
        }
    }

    fn loader(fetcher: Arc<MemFetcher>) -> ResourceLoader {
        ResourceLoader::new(Head::new())
            .with_base(Url::parse("mem://host/").unwrap())
            .with_fetcher(SchemeFetcher::new(["mem"], fetcher))
    }

    #[tokio::test]
    async fn concurrent_loads_fetch_each_url_once() {
        let fetcher = Arc::new(MemFetcher::new(&[("a.css", ".a{}"), ("b.js", "1")]));
        let loader = loader(fetcher.clone());
        let resources = [Resource::new("/a.css"), Resource::new("/b.js")];

        let (first, second) =
            tokio::join!(loader.load_all(&resources), loader.load_all(&resources));
        first.unwrap();
        second.unwrap();
        loader.load_all(&resources).await.unwrap();

        assert_eq!(fetcher.fetches(), 2);
        let elements = loader.head().elements();
        assert_eq!(elements.len(), 2);
        assert!(elements.contains(&HeadElement::Stylesheet {
            href: "mem://host/a.css".to_string()
        }));
        assert!(elements.contains(&HeadElement::Script {
            src: "mem://host/b.js".to_string()
        }));
    }

    #[tokio::test]
    async fn first_failure_in_declaration_order_is_reported() {
        let mut fetcher = MemFetcher::new(&[("ok.js", "1")]);
        fetcher.fail_delay.insert("slow-missing.js".to_string(), 50);
        let loader = loader(Arc::new(fetcher));

        let err = loader
            .load_all(&[
                Resource::new("/ok.js"),
                Resource::new("/slow-missing.js"),
                Resource::new("/fast-missing.js"),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.resource_url(), "/slow-missing.js");
    }

    #[tokio::test]
    async fn modules_are_kept_as_source_and_not_attached() {
        let fetcher = Arc::new(MemFetcher::new(&[("fmt.js", "exports.x = 1;")]));
        let loader = loader(fetcher);

        loader
            .load_all(&[Resource::module("/fmt.js")])
            .await
            .unwrap();

        assert_eq!(loader.module("/fmt.js").as_deref(), Some("exports.x = 1;"));
        assert!(loader.module("/other.js").is_none());
        assert!(loader.head().elements().is_empty());
    }

    #[tokio::test]
    async fn failures_are_retried_and_clear_forgets() {
        let fetcher = Arc::new(MemFetcher::new(&[("x.js", "1")]));
        let loader = loader(fetcher.clone());

        assert!(loader.load(&Resource::new("/missing.js")).await.is_err());
        assert!(loader.load(&Resource::new("/missing.js")).await.is_err());
        assert_eq!(fetcher.fetches(), 2);

        let x = Resource::new("/x.js");
        loader.load(&x).await.unwrap();
        assert!(loader.is_loaded(&x));
        loader.clear();
        assert!(!loader.is_loaded(&x));
        loader.load(&x).await.unwrap();
        assert_eq!(fetcher.fetches(), 4);
    }

    #[tokio::test]
    async fn relative_url_without_base_fails() {
        let loader = ResourceLoader::new(Head::new());
        let err = loader.load_all(&[Resource::new("lib.js")]).await.unwrap_err();
        assert_eq!(err.resource_url(), "lib.js");
    }
}
