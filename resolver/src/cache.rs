use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use vitrine_descriptor::{Fqn, SharedWidgetType};

use crate::Error;

/// Widget types keyed by FQN.
///
/// Each entry is a cell that is filled at most once; callers that arrive while the
/// fill is running wait for it instead of starting their own fetch.
#[derive(Clone, Debug, Default)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: DashMap<Fqn, Arc<OnceCell<SharedWidgetType>>>,
}

impl Cache {
    pub fn get(&self, fqn: &Fqn) -> Option<SharedWidgetType> {
        self.inner.entries.get(fqn)?.value().get().cloned()
    }

    pub fn put(&self, widget_type: SharedWidgetType) {
        let cell = OnceCell::new_with(Some(Arc::clone(&widget_type)));
        self.inner
            .entries
            .insert(widget_type.fqn.clone(), Arc::new(cell));
    }

    pub async fn get_or_fetch<F, Fut>(&self, fqn: &Fqn, fetch: F) -> Result<SharedWidgetType, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SharedWidgetType, Error>>,
    {
        // Clone the cell out so the map shard is not locked across the await.
        let cell = self
            .inner
            .entries
            .entry(fqn.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let resolved = cell.get_or_try_init(fetch).await?;
        Ok(Arc::clone(resolved))
    }

    /// Number of filled entries.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::widget_type;

    #[test]
    fn put_then_get() {
        let cache = Cache::default();
        let wt = Arc::new(widget_type("a.b"));
        cache.put(Arc::clone(&wt));

        let fqn = Fqn::new("a.b").unwrap();
        assert!(Arc::ptr_eq(&cache.get(&fqn).unwrap(), &wt));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.get(&fqn).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_entry_empty() {
        let cache = Cache::default();
        let fqn = Fqn::new("a.b").unwrap();

        let err = cache
            .get_or_fetch(&fqn, || async {
                Err(Error::NotFound { fqn: fqn.clone() })
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.get(&fqn).is_none());
        assert_eq!(cache.len(), 0);
    }
}
