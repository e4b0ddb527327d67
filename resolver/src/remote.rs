use std::{future::Future, pin::Pin, sync::Arc};

use vitrine_descriptor::{Fqn, WidgetType};

use super::Error;

/// A source of widget type documents.
pub trait Backend: Send + Sync {
    fn fetch<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>>;
}

/// Tries `primary`, then `secondary` when the primary misses or fails.
#[derive(Clone)]
pub struct FallbackBackend {
    primary: Arc<dyn Backend>,
    secondary: Arc<dyn Backend>,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn Backend>, secondary: Arc<dyn Backend>) -> Self {
        Self { primary, secondary }
    }
}

impl Backend for FallbackBackend {
    fn fetch<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>> {
        Box::pin(async move {
            match self.primary.fetch(fqn).await {
                Ok(widget_type) => Ok(widget_type),
                Err(err) => {
                    if !err.is_not_found() {
                        tracing::warn!(%fqn, error = %err, "primary backend failed; trying fallback");
                    }
                    self.secondary.fetch(fqn).await
                }
            }
        })
    }
}
