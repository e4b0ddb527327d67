use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use vitrine_descriptor::{Fqn, WidgetType};

use super::{Backend, Error};

/// Widget types held in memory, e.g. a bundle file loaded at startup.
#[derive(Clone, Debug, Default)]
pub struct BundleBackend {
    types: Arc<HashMap<Fqn, WidgetType>>,
}

impl BundleBackend {
    pub fn new(types: impl IntoIterator<Item = WidgetType>) -> Self {
        let types = types
            .into_iter()
            .map(|widget_type| (widget_type.fqn.clone(), widget_type))
            .collect();
        Self {
            types: Arc::new(types),
        }
    }

    /// Accepts a single widget type document or an array of them.
    pub fn from_json(source: &str) -> Result<Self, Error> {
        Ok(Self::new(WidgetType::parse_many(source)?))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Backend for BundleBackend {
    fn fetch<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>> {
        let found = self
            .types
            .get(fqn)
            .cloned()
            .ok_or_else(|| Error::NotFound { fqn: fqn.clone() });
        Box::pin(std::future::ready(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bundle_from_json_array() {
        let backend = BundleBackend::from_json(
            r#"[{ "fqn": "a.b", "name": "B", "descriptor": {} },
                { "fqn": "a.c", "name": "C", "descriptor": { "sizeX": 4 } }]"#,
        )
        .unwrap();
        assert_eq!(backend.len(), 2);

        let c = backend.fetch(&Fqn::new("a.c").unwrap()).await.unwrap();
        assert_eq!(c.descriptor.size_x, 4);
        assert!(
            backend
                .fetch(&Fqn::new("a.d").unwrap())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
