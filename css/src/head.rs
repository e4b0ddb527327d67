use std::{fmt::Write as _, sync::Arc};

use parking_lot::RwLock;

use crate::rewrite;

/// Model of the host page `<head>`: namespaced widget styles plus the passive
/// stylesheet and script includes attached by the resource loader.
#[derive(Clone, Debug, Default)]
pub struct Head {
    elements: Arc<RwLock<Vec<HeadElement>>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadElement {
    Style(StyleElement),
    Stylesheet { href: String },
    Script { src: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleElement {
    pub id: String,
    pub namespace: String,
    pub text: String,
}

/// Returned by [`Head::inject`]; identifies the style element that was attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleHandle {
    pub id: String,
    pub namespace: String,
}

pub fn style_id(namespace: &str) -> String {
    format!("widget-style-{namespace}")
}

impl Head {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite `css` under `namespace` and attach it, replacing any style element
    /// previously attached for the same namespace.
    pub fn inject(&self, css: &str, namespace: &str) -> StyleHandle {
        let id = style_id(namespace);
        let element = StyleElement {
            id: id.clone(),
            namespace: namespace.to_string(),
            text: rewrite(css, namespace),
        };
        let mut elements = self.elements.write();
        elements.retain(|el| !matches!(el, HeadElement::Style(style) if style.id == id));
        elements.push(HeadElement::Style(element));
        tracing::debug!(%namespace, "injected widget style");
        StyleHandle {
            id,
            namespace: namespace.to_string(),
        }
    }

    /// Detach the style element of `namespace`. Returns whether one was present.
    pub fn remove(&self, namespace: &str) -> bool {
        let id = style_id(namespace);
        let mut elements = self.elements.write();
        let before = elements.len();
        elements.retain(|el| !matches!(el, HeadElement::Style(style) if style.id == id));
        before != elements.len()
    }

    pub fn style(&self, namespace: &str) -> Option<StyleElement> {
        let id = style_id(namespace);
        self.elements.read().iter().find_map(|el| match el {
            HeadElement::Style(style) if style.id == id => Some(style.clone()),
            _ => None,
        })
    }

    /// Attach a passive `<link rel="stylesheet">`. Returns `false` if already attached.
    pub fn add_stylesheet(&self, href: &str) -> bool {
        self.add_unique(HeadElement::Stylesheet {
            href: href.to_string(),
        })
    }

    /// Attach a passive `<script src>` include. Returns `false` if already attached.
    pub fn add_script(&self, src: &str) -> bool {
        self.add_unique(HeadElement::Script {
            src: src.to_string(),
        })
    }

    fn add_unique(&self, element: HeadElement) -> bool {
        let mut elements = self.elements.write();
        if elements.contains(&element) {
            return false;
        }
        elements.push(element);
        true
    }

    pub fn elements(&self) -> Vec<HeadElement> {
        self.elements.read().clone()
    }

    /// Serialize the head contents as HTML, in attachment order.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for element in self.elements.read().iter() {
            let _ = match element {
                HeadElement::Style(style) => writeln!(
                    out,
                    "<style id=\"{}\" data-widget-namespace=\"{}\">{}</style>",
                    style.id, style.namespace, style.text
                ),
                HeadElement::Stylesheet { href } => {
                    writeln!(out, "<link rel=\"stylesheet\" href=\"{href}\">")
                }
                HeadElement::Script { src } => writeln!(out, "<script src=\"{src}\"></script>"),
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_replaces_prior_style() {
        let head = Head::new();
        head.inject(".a{}", "ns1");
        let handle = head.inject(".b{}", "ns1");

        assert_eq!(handle.id, "widget-style-ns1");
        assert_eq!(head.elements().len(), 1);
        assert_eq!(head.style("ns1").unwrap().text, ".ns1 .b {}");
    }

    #[test]
    fn removing_one_namespace_leaves_the_other() {
        let head = Head::new();
        head.inject(".a{}", "ns1");
        head.inject(".a{}", "ns2");

        assert!(head.remove("ns1"));
        assert!(!head.remove("ns1"));
        assert!(head.style("ns1").is_none());
        assert!(head.style("ns2").is_some());
    }

    #[test]
    fn passive_includes_are_deduplicated() {
        let head = Head::new();
        assert!(head.add_stylesheet("https://cdn/x.css"));
        assert!(!head.add_stylesheet("https://cdn/x.css"));
        assert!(head.add_script("https://cdn/x.js"));
        assert_eq!(
            head.to_html(),
            "<link rel=\"stylesheet\" href=\"https://cdn/x.css\">\n\
             <script src=\"https://cdn/x.js\"></script>\n"
        );
    }
}
