//! Widget stylesheet isolation.
//!
//! Every placed widget gets a namespace class. Its stylesheet is rewritten so each
//! rule only matches inside an element carrying that class, then attached to the
//! shared [`Head`] as one style element per namespace.

mod head;
mod namespace;
mod rewrite;

pub use head::{Head, HeadElement, StyleElement, StyleHandle, style_id};
pub use namespace::{create_namespace, string_hash};
pub use rewrite::rewrite;
