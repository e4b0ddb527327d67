//! Text templating used by widgets: `{{ path }}` markup expressions rendered from
//! controller state, and `${name}` placeholders in action URLs.

mod error;
mod interpolation;
mod markup;
mod path;

pub use error::Error;
pub use interpolation::{InterpolatedPart, InterpolatedString, interpolate};
pub use markup::{Markup, MarkupPart};
pub use path::{get_by_path, stringify_for_interpolation};
