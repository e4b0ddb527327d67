use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::{Error, path};

/// A markup template split into literal text and `{{ path }}` expressions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Markup {
    pub parts: Vec<MarkupPart>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkupPart {
    Literal(String),
    Expression(String),
}

impl Markup {
    /// Expression paths in order of appearance.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            MarkupPart::Expression(path) => Some(path.as_str()),
            MarkupPart::Literal(_) => None,
        })
    }

    /// Substitute every expression with `lookup(path)`; `None` renders as nothing.
    pub fn render_with(&self, mut lookup: impl FnMut(&str) -> Option<Value>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                MarkupPart::Literal(lit) => out.push_str(lit),
                MarkupPart::Expression(expr) => {
                    if let Some(value) = lookup(expr) {
                        out.push_str(&path::stringify_for_interpolation(&value));
                    }
                }
            }
        }
        out
    }

    pub fn render(&self, scope: &Value) -> String {
        self.render_with(|expr| path::get_by_path(scope, expr).cloned())
    }
}

impl FromStr for Markup {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(MarkupPart::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(Error::Unclosed {
                    opener: "{{",
                    input: input.to_string(),
                });
            };
            let expr = after[..end].trim();
            if expr.is_empty() {
                return Err(Error::EmptyExpression(input.to_string()));
            }
            parts.push(MarkupPart::Expression(expr.to_string()));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(MarkupPart::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                MarkupPart::Literal(lit) => f.write_str(lit)?,
                MarkupPart::Expression(expr) => write!(f, "{{{{ {expr} }}}}")?,
            }
        }
        Ok(())
    }
}
