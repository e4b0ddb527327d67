use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::{Error, path};

/// A string with `${name}` placeholders, as used in action URLs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InterpolatedString {
    pub parts: Vec<InterpolatedPart>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InterpolatedPart {
    Literal(String),
    Placeholder(String),
}

impl InterpolatedString {
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            InterpolatedPart::Placeholder(name) => Some(name.as_str()),
            InterpolatedPart::Literal(_) => None,
        })
    }

    /// Substitute placeholders from `vars`. Placeholders that do not resolve, or resolve
    /// to `null`, are kept verbatim.
    pub fn render(&self, vars: &Value) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                InterpolatedPart::Literal(lit) => out.push_str(lit),
                InterpolatedPart::Placeholder(name) => {
                    match path::get_by_path(vars, name).filter(|v| !v.is_null()) {
                        Some(value) => out.push_str(&path::stringify_for_interpolation(value)),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                }
            }
        }
        out
    }
}

/// Lenient one-shot interpolation: malformed input is returned unchanged.
pub fn interpolate(input: &str, vars: &Value) -> String {
    match input.parse::<InterpolatedString>() {
        Ok(parsed) => parsed.render(vars),
        Err(_) => input.to_string(),
    }
}

impl FromStr for InterpolatedString {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = Vec::new();
        let mut current_literal = String::new();
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();
                if !current_literal.is_empty() {
                    parts.push(InterpolatedPart::Literal(std::mem::take(
                        &mut current_literal,
                    )));
                }

                let mut inner = String::new();
                let mut closed = false;
                for ic in chars.by_ref() {
                    if ic == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(ic);
                }

                if !closed {
                    return Err(Error::Unclosed {
                        opener: "${",
                        input: input.to_string(),
                    });
                }
                let name = inner.trim();
                if name.is_empty() {
                    return Err(Error::EmptyExpression(input.to_string()));
                }
                parts.push(InterpolatedPart::Placeholder(name.to_string()));
            } else {
                current_literal.push(c);
            }
        }

        if !current_literal.is_empty() {
            parts.push(InterpolatedPart::Literal(current_literal));
        }

        Ok(Self { parts })
    }
}

impl fmt::Display for InterpolatedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                InterpolatedPart::Literal(s) => f.write_str(s)?,
                InterpolatedPart::Placeholder(name) => write!(f, "${{{name}}}")?,
            }
        }
        Ok(())
    }
}
