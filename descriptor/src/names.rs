use std::{borrow::Borrow, fmt, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

pub(crate) fn ensure_token(value: &str, kind: &'static str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::InvalidName {
            kind,
            name: value.to_string(),
            reason: "must not be empty",
        });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(Error::InvalidName {
            kind,
            name: value.to_string(),
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> Result<Self, Error> {
                let name = name.as_ref();
                crate::names::ensure_token(name, $kind)?;
                Ok(Self(Arc::from(name)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

name_type!(
    /// Fully-qualified widget type name, e.g. `system.cards.value_card`.
    Fqn,
    "widget type"
);
name_type!(
    /// Identifier of one placed widget.
    InstanceId,
    "widget instance"
);

impl Fqn {
    /// Function-name-safe rendering: every character that is not an ASCII identifier
    /// character becomes `_`.
    pub fn identifier(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_rejects_empty_and_whitespace() {
        assert!(Fqn::new("").is_err());
        assert!(Fqn::new("system cards").is_err());
        assert_eq!(Fqn::new("system.cards").unwrap().as_str(), "system.cards");
    }

    #[test]
    fn identifier_normalizes_separators() {
        let fqn = Fqn::new("system.cards-v2.value$card").unwrap();
        assert_eq!(fqn.identifier(), "system_cards_v2_value_card");
    }

    #[test]
    fn fqn_deserializes_with_validation() {
        let fqn: Fqn = serde_json::from_str("\"a.b\"").unwrap();
        assert_eq!(fqn.as_str(), "a.b");
        assert!(serde_json::from_str::<Fqn>("\"\"").is_err());
    }
}
