//! Validated identifiers used in release paths

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ShipError;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").unwrap_or_else(|e| panic!("invalid identifier regex: {e}"))
});

/// Whether `value` is a non-empty string of letters, digits, `_` and `-`
pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

fn validate(kind: &str, value: &str) -> Result<(), ShipError> {
    if value.is_empty() {
        return Err(ShipError::ValidationError(format!("{} must not be empty", kind)));
    }
    if !is_identifier(value) {
        return Err(ShipError::ValidationError(format!(
            "{} {:?} can only contain letters, numbers, dashes, and underscores",
            kind, value
        )));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ShipError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ShipError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
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
    };
}

identifier!(
    /// Application name, one directory under the apps root
    AppName,
    "app name"
);
identifier!(
    /// Release version, one directory under the app
    ReleaseVersion,
    "app version"
);
identifier!(
    /// Named subdirectory of the app's shared volumes root
    VolumeName,
    "volume name"
);
identifier!(
    /// File name inside the app's shared secrets root
    SecretName,
    "secret name"
);
