use crate::result::{MatrixError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

static CHANNEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:stable|beta|nightly)(?:-[0-9]{4}-[0-9]{2}-[0-9]{2})?|[0-9]+\.[0-9]+(?:\.[0-9]+)?)$",
    )
    .unwrap()
});

/// A toolchain release channel: `stable`, `beta`, `nightly[-YYYY-MM-DD]` or `X.Y[.Z]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(SmolStr);

impl Channel {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if CHANNEL_REGEX.is_match(input) {
            Ok(Self(SmolStr::new(input)))
        } else {
            Err(MatrixError::configuration(format!(
                "`{}` is not a toolchain channel (expected stable, beta, nightly, nightly-YYYY-MM-DD or a version like 1.80.1)",
                input
            )))
        }
    }

    pub fn stable() -> Self {
        Self(SmolStr::new_static("stable"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::stable()
    }
}

impl TryFrom<String> for Channel {
    type Error = MatrixError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0.to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
