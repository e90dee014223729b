//! Coordinate parsing for `<server-host:port>/<namespace>/<name>` arguments

use crate::error::{PullError, Result};
use std::fmt;
use std::str::FromStr;

/// Location of a remote image: which image service to dial and which
/// image to ask it for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    server: String,
    namespace: String,
    name: String,
}

/// Local store slot an image is committed into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationSlot {
    pub namespace: String,
    pub name: String,
}

impl Coordinate {
    /// Parse a coordinate string.
    ///
    /// The string must split on `/` into exactly three non-empty segments,
    /// and neither namespace nor name may be `.`, `..` or contain a backslash.
    pub fn parse(input: &str) -> Result<Self> {
        let segments: Vec<&str> = input.split('/').collect();
        if segments.len() != 3 {
            return Err(PullError::Usage(format!(
                "invalid image coordinate '{}': expected <server-host:port>/<namespace>/<name>",
                input
            )));
        }

        if let Some(pos) = segments.iter().position(|s| s.is_empty()) {
            let field = ["server", "namespace", "name"][pos];
            return Err(PullError::Usage(format!(
                "invalid image coordinate '{}': {} cannot be empty",
                input, field
            )));
        }

        // namespace and name become directory and file names in the store
        for (field, value) in [("namespace", segments[1]), ("name", segments[2])] {
            if value == "." || value == ".." || value.contains(['\\', '\0']) {
                return Err(PullError::Usage(format!(
                    "invalid image coordinate '{}': {} '{}' is not a valid name",
                    input, field, value
                )));
            }
        }

        Ok(Self {
            server: segments[0].to_string(),
            namespace: segments[1].to_string(),
            name: segments[2].to_string(),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> DestinationSlot {
        DestinationSlot {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl FromStr for Coordinate {
    type Err = PullError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.server, self.namespace, self.name)
    }
}

impl fmt::Display for DestinationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
