//! Composite revision tokens.
//!
//! A twiglet is stored as three independently revised documents (info,
//! nodes, links). Clients see one token, `info:nodes:links`, and must echo
//! it back unchanged on write.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LibError;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeRevision {
    pub info: String,
    pub nodes: String,
    pub links: String,
}

impl CompositeRevision {
    pub fn new(info: impl Into<String>, nodes: impl Into<String>, links: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            nodes: nodes.into(),
            links: links.into(),
        }
    }

    /// Splits a client token. Runs before any store access.
    pub fn parse(token: &str) -> Result<Self, LibError> {
        let parts: Vec<&str> = token.split(SEPARATOR).collect();
        match parts.as_slice() {
            [info, nodes, links] => Ok(Self::new(*info, *nodes, *links)),
            _ => Err(LibError::malformed_revision(anyhow!(
                "revision '{}' has {} segments, expected 3",
                token,
                parts.len()
            ))),
        }
    }

    /// Whether every component equals the stored one. The diverging
    /// component is not reported.
    pub fn matches(&self, current: &CompositeRevision) -> bool {
        self.info == current.info && self.nodes == current.nodes && self.links == current.links
    }
}

impl fmt::Display for CompositeRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.info, SEPARATOR, self.nodes, SEPARATOR, self.links
        )
    }
}

impl FromStr for CompositeRevision {
    type Err = LibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CompositeRevision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompositeRevision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|err| serde::de::Error::custom(err.public))
    }
}
