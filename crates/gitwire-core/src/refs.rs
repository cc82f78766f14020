use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::oid::Oid;

pub const HEADS_PREFIX: &str = "refs/heads/";
pub const TAGS_PREFIX: &str = "refs/tags/";
pub const REMOTES_PREFIX: &str = "refs/remotes/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefName(String);

impl RefName {
    pub const HEAD: &'static str = "HEAD";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    pub fn head() -> Self {
        Self(Self::HEAD.to_string())
    }

    pub fn branch(name: &str) -> Result<Self> {
        Self::new(format!("{}{}", HEADS_PREFIX, name))
    }

    pub fn tag(name: &str) -> Result<Self> {
        Self::new(format!("{}{}", TAGS_PREFIX, name))
    }

    pub fn remote(remote: &str, branch: &str) -> Result<Self> {
        Self::new(format!("{}{}/{}", REMOTES_PREFIX, remote, branch))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidRefName("ref name cannot be empty".to_string()));
        }
        if name == Self::HEAD {
            return Ok(());
        }
        if !name.starts_with("refs/") {
            return Err(Error::InvalidRefName(format!(
                "ref name must start with 'refs/': {}",
                name
            )));
        }
        if name.contains("..") {
            return Err(Error::InvalidRefName(format!(
                "ref name cannot contain '..': {}",
                name
            )));
        }
        if name.ends_with('/') {
            return Err(Error::InvalidRefName(format!(
                "ref name cannot end with '/': {}",
                name
            )));
        }
        if name.ends_with(".lock") {
            return Err(Error::InvalidRefName(format!(
                "ref name cannot end with '.lock': {}",
                name
            )));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_head(&self) -> bool {
        self.0 == Self::HEAD
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(HEADS_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(TAGS_PREFIX)
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with(REMOTES_PREFIX)
    }

    pub fn short(&self) -> &str {
        self.0
            .strip_prefix(HEADS_PREFIX)
            .or_else(|| self.0.strip_prefix(TAGS_PREFIX))
            .or_else(|| self.0.strip_prefix(REMOTES_PREFIX))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RefName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefTarget {
    Hash(Oid),
    Symbolic(RefName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: RefName,
    pub target: RefTarget,
}

impl Reference {
    pub fn hash(name: RefName, oid: Oid) -> Self {
        Self {
            name,
            target: RefTarget::Hash(oid),
        }
    }

    pub fn symbolic(name: RefName, target: RefName) -> Self {
        Self {
            name,
            target: RefTarget::Symbolic(target),
        }
    }

    pub fn is_hash(&self) -> bool {
        matches!(self.target, RefTarget::Hash(_))
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic(_))
    }

    pub fn oid(&self) -> Option<Oid> {
        match &self.target {
            RefTarget::Hash(oid) => Some(*oid),
            RefTarget::Symbolic(_) => None,
        }
    }

    pub fn symbolic_target(&self) -> Option<&RefName> {
        match &self.target {
            RefTarget::Hash(_) => None,
            RefTarget::Symbolic(name) => Some(name),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            RefTarget::Hash(oid) => write!(f, "{} {}", oid, self.name),
            RefTarget::Symbolic(target) => write!(f, "ref: {} {}", target, self.name),
        }
    }
}
