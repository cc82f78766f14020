use std::fmt;
use std::str::FromStr;

use gitwire_core::{oid::OID_HEX_LEN, Oid, RefName};

use crate::error::{Error, Result};

/// How tags are handled by a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagMode {
    /// Fetch tags pointing at objects that arrive anyway.
    #[default]
    Following,
    /// Fetch every tag (adds `+refs/tags/*:refs/tags/*`).
    All,
    /// Fetch no tags.
    None,
}

/// A `[+]src:dst` mapping rule from remote reference names to local ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    force: bool,
    src: String,
    dst: String,
}

impl RefSpec {
    pub fn new(force: bool, src: impl Into<String>, dst: impl Into<String>) -> Result<Self> {
        let spec = Self {
            force,
            src: src.into(),
            dst: dst.into(),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.src.is_empty() || self.dst.is_empty() {
            return Err(Error::InvalidRefSpec(self.to_string()));
        }
        let src_wild = self.src.matches('*').count();
        let dst_wild = self.dst.matches('*').count();
        if src_wild > 1 || dst_wild > 1 || src_wild != dst_wild {
            return Err(Error::InvalidRefSpec(self.to_string()));
        }
        if self.is_exact_sha1() && dst_wild != 0 {
            return Err(Error::InvalidRefSpec(self.to_string()));
        }
        Ok(())
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    pub fn is_wildcard(&self) -> bool {
        self.src.contains('*')
    }

    /// Whether the source is a literal object id rather than a name.
    /// Requires the server to grant one of the sha1-in-want capabilities.
    pub fn is_exact_sha1(&self) -> bool {
        self.src.len() == OID_HEX_LEN && Oid::is_hex(&self.src)
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn dst(&self) -> &str {
        &self.dst
    }

    pub fn matches(&self, name: &RefName) -> bool {
        if !self.is_wildcard() {
            return self.src == name.as_str();
        }
        let (prefix, suffix) = self.src.split_once('*').expect("wildcard spec has one *");
        let name = name.as_str();
        name.len() >= prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix)
    }

    /// Maps a matching remote name through the spec, as the raw string the
    /// spec produces. The caller decides how to root unqualified names.
    pub fn map_dst(&self, name: &RefName) -> String {
        if !self.is_wildcard() {
            return self.dst.clone();
        }
        let (prefix, suffix) = self.src.split_once('*').expect("wildcard spec has one *");
        let captured = &name.as_str()[prefix.len()..name.as_str().len() - suffix.len()];
        let (dst_prefix, dst_suffix) =
            self.dst.split_once('*').expect("wildcard spec has one *");
        format!("{}{}{}", dst_prefix, captured, dst_suffix)
    }

    /// Maps a matching remote name through the spec to its local name.
    pub fn dst_for(&self, name: &RefName) -> Result<RefName> {
        RefName::new(self.map_dst(name)).map_err(Error::from)
    }
}

impl FromStr for RefSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (force, rest) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (src, dst) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidRefSpec(s.to_string()))?;
        Self::new(force, src, dst)
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let spec: RefSpec = "refs/heads/main:refs/remotes/origin/main".parse().unwrap();
        assert!(!spec.is_force());
        assert!(!spec.is_wildcard());
        assert_eq!(spec.src(), "refs/heads/main");
    }

    #[test]
    fn test_parse_force() {
        let spec: RefSpec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        assert!(spec.is_force());
        assert!(spec.is_wildcard());
        assert_eq!(spec.to_string(), "+refs/heads/*:refs/remotes/origin/*");
    }

    #[test]
    fn test_parse_rejects_missing_colon() {
        assert!("refs/heads/main".parse::<RefSpec>().is_err());
    }

    #[test]
    fn test_parse_rejects_unbalanced_wildcard() {
        assert!("refs/heads/*:refs/remotes/origin/main".parse::<RefSpec>().is_err());
        assert!("refs/heads/main:refs/remotes/origin/*".parse::<RefSpec>().is_err());
    }

    #[test]
    fn test_parse_rejects_double_wildcard() {
        assert!("refs/*/x/*:refs/*/y/*".parse::<RefSpec>().is_err());
    }

    #[test]
    fn test_exact_sha1() {
        let oid = Oid::hash(b"commit");
        let spec: RefSpec = format!("{}:refs/remotes/origin/pinned", oid).parse().unwrap();
        assert!(spec.is_exact_sha1());
        assert!(!spec.is_wildcard());
    }

    #[test]
    fn test_wildcard_match_and_map() {
        let spec: RefSpec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        let name = RefName::branch("feature/x").unwrap();
        assert!(spec.matches(&name));
        assert_eq!(
            spec.dst_for(&name).unwrap().as_str(),
            "refs/remotes/origin/feature/x"
        );
    }

    #[test]
    fn test_wildcard_no_match() {
        let spec: RefSpec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        assert!(!spec.matches(&RefName::tag("v1.0").unwrap()));
    }

    #[test]
    fn test_exact_match() {
        let spec: RefSpec = "refs/heads/main:refs/remotes/origin/main".parse().unwrap();
        assert!(spec.matches(&RefName::branch("main").unwrap()));
        assert!(!spec.matches(&RefName::branch("dev").unwrap()));
    }

    #[test]
    fn test_dst_for_exact() {
        let spec: RefSpec = "refs/heads/main:refs/remotes/origin/main".parse().unwrap();
        let dst = spec.dst_for(&RefName::branch("main").unwrap()).unwrap();
        assert_eq!(dst.as_str(), "refs/remotes/origin/main");
    }

    #[test]
    fn test_tag_mode_default() {
        assert_eq!(TagMode::default(), TagMode::Following);
    }
}
