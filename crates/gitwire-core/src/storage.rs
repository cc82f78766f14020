use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::refs::{RefName, RefTarget, Reference};

/// Symbolic chains longer than this resolve to "ref not found".
pub const MAX_SYMREF_DEPTH: usize = 5;

#[async_trait]
pub trait RefStore: Send + Sync {
    async fn reference(&self, name: &RefName) -> Result<Option<Reference>>;

    async fn references(&self) -> Result<Vec<Reference>>;

    /// Compare-and-set: applies `new` only while the stored reference still
    /// equals `old` (`None` = must not exist). Returns false when the
    /// comparison fails; no retry is performed by callers.
    async fn check_and_set(&self, new: &Reference, old: Option<&Reference>) -> Result<bool>;

    /// Removes `name` only while it still points at `old`.
    async fn remove(&self, name: &RefName, old: Option<&Oid>) -> Result<bool>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn contains(&self, oid: &Oid) -> Result<bool>;

    /// Parent OIDs when `oid` is a known commit, `None` when the object is
    /// absent or not a commit.
    async fn commit_parents(&self, oid: &Oid) -> Result<Option<Vec<Oid>>>;

    /// Ingests a complete packfile. All-or-nothing: either every object in
    /// the pack becomes visible or none does.
    async fn write_pack(&self, pack: Bytes) -> Result<()>;
}

#[async_trait]
pub trait ShallowStore: Send + Sync {
    async fn shallow(&self) -> Result<HashSet<Oid>>;

    async fn set_shallow(&self, shallow: HashSet<Oid>) -> Result<()>;
}

/// Follows symbolic references until a hash reference is reached. Chains
/// longer than MAX_SYMREF_DEPTH (cycles included) report "ref not found".
pub async fn resolve_reference<S: RefStore + ?Sized>(
    store: &S,
    name: &RefName,
) -> Result<Reference> {
    let mut current = name.clone();
    for _ in 0..=MAX_SYMREF_DEPTH {
        let r = store
            .reference(&current)
            .await?
            .ok_or_else(|| Error::RefNotFound(current.to_string()))?;
        match &r.target {
            RefTarget::Hash(_) => return Ok(r),
            RefTarget::Symbolic(target) => current = target.clone(),
        }
    }
    Err(Error::RefNotFound(name.to_string()))
}
