use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::refs::{RefName, RefTarget, Reference};
use crate::storage::{ObjectStore, RefStore, ShallowStore};

/// In-memory storage backend. The pack-transfer core treats the packfile
/// codec as an external collaborator, so this backend ingests packs in a
/// trivial line format of its own (see [`MemoryStorage::encode_pack`]):
///
/// ```text
/// commit <hex-oid> [<hex-parent>,<hex-parent>,...]
/// object <hex-oid>
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    refs: RwLock<HashMap<RefName, Reference>>,
    commits: RwLock<HashMap<Oid, Vec<Oid>>>,
    objects: RwLock<HashSet<Oid>>,
    shallow: RwLock<HashSet<Oid>>,
    packs_received: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reference(&self, reference: Reference) {
        self.refs.write().insert(reference.name.clone(), reference);
    }

    pub fn add_commit(&self, oid: Oid, parents: Vec<Oid>) {
        self.objects.write().insert(oid);
        self.commits.write().insert(oid, parents);
    }

    pub fn add_object(&self, oid: Oid) {
        self.objects.write().insert(oid);
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn packs_received(&self) -> usize {
        self.packs_received.load(Ordering::SeqCst)
    }

    /// Loads a fixture directory: an optional `refs` file with
    /// `<name> <hex>` / `<name> ref: <target>` lines, and an optional
    /// `objects` file in the pack entry format.
    pub fn load_dir(dir: &std::path::Path) -> Result<Self> {
        let storage = Self::new();

        let refs_path = dir.join("refs");
        if refs_path.exists() {
            let text = std::fs::read_to_string(&refs_path)?;
            for line in text.lines().filter(|l| !l.is_empty()) {
                let (name, target) = line.split_once(' ').ok_or_else(|| {
                    Error::InvalidRefName(format!("malformed refs line: {}", line))
                })?;
                let name = RefName::new(name)?;
                let reference = match target.strip_prefix("ref: ") {
                    Some(symbolic) => Reference::symbolic(name, RefName::new(symbolic)?),
                    None => Reference::hash(name, Oid::from_hex(target)?),
                };
                storage.set_reference(reference);
            }
        }

        let objects_path = dir.join("objects");
        if objects_path.exists() {
            let text = std::fs::read_to_string(&objects_path)?;
            storage.ingest(&text)?;
        }

        Ok(storage)
    }

    pub fn encode_pack(commits: &[(Oid, Vec<Oid>)], objects: &[Oid]) -> Bytes {
        let mut out = String::new();
        for (oid, parents) in commits {
            let parents = parents
                .iter()
                .map(|p| p.to_hex())
                .collect::<Vec<_>>()
                .join(",");
            if parents.is_empty() {
                out.push_str(&format!("commit {}\n", oid));
            } else {
                out.push_str(&format!("commit {} {}\n", oid, parents));
            }
        }
        for oid in objects {
            out.push_str(&format!("object {}\n", oid));
        }
        Bytes::from(out)
    }
}

#[async_trait]
impl RefStore for MemoryStorage {
    async fn reference(&self, name: &RefName) -> Result<Option<Reference>> {
        Ok(self.refs.read().get(name).cloned())
    }

    async fn references(&self) -> Result<Vec<Reference>> {
        let mut refs: Vec<Reference> = self.refs.read().values().cloned().collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    async fn check_and_set(&self, new: &Reference, old: Option<&Reference>) -> Result<bool> {
        let mut refs = self.refs.write();
        let current = refs.get(&new.name);
        let matches = match (current, old) {
            (None, None) => true,
            (Some(c), Some(o)) => c == o,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }
        refs.insert(new.name.clone(), new.clone());
        Ok(true)
    }

    async fn remove(&self, name: &RefName, old: Option<&Oid>) -> Result<bool> {
        let mut refs = self.refs.write();
        let matches = match (refs.get(name), old) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(c), Some(o)) => matches!(&c.target, RefTarget::Hash(h) if h == o),
        };
        if !matches {
            return Ok(false);
        }
        refs.remove(name);
        Ok(true)
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn contains(&self, oid: &Oid) -> Result<bool> {
        Ok(self.objects.read().contains(oid))
    }

    async fn commit_parents(&self, oid: &Oid) -> Result<Option<Vec<Oid>>> {
        Ok(self.commits.read().get(oid).cloned())
    }

    async fn write_pack(&self, pack: Bytes) -> Result<()> {
        let text = std::str::from_utf8(&pack)
            .map_err(|_| Error::InvalidPack("pack is not valid utf-8".to_string()))?;
        self.ingest(text)?;
        self.packs_received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryStorage {
    // Parses everything before touching the stores so a malformed pack
    // leaves no partial state behind.
    fn ingest(&self, text: &str) -> Result<()> {
        let mut commits = Vec::new();
        let mut objects = Vec::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            let mut fields = line.split(' ');
            match (fields.next(), fields.next(), fields.next()) {
                (Some("commit"), Some(hex), parents) => {
                    let oid = Oid::from_hex(hex)
                        .map_err(|e| Error::InvalidPack(e.to_string()))?;
                    let parents = parents
                        .map(|p| {
                            p.split(',')
                                .map(Oid::from_hex)
                                .collect::<Result<Vec<_>>>()
                        })
                        .transpose()
                        .map_err(|e| Error::InvalidPack(e.to_string()))?
                        .unwrap_or_default();
                    commits.push((oid, parents));
                }
                (Some("object"), Some(hex), None) => {
                    let oid = Oid::from_hex(hex)
                        .map_err(|e| Error::InvalidPack(e.to_string()))?;
                    objects.push(oid);
                }
                _ => {
                    return Err(Error::InvalidPack(format!("malformed entry: {}", line)));
                }
            }
        }

        let mut object_set = self.objects.write();
        let mut commit_map = self.commits.write();
        for (oid, parents) in commits {
            object_set.insert(oid);
            commit_map.insert(oid, parents);
        }
        for oid in objects {
            object_set.insert(oid);
        }
        Ok(())
    }
}

#[async_trait]
impl ShallowStore for MemoryStorage {
    async fn shallow(&self) -> Result<HashSet<Oid>> {
        Ok(self.shallow.read().clone())
    }

    async fn set_shallow(&self, shallow: HashSet<Oid>) -> Result<()> {
        *self.shallow.write() = shallow;
        Ok(())
    }
}
