use std::collections::{HashSet, VecDeque};

use gitwire_core::{ObjectStore, Oid};

use crate::error::Result;

/// Lazy preorder walk over commit ancestry. The visited set can be seeded by
/// the caller so hashes it already collected are skipped; objects that are
/// absent or not commits end their branch of the walk silently, which is what
/// a shallow boundary looks like.
pub struct CommitWalker<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    queue: VecDeque<Oid>,
    visited: HashSet<Oid>,
}

impl<'a, S: ObjectStore + ?Sized> CommitWalker<'a, S> {
    pub fn new(store: &'a S, start: Oid) -> Self {
        Self::with_seen(store, start, HashSet::new())
    }

    pub fn with_seen(store: &'a S, start: Oid, seen: HashSet<Oid>) -> Self {
        let mut visited = seen;
        let mut queue = VecDeque::new();
        if visited.insert(start) {
            queue.push_back(start);
        }
        Self {
            store,
            queue,
            visited,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Oid>> {
        while let Some(oid) = self.queue.pop_front() {
            if let Some(parents) = self.store.commit_parents(&oid).await? {
                for parent in parents {
                    if self.visited.insert(parent) {
                        self.queue.push_back(parent);
                    }
                }
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }
}

/// Whether `old` is an ancestor of `new` (or equal to it), so a reference
/// move from `old` to `new` loses no history.
pub async fn is_fast_forward<S: ObjectStore + ?Sized>(
    store: &S,
    old: &Oid,
    new: &Oid,
) -> Result<bool> {
    let mut walker = CommitWalker::new(store, *new);
    while let Some(oid) = walker.next().await? {
        if oid == *old {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitwire_core::MemoryStorage;

    fn make_oid(s: &str) -> Oid {
        Oid::hash(s.as_bytes())
    }

    /// a <- b <- c, with d on a side branch off a.
    fn build_graph(store: &MemoryStorage) -> (Oid, Oid, Oid, Oid) {
        let a = make_oid("a");
        let b = make_oid("b");
        let c = make_oid("c");
        let d = make_oid("d");
        store.add_commit(a, vec![]);
        store.add_commit(b, vec![a]);
        store.add_commit(c, vec![b]);
        store.add_commit(d, vec![a]);
        (a, b, c, d)
    }

    #[tokio::test]
    async fn test_walk_preorder() {
        let store = MemoryStorage::new();
        let (a, b, c, _) = build_graph(&store);

        let mut walker = CommitWalker::new(&store, c);
        let mut order = Vec::new();
        while let Some(oid) = walker.next().await.unwrap() {
            order.push(oid);
        }
        assert_eq!(order, vec![c, b, a]);
    }

    #[tokio::test]
    async fn test_walk_merge_visits_each_once() {
        let store = MemoryStorage::new();
        let (a, b, _, d) = build_graph(&store);
        let merge = make_oid("merge");
        store.add_commit(merge, vec![b, d]);

        let mut walker = CommitWalker::new(&store, merge);
        let mut seen = Vec::new();
        while let Some(oid) = walker.next().await.unwrap() {
            seen.push(oid);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.iter().filter(|o| **o == a).count(), 1);
    }

    #[tokio::test]
    async fn test_walk_skips_seeded_visited() {
        let store = MemoryStorage::new();
        let (a, b, c, _) = build_graph(&store);

        let seen = [b].into_iter().collect();
        let mut walker = CommitWalker::with_seen(&store, c, seen);
        let mut order = Vec::new();
        while let Some(oid) = walker.next().await.unwrap() {
            order.push(oid);
        }
        // b is pre-seeded, and the walk cannot reach a except through b.
        assert_eq!(order, vec![c]);
        assert!(!order.contains(&a));
    }

    #[tokio::test]
    async fn test_walk_stops_at_missing_parent() {
        let store = MemoryStorage::new();
        let orphan_parent = make_oid("never-stored");
        let tip = make_oid("tip");
        store.add_commit(tip, vec![orphan_parent]);

        let mut walker = CommitWalker::new(&store, tip);
        assert_eq!(walker.next().await.unwrap(), Some(tip));
        assert_eq!(walker.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fast_forward_ancestor() {
        let store = MemoryStorage::new();
        let (a, b, c, d) = build_graph(&store);

        assert!(is_fast_forward(&store, &a, &c).await.unwrap());
        assert!(is_fast_forward(&store, &b, &c).await.unwrap());
        assert!(is_fast_forward(&store, &c, &c).await.unwrap());
        assert!(!is_fast_forward(&store, &c, &a).await.unwrap());
        assert!(!is_fast_forward(&store, &d, &c).await.unwrap());
    }
}
