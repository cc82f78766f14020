use std::collections::{BTreeMap, BTreeSet, HashSet};

use gitwire_core::storage::MAX_SYMREF_DEPTH;
use gitwire_core::{ObjectStore, Oid, RefName, RefTarget, Reference, ShallowStore};
use tracing::debug;

use crate::error::{Error, Result};
use crate::refspec::{RefSpec, TagMode};
use crate::revwalk::CommitWalker;

/// Upper bound on ancestor commits contributed to the have list per local
/// reference. A positive fetch depth below this substitutes for it; an
/// explicit depth of zero lifts the bound entirely.
pub const MAX_HAVES_PER_REF: usize = 100;

const ALL_TAGS_SPEC: &str = "+refs/tags/*:refs/tags/*";

fn resolve_in_map(
    refs: &BTreeMap<RefName, Reference>,
    name: &RefName,
) -> gitwire_core::Result<Reference> {
    let mut current = name.clone();
    for _ in 0..=MAX_SYMREF_DEPTH {
        let r = refs
            .get(&current)
            .ok_or_else(|| gitwire_core::Error::RefNotFound(current.to_string()))?;
        match &r.target {
            RefTarget::Hash(_) => return Ok(r.clone()),
            RefTarget::Symbolic(target) => current = target.clone(),
        }
    }
    Err(gitwire_core::Error::RefNotFound(name.to_string()))
}

/// Expands a possibly short reference name against the remote reference map,
/// trying the conventional namespaces in order. When every rule fails, the
/// error of the first rule is returned for diagnostic continuity.
pub fn expand_ref(refs: &BTreeMap<RefName, Reference>, short: &str) -> Result<Reference> {
    let candidates = [
        short.to_string(),
        format!("refs/{}", short),
        format!("refs/tags/{}", short),
        format!("refs/heads/{}", short),
        format!("refs/remotes/{}", short),
        format!("refs/remotes/{}/HEAD", short),
    ];

    let mut first_err: Option<gitwire_core::Error> = None;
    for candidate in candidates {
        let result = RefName::new(candidate).and_then(|name| resolve_in_map(refs, &name));
        match result {
            Ok(r) => return Ok(r),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    Err(first_err.expect("at least one rule ran").into())
}

fn record(
    reference: Reference,
    refs: &mut BTreeMap<RefName, Reference>,
    matched: &mut Vec<Reference>,
) {
    refs.insert(reference.name.clone(), reference.clone());
    matched.push(reference);
}

fn calculate_for_spec(
    spec: &RefSpec,
    remote_refs: &BTreeMap<RefName, Reference>,
    refs: &mut BTreeMap<RefName, Reference>,
) -> Result<Vec<Reference>> {
    let mut matched = Vec::new();

    if spec.is_exact_sha1() {
        let name = RefName::new(spec.dst().to_string())?;
        let oid = Oid::from_hex(spec.src())?;
        record(Reference::hash(name, oid), refs, &mut matched);
        return Ok(matched);
    }

    if spec.is_wildcard() {
        for reference in remote_refs.values() {
            if !spec.matches(&reference.name) {
                continue;
            }
            let resolved = match &reference.target {
                RefTarget::Hash(_) => reference.clone(),
                RefTarget::Symbolic(_) => match resolve_in_map(remote_refs, &reference.name) {
                    // Keep the matched name, take the resolved hash.
                    Ok(target) => Reference::hash(
                        reference.name.clone(),
                        target.oid().expect("resolved reference is a hash"),
                    ),
                    Err(_) => continue,
                },
            };
            record(resolved, refs, &mut matched);
        }
        return Ok(matched);
    }

    match expand_ref(remote_refs, spec.src()) {
        Ok(reference) => {
            record(reference, refs, &mut matched);
            Ok(matched)
        }
        Err(_) => Err(Error::NoMatchingRefSpec(spec.to_string())),
    }
}

/// For each refspec, the remote references it selects. Returns both the flat
/// name map (input to want computation) and the per-spec lists (input to the
/// local update pass).
pub fn calculate_refs(
    specs: &[RefSpec],
    remote_refs: &BTreeMap<RefName, Reference>,
    tag_mode: TagMode,
) -> Result<(BTreeMap<RefName, Reference>, Vec<Vec<Reference>>)> {
    let mut specs: Vec<RefSpec> = specs.to_vec();
    if tag_mode == TagMode::All {
        specs.push(ALL_TAGS_SPEC.parse().expect("static spec parses"));
    }

    let mut refs = BTreeMap::new();
    let mut spec_to_refs = Vec::with_capacity(specs.len());
    for spec in &specs {
        spec_to_refs.push(calculate_for_spec(spec, remote_refs, &mut refs)?);
    }
    Ok((refs, spec_to_refs))
}

/// The object ids to request: targets that are locally absent, plus every
/// selected target when the local clone is shallow and the requested depth is
/// not exactly one (present tips may still be missing parents).
pub async fn get_wants<S>(
    store: &S,
    refs: &BTreeMap<RefName, Reference>,
    depth: Option<u32>,
) -> Result<Vec<Oid>>
where
    S: ObjectStore + ShallowStore + ?Sized,
{
    let shallow = if depth != Some(1) {
        !store.shallow().await?.is_empty()
    } else {
        false
    };

    let mut wants = BTreeSet::new();
    for reference in refs.values() {
        let oid = match reference.oid() {
            Some(oid) => oid,
            None => continue,
        };
        if shallow || !store.contains(&oid).await? {
            wants.insert(oid);
        }
    }
    debug!(count = wants.len(), "computed wants");
    Ok(wants.into_iter().collect())
}

/// The commits the client claims to hold, bounded per reference. Remote tips
/// short-circuit without a walk; non-commit tips are claimed opaquely; walk
/// errors keep whatever was collected so far, since a shallow clone cannot
/// reach past its boundary.
pub async fn get_haves<S>(
    store: &S,
    local_refs: &[Reference],
    remote_refs: &BTreeMap<RefName, Reference>,
    depth: Option<u32>,
) -> Result<Vec<Oid>>
where
    S: ObjectStore + ?Sized,
{
    let remote_have: HashSet<Oid> = remote_refs
        .values()
        .filter_map(|r| r.oid())
        .collect();

    let limit = match depth {
        Some(0) => usize::MAX,
        Some(d) if (d as usize) < MAX_HAVES_PER_REF => d as usize,
        _ => MAX_HAVES_PER_REF,
    };

    let mut haves: HashSet<Oid> = HashSet::new();
    for reference in local_refs {
        let tip = match reference.oid() {
            Some(oid) => oid,
            None => continue,
        };
        if haves.contains(&tip) {
            continue;
        }
        if remote_have.contains(&tip) {
            haves.insert(tip);
            continue;
        }
        match store.commit_parents(&tip).await {
            Ok(Some(_)) => {}
            // Not a commit (or unreadable): claim the tip itself and move on.
            Ok(None) | Err(_) => {
                haves.insert(tip);
                continue;
            }
        }

        let mut walker = CommitWalker::with_seen(store, tip, haves.clone());
        let mut visited = 0usize;
        loop {
            match walker.next().await {
                Ok(Some(oid)) => {
                    haves.insert(oid);
                    visited += 1;
                    if visited >= limit || remote_have.contains(&oid) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    let mut result: Vec<Oid> = haves.into_iter().collect();
    result.sort();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use gitwire_core::MemoryStorage;

    fn make_oid(s: &str) -> Oid {
        Oid::hash(s.as_bytes())
    }

    fn hash_ref(name: &str, oid: Oid) -> Reference {
        Reference::hash(RefName::new(name).unwrap(), oid)
    }

    fn remote_map(refs: Vec<Reference>) -> BTreeMap<RefName, Reference> {
        refs.into_iter().map(|r| (r.name.clone(), r)).collect()
    }

    #[test]
    fn test_expand_ref_identity() {
        let oid = make_oid("main");
        let refs = remote_map(vec![hash_ref("refs/heads/main", oid)]);
        let r = expand_ref(&refs, "refs/heads/main").unwrap();
        assert_eq!(r.oid(), Some(oid));
    }

    #[test]
    fn test_expand_ref_tags_before_heads() {
        let tag = make_oid("tag");
        let head = make_oid("head");
        let refs = remote_map(vec![
            hash_ref("refs/tags/v1", tag),
            hash_ref("refs/heads/v1", head),
        ]);
        let r = expand_ref(&refs, "v1").unwrap();
        assert_eq!(r.oid(), Some(tag));
    }

    #[test]
    fn test_expand_ref_short_branch() {
        let oid = make_oid("main");
        let refs = remote_map(vec![hash_ref("refs/heads/main", oid)]);
        let r = expand_ref(&refs, "main").unwrap();
        assert_eq!(r.name.as_str(), "refs/heads/main");
    }

    #[test]
    fn test_expand_ref_all_rules_fail() {
        let refs = remote_map(vec![]);
        assert!(expand_ref(&refs, "missing").is_err());
    }

    #[test]
    fn test_calculate_refs_exact_sha1() {
        let oid = make_oid("pinned");
        let spec: RefSpec = format!("{}:refs/remotes/origin/pin", oid).parse().unwrap();
        let refs = remote_map(vec![]);

        let (flat, per_spec) = calculate_refs(&[spec], &refs, TagMode::None).unwrap();
        assert_eq!(per_spec[0][0].oid(), Some(oid));
        assert!(flat.contains_key(&RefName::new("refs/remotes/origin/pin").unwrap()));
    }

    #[test]
    fn test_calculate_refs_wildcard() {
        let main = make_oid("main");
        let dev = make_oid("dev");
        let refs = remote_map(vec![
            hash_ref("refs/heads/main", main),
            hash_ref("refs/heads/dev", dev),
            hash_ref("refs/tags/v1", make_oid("tag")),
        ]);
        let spec: RefSpec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();

        let (flat, per_spec) = calculate_refs(&[spec], &refs, TagMode::None).unwrap();
        assert_eq!(per_spec[0].len(), 2);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_calculate_refs_wildcard_resolves_symbolic() {
        let main = make_oid("main");
        let head = Reference::symbolic(RefName::head(), RefName::branch("main").unwrap());
        let mut refs = remote_map(vec![hash_ref("refs/heads/main", main)]);
        refs.insert(RefName::head(), head);

        let spec: RefSpec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        let (flat, _) = calculate_refs(&[spec], &refs, TagMode::None).unwrap();
        // HEAD does not match the pattern; only the branch lands in the map.
        assert_eq!(flat.len(), 1);
        assert_eq!(
            flat.values().next().unwrap().oid(),
            Some(main)
        );
    }

    #[test]
    fn test_calculate_refs_no_match_reports_spec() {
        let refs = remote_map(vec![]);
        let spec: RefSpec = "refs/heads/missing:refs/remotes/origin/missing".parse().unwrap();
        let err = calculate_refs(&[spec], &refs, TagMode::None).unwrap_err();
        match err {
            Error::NoMatchingRefSpec(s) => assert!(s.contains("refs/heads/missing")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_calculate_refs_all_tags_appends_spec() {
        let tag = make_oid("tag");
        let refs = remote_map(vec![hash_ref("refs/tags/v1", tag)]);
        let (flat, per_spec) = calculate_refs(&[], &refs, TagMode::All).unwrap();
        assert_eq!(per_spec.len(), 1);
        assert!(flat.contains_key(&RefName::tag("v1").unwrap()));
    }

    #[tokio::test]
    async fn test_get_wants_absent_objects() {
        let store = MemoryStorage::new();
        let present = make_oid("present");
        let absent = make_oid("absent");
        store.add_commit(present, vec![]);

        let refs = remote_map(vec![
            hash_ref("refs/heads/a", present),
            hash_ref("refs/heads/b", absent),
        ]);
        let wants = get_wants(&store, &refs, None).await.unwrap();
        assert_eq!(wants, vec![absent]);
    }

    #[tokio::test]
    async fn test_get_wants_dedupes() {
        let store = MemoryStorage::new();
        let absent = make_oid("absent");
        let refs = remote_map(vec![
            hash_ref("refs/heads/a", absent),
            hash_ref("refs/heads/b", absent),
        ]);
        let wants = get_wants(&store, &refs, None).await.unwrap();
        assert_eq!(wants.len(), 1);
    }

    #[tokio::test]
    async fn test_get_wants_shallow_repo_still_wants_present_tips() {
        let store = MemoryStorage::new();
        let present = make_oid("present");
        store.add_commit(present, vec![]);
        store
            .set_shallow([make_oid("boundary")].into_iter().collect())
            .await
            .unwrap();

        let refs = remote_map(vec![hash_ref("refs/heads/a", present)]);

        let wants = get_wants(&store, &refs, None).await.unwrap();
        assert_eq!(wants, vec![present]);

        // Depth of exactly one trusts the present tip.
        let wants = get_wants(&store, &refs, Some(1)).await.unwrap();
        assert!(wants.is_empty());
    }

    fn build_chain(store: &MemoryStorage, len: usize) -> Vec<Oid> {
        let mut chain = Vec::with_capacity(len);
        let mut parent: Option<Oid> = None;
        for i in 0..len {
            let oid = make_oid(&format!("chain-{}", i));
            store.add_commit(oid, parent.into_iter().collect());
            parent = Some(oid);
            chain.push(oid);
        }
        chain
    }

    #[tokio::test]
    async fn test_get_haves_bounded_at_max() {
        let store = MemoryStorage::new();
        let chain = build_chain(&store, 150);
        let tip = *chain.last().unwrap();

        let local = vec![hash_ref("refs/heads/main", tip)];
        let haves = get_haves(&store, &local, &BTreeMap::new(), None).await.unwrap();
        assert_eq!(haves.len(), MAX_HAVES_PER_REF);
    }

    #[tokio::test]
    async fn test_get_haves_depth_substitutes_limit() {
        let store = MemoryStorage::new();
        let chain = build_chain(&store, 50);
        let tip = *chain.last().unwrap();

        let local = vec![hash_ref("refs/heads/main", tip)];
        let haves = get_haves(&store, &local, &BTreeMap::new(), Some(5)).await.unwrap();
        assert_eq!(haves.len(), 5);
    }

    #[tokio::test]
    async fn test_get_haves_explicit_zero_walks_everything() {
        let store = MemoryStorage::new();
        let chain = build_chain(&store, 150);
        let tip = *chain.last().unwrap();

        let local = vec![hash_ref("refs/heads/main", tip)];
        let haves = get_haves(&store, &local, &BTreeMap::new(), Some(0)).await.unwrap();
        assert_eq!(haves.len(), 150);
    }

    #[tokio::test]
    async fn test_get_haves_remote_tip_needs_no_walk() {
        let store = MemoryStorage::new();
        let chain = build_chain(&store, 10);
        let tip = *chain.last().unwrap();

        let local = vec![hash_ref("refs/heads/main", tip)];
        let remote = remote_map(vec![hash_ref("refs/heads/main", tip)]);
        let haves = get_haves(&store, &local, &remote, None).await.unwrap();
        assert_eq!(haves, vec![tip]);
    }

    #[tokio::test]
    async fn test_get_haves_stops_at_remote_known_ancestor() {
        let store = MemoryStorage::new();
        let chain = build_chain(&store, 10);
        let tip = *chain.last().unwrap();
        let known = chain[7];

        let local = vec![hash_ref("refs/heads/main", tip)];
        let remote = remote_map(vec![hash_ref("refs/heads/old", known)]);
        let haves = get_haves(&store, &local, &remote, None).await.unwrap();
        // tip (9), 8, and the remotely known 7.
        assert_eq!(haves.len(), 3);
        assert!(haves.contains(&known));
    }

    #[tokio::test]
    async fn test_get_haves_opaque_tip() {
        let store = MemoryStorage::new();
        let blob = make_oid("annotated-tag-object");
        store.add_object(blob);

        let local = vec![hash_ref("refs/tags/v1", blob)];
        let haves = get_haves(&store, &local, &BTreeMap::new(), None).await.unwrap();
        assert_eq!(haves, vec![blob]);
    }

    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn contains(&self, _oid: &Oid) -> gitwire_core::Result<bool> {
            Ok(false)
        }

        async fn commit_parents(&self, _oid: &Oid) -> gitwire_core::Result<Option<Vec<Oid>>> {
            Err(gitwire_core::Error::ObjectNotFound("boom".to_string()))
        }

        async fn write_pack(&self, _pack: Bytes) -> gitwire_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_get_haves_swallows_traversal_errors() {
        let store = FailingStore;
        let tip = make_oid("tip");
        let local = vec![hash_ref("refs/heads/main", tip)];
        let haves = get_haves(&store, &local, &BTreeMap::new(), None).await.unwrap();
        assert_eq!(haves, vec![tip]);
    }
}
