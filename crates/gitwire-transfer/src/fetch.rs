use std::collections::{BTreeMap, HashSet};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gitwire_core::{
    resolve_reference, ObjectStore, Oid, RefName, RefStore, Reference, ShallowStore,
};
use gitwire_protocol::sideband::SidebandKind;
use gitwire_protocol::{
    Capabilities, Capability, PackStream, PktLineReader, ServerResponse, ShallowUpdate,
    UploadHaves, UploadRequest,
};

use crate::error::{Error, Result};
use crate::negotiate::{calculate_refs, get_haves, get_wants};
use crate::refspec::{RefSpec, TagMode};
use crate::revwalk::is_fast_forward;
use crate::session::{with_cancel, PackSession};

/// How a fetch should be performed.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub refspecs: Vec<RefSpec>,
    /// `None` is a full fetch with the default have bound; `Some(0)`
    /// explicitly lifts the bound; any other value limits history depth.
    pub depth: Option<u32>,
    /// Sink for human-readable progress from the server. When absent the
    /// no-progress capability is requested instead.
    pub progress: Option<UnboundedSender<Bytes>>,
    pub tags: TagMode,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Updated,
    AlreadyUpToDate,
}

#[derive(Debug)]
pub struct FetchSummary {
    pub status: FetchStatus,
    pub remote_refs: BTreeMap<RefName, Reference>,
}

/// Drives a full fetch against an established session: handshake, refspec
/// matching, want/have negotiation, packfile download, and local reference
/// updates. Local updates performed before a "force needed" outcome are kept.
pub async fn fetch<S>(
    storage: &S,
    session: &mut PackSession,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<FetchSummary>
where
    S: RefStore + ObjectStore + ShallowStore + ?Sized,
{
    let advrefs = session.handshake(false, cancel).await?;
    let caps = advrefs.capabilities.clone();
    let remote_refs = advrefs.all_references();

    if opts.refspecs.iter().any(|s| s.is_exact_sha1())
        && !caps.supports(&Capability::AllowTipSha1InWant)
        && !caps.supports(&Capability::AllowReachableSha1InWant)
    {
        return Err(Error::UnsupportedRefSpec);
    }

    let (refs, spec_to_refs) = calculate_refs(&opts.refspecs, &remote_refs, opts.tags)?;

    let shallows_before = storage.shallow().await?;
    let wants = get_wants(storage, &refs, opts.depth).await?;

    if !wants.is_empty() {
        let local_refs = storage.references().await?;
        let haves = get_haves(storage, &local_refs, &remote_refs, opts.depth).await?;
        fetch_pack(
            storage,
            session,
            opts,
            &caps,
            wants,
            haves,
            &shallows_before,
            cancel,
        )
        .await?;
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let (mut updated, force_needed) =
        update_local_refs(storage, opts, &refs, &remote_refs, &spec_to_refs).await?;

    if !updated {
        updated = depth_changed(&shallows_before, storage).await?;
    }

    if force_needed {
        return Err(Error::ForceNeeded);
    }

    let status = if updated {
        FetchStatus::Updated
    } else {
        FetchStatus::AlreadyUpToDate
    };
    Ok(FetchSummary {
        status,
        remote_refs,
    })
}

fn sideband_kind(caps: &Capabilities) -> Option<SidebandKind> {
    if caps.supports(&Capability::SideBand64k) {
        Some(SidebandKind::Sideband64k)
    } else if caps.supports(&Capability::SideBand) {
        Some(SidebandKind::Sideband)
    } else {
        None
    }
}

fn build_upload_request(
    opts: &FetchOptions,
    server_caps: &Capabilities,
    wants: Vec<Oid>,
    shallows_before: &HashSet<Oid>,
) -> UploadRequest {
    let mut req = UploadRequest::from_capabilities(server_caps);

    if server_caps.supports(&Capability::OfsDelta) {
        req.capabilities.set(Capability::OfsDelta);
    }
    match sideband_kind(server_caps) {
        Some(SidebandKind::Sideband64k) => req.capabilities.set(Capability::SideBand64k),
        Some(SidebandKind::Sideband) => req.capabilities.set(Capability::SideBand),
        None => {}
    }
    // Advertised thin-pack never survives the client-side filter, so this is
    // inert unless the filter policy changes.
    if server_caps.supports(&Capability::ThinPack) {
        req.capabilities.set(Capability::ThinPack);
    }
    if opts.progress.is_none() && server_caps.supports(&Capability::NoProgress) {
        req.capabilities.set(Capability::NoProgress);
    }

    let all_wildcard = opts.refspecs.iter().all(|s| s.is_wildcard());
    if all_wildcard
        && opts.tags == TagMode::Following
        && server_caps.supports(&Capability::IncludeTag)
    {
        req.capabilities.set(Capability::IncludeTag);
    }

    if matches!(opts.depth, Some(d) if d > 0) {
        req.depth = opts.depth;
        req.capabilities.set(Capability::Shallow);
        let mut shallows: Vec<Oid> = shallows_before.iter().copied().collect();
        shallows.sort();
        req.shallows = shallows;
    }

    req.wants = wants;
    req
}

#[allow(clippy::too_many_arguments)]
async fn fetch_pack<S>(
    storage: &S,
    session: &mut PackSession,
    opts: &FetchOptions,
    server_caps: &Capabilities,
    wants: Vec<Oid>,
    haves: Vec<Oid>,
    shallows_before: &HashSet<Oid>,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: ObjectStore + ShallowStore + ?Sized,
{
    let req = build_upload_request(opts, server_caps, wants, shallows_before);

    // Everything we want is already claimed in the haves and no shallow
    // state is in play: a single flush ends the exchange as up-to-date.
    let have_set: HashSet<Oid> = haves.iter().copied().collect();
    if req.wants.iter().all(|w| have_set.contains(w)) && req.shallows.is_empty() {
        let (_, writer) = session.io();
        with_cancel(cancel, writer.write_flush()).await?;
        with_cancel(cancel, writer.flush()).await?;
        debug!("upload-pack request elided, already up to date");
        return Ok(());
    }

    let depth_requested = req.depth.is_some();
    let negotiated = req.capabilities.clone();

    {
        let (reader, writer) = session.io();
        with_cancel(cancel, req.encode(writer)).await?;
        with_cancel(cancel, writer.flush()).await?;

        if depth_requested {
            let update = with_cancel(cancel, ShallowUpdate::decode(reader)).await?;
            merge_shallow(storage, shallows_before, &update).await?;
        }

        let uphav = UploadHaves { haves };
        with_cancel(cancel, uphav.encode(writer, true)).await?;
        with_cancel(cancel, writer.flush()).await?;

        let response = with_cancel(cancel, ServerResponse::decode(reader)).await?;
        debug!(?response, "server response to haves");

        with_cancel(cancel, writer.write_data("done\n".to_string())).await?;
        with_cancel(cancel, writer.flush()).await?;

        let final_response = with_cancel(cancel, ServerResponse::decode(reader)).await?;
        debug!(?final_response, "final ACK/NAK");
    }

    let pack = read_packfile(session, &negotiated, opts.progress.clone(), cancel).await?;
    with_cancel(cancel, storage.write_pack(pack)).await?;
    Ok(())
}

async fn read_packfile(
    session: &mut PackSession,
    negotiated: &Capabilities,
    progress: Option<UnboundedSender<Bytes>>,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    let (reader, _) = session.io();
    let inner = reader.get_mut();

    let mut stream = match sideband_kind(negotiated) {
        Some(kind) => PackStream::demuxed(kind, PktLineReader::new(inner), progress),
        None => PackStream::raw(inner),
    };

    let mut pack = BytesMut::new();
    loop {
        let chunk = with_cancel(cancel, stream.read_chunk()).await?;
        match chunk {
            Some(chunk) => pack.extend_from_slice(&chunk),
            None => break,
        }
    }
    debug!(bytes = pack.len(), "packfile received");
    Ok(pack.freeze())
}

/// Union-merges the received shallow block into the stored set. The write is
/// a whole-set replacement from the snapshot taken at fetch start.
async fn merge_shallow<S: ShallowStore + ?Sized>(
    storage: &S,
    before: &HashSet<Oid>,
    update: &ShallowUpdate,
) -> Result<()> {
    if update.shallows.is_empty() {
        return Ok(());
    }
    let mut merged = before.clone();
    merged.extend(update.shallows.iter().copied());
    storage.set_shallow(merged).await?;
    Ok(())
}

async fn depth_changed<S: ShallowStore + ?Sized>(
    before: &HashSet<Oid>,
    storage: &S,
) -> Result<bool> {
    let after = storage.shallow().await?;
    Ok(*before != after)
}

async fn check_and_update<S: RefStore + ?Sized>(storage: &S, new: &Reference) -> Result<bool> {
    let current = storage.reference(&new.name).await?;
    if current.as_ref() == Some(new) {
        return Ok(false);
    }
    let applied = storage.check_and_set(new, current.as_ref()).await?;
    if !applied {
        // A concurrent writer won the race; no retry, the update is simply
        // reported as not applied.
        warn!(name = %new.name, "reference update lost compare-and-set race");
    }
    Ok(applied)
}

async fn update_local_refs<S>(
    storage: &S,
    opts: &FetchOptions,
    fetched_refs: &BTreeMap<RefName, Reference>,
    remote_refs: &BTreeMap<RefName, Reference>,
    spec_to_refs: &[Vec<Reference>],
) -> Result<(bool, bool)>
where
    S: RefStore + ObjectStore + ?Sized,
{
    let mut updated = false;
    let mut force_needed = false;

    for (spec, matched) in opts.refspecs.iter().zip(spec_to_refs) {
        for reference in matched {
            let oid = match reference.oid() {
                Some(oid) => oid,
                None => continue,
            };

            let raw = spec.map_dst(&reference.name);
            let local_name = if raw.starts_with("refs/") {
                RefName::new(raw)?
            } else {
                RefName::branch(&raw)?
            };

            let old = resolve_reference(storage, &local_name).await.ok();
            let new = Reference::hash(local_name, oid);

            if let Some(old) = &old {
                if !old.name.is_tag() && !opts.force && !spec.is_force() {
                    let old_oid = old.oid().expect("resolved reference is a hash");
                    if !is_fast_forward(storage, &old_oid, &oid).await? {
                        force_needed = true;
                        continue;
                    }
                }
            }

            if check_and_update(storage, &new).await? {
                updated = true;
            }
        }
    }

    if opts.tags != TagMode::None {
        let all_wildcard = opts.refspecs.iter().all(|s| s.is_wildcard());
        let scope = if all_wildcard { remote_refs } else { fetched_refs };
        if update_fetched_tags(storage, scope).await? {
            updated = true;
        }
    }

    Ok((updated, force_needed))
}

/// Materializes tag references whose target object arrived (or was already
/// present). Tags pointing at objects we do not hold are silently skipped.
async fn update_fetched_tags<S>(
    storage: &S,
    scope: &BTreeMap<RefName, Reference>,
) -> Result<bool>
where
    S: RefStore + ObjectStore + ?Sized,
{
    let mut updated = false;
    for reference in scope.values() {
        if !reference.name.is_tag() {
            continue;
        }
        let oid = match reference.oid() {
            Some(oid) => oid,
            None => continue,
        };
        if !storage.contains(&oid).await? {
            continue;
        }
        if check_and_update(storage, reference).await? {
            updated = true;
        }
    }
    Ok(updated)
}
