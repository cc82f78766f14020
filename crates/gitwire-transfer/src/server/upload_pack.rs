use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gitwire_core::{ObjectStore, Oid, RefStore};
use gitwire_protocol::sideband::{Muxer, SidebandKind};
use gitwire_protocol::{
    Capabilities, Capability, PktLine, PktLineReader, PktLineWriter, ServerResponse, UploadRequest,
};

use crate::error::{Error, Result};
use crate::server::advertise::{advertise_references, check_supported_capabilities};
use crate::session::{with_cancel, Connection};

/// Produces the packed object stream for a negotiated want/have cut. The
/// packfile codec itself is outside the core.
#[async_trait]
pub trait PackBuilder: Send + Sync {
    async fn build_pack(&self, wants: &[Oid], haves: &[Oid]) -> gitwire_core::Result<Bytes>;
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

/// Serves one `git-upload-pack` session over the connection: advertise,
/// decode the upload request, run the have rounds, and stream the packfile.
pub async fn serve_upload_pack<S, P>(
    storage: &S,
    pack_builder: &P,
    conn: Connection,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: RefStore + ObjectStore + ?Sized,
    P: PackBuilder + ?Sized,
{
    let (r, w) = conn.into_parts();
    let mut reader = PktLineReader::new(r);
    let mut writer = PktLineWriter::new(w);

    let advrefs = advertise_references(storage, false).await?;
    with_cancel(cancel, advrefs.encode(&mut writer)).await?;
    with_cancel(cancel, writer.flush()).await?;

    let req = with_cancel(cancel, UploadRequest::decode(&mut reader)).await?;
    if req.is_empty() {
        return Err(Error::EmptyUploadPackRequest);
    }
    if req.depth.is_some() || !req.shallows.is_empty() {
        return Err(Error::ShallowNotSupported);
    }
    check_supported_capabilities(&advrefs.capabilities, &req.capabilities)?;

    let (haves, common) = read_haves(storage, &mut reader, &mut writer, cancel).await?;
    debug!(
        wants = req.wants.len(),
        haves = haves.len(),
        "negotiation finished"
    );

    let pack = pack_builder
        .build_pack(&req.wants, &common)
        .await
        .map_err(Error::Core)?;

    match sideband_kind(&req.capabilities) {
        Some(kind) => {
            let mut muxer = Muxer::new(&mut writer, kind);
            if !req.capabilities.supports(&Capability::NoProgress) {
                muxer
                    .write_progress(format!("packing {} objects\n", req.wants.len()).as_bytes())
                    .await?;
            }
            muxer.write_data(&pack).await?;
            writer.write_flush().await?;
        }
        None => {
            writer.get_mut().write_all(&pack).await?;
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Runs the have rounds: collects `have` lines, answers each flush and the
/// final `done` with an ACK of the first common object or a NAK.
async fn read_haves<S>(
    storage: &S,
    reader: &mut PktLineReader<impl tokio::io::AsyncRead + Unpin>,
    writer: &mut PktLineWriter<impl tokio::io::AsyncWrite + Unpin>,
    cancel: &CancellationToken,
) -> Result<(Vec<Oid>, Vec<Oid>)>
where
    S: ObjectStore + ?Sized,
{
    let mut haves = Vec::new();
    let mut common = Vec::new();

    loop {
        let pkt = with_cancel(cancel, reader.read_pkt())
            .await?
            .ok_or(gitwire_protocol::Error::UnexpectedEndOfStream)?;

        match pkt {
            PktLine::Flush => {
                respond(writer, &common).await?;
            }
            PktLine::Data(payload) => {
                let line = std::str::from_utf8(&payload)
                    .map_err(|_| {
                        gitwire_protocol::Error::InvalidProtocol(
                            "have line is not utf-8".to_string(),
                        )
                    })?
                    .trim_end_matches('\n');

                if line == "done" {
                    respond(writer, &common).await?;
                    return Ok((haves, common));
                }
                let rest = line.strip_prefix("have ").ok_or_else(|| {
                    gitwire_protocol::Error::InvalidProtocol(format!(
                        "unexpected negotiation line: {}",
                        line
                    ))
                })?;
                let oid = Oid::from_hex(rest).map_err(|e| {
                    gitwire_protocol::Error::InvalidProtocol(format!("invalid have: {}", e))
                })?;
                haves.push(oid);
                if storage.contains(&oid).await? {
                    common.push(oid);
                }
            }
            other => {
                return Err(
                    gitwire_protocol::Error::UnexpectedPacket(format!("{:?}", other)).into(),
                )
            }
        }
    }
}

async fn respond(
    writer: &mut PktLineWriter<impl tokio::io::AsyncWrite + Unpin>,
    common: &[Oid],
) -> Result<()> {
    let response = match common.first() {
        Some(oid) => ServerResponse::Ack(*oid),
        None => ServerResponse::Nak,
    };
    response.encode(writer).await?;
    writer.flush().await?;
    Ok(())
}

/// Pack builder over any object store, emitting the memory backend's pack
/// entry format: walks from the wants down to the haves and packs every
/// commit in between. Backs the stdio server wrappers and the tests.
pub struct MemoryPackBuilder<'a, S: ObjectStore + ?Sized> {
    pub store: &'a S,
}

#[async_trait]
impl<'a, S: ObjectStore + ?Sized> PackBuilder for MemoryPackBuilder<'a, S> {
    async fn build_pack(&self, wants: &[Oid], haves: &[Oid]) -> gitwire_core::Result<Bytes> {
        let mut commits = Vec::new();
        let mut queue: Vec<Oid> = wants.to_vec();
        let mut seen: std::collections::HashSet<Oid> = haves.iter().copied().collect();
        while let Some(oid) = queue.pop() {
            if !seen.insert(oid) {
                continue;
            }
            if let Some(parents) = self.store.commit_parents(&oid).await? {
                for parent in &parents {
                    queue.push(*parent);
                }
                commits.push((oid, parents));
            }
        }
        Ok(gitwire_core::MemoryStorage::encode_pack(&commits, &[]))
    }
}
