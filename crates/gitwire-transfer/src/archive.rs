use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gitwire_protocol::{
    PktLineReader, PktLineWriter, UploadArchiveRequest, UploadArchiveResponse,
};

use crate::error::{Error, Result};
use crate::session::{with_cancel, Connection};

/// Produces archive bytes (tar/tgz/zip) for a validated request. Archive
/// generation itself is outside the core; only the wire envelope is ours.
#[async_trait]
pub trait ArchiveBuilder: Send + Sync {
    async fn build_archive(&self, request: &UploadArchiveRequest) -> gitwire_core::Result<Bytes>;
}

/// Client side of `git-upload-archive`: sends the request, decodes the
/// ACK-framed response into a format-aware reader.
pub async fn request_archive(
    conn: Connection,
    request: &UploadArchiveRequest,
    cancel: &CancellationToken,
) -> Result<UploadArchiveResponse> {
    let (r, w) = conn.into_parts();
    let mut reader = PktLineReader::new(r);
    let mut writer = PktLineWriter::new(w);

    with_cancel(cancel, request.encode(&mut writer)).await?;
    with_cancel(cancel, writer.flush()).await?;

    let response =
        with_cancel(cancel, UploadArchiveResponse::decode(request.format, &mut reader)).await?;
    debug!(bytes = response.data.len(), "archive received");
    Ok(response)
}

/// Server side of `git-upload-archive`: decodes the request, builds the
/// archive through the collaborator, and frames it back.
pub async fn serve_upload_archive<A>(
    builder: &A,
    conn: Connection,
    cancel: &CancellationToken,
) -> Result<()>
where
    A: ArchiveBuilder + ?Sized,
{
    let (r, w) = conn.into_parts();
    let mut reader = PktLineReader::new(r);
    let mut writer = PktLineWriter::new(w);

    let request = with_cancel(cancel, UploadArchiveRequest::decode(&mut reader)).await?;
    let data = builder
        .build_archive(&request)
        .await
        .map_err(Error::Core)?;

    let response = UploadArchiveResponse::new(request.format, data);
    with_cancel(cancel, response.encode(&mut writer)).await?;
    with_cancel(cancel, writer.flush()).await?;
    writer.shutdown().await?;
    Ok(())
}
