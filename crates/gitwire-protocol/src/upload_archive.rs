use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use tokio::io::{AsyncRead, AsyncWrite};

use gitwire_core::Oid;

use crate::error::{Error, Result};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PAYLOAD_LEN};

const ARGUMENT_PREFIX: &str = "argument ";
const ACK: &[u8] = b"ACK";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Tar,
    Tgz,
    Zip,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Tgz => "tgz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tar" => Ok(ArchiveFormat::Tar),
            "tgz" | "tar.gz" => Ok(ArchiveFormat::Tgz),
            "zip" => Ok(ArchiveFormat::Zip),
            other => Err(Error::InvalidProtocol(format!(
                "unknown archive format: {}",
                other
            ))),
        }
    }
}

/// What to archive. The caller picks exactly one of a ref-ish name or a
/// commit hash; the decoder classifies a full-width hex argument as a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTarget {
    /// A ref-ish name (`HEAD`, `main`, `refs/tags/v1.0`); not restricted to
    /// full ref names.
    Ref(String),
    Hash(Oid),
}

impl fmt::Display for ArchiveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveTarget::Ref(name) => write!(f, "{}", name),
            ArchiveTarget::Hash(oid) => write!(f, "{}", oid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArchiveRequest {
    pub target: ArchiveTarget,
    pub format: ArchiveFormat,
    pub prefix: Option<String>,
}

impl UploadArchiveRequest {
    pub fn for_ref(name: impl Into<String>) -> Self {
        Self {
            target: ArchiveTarget::Ref(name.into()),
            format: ArchiveFormat::default(),
            prefix: None,
        }
    }

    pub fn for_hash(oid: Oid) -> Self {
        Self {
            target: ArchiveTarget::Hash(oid),
            format: ArchiveFormat::default(),
            prefix: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.target {
            ArchiveTarget::Ref(name) if name.is_empty() => Err(Error::InvalidProtocol(
                "archive target reference cannot be empty".to_string(),
            )),
            ArchiveTarget::Hash(oid) if oid.is_zero() => Err(Error::InvalidProtocol(
                "archive target hash cannot be zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        self.validate()?;

        w.write_data(format!("{}{}\n", ARGUMENT_PREFIX, self.target))
            .await?;
        if self.format != ArchiveFormat::Tar {
            w.write_data(format!("{}--format\n", ARGUMENT_PREFIX)).await?;
            w.write_data(format!("{}{}\n", ARGUMENT_PREFIX, self.format.as_str()))
                .await?;
        }
        if let Some(prefix) = &self.prefix {
            w.write_data(format!("{}--prefix\n", ARGUMENT_PREFIX)).await?;
            w.write_data(format!("{}{}\n", ARGUMENT_PREFIX, prefix)).await?;
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(r: &mut PktLineReader<R>) -> Result<Self> {
        let mut args = Vec::new();
        for payload in r.read_until_flush().await? {
            let line = std::str::from_utf8(&payload)
                .map_err(|_| Error::InvalidProtocol("archive request is not utf-8".to_string()))?;
            let line = line.trim_end_matches('\n');
            let arg = line.strip_prefix(ARGUMENT_PREFIX).ok_or_else(|| {
                Error::InvalidProtocol(format!("expected argument packet, got: {}", line))
            })?;
            args.push(arg.to_string());
        }

        if args.len() % 2 != 1 {
            return Err(Error::InvalidProtocol(
                "archive request must carry a target plus option pairs".to_string(),
            ));
        }

        let target = if Oid::is_hex(&args[0]) {
            ArchiveTarget::Hash(
                Oid::from_hex(&args[0]).map_err(|e| Error::InvalidProtocol(e.to_string()))?,
            )
        } else {
            ArchiveTarget::Ref(args[0].clone())
        };

        let mut req = Self {
            target,
            format: ArchiveFormat::default(),
            prefix: None,
        };
        for pair in args[1..].chunks(2) {
            match pair[0].as_str() {
                "--format" => req.format = pair[1].parse()?,
                "--prefix" => req.prefix = Some(pair[1].clone()),
                other => {
                    return Err(Error::InvalidProtocol(format!(
                        "unknown archive option: {}",
                        other
                    )))
                }
            }
        }
        req.validate()?;
        Ok(req)
    }
}

/// Readable archive body, wrapped per the requested format.
pub enum ArchiveReader {
    Tar(Cursor<Vec<u8>>),
    Tgz(GzDecoder<Cursor<Vec<u8>>>),
    Zip(Cursor<Vec<u8>>),
}

impl Read for ArchiveReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ArchiveReader::Tar(r) => r.read(buf),
            ArchiveReader::Tgz(r) => r.read(buf),
            ArchiveReader::Zip(r) => r.read(buf),
        }
    }
}

/// Archive response envelope: `ACK`, flush, pkt-framed archive bytes, flush.
#[derive(Debug, Clone)]
pub struct UploadArchiveResponse {
    pub format: ArchiveFormat,
    pub data: Bytes,
}

impl UploadArchiveResponse {
    pub fn new(format: ArchiveFormat, data: Bytes) -> Self {
        Self { format, data }
    }

    pub async fn encode<W: AsyncWrite + Unpin>(&self, w: &mut PktLineWriter<W>) -> Result<()> {
        w.write_data(ACK.to_vec()).await?;
        w.write_flush().await?;
        for chunk in self.data.chunks(MAX_PAYLOAD_LEN) {
            w.write_data(chunk.to_vec()).await?;
        }
        w.write_flush().await?;
        Ok(())
    }

    pub async fn decode<R: AsyncRead + Unpin>(
        format: ArchiveFormat,
        r: &mut PktLineReader<R>,
    ) -> Result<Self> {
        match r.read_pkt().await? {
            Some(PktLine::Data(d)) if d.as_ref() == ACK => {}
            other => {
                return Err(Error::UnexpectedPacket(format!(
                    "expected ACK, got: {:?}",
                    other
                )))
            }
        }
        match r.read_pkt().await? {
            Some(PktLine::Flush) => {}
            other => {
                return Err(Error::UnexpectedPacket(format!(
                    "expected flush after ACK, got: {:?}",
                    other
                )))
            }
        }

        let mut data = BytesMut::new();
        for chunk in r.read_until_flush().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(Self::new(format, data.freeze()))
    }

    /// Wraps the archive bytes in the reader matching the format: plain for
    /// tar and zip, gzip decompression for tgz.
    pub fn into_reader(self) -> ArchiveReader {
        let cursor = Cursor::new(self.data.to_vec());
        match self.format {
            ArchiveFormat::Tar => ArchiveReader::Tar(cursor),
            ArchiveFormat::Tgz => ArchiveReader::Tgz(GzDecoder::new(cursor)),
            ArchiveFormat::Zip => ArchiveReader::Zip(cursor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn make_oid(s: &str) -> Oid {
        Oid::hash(s.as_bytes())
    }

    async fn round_trip_request(req: &UploadArchiveRequest) -> UploadArchiveRequest {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            req.encode(&mut writer).await.unwrap();
        }
        let mut reader = PktLineReader::new(&buf[..]);
        UploadArchiveRequest::decode(&mut reader).await.unwrap()
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("tar".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tar);
        assert_eq!("tgz".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tgz);
        assert_eq!(
            "tar.gz".parse::<ArchiveFormat>().unwrap(),
            ArchiveFormat::Tgz
        );
        assert_eq!("zip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Zip);
        assert!("rar".parse::<ArchiveFormat>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_hash() {
        let req = UploadArchiveRequest::for_hash(Oid::ZERO);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_ref() {
        let req = UploadArchiveRequest::for_ref("");
        assert!(req.validate().is_err());
    }

    #[tokio::test]
    async fn test_request_round_trip_ref() {
        let mut req = UploadArchiveRequest::for_ref("refs/heads/main");
        req.format = ArchiveFormat::Zip;
        req.prefix = Some("project/".to_string());

        let decoded = round_trip_request(&req).await;
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn test_request_round_trip_hash() {
        let req = UploadArchiveRequest::for_hash(make_oid("commit"));
        let decoded = round_trip_request(&req).await;
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn test_decode_classifies_hex_as_hash() {
        let oid = make_oid("commit");
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer
                .write_data(format!("argument {}\n", oid))
                .await
                .unwrap();
            writer.write_flush().await.unwrap();
        }
        let mut reader = PktLineReader::new(&buf[..]);
        let decoded = UploadArchiveRequest::decode(&mut reader).await.unwrap();
        assert_eq!(decoded.target, ArchiveTarget::Hash(oid));
    }

    #[tokio::test]
    async fn test_decode_rejects_dangling_option() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_data("argument main\n".to_string()).await.unwrap();
            writer
                .write_data("argument --format\n".to_string())
                .await
                .unwrap();
            writer.write_flush().await.unwrap();
        }
        let mut reader = PktLineReader::new(&buf[..]);
        assert!(UploadArchiveRequest::decode(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_response_round_trip() {
        let data = Bytes::from_static(b"tar archive bytes here");
        let resp = UploadArchiveResponse::new(ArchiveFormat::Tar, data.clone());

        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            resp.encode(&mut writer).await.unwrap();
        }
        let mut reader = PktLineReader::new(&buf[..]);
        let decoded = UploadArchiveResponse::decode(ArchiveFormat::Tar, &mut reader)
            .await
            .unwrap();
        assert_eq!(decoded.data, data);

        let mut out = Vec::new();
        decoded.into_reader().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_response_missing_ack() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_data("NAK".to_string()).await.unwrap();
        }
        let mut reader = PktLineReader::new(&buf[..]);
        assert!(
            UploadArchiveResponse::decode(ArchiveFormat::Tar, &mut reader)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_tgz_reader_decompresses() {
        let plain = b"pretend this is a tarball";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let gz = encoder.finish().unwrap();

        let resp = UploadArchiveResponse::new(ArchiveFormat::Tgz, Bytes::from(gz));
        let mut out = Vec::new();
        resp.into_reader().read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }
}
