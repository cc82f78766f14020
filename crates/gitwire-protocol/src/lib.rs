pub mod advrefs;
pub mod capability;
pub mod error;
pub mod pktline;
pub mod report_status;
pub mod server_response;
pub mod sideband;
pub mod update_requests;
pub mod upload_archive;
pub mod upload_request;
pub mod version;

pub use advrefs::AdvRefs;
pub use capability::{default_agent, Capabilities, Capability};
pub use error::{Error, Result};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PACKET_LEN, MAX_PAYLOAD_LEN};
pub use report_status::{CommandStatus, ReportStatus};
pub use server_response::{ServerResponse, ShallowUpdate};
pub use sideband::{Channel, Demuxer, Muxer, PackStream, SidebandKind};
pub use update_requests::{Action, Command, UpdateRequests};
pub use upload_archive::{
    ArchiveFormat, ArchiveTarget, UploadArchiveRequest, UploadArchiveResponse,
};
pub use upload_request::{UploadHaves, UploadRequest};
pub use version::ProtocolVersion;
