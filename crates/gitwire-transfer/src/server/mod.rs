pub mod advertise;
pub mod receive_pack;
pub mod upload_pack;

pub use advertise::{advertise_references, check_supported_capabilities};
pub use receive_pack::serve_receive_pack;
pub use upload_pack::{serve_upload_pack, MemoryPackBuilder, PackBuilder};
