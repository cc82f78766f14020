pub mod archive;
pub mod error;
pub mod fetch;
pub mod negotiate;
pub mod push;
pub mod refspec;
pub mod revwalk;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use fetch::{fetch, FetchOptions, FetchStatus, FetchSummary};
pub use negotiate::{calculate_refs, expand_ref, get_haves, get_wants, MAX_HAVES_PER_REF};
pub use push::{push, PushRequest};
pub use refspec::{RefSpec, TagMode};
pub use revwalk::{is_fast_forward, CommitWalker};
pub use session::{Connection, PackSession, Service};
pub use transport::{lookup, register, unregister, Endpoint, Transport};
