use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("server does not support exact SHA1 refspec")]
    UnsupportedRefSpec,

    #[error("couldn't find remote ref for spec {0:?}")]
    NoMatchingRefSpec(String),

    #[error("remote repository is empty")]
    EmptyRemoteRepository,

    #[error("empty upload-pack request")]
    EmptyUploadPackRequest,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("authorization failed")]
    AuthorizationFailed,

    #[error("some references were not updated")]
    ForceNeeded,

    #[error("failed to update ref")]
    UpdateReference,

    #[error("invalid refspec: {0}")]
    InvalidRefSpec(String),

    #[error("shallow not supported")]
    ShallowNotSupported,

    #[error("unsupported scheme {0:?}")]
    UnknownScheme(String),

    #[error("malformed registration for scheme {0:?}")]
    MalformedRegistration(String),

    #[error("session not established")]
    NotConnected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(#[from] gitwire_protocol::Error),

    #[error("core error: {0}")]
    Core(#[from] gitwire_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
