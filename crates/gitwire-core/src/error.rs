use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid reference type: {0}")]
    InvalidRefType(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("pack ingestion failed: {0}")]
    InvalidPack(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
