use crate::types::NodeId;
use derive_more::Display;

/// The error type of a load operation.
///
/// Any of these aborts the load in progress; there is no partial-success
/// mode. Store exhaustion is not an error and is reported as `Ok(false)`
/// by the scanning operations.
#[derive(Debug, Display)]
pub enum Error {
    /// The backing reference variant cannot supply the requested data.
    #[display(fmt = "unsupported capability: {}", _0)]
    UnsupportedCapability(&'static str),
    /// A slice request exceeded the page capacity.
    #[display(
        fmt = "requested slice of {} bytes exceeds page capacity of {} bytes",
        requested,
        page_size
    )]
    SliceTooLarge { requested: usize, page_size: usize },
    /// An external id was observed with two different internal ids.
    #[display(fmt = "external id {} mapped to more than one internal id", external)]
    IdMappingConflict { external: NodeId },
    /// The backing store failed.
    #[display(fmt = "store error: {}", _0)]
    Store(String),
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
