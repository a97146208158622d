use crate::pages::PageId;

#[derive(Debug)]
pub enum Error {
    Internal(String),
    PoolExhausted,
    PageNotResident(PageId),
    DuplicateKey,
    InvalidPageId,
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(context) => write!(f, "Internal Error: {context}."),
            Error::PoolExhausted => write!(f, "Buffer pool exhausted: no evictable frame."),
            Error::PageNotResident(id) => write!(f, "Page {id} is not resident."),
            Error::DuplicateKey => write!(f, "Key already exists in index."),
            Error::InvalidPageId => write!(f, "Invalid page id."),
            Error::Io(context) => write!(f, "I/O error: {context}."),
        }
    }
}

impl std::error::Error for Error {}
