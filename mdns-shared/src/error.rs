#![allow(dead_code)]

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // Protocol endpoint state
    #[error("endpoint is closed")]
    ErrConnectionClosed,
    #[error("mdns is not enabled")]
    ErrInvalidState,
    #[error("already in the requested state")]
    ErrAlready,
    #[error("invalid arguments")]
    ErrInvalidArgs,
    #[error("host name must not be empty")]
    ErrHostnameEmpty,
    #[error("packet too big")]
    ErrPacketTooBig,

    // DNS message packing/unpacking
    #[error("insufficient data for base length type")]
    ErrBaseLen,
    #[error("insufficient data for calculated length type")]
    ErrCalcLen,
    #[error("segment prefix is reserved")]
    ErrReserved,
    #[error("too many pointers (>10)")]
    ErrTooManyPtr,
    #[error("invalid pointer")]
    ErrInvalidPtr,
    #[error("name too long")]
    ErrNameTooLong,
    #[error("zero length segment")]
    ErrZeroSegLen,
    #[error("segment length too long")]
    ErrSegTooLong,
    #[error("name not in canonical form (missing trailing dot)")]
    ErrNonCanonicalName,
    #[error("invalid rdata")]
    ErrBadRdata,
    #[error("insufficient data for resource body length")]
    ErrResourceLen,
    #[error("resource length too long")]
    ErrResTooLong,
    #[error("nil resource body")]
    ErrNilResourceBody,
    #[error("too many Questions to pack (>65535)")]
    ErrTooManyQuestions,
    #[error("too many Answers to pack (>65535)")]
    ErrTooManyAnswers,
    #[error("too many Authorities to pack (>65535)")]
    ErrTooManyAuthorities,
    #[error("too many Additionals to pack (>65535)")]
    ErrTooManyAdditionals,
    #[error("unsupported query type (OPCODE)")]
    ErrUnsupportedOpCode,
    #[error("non-zero response code (RCODE)")]
    ErrBadResponseCode,
    #[error("message source is not supported")]
    ErrNotCapable,

    #[error("parse ip: {0}")]
    ParseIp(#[from] std::net::AddrParseError),
    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
