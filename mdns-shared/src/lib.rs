#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod error;
pub mod protocol;
pub(crate) mod transport;

pub use protocol::Protocol;
pub use transport::{TaggedBytesMut, TaggedString, TransportContext, TransportMessage, TransportProtocol};
