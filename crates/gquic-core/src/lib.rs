//! Wire-level primitives for the gQUIC crypto handshake.
//!
//! This crate carries the pieces every other layer speaks in: 4-byte tags,
//! the tag-map message codec, version numbers and their wire tags, and the
//! protocol error codes with their stable on-the-wire text.

pub mod error;
pub mod message;
pub mod tag;
pub mod types;
pub mod version;

pub use error::{QuicError, HOL_EXPERIMENT};
pub use message::{read_handshake_message, HandshakeMessage, MessageError, TagMap};
pub use tag::Tag;
pub use types::{
    ConnectionId, EncryptionLevel, PacketNumber, Perspective, CLIENT_HELLO_MINIMUM_SIZE,
};
pub use version::{
    is_supported_version, supported_versions_as_tags, version_number_to_tag,
    version_tag_to_number, Version, SUPPORTED_VERSIONS,
};
