//! Server-side gQUIC crypto handshake.
//!
//! The entry point is [`CryptoSetupServer`]: it consumes framed CHLO
//! messages from the handshake stream, answers with REJ or SHLO, and runs
//! the unencrypted → secure → forward-secure encryption ladder the packet
//! plane seals and opens against.

pub mod crypto_setup;
pub mod params;
pub mod server_config;

pub use crypto_setup::{
    CryptoSetupServer, CryptoStream, EphemeralKeyExchange, HandshakeError, KeyDerivation,
    SealError,
};
pub use params::ConnectionParametersManager;
pub use server_config::ServerConfig;
