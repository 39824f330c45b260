//! Cryptographic capabilities for the gQUIC handshake.
//!
//! Everything here is exposed as a small trait the handshake core injects:
//! packet AEADs, the Diffie-Hellman key exchange, source-address tokens and
//! the server-proof signer. The handshake never touches curve or cipher
//! internals directly, which is also what lets its tests swap in mocks.

pub mod aead;
pub mod fnv;
pub mod gcm_aead;
pub mod key_derivation;
pub mod key_exchange;
pub mod null_aead;
pub mod proof;
pub mod stk;

pub use aead::{CryptoError, PacketAead};
pub use gcm_aead::GcmPacketAead;
pub use key_derivation::{derive_packet_keys, DeriveContext};
pub use key_exchange::{Curve25519KeyExchange, KeyExchange};
pub use null_aead::NullAead;
pub use proof::{hash_cert, Ed25519ProofSource, ProofError, ProofSigner};
pub use stk::{HmacStkSource, StkConfig, StkError, StkSource};
