use gquic_core::PacketNumber;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("invalid peer public key")]
    InvalidPublicKey,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("invalid key material for packet AEAD")]
    KeyInit,
}

/// Authenticated encryption for one encryption level of a connection.
///
/// Sealing uses the holder's send direction, opening the receive direction.
/// The packet number and associated data bind the ciphertext to its packet.
pub trait PacketAead: Send + Sync {
    fn seal(
        &self,
        plaintext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Vec<u8>;

    fn open(
        &self,
        ciphertext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Key-diversification nonce, for derivation schemes that carry one.
    /// The handshake only passes this through; most AEADs have none.
    fn diversification_nonce(&self) -> &[u8] {
        &[]
    }
}
