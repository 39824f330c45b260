use crate::aead::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// Diffie-Hellman capability used for both the static server config key and
/// the per-connection ephemeral exchange.
pub trait KeyExchange: Send + Sync {
    fn public_key(&self) -> &[u8];

    fn shared_key(&self, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Curve25519 key exchange (the `C255` algorithm tag).
pub struct Curve25519KeyExchange {
    secret: StaticSecret,
    public: [u8; 32],
}

impl Curve25519KeyExchange {
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }
}

impl Default for Curve25519KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchange for Curve25519KeyExchange {
    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn shared_key(&self, peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        // Low-order peer points collapse the shared secret to zero.
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(shared.as_bytes().to_vec())
    }
}
