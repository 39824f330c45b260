use crate::aead::{CryptoError, PacketAead};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes128;
use aes_gcm::AesGcm;
use gquic_core::PacketNumber;

/// AES-128-GCM with the protocol's truncated 12-byte authentication tag.
type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 4;

/// Directional AES-GCM packet protection for one encryption level.
///
/// The nonce is the 4-byte IV prefix followed by the little-endian packet
/// number, so each direction's IV must never be reused across levels.
pub struct GcmPacketAead {
    seal_cipher: Aes128Gcm12,
    seal_iv: [u8; IV_LEN],
    open_cipher: Aes128Gcm12,
    open_iv: [u8; IV_LEN],
}

impl GcmPacketAead {
    pub fn new(
        seal_key: &[u8; KEY_LEN],
        seal_iv: [u8; IV_LEN],
        open_key: &[u8; KEY_LEN],
        open_iv: [u8; IV_LEN],
    ) -> Result<Self, CryptoError> {
        let seal_cipher =
            Aes128Gcm12::new_from_slice(seal_key).map_err(|_| CryptoError::KeyInit)?;
        let open_cipher =
            Aes128Gcm12::new_from_slice(open_key).map_err(|_| CryptoError::KeyInit)?;
        Ok(Self {
            seal_cipher,
            seal_iv,
            open_cipher,
            open_iv,
        })
    }
}

fn compose_nonce(iv: &[u8; IV_LEN], packet_number: PacketNumber) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..IV_LEN].copy_from_slice(iv);
    nonce[IV_LEN..].copy_from_slice(&packet_number.to_le_bytes());
    nonce
}

impl PacketAead for GcmPacketAead {
    fn seal(
        &self,
        plaintext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Vec<u8> {
        let nonce = compose_nonce(&self.seal_iv, packet_number);
        self.seal_cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .expect("aes-gcm seal")
    }

    fn open(
        &self,
        ciphertext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = compose_nonce(&self.open_iv, packet_number);
        self.open_cipher
            .decrypt(
                (&nonce).into(),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> (GcmPacketAead, GcmPacketAead) {
        let key_a = [1u8; KEY_LEN];
        let key_b = [2u8; KEY_LEN];
        let iv_a = [3u8; IV_LEN];
        let iv_b = [4u8; IV_LEN];
        let one = GcmPacketAead::new(&key_a, iv_a, &key_b, iv_b).expect("aead");
        let other = GcmPacketAead::new(&key_b, iv_b, &key_a, iv_a).expect("aead");
        (one, other)
    }

    #[test]
    fn peers_round_trip() {
        let (server, client) = paired();
        let sealed = server.seal(b"server hello", 3, b"header");
        let opened = client.open(&sealed, 3, b"header").expect("open");
        assert_eq!(opened, b"server hello");
    }

    #[test]
    fn truncates_tags_to_twelve_bytes() {
        let (server, _) = paired();
        let sealed = server.seal(b"payload", 0, &[]);
        assert_eq!(sealed.len(), b"payload".len() + 12);
    }

    #[test]
    fn rejects_wrong_packet_number() {
        let (server, client) = paired();
        let sealed = server.seal(b"payload", 5, &[]);
        assert_eq!(
            client.open(&sealed, 6, &[]),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn rejects_wrong_associated_data() {
        let (server, client) = paired();
        let sealed = server.seal(b"payload", 5, b"aad");
        assert_eq!(
            client.open(&sealed, 5, b"bad"),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn directions_are_asymmetric() {
        let (server, _) = paired();
        let sealed = server.seal(b"payload", 1, &[]);
        // A peer must open with the opposite key; the sealer itself cannot.
        assert_eq!(
            server.open(&sealed, 1, &[]),
            Err(CryptoError::AuthenticationFailed)
        );
    }
}
