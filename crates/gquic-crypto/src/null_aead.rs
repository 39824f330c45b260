use crate::aead::{CryptoError, PacketAead};
use crate::fnv::Fnv128a;
use gquic_core::PacketNumber;
use subtle::ConstantTimeEq;

const TAG_LEN: usize = 12;

/// "Encryption" for packets sent before any keys exist.
///
/// Packets are not confidential, but they are framed with a truncated
/// FNV-1a-128 hash over the associated data and payload so accidental
/// corruption and trivial tampering are caught. The 12-byte tag is the low
/// 64 bits followed by the low 32 of the high half, both little-endian,
/// prefixed to the payload. This layout is fixed by the wire format.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAead;

fn signature(plaintext: &[u8], associated_data: &[u8]) -> [u8; TAG_LEN] {
    let mut hash = Fnv128a::new();
    hash.write(associated_data);
    hash.write(plaintext);
    let sum = hash.sum();
    let mut tag = [0u8; TAG_LEN];
    tag[..8].copy_from_slice(&(sum as u64).to_le_bytes());
    tag[8..].copy_from_slice(&((sum >> 64) as u32).to_le_bytes());
    tag
}

impl PacketAead for NullAead {
    fn seal(
        &self,
        plaintext: &[u8],
        _packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Vec<u8> {
        let tag = signature(plaintext, associated_data);
        let mut out = Vec::with_capacity(TAG_LEN + plaintext.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(plaintext);
        out
    }

    fn open(
        &self,
        ciphertext: &[u8],
        _packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (tag, plaintext) = ciphertext.split_at(TAG_LEN);
        let expected = signature(plaintext, associated_data);
        if expected.ct_eq(tag).unwrap_u8() == 0 {
            return Err(CryptoError::AuthenticationFailed);
        }
        Ok(plaintext.to_vec())
    }
}
