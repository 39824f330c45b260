//! Server proof: the signature a REJ carries over the client hello and the
//! server config, plus the certificate chain it is anchored in.

use crate::fnv::fnv64a;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

const PROOF_PREFIX: &[u8] = b"QUIC CHLO and server config signature\0";

const CHAIN_ENTRY_RAW: u8 = 1;
const CHAIN_ENTRY_CACHED: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("certificate chain is empty")]
    EmptyChain,
    #[error("certificate chain too long to encode")]
    ChainTooLong,
}

/// Signs server proofs and serves the certificate chain.
pub trait ProofSigner: Send + Sync {
    /// Sign the proof binding this CHLO to the server config. Only called
    /// once the client has proven its address.
    fn sign_server_proof(
        &self,
        sni: &str,
        chlo: &[u8],
        server_config: &[u8],
    ) -> Result<Vec<u8>, ProofError>;

    /// The certificate chain in its compressed wire encoding. `cached_hashes`
    /// lists 64-bit fingerprints of certs the client already holds
    /// (little-endian, concatenated); those are sent by reference.
    fn certs_compressed(
        &self,
        sni: &str,
        common_set_hashes: &[u8],
        cached_hashes: &[u8],
    ) -> Result<Vec<u8>, ProofError>;

    /// The leaf certificate, as bound into the XLCT tag and key derivation.
    fn leaf_cert(&self, sni: &str) -> Result<Vec<u8>, ProofError>;
}

/// 64-bit certificate fingerprint, as carried in the XLCT tag.
pub fn hash_cert(cert: &[u8]) -> u64 {
    fnv64a(cert)
}

/// Proof source backed by an Ed25519 signing key and a static chain.
///
/// The chain is leaf-first. SNI is accepted for interface compatibility but
/// a single chain serves every host.
pub struct Ed25519ProofSource {
    signing_key: SigningKey,
    chain: Vec<Vec<u8>>,
}

impl Ed25519ProofSource {
    pub fn new(signing_key: SigningKey, chain: Vec<Vec<u8>>) -> Result<Self, ProofError> {
        if chain.is_empty() {
            return Err(ProofError::EmptyChain);
        }
        Ok(Self { signing_key, chain })
    }

    /// Build a source with a freshly generated key.
    pub fn generate(chain: Vec<Vec<u8>>) -> Result<Self, ProofError> {
        Self::new(SigningKey::generate(&mut OsRng), chain)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The transcript a server proof signs.
    pub fn proof_transcript(chlo: &[u8], server_config: &[u8]) -> Vec<u8> {
        let chlo_hash = Sha256::digest(chlo);
        let mut transcript =
            Vec::with_capacity(PROOF_PREFIX.len() + 4 + chlo_hash.len() + server_config.len());
        transcript.extend_from_slice(PROOF_PREFIX);
        transcript.extend_from_slice(&(chlo_hash.len() as u32).to_le_bytes());
        transcript.extend_from_slice(&chlo_hash);
        transcript.extend_from_slice(server_config);
        transcript
    }
}

impl ProofSigner for Ed25519ProofSource {
    fn sign_server_proof(
        &self,
        _sni: &str,
        chlo: &[u8],
        server_config: &[u8],
    ) -> Result<Vec<u8>, ProofError> {
        let transcript = Self::proof_transcript(chlo, server_config);
        Ok(self.signing_key.sign(&transcript).to_bytes().to_vec())
    }

    fn certs_compressed(
        &self,
        _sni: &str,
        _common_set_hashes: &[u8],
        cached_hashes: &[u8],
    ) -> Result<Vec<u8>, ProofError> {
        if self.chain.len() > u8::MAX as usize {
            return Err(ProofError::ChainTooLong);
        }
        let cached: Vec<u64> = cached_hashes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("hash chunk")))
            .collect();

        let mut out = Vec::new();
        out.push(self.chain.len() as u8);
        for cert in &self.chain {
            let fingerprint = hash_cert(cert);
            if cached.contains(&fingerprint) {
                out.push(CHAIN_ENTRY_CACHED);
                out.extend_from_slice(&fingerprint.to_le_bytes());
            } else {
                out.push(CHAIN_ENTRY_RAW);
                out.extend_from_slice(&(cert.len() as u32).to_le_bytes());
                out.extend_from_slice(cert);
            }
        }
        Ok(out)
    }

    fn leaf_cert(&self, _sni: &str) -> Result<Vec<u8>, ProofError> {
        Ok(self.chain[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier as _;

    fn source() -> Ed25519ProofSource {
        Ed25519ProofSource::generate(vec![b"leaf cert".to_vec(), b"root cert".to_vec()])
            .expect("proof source")
    }

    #[test]
    fn proofs_verify_against_the_transcript() {
        let source = source();
        let proof = source
            .sign_server_proof("example.org", b"chlo bytes", b"scfg bytes")
            .expect("sign");
        let signature = ed25519_dalek::Signature::from_slice(&proof).expect("signature");
        let transcript = Ed25519ProofSource::proof_transcript(b"chlo bytes", b"scfg bytes");
        source
            .verifying_key()
            .verify(&transcript, &signature)
            .expect("verify");
    }

    #[test]
    fn proofs_bind_the_chlo() {
        let source = source();
        let proof = source
            .sign_server_proof("example.org", b"chlo bytes", b"scfg bytes")
            .expect("sign");
        let signature = ed25519_dalek::Signature::from_slice(&proof).expect("signature");
        let transcript = Ed25519ProofSource::proof_transcript(b"other chlo", b"scfg bytes");
        assert!(source
            .verifying_key()
            .verify(&transcript, &signature)
            .is_err());
    }

    #[test]
    fn leaf_cert_is_the_first_entry() {
        assert_eq!(source().leaf_cert("any").expect("leaf"), b"leaf cert");
    }

    #[test]
    fn rejects_an_empty_chain() {
        assert_eq!(
            Ed25519ProofSource::generate(Vec::new()).err(),
            Some(ProofError::EmptyChain)
        );
    }

    #[test]
    fn compresses_raw_entries_with_lengths() {
        let compressed = source().certs_compressed("any", &[], &[]).expect("chain");
        assert_eq!(compressed[0], 2);
        assert_eq!(compressed[1], CHAIN_ENTRY_RAW);
        let len = u32::from_le_bytes(compressed[2..6].try_into().expect("len")) as usize;
        assert_eq!(&compressed[6..6 + len], b"leaf cert");
    }

    #[test]
    fn cached_certs_are_sent_by_reference() {
        let source = source();
        let cached = hash_cert(b"root cert").to_le_bytes();
        let compressed = source
            .certs_compressed("any", &[], &cached)
            .expect("chain");
        // Leaf raw, root referenced by fingerprint.
        assert_eq!(compressed[1], CHAIN_ENTRY_RAW);
        let leaf_len = u32::from_le_bytes(compressed[2..6].try_into().expect("len")) as usize;
        let root_entry = 6 + leaf_len;
        assert_eq!(compressed[root_entry], CHAIN_ENTRY_CACHED);
        assert_eq!(&compressed[root_entry + 1..], &cached);
    }

    #[test]
    fn fingerprints_are_stable() {
        assert_eq!(hash_cert(b"certuncompressed"), 0xa973217e6fa6cdd9);
    }
}
