//! The server handshake state machine and encryption ladder.
//!
//! One long-lived task runs [`CryptoSetupServer::handle_crypto_stream`],
//! consuming CHLO messages and answering with REJ or SHLO. The packet plane
//! concurrently calls [`seal`](CryptoSetupServer::seal) /
//! [`open`](CryptoSetupServer::open) against the ladder. A single mutex
//! guards the ladder state; stream I/O happens outside it so packet
//! processing is never starved by a slow handshake peer.

use crate::params::ConnectionParametersManager;
use crate::server_config::ServerConfig;
use gquic_core::{
    is_supported_version, read_handshake_message, supported_versions_as_tags,
    version_tag_to_number, ConnectionId, EncryptionLevel, HandshakeMessage, PacketNumber,
    Perspective, QuicError, Tag, TagMap, Version, CLIENT_HELLO_MINIMUM_SIZE, HOL_EXPERIMENT,
};
use gquic_crypto::{
    derive_packet_keys, hash_cert, CryptoError, Curve25519KeyExchange, DeriveContext,
    KeyExchange, NullAead, PacketAead, ProofError, StkError,
};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Value of the SVID tag sent in every REJ.
const SERVER_VERSION_ID: &[u8] = b"gquic-rs";

/// Reliable ordered byte stream carrying the handshake messages.
pub trait CryptoStream: Read + Write + Send {}

impl<T: Read + Write + Send> CryptoStream for T {}

/// Key-derivation hook. Tests substitute this to observe the algorithmic
/// flow without running real cryptography.
pub type KeyDerivation =
    Box<dyn Fn(&DeriveContext<'_>) -> Result<Box<dyn PacketAead>, CryptoError> + Send + Sync>;

/// Factory for the per-connection ephemeral key exchange.
pub type EphemeralKeyExchange = Box<dyn Fn() -> Box<dyn KeyExchange> + Send + Sync>;

/// Fatal handshake errors, surfaced to the transport which tears the
/// connection down.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Quic(#[from] QuicError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Stk(#[from] StkError),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error("io error on crypto stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from sealing at a caller-forced encryption level.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SealError {
    #[error("CryptoSetupServer: no secureAEAD")]
    NoSecureAead,
    #[error("CryptoSetupServer: no forwardSecureAEAD")]
    NoForwardSecureAead,
    #[error("no encryption level specified")]
    NoLevelSpecified,
}

struct LadderState {
    version: Version,
    null_aead: NullAead,
    secure_aead: Option<Box<dyn PacketAead>>,
    forward_secure_aead: Option<Box<dyn PacketAead>>,
    diversification_nonce: Vec<u8>,
    sent_shlo: bool,
    received_secure_packet: bool,
    received_forward_secure_packet: bool,
}

/// Server side of the crypto handshake for one connection.
pub struct CryptoSetupServer<S: CryptoStream> {
    connection_id: ConnectionId,
    source_addr: Vec<u8>,
    scfg: Arc<ServerConfig>,
    params: Arc<ConnectionParametersManager>,
    aead_changed: mpsc::Sender<EncryptionLevel>,
    key_derivation: KeyDerivation,
    key_exchange: EphemeralKeyExchange,
    stream: Mutex<S>,
    state: Mutex<LadderState>,
}

impl<S: CryptoStream> CryptoSetupServer<S> {
    /// Build the crypto setup for a freshly accepted connection.
    ///
    /// `aead_changed` must have capacity for at least two notifications so
    /// the handshake never blocks on emission.
    pub fn new(
        connection_id: ConnectionId,
        source_addr: Vec<u8>,
        version: Version,
        scfg: Arc<ServerConfig>,
        stream: S,
        params: Arc<ConnectionParametersManager>,
        aead_changed: mpsc::Sender<EncryptionLevel>,
    ) -> Result<Self, QuicError> {
        if !is_supported_version(version) {
            return Err(QuicError::VersionNegotiationMismatch(
                "unsupported version negotiated",
            ));
        }
        Ok(Self {
            connection_id,
            source_addr,
            scfg,
            params,
            aead_changed,
            key_derivation: Box::new(|ctx| {
                derive_packet_keys(ctx).map(|aead| Box::new(aead) as Box<dyn PacketAead>)
            }),
            key_exchange: Box::new(|| Box::new(Curve25519KeyExchange::new())),
            stream: Mutex::new(stream),
            state: Mutex::new(LadderState {
                version,
                null_aead: NullAead,
                secure_aead: None,
                forward_secure_aead: None,
                diversification_nonce: Vec::new(),
                sent_shlo: false,
                received_secure_packet: false,
                received_forward_secure_packet: false,
            }),
        })
    }

    /// Consume handshake messages until the stream ends or a protocol
    /// violation occurs.
    ///
    /// Every CHLO is answered: inchoate ones with a REJ, complete ones with
    /// a SHLO. CHLOs arriving after the SHLO are retransmissions and are
    /// answered again. A stream that ends before producing a single message
    /// is a failed handshake.
    pub fn handle_crypto_stream(&self) -> Result<(), HandshakeError> {
        let mut handled_any = false;
        loop {
            let read_result = {
                let mut stream = self.stream.lock();
                read_handshake_message(&mut *stream)
            };
            let (raw, message) = match read_result {
                Ok(parsed) => parsed,
                Err(err) if err.is_end_of_stream() && handled_any => return Ok(()),
                Err(_) => return Err(QuicError::HandshakeFailed.into()),
            };
            if message.tag != Tag::CHLO {
                return Err(QuicError::InvalidCryptoMessageType.into());
            }
            handled_any = true;
            self.handle_message(&raw, &message.data)?;
        }
    }

    /// Dispatch one CHLO. Returns whether the handshake completed (a SHLO
    /// was queued) or is still awaiting a complete CHLO.
    fn handle_message(&self, chlo_raw: &[u8], tags: &TagMap) -> Result<bool, HandshakeError> {
        if tags.contains_key(&Tag::FHL2) {
            return Err(HOL_EXPERIMENT.into());
        }
        let sni_value = tags
            .get(&Tag::SNI)
            .filter(|value| !value.is_empty())
            .ok_or(QuicError::CryptoMessageParameterNotFound("SNI required"))?;
        let sni = std::str::from_utf8(sni_value)
            .map_err(|_| QuicError::InvalidCryptoMessageParameter("invalid SNI"))?;

        let ver = tags.get(&Tag::VER).ok_or(
            QuicError::InvalidCryptoMessageParameter("client hello missing version tag"),
        )?;
        let ver: [u8; 4] = ver
            .as_slice()
            .try_into()
            .map_err(|_| QuicError::InvalidCryptoMessageParameter("incorrect version tag"))?;
        let declared = version_tag_to_number(u32::from_le_bytes(ver));
        let negotiated = self.state.lock().version;
        // A client declaring a version we support that differs from the one
        // this connection negotiated has been fed a forged version
        // negotiation packet. Unknown versions are fine: those were
        // negotiated down out of band.
        if is_supported_version(declared) && declared != negotiated {
            return Err(QuicError::VersionNegotiationMismatch("Downgrade attack detected").into());
        }

        let leaf_cert = self.scfg.cert_chain().leaf_cert(sni)?;

        if !self.is_inchoate_chlo(tags, &leaf_cert) {
            let reply = self.handle_chlo(sni, chlo_raw, tags)?;
            self.write_reply(&reply)?;
            debug!(
                target: "gquic::handshake",
                connection_id = %self.connection_id,
                sni,
                "full CHLO accepted, SHLO queued"
            );
            return Ok(true);
        }

        let reply = self.handle_inchoate_chlo(sni, chlo_raw, tags)?;
        self.write_reply(&reply)?;
        debug!(
            target: "gquic::handshake",
            connection_id = %self.connection_id,
            sni,
            "inchoate CHLO, REJ queued"
        );
        Ok(false)
    }

    /// A CHLO is inchoate when it cannot complete the handshake: the client
    /// is missing our config, its own key share, a matching certificate
    /// fingerprint, or a valid address token.
    fn is_inchoate_chlo(&self, tags: &TagMap, leaf_cert: &[u8]) -> bool {
        if !tags.contains_key(&Tag::PUBS) {
            return true;
        }
        match tags.get(&Tag::SCID) {
            Some(scid) if scid == self.scfg.id() => {}
            _ => return true,
        }
        match tags.get(&Tag::XLCT) {
            Some(xlct) if xlct[..] == hash_cert(leaf_cert).to_le_bytes() => {}
            _ => return true,
        }
        let token = tags.get(&Tag::STK).map(Vec::as_slice).unwrap_or(&[]);
        self.scfg
            .stk_source()
            .verify_token(&self.source_addr, token)
            .is_err()
    }

    /// Answer an inchoate CHLO with a REJ carrying our config and a fresh
    /// address token. The certificate chain and server proof are only
    /// included once the client has proven its address, so an attacker with
    /// a spoofed source cannot use us as an amplifier or signing oracle.
    fn handle_inchoate_chlo(
        &self,
        sni: &str,
        chlo_raw: &[u8],
        tags: &TagMap,
    ) -> Result<Vec<u8>, HandshakeError> {
        if chlo_raw.len() < CLIENT_HELLO_MINIMUM_SIZE {
            return Err(QuicError::CryptoInvalidValueLength("CHLO too small").into());
        }

        let token = self.scfg.stk_source().new_token(&self.source_addr)?;
        let mut reply = TagMap::new();
        reply.insert(Tag::SCFG, self.scfg.serialized());
        reply.insert(Tag::STK, token);
        reply.insert(Tag::SVID, SERVER_VERSION_ID.to_vec());

        let presented = tags.get(&Tag::STK).map(Vec::as_slice).unwrap_or(&[]);
        if self
            .scfg
            .stk_source()
            .verify_token(&self.source_addr, presented)
            .is_ok()
        {
            let proof =
                self.scfg
                    .cert_chain()
                    .sign_server_proof(sni, chlo_raw, &self.scfg.serialized())?;
            let common_sets = tags.get(&Tag::CCS).map(Vec::as_slice).unwrap_or(&[]);
            let cached = tags.get(&Tag::CCRT).map(Vec::as_slice).unwrap_or(&[]);
            let certs = self
                .scfg
                .cert_chain()
                .certs_compressed(sni, common_sets, cached)?;
            reply.insert(Tag::PROF, proof);
            reply.insert(Tag::CERT, certs);
        }

        Ok(HandshakeMessage::new(Tag::REJ, reply).serialize())
    }

    /// Complete the handshake from a full CHLO: derive both AEADs, bind
    /// them to the ladder, and build the SHLO.
    fn handle_chlo(
        &self,
        sni: &str,
        chlo_raw: &[u8],
        tags: &TagMap,
    ) -> Result<Vec<u8>, HandshakeError> {
        let client_pubs = tags.get(&Tag::PUBS).map(Vec::as_slice).unwrap_or(&[]);
        let shared_secret = self.scfg.kex().shared_key(client_pubs)?;

        let state = &mut *self.state.lock();

        let leaf_cert = self.scfg.cert_chain().leaf_cert(sni)?;

        let mut server_nonce = [0u8; 32];
        OsRng.fill_bytes(&mut server_nonce);
        let mut div_nonce = vec![0u8; 32];
        OsRng.fill_bytes(&mut div_nonce);
        state.diversification_nonce = div_nonce;

        let client_nonce = tags.get(&Tag::NONC).map(Vec::as_slice).unwrap_or(&[]);
        validate_client_nonce(client_nonce, self.scfg.obit())?;

        if !selection_supported(tags.get(&Tag::AEAD), self.scfg.supported_aeads())
            || !selection_supported(tags.get(&Tag::KEXS), self.scfg.supported_kexs())
        {
            return Err(QuicError::CryptoNoSupport("Unsupported AEAD or KEXS").into());
        }

        self.params.set_from_map(tags)?;

        let scfg_bytes = self.scfg.serialized();
        let secure_aead = (self.key_derivation)(&DeriveContext {
            forward_secure: false,
            shared_secret: &shared_secret,
            nonces: client_nonce,
            connection_id: self.connection_id,
            chlo: chlo_raw,
            server_config: &scfg_bytes,
            leaf_cert: &leaf_cert,
            div_nonce: &state.diversification_nonce,
            perspective: Perspective::Server,
        })?;
        state.secure_aead = Some(secure_aead);
        let _ = self.aead_changed.try_send(EncryptionLevel::Secure);

        let mut fs_nonces = Vec::with_capacity(client_nonce.len() + server_nonce.len());
        fs_nonces.extend_from_slice(client_nonce);
        fs_nonces.extend_from_slice(&server_nonce);
        let ephemeral_kex = (self.key_exchange)();
        let ephemeral_shared = ephemeral_kex.shared_key(client_pubs)?;
        let forward_secure_aead = (self.key_derivation)(&DeriveContext {
            forward_secure: true,
            shared_secret: &ephemeral_shared,
            nonces: &fs_nonces,
            connection_id: self.connection_id,
            chlo: chlo_raw,
            server_config: &scfg_bytes,
            leaf_cert: &leaf_cert,
            div_nonce: &[],
            perspective: Perspective::Server,
        })?;
        state.forward_secure_aead = Some(forward_secure_aead);
        let _ = self.aead_changed.try_send(EncryptionLevel::ForwardSecure);

        let mut reply = self.params.hello_map();
        reply.insert(Tag::PUBS, ephemeral_kex.public_key().to_vec());
        reply.insert(Tag::SNO, server_nonce.to_vec());
        reply.insert(Tag::VER, supported_versions_as_tags());
        Ok(HandshakeMessage::new(Tag::SHLO, reply).serialize())
    }

    fn write_reply(&self, reply: &[u8]) -> Result<(), HandshakeError> {
        let mut stream = self.stream.lock();
        stream.write_all(reply)?;
        Ok(())
    }

    /// Seal at the highest level currently allowed.
    ///
    /// The first secure-level seal is the SHLO packet; everything after it
    /// escalates to forward-secure.
    pub fn seal(
        &self,
        plaintext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> (Vec<u8>, EncryptionLevel) {
        let state = &mut *self.state.lock();
        if state.sent_shlo {
            if let Some(aead) = &state.forward_secure_aead {
                return (
                    aead.seal(plaintext, packet_number, associated_data),
                    EncryptionLevel::ForwardSecure,
                );
            }
        }
        if let Some(aead) = &state.secure_aead {
            state.sent_shlo = true;
            return (
                aead.seal(plaintext, packet_number, associated_data),
                EncryptionLevel::Secure,
            );
        }
        (
            state.null_aead.seal(plaintext, packet_number, associated_data),
            EncryptionLevel::Unencrypted,
        )
    }

    /// Seal at a caller-chosen level, failing if that level's AEAD is not
    /// bound yet.
    pub fn seal_with(
        &self,
        plaintext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
        level: EncryptionLevel,
    ) -> Result<(Vec<u8>, EncryptionLevel), SealError> {
        let state = &mut *self.state.lock();
        match level {
            EncryptionLevel::Unencrypted => Ok((
                state.null_aead.seal(plaintext, packet_number, associated_data),
                EncryptionLevel::Unencrypted,
            )),
            EncryptionLevel::Secure => {
                let aead = state.secure_aead.as_ref().ok_or(SealError::NoSecureAead)?;
                let sealed = aead.seal(plaintext, packet_number, associated_data);
                state.sent_shlo = true;
                Ok((sealed, EncryptionLevel::Secure))
            }
            EncryptionLevel::ForwardSecure => {
                let aead = state
                    .forward_secure_aead
                    .as_ref()
                    .ok_or(SealError::NoForwardSecureAead)?;
                Ok((
                    aead.seal(plaintext, packet_number, associated_data),
                    EncryptionLevel::ForwardSecure,
                ))
            }
            EncryptionLevel::Unspecified => Err(SealError::NoLevelSpecified),
        }
    }

    /// Open at the highest level that authenticates the packet.
    ///
    /// Once a level has produced a packet, everything below it is dead: a
    /// peer that can speak forward-secure must never fall back, and
    /// accepting the fallback would hand an attacker a downgrade.
    pub fn open(
        &self,
        ciphertext: &[u8],
        packet_number: PacketNumber,
        associated_data: &[u8],
    ) -> Result<(Vec<u8>, EncryptionLevel), CryptoError> {
        let state = &mut *self.state.lock();
        if let Some(aead) = &state.forward_secure_aead {
            match aead.open(ciphertext, packet_number, associated_data) {
                Ok(plaintext) => {
                    state.received_forward_secure_packet = true;
                    return Ok((plaintext, EncryptionLevel::ForwardSecure));
                }
                Err(err) => {
                    if state.received_forward_secure_packet {
                        return Err(err);
                    }
                }
            }
        }
        if let Some(aead) = &state.secure_aead {
            match aead.open(ciphertext, packet_number, associated_data) {
                Ok(plaintext) => {
                    state.received_secure_packet = true;
                    return Ok((plaintext, EncryptionLevel::Secure));
                }
                Err(err) => {
                    if state.received_secure_packet {
                        return Err(err);
                    }
                }
            }
        }
        state
            .null_aead
            .open(ciphertext, packet_number, associated_data)
            .map(|plaintext| (plaintext, EncryptionLevel::Unencrypted))
    }

    /// The nonce the SHLO packet header must carry so the client can
    /// diversify the server write key. Empty once the SHLO is out, except
    /// for retransmissions, which repeat the original nonce.
    pub fn diversification_nonce(&self, retransmission: bool) -> Vec<u8> {
        let state = self.state.lock();
        if state.secure_aead.is_none() {
            return Vec::new();
        }
        if state.sent_shlo && !retransmission {
            return Vec::new();
        }
        state.diversification_nonce.clone()
    }

    /// True once a forward-secure packet from the client has been opened.
    pub fn handshake_complete(&self) -> bool {
        self.state.lock().received_forward_secure_packet
    }
}

fn validate_client_nonce(nonce: &[u8], obit: &[u8; 8]) -> Result<(), QuicError> {
    if nonce.len() != 32 {
        return Err(QuicError::InvalidCryptoMessageParameter(
            "invalid client nonce length",
        ));
    }
    if &nonce[4..12] != obit {
        return Err(QuicError::InvalidCryptoMessageParameter("OBIT not matching"));
    }
    Ok(())
}

/// An algorithm selection is a sequence of 4-byte tags; it is satisfiable
/// when any of them is in our supported set.
fn selection_supported(value: Option<&Vec<u8>>, supported: &[Tag]) -> bool {
    let Some(value) = value else {
        return false;
    };
    if value.is_empty() || value.len() % 4 != 0 {
        return false;
    }
    value.chunks_exact(4).any(|chunk| {
        let tag = Tag::new([chunk[0], chunk[1], chunk[2], chunk[3]]);
        supported.contains(&tag)
    })
}
