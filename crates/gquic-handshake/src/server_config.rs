use gquic_core::{HandshakeMessage, Tag, TagMap};
use gquic_crypto::{KeyExchange, ProofSigner, StkSource};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CONFIG_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The server's long-lived crypto configuration.
///
/// Clients cache the serialized form and reference it by id (`SCID`) in
/// later handshakes. Immutable once built; connections share it via `Arc`.
pub struct ServerConfig {
    id: [u8; 16],
    obit: [u8; 8],
    kex: Arc<dyn KeyExchange>,
    cert_chain: Arc<dyn ProofSigner>,
    stk_source: Arc<dyn StkSource>,
    supported_aeads: Vec<Tag>,
    supported_kexs: Vec<Tag>,
    expiry: SystemTime,
}

impl ServerConfig {
    pub fn new(
        kex: Arc<dyn KeyExchange>,
        cert_chain: Arc<dyn ProofSigner>,
        stk_source: Arc<dyn StkSource>,
    ) -> Self {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        let mut obit = [0u8; 8];
        OsRng.fill_bytes(&mut obit);
        Self {
            id,
            obit,
            kex,
            cert_chain,
            stk_source,
            supported_aeads: vec![Tag::AESG],
            supported_kexs: vec![Tag::C255],
            expiry: SystemTime::now() + CONFIG_LIFETIME,
        }
    }

    pub fn id(&self) -> &[u8; 16] {
        &self.id
    }

    /// Server-origin identifier, echoed inside valid client nonces.
    pub fn obit(&self) -> &[u8; 8] {
        &self.obit
    }

    pub fn kex(&self) -> &dyn KeyExchange {
        self.kex.as_ref()
    }

    pub fn cert_chain(&self) -> &dyn ProofSigner {
        self.cert_chain.as_ref()
    }

    pub fn stk_source(&self) -> &dyn StkSource {
        self.stk_source.as_ref()
    }

    pub fn supported_aeads(&self) -> &[Tag] {
        &self.supported_aeads
    }

    pub fn supported_kexs(&self) -> &[Tag] {
        &self.supported_kexs
    }

    /// The SCFG handshake message a REJ embeds.
    ///
    /// The static public key is carried with a 24-bit little-endian length
    /// prefix, as the wire format requires.
    pub fn serialized(&self) -> Vec<u8> {
        let mut data = TagMap::new();
        data.insert(Tag::SCID, self.id.to_vec());
        data.insert(Tag::KEXS, concat_tags(&self.supported_kexs));
        data.insert(Tag::AEAD, concat_tags(&self.supported_aeads));

        let public_key = self.kex.public_key();
        let mut pubs = Vec::with_capacity(3 + public_key.len());
        let len = (public_key.len() as u32).to_le_bytes();
        pubs.extend_from_slice(&len[..3]);
        pubs.extend_from_slice(public_key);
        data.insert(Tag::PUBS, pubs);

        data.insert(Tag::OBIT, self.obit.to_vec());
        let expiry = self
            .expiry
            .duration_since(UNIX_EPOCH)
            .expect("config expiry before unix epoch")
            .as_secs();
        data.insert(Tag::EXPY, expiry.to_le_bytes().to_vec());

        HandshakeMessage::new(Tag::SCFG, data).serialize()
    }
}

fn concat_tags(tags: &[Tag]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tags.len() * 4);
    for tag in tags {
        out.extend_from_slice(&tag.to_bytes());
    }
    out
}
