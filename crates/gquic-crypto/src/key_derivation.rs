//! HKDF expansion of a handshake shared secret into packet-protection keys.

use crate::aead::CryptoError;
use crate::gcm_aead::{GcmPacketAead, IV_LEN, KEY_LEN};
use gquic_core::{ConnectionId, Perspective};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

const LABEL_INITIAL: &[u8] = b"QUIC key expansion\0";
const LABEL_FORWARD_SECURE: &[u8] = b"QUIC forward secure key expansion\0";
const LABEL_DIVERSIFICATION: &[u8] = b"QUIC key diversification";

/// Everything a derivation binds the resulting keys to.
///
/// The initial-secure derivation passes the 32-byte client nonce in `nonces`
/// and the diversification nonce; the forward-secure derivation passes
/// client nonce ‖ server nonce (64 bytes) and no diversification.
pub struct DeriveContext<'a> {
    pub forward_secure: bool,
    pub shared_secret: &'a [u8],
    pub nonces: &'a [u8],
    pub connection_id: ConnectionId,
    pub chlo: &'a [u8],
    pub server_config: &'a [u8],
    pub leaf_cert: &'a [u8],
    pub div_nonce: &'a [u8],
    pub perspective: Perspective,
}

#[derive(Zeroize)]
#[zeroize(drop)]
struct ExpandedKeys {
    client_key: [u8; KEY_LEN],
    server_key: [u8; KEY_LEN],
    client_iv: [u8; IV_LEN],
    server_iv: [u8; IV_LEN],
}

/// Derive the packet AEAD for one encryption level.
///
/// Key schedule: HKDF-SHA256 with the shared secret as input keying
/// material, the nonces as salt, and an info block binding the connection
/// id, the client hello, the server config and the leaf certificate. The
/// client's key/IV pair comes first in the output stream. When a
/// diversification nonce is present on the initial-secure level, the server
/// write key and IV are re-expanded under it, on both perspectives, so the
/// pair stays in agreement.
pub fn derive_packet_keys(ctx: &DeriveContext<'_>) -> Result<GcmPacketAead, CryptoError> {
    let label = if ctx.forward_secure {
        LABEL_FORWARD_SECURE
    } else {
        LABEL_INITIAL
    };
    let mut info = Vec::with_capacity(
        label.len() + 8 + ctx.chlo.len() + ctx.server_config.len() + ctx.leaf_cert.len(),
    );
    info.extend_from_slice(label);
    info.extend_from_slice(&ctx.connection_id.0.to_le_bytes());
    info.extend_from_slice(ctx.chlo);
    info.extend_from_slice(ctx.server_config);
    info.extend_from_slice(ctx.leaf_cert);

    let hkdf = Hkdf::<Sha256>::new(Some(ctx.nonces), ctx.shared_secret);
    let mut okm = [0u8; 2 * (KEY_LEN + IV_LEN)];
    hkdf.expand(&info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut keys = ExpandedKeys {
        client_key: okm[..KEY_LEN].try_into().expect("key slice"),
        server_key: okm[KEY_LEN..2 * KEY_LEN].try_into().expect("key slice"),
        client_iv: okm[2 * KEY_LEN..2 * KEY_LEN + IV_LEN]
            .try_into()
            .expect("iv slice"),
        server_iv: okm[2 * KEY_LEN + IV_LEN..].try_into().expect("iv slice"),
    };
    okm.zeroize();

    if !ctx.forward_secure && !ctx.div_nonce.is_empty() {
        diversify(&mut keys.server_key, &mut keys.server_iv, ctx.div_nonce)?;
    }

    match ctx.perspective {
        Perspective::Server => GcmPacketAead::new(
            &keys.server_key,
            keys.server_iv,
            &keys.client_key,
            keys.client_iv,
        ),
        Perspective::Client => GcmPacketAead::new(
            &keys.client_key,
            keys.client_iv,
            &keys.server_key,
            keys.server_iv,
        ),
    }
}

fn diversify(
    key: &mut [u8; KEY_LEN],
    iv: &mut [u8; IV_LEN],
    nonce: &[u8],
) -> Result<(), CryptoError> {
    let mut secret = [0u8; KEY_LEN + IV_LEN];
    secret[..KEY_LEN].copy_from_slice(key);
    secret[KEY_LEN..].copy_from_slice(iv);

    let hkdf = Hkdf::<Sha256>::new(Some(nonce), &secret);
    let mut okm = [0u8; KEY_LEN + IV_LEN];
    hkdf.expand(LABEL_DIVERSIFICATION, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    key.copy_from_slice(&okm[..KEY_LEN]);
    iv.copy_from_slice(&okm[KEY_LEN..]);

    secret.zeroize();
    okm.zeroize();
    Ok(())
}
