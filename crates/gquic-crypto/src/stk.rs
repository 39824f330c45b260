//! Source-address tokens.
//!
//! A token proves that a client previously demonstrated control of its
//! claimed address: the server hands one out in every REJ, and a CHLO
//! presenting a valid token skips address validation. Tokens are opaque to
//! clients and MAC-bound to the server secret.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::Sha3_256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StkError {
    #[error("source-address token truncated")]
    Truncated,
    #[error("source-address token version is unsupported")]
    Version,
    #[error("source-address token integrity check failed")]
    Integrity,
    #[error("source-address token bound to a different address")]
    AddressMismatch,
    #[error("source-address token not yet valid")]
    NotYetValid,
    #[error("source-address token expired")]
    Expired,
    #[error("source address too long to bind")]
    AddressTooLong,
}

/// Mint and verify source-address tokens.
pub trait StkSource: Send + Sync {
    fn new_token(&self, source_addr: &[u8]) -> Result<Vec<u8>, StkError>;

    fn verify_token(&self, source_addr: &[u8], token: &[u8]) -> Result<(), StkError>;
}

const TOKEN_VERSION: u8 = 1;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 8 + 1;

type TokenMac = Hmac<Sha3_256>;

/// Configuration for the HMAC token source.
#[derive(Clone, Debug)]
pub struct StkConfig {
    pub secret: [u8; 32],
    pub lifetime: Duration,
}

impl StkConfig {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            secret,
            lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Generate a fresh random secret; tokens will not survive restarts.
    pub fn ephemeral() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(secret)
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

/// Stateless token source binding tokens to the client address with an
/// HMAC-SHA3-256 tag and an issue-time window.
#[derive(Clone, Debug)]
pub struct HmacStkSource {
    secret: [u8; 32],
    lifetime: Duration,
}

impl HmacStkSource {
    pub fn new(config: StkConfig) -> Self {
        Self {
            secret: config.secret,
            lifetime: config.lifetime,
        }
    }

    fn mint_at(&self, source_addr: &[u8], now: SystemTime) -> Result<Vec<u8>, StkError> {
        if source_addr.len() > u8::MAX as usize {
            return Err(StkError::AddressTooLong);
        }
        let mut body = Vec::with_capacity(HEADER_LEN + source_addr.len() + TAG_LEN);
        body.push(TOKEN_VERSION);
        body.extend_from_slice(&unix_seconds(now).to_be_bytes());
        body.push(source_addr.len() as u8);
        body.extend_from_slice(source_addr);
        let mut mac = TokenMac::new_from_slice(&self.secret).expect("mac init");
        mac.update(&body);
        let tag = mac.finalize().into_bytes();
        body.extend_from_slice(&tag);
        Ok(body)
    }

    fn verify_at(
        &self,
        source_addr: &[u8],
        token: &[u8],
        now: SystemTime,
    ) -> Result<(), StkError> {
        if token.len() < HEADER_LEN + TAG_LEN {
            return Err(StkError::Truncated);
        }
        let (body, tag) = token.split_at(token.len() - TAG_LEN);
        let mut mac = TokenMac::new_from_slice(&self.secret).expect("mac init");
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        if expected.as_slice().ct_eq(tag).unwrap_u8() == 0 {
            return Err(StkError::Integrity);
        }

        if body[0] != TOKEN_VERSION {
            return Err(StkError::Version);
        }
        let issued_bytes: [u8; 8] = body[1..9].try_into().expect("issue timestamp");
        let issued_at = UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(issued_bytes));
        let addr_len = body[9] as usize;
        if body.len() != HEADER_LEN + addr_len {
            return Err(StkError::Truncated);
        }
        if &body[HEADER_LEN..] != source_addr {
            return Err(StkError::AddressMismatch);
        }
        if issued_at > now + Duration::from_secs(60) {
            return Err(StkError::NotYetValid);
        }
        if issued_at + self.lifetime < now {
            return Err(StkError::Expired);
        }
        Ok(())
    }
}

impl StkSource for HmacStkSource {
    fn new_token(&self, source_addr: &[u8]) -> Result<Vec<u8>, StkError> {
        self.mint_at(source_addr, SystemTime::now())
    }

    fn verify_token(&self, source_addr: &[u8], token: &[u8]) -> Result<(), StkError> {
        self.verify_at(source_addr, token, SystemTime::now())
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .expect("time before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HmacStkSource {
        HmacStkSource::new(StkConfig::new([7u8; 32]))
    }

    #[test]
    fn mint_then_verify_same_address() {
        let source = source();
        let token = source.new_token(&[1, 2, 3, 4]).expect("mint");
        source.verify_token(&[1, 2, 3, 4], &token).expect("verify");
    }

    #[test]
    fn rejects_other_addresses() {
        let source = source();
        let token = source.new_token(&[1, 2, 3, 4]).expect("mint");
        assert_eq!(
            source.verify_token(&[4, 3, 2, 1], &token),
            Err(StkError::AddressMismatch)
        );
    }

    #[test]
    fn rejects_tampered_tokens() {
        let source = source();
        let mut token = source.new_token(&[9, 9, 9, 9]).expect("mint");
        let len = token.len();
        token[len - 1] ^= 0xff;
        assert_eq!(
            source.verify_token(&[9, 9, 9, 9], &token),
            Err(StkError::Integrity)
        );
    }

    #[test]
    fn rejects_truncated_tokens() {
        let source = source();
        assert_eq!(
            source.verify_token(&[1, 2, 3, 4], b"stub"),
            Err(StkError::Truncated)
        );
    }

    #[test]
    fn tokens_from_another_secret_fail() {
        let token = source().new_token(&[1, 2, 3, 4]).expect("mint");
        let other = HmacStkSource::new(StkConfig::new([8u8; 32]));
        assert_eq!(
            other.verify_token(&[1, 2, 3, 4], &token),
            Err(StkError::Integrity)
        );
    }

    #[test]
    fn expires_after_the_lifetime() {
        let source = HmacStkSource::new(
            StkConfig::new([7u8; 32]).with_lifetime(Duration::from_secs(60)),
        );
        let minted = SystemTime::now();
        let token = source.mint_at(&[1, 2, 3, 4], minted).expect("mint");
        source
            .verify_at(&[1, 2, 3, 4], &token, minted + Duration::from_secs(30))
            .expect("within lifetime");
        assert_eq!(
            source.verify_at(&[1, 2, 3, 4], &token, minted + Duration::from_secs(120)),
            Err(StkError::Expired)
        );
    }

    #[test]
    fn rejects_tokens_from_the_future() {
        let source = source();
        let now = SystemTime::now();
        let token = source
            .mint_at(&[1, 2, 3, 4], now + Duration::from_secs(600))
            .expect("mint");
        assert_eq!(
            source.verify_at(&[1, 2, 3, 4], &token, now),
            Err(StkError::NotYetValid)
        );
    }

    #[test]
    fn binds_ipv6_sized_addresses() {
        let source = source();
        let addr = [0xabu8; 16];
        let token = source.new_token(&addr).expect("mint");
        source.verify_token(&addr, &token).expect("verify");
    }
}
