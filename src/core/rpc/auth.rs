// src/core/rpc/auth.rs

//! RPC authentication: a short-lived HMAC token binding the caller's
//! uid/gid to the frame. Unlike job credentials, auth tokens may be
//! reused inside their lifetime (every RPC carries one).

use crate::core::LatticeError;
use crate::core::cred::Keyring;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Seconds an auth token stays valid.
pub const AUTH_TTL: i64 = 300;

/// The verified identity carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInfo {
    pub uid: u32,
    pub gid: u32,
}

/// Builds an auth token for `(uid, gid)` at `now`.
pub fn make_auth(keyring: &Keyring, uid: u32, gid: u32, now: i64) -> Result<Vec<u8>, LatticeError> {
    let mut frame = PackBuf::new();
    frame.pack32(uid);
    frame.pack32(gid);
    frame.pack_time(now);
    let frame = frame.into_bytes();

    let mut mac = HmacSha256::new_from_slice(keyring.key())
        .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
    mac.update(&frame);
    let sig = mac.finalize().into_bytes();

    let mut token = PackBuf::new();
    token.packmem(&frame);
    token.packmem(&sig);
    Ok(token.into_bytes().to_vec())
}

/// Verifies an auth token: signature first, then freshness.
pub fn verify_auth(keyring: &Keyring, token: &[u8], now: i64) -> Result<AuthInfo, LatticeError> {
    if token.is_empty() {
        return Err(LatticeError::MissingAuth);
    }
    let mut outer = UnpackBuf::new(Bytes::copy_from_slice(token));
    let frame = outer.unpackmem().map_err(|_| LatticeError::MissingAuth)?;
    let sig = outer.unpackmem().map_err(|_| LatticeError::MissingAuth)?;

    let mut mac = HmacSha256::new_from_slice(keyring.key())
        .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
    mac.update(&frame);
    if mac.verify_slice(&sig).is_err() {
        return Err(LatticeError::MissingAuth);
    }

    let mut buf = UnpackBuf::new(Bytes::from(frame));
    let uid = buf.unpack32().map_err(|_| LatticeError::MissingAuth)?;
    let gid = buf.unpack32().map_err(|_| LatticeError::MissingAuth)?;
    let issued = buf.unpack_time().map_err(|_| LatticeError::MissingAuth)?;
    if now - issued > AUTH_TTL || issued - now > AUTH_TTL {
        return Err(LatticeError::CredExpired);
    }
    Ok(AuthInfo { uid, gid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_expiry() {
        let keyring = Keyring::new(vec![7u8; 32]);
        let token = make_auth(&keyring, 1000, 100, 5000).unwrap();
        let info = verify_auth(&keyring, &token, 5010).unwrap();
        assert_eq!(info, AuthInfo { uid: 1000, gid: 100 });
        assert_eq!(
            verify_auth(&keyring, &token, 5000 + AUTH_TTL + 1).unwrap_err(),
            LatticeError::CredExpired
        );
    }

    #[test]
    fn tampered_token_fails() {
        let keyring = Keyring::new(vec![7u8; 32]);
        let mut token = make_auth(&keyring, 1000, 100, 5000).unwrap();
        token[6] ^= 1;
        assert!(verify_auth(&keyring, &token, 5001).is_err());
    }

    #[test]
    fn empty_token_is_missing_auth() {
        let keyring = Keyring::new(vec![7u8; 32]);
        assert_eq!(
            verify_auth(&keyring, &[], 0).unwrap_err(),
            LatticeError::MissingAuth
        );
    }
}
