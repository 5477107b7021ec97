// src/core/cred/claim.rs

//! Signed-claim credential backend.
//!
//! The payload is serialized as a JSON claim set (context, uid, gid,
//! issue time, expiration, and the context-specific fields, identity
//! included) and signed with HMAC-SHA256 over the serialized bytes. The
//! token is `packmem(claims) ++ packmem(signature)`. Embedding identity
//! in the claims lets compute daemons reconstruct the user without a
//! directory lookup.

use super::{CredContext, CredPayload, CredSigner, Credential, Keyring};
use crate::core::LatticeError;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The claim set, serialized as canonical JSON.
#[derive(Debug, Serialize, Deserialize)]
struct ClaimSet {
    context: CredContext,
    uid: u32,
    gid: u32,
    iat: i64,
    exp: i64,
    payload: CredPayload,
}

pub struct ClaimSigner;

impl CredSigner for ClaimSigner {
    fn name(&self) -> &'static str {
        "claim"
    }

    fn sign(
        &self,
        keyring: &Keyring,
        payload: &CredPayload,
        uid: u32,
        gid: u32,
        issue_time: i64,
        expiration: i64,
    ) -> Result<Vec<u8>, LatticeError> {
        let claims = ClaimSet {
            context: payload.context(),
            uid,
            gid,
            iat: issue_time,
            exp: expiration,
            payload: payload.clone(),
        };
        let json = serde_json::to_vec(&claims)?;

        let mut mac = HmacSha256::new_from_slice(keyring.key())
            .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
        mac.update(&json);
        let signature = mac.finalize().into_bytes().to_vec();

        let mut token = PackBuf::new();
        token.packmem(&json);
        token.packmem(&signature);
        Ok(token.into_bytes().to_vec())
    }

    fn verify(&self, keyring: &Keyring, token: &[u8]) -> Result<Credential, LatticeError> {
        let mut outer = UnpackBuf::new(Bytes::copy_from_slice(token));
        let json = outer.unpackmem().map_err(|_| LatticeError::CredUnpackFailure)?;
        let signature = outer
            .unpackmem()
            .map_err(|_| LatticeError::CredUnpackFailure)?;

        let mut mac = HmacSha256::new_from_slice(keyring.key())
            .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
        mac.update(&json);
        if mac.verify_slice(&signature).is_err() {
            return Err(LatticeError::CredInvalid);
        }

        let claims: ClaimSet =
            serde_json::from_slice(&json).map_err(|_| LatticeError::CredUnpackFailure)?;
        if claims.payload.context() != claims.context {
            return Err(LatticeError::CredInvalid);
        }

        Ok(Credential {
            context: claims.context,
            uid: claims.uid,
            gid: claims.gid,
            issue_time: claims.iat,
            expiration: claims.exp,
            payload: claims.payload,
            signature,
        })
    }
}
