// src/core/cred/none.rs

//! The `none` credential backend: a sentinel signature and unconditional
//! signature acceptance. Exists purely for test environments; production
//! configurations must reject it (`AllowInsecureAuth` gate in the config
//! loader).

use super::{CredContext, CredPayload, CredSigner, Credential, Keyring};
use crate::core::LatticeError;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const SENTINEL_SIGNATURE: &[u8] = b"none-signature";

#[derive(Debug, Serialize, Deserialize)]
struct PlainToken {
    context: CredContext,
    uid: u32,
    gid: u32,
    iat: i64,
    exp: i64,
    payload: CredPayload,
}

pub struct NoneSigner;

impl CredSigner for NoneSigner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn sign(
        &self,
        _keyring: &Keyring,
        payload: &CredPayload,
        uid: u32,
        gid: u32,
        issue_time: i64,
        expiration: i64,
    ) -> Result<Vec<u8>, LatticeError> {
        let json = serde_json::to_vec(&PlainToken {
            context: payload.context(),
            uid,
            gid,
            iat: issue_time,
            exp: expiration,
            payload: payload.clone(),
        })?;
        let mut token = PackBuf::new();
        token.packmem(&json);
        token.packmem(SENTINEL_SIGNATURE);
        Ok(token.into_bytes().to_vec())
    }

    fn verify(&self, _keyring: &Keyring, token: &[u8]) -> Result<Credential, LatticeError> {
        let mut outer = UnpackBuf::new(Bytes::copy_from_slice(token));
        let json = outer.unpackmem().map_err(|_| LatticeError::CredUnpackFailure)?;
        let signature = outer
            .unpackmem()
            .map_err(|_| LatticeError::CredUnpackFailure)?;
        let plain: PlainToken =
            serde_json::from_slice(&json).map_err(|_| LatticeError::CredUnpackFailure)?;
        Ok(Credential {
            context: plain.context,
            uid: plain.uid,
            gid: plain.gid,
            issue_time: plain.iat,
            expiration: plain.exp,
            payload: plain.payload,
            signature,
        })
    }
}
