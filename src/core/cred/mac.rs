// src/core/cred/mac.rs

//! Keyed-MAC credential backend.
//!
//! The payload is packed in the system's binary frame and authenticated
//! with HMAC-SHA256. The token is `packmem(frame) ++ packmem(mac)`;
//! verification recomputes the MAC over the received frame.

use super::{
    CredContext, CredPayload, CredSigner, Credential, Identity, Keyring, LaunchPayload,
    NetPayload, NodeAlias, SbcastPayload,
};
use crate::core::LatticeError;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::str::FromStr;

type HmacSha256 = Hmac<Sha256>;

pub struct MacSigner;

fn compute_mac(key: &[u8], frame: &[u8]) -> Result<Vec<u8>, LatticeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
    mac.update(frame);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn pack_identity(buf: &mut PackBuf, id: &Identity) {
    buf.pack32(id.uid);
    buf.pack32(id.gid);
    buf.packstr(Some(&id.user_name));
    buf.pack32(id.gids.len() as u32);
    for gid in &id.gids {
        buf.pack32(*gid);
    }
}

fn unpack_identity(buf: &mut UnpackBuf) -> Result<Identity, LatticeError> {
    let uid = buf.unpack32()?;
    let gid = buf.unpack32()?;
    let user_name = buf.unpackstr()?.unwrap_or_default();
    let count = buf.unpack32()? as usize;
    let mut gids = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        gids.push(buf.unpack32()?);
    }
    Ok(Identity {
        uid,
        gid,
        user_name,
        gids,
    })
}

fn pack_payload(buf: &mut PackBuf, payload: &CredPayload) {
    match payload {
        CredPayload::Launch(p) => {
            buf.pack32(p.job_id);
            buf.pack32(p.step_id);
            buf.packstr(Some(&p.node_list));
            pack_identity(buf, &p.identity);
        }
        CredPayload::Sbcast(p) => {
            buf.pack32(p.job_id);
            buf.packstr(Some(&p.node_list));
            buf.packstr(Some(&p.path));
            buf.pack32(p.mode);
        }
        CredPayload::Net(p) => {
            buf.pack32(p.job_id);
            buf.pack32(p.aliases.len() as u32);
            for alias in &p.aliases {
                buf.packstr(Some(&alias.node));
                buf.packstr(Some(&alias.addr));
                buf.pack16(alias.port);
            }
        }
    }
}

fn unpack_payload(
    context: CredContext,
    buf: &mut UnpackBuf,
) -> Result<CredPayload, LatticeError> {
    match context {
        CredContext::Launch => Ok(CredPayload::Launch(LaunchPayload {
            job_id: buf.unpack32()?,
            step_id: buf.unpack32()?,
            node_list: buf.unpackstr()?.unwrap_or_default(),
            identity: unpack_identity(buf)?,
        })),
        CredContext::Sbcast => Ok(CredPayload::Sbcast(SbcastPayload {
            job_id: buf.unpack32()?,
            node_list: buf.unpackstr()?.unwrap_or_default(),
            path: buf.unpackstr()?.unwrap_or_default(),
            mode: buf.unpack32()?,
        })),
        CredContext::Net => {
            let job_id = buf.unpack32()?;
            let count = buf.unpack32()? as usize;
            let mut aliases = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                aliases.push(NodeAlias {
                    node: buf.unpackstr()?.unwrap_or_default(),
                    addr: buf.unpackstr()?.unwrap_or_default(),
                    port: buf.unpack16()?,
                });
            }
            Ok(CredPayload::Net(NetPayload { job_id, aliases }))
        }
    }
}

impl CredSigner for MacSigner {
    fn name(&self) -> &'static str {
        "mac"
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
        let mut frame = PackBuf::new();
        frame.packstr(Some(&payload.context().to_string()));
        frame.pack32(uid);
        frame.pack32(gid);
        frame.pack_time(issue_time);
        frame.pack_time(expiration);
        pack_payload(&mut frame, payload);
        let frame = frame.into_bytes();

        let signature = compute_mac(keyring.key(), &frame)?;
        let mut token = PackBuf::new();
        token.packmem(&frame);
        token.packmem(&signature);
        Ok(token.into_bytes().to_vec())
    }

    fn verify(&self, keyring: &Keyring, token: &[u8]) -> Result<Credential, LatticeError> {
        let mut outer = UnpackBuf::new(Bytes::copy_from_slice(token));
        let frame = outer.unpackmem().map_err(|_| LatticeError::CredUnpackFailure)?;
        let signature = outer
            .unpackmem()
            .map_err(|_| LatticeError::CredUnpackFailure)?;

        let mut mac = HmacSha256::new_from_slice(keyring.key())
            .map_err(|_| LatticeError::Internal("HMAC key setup failed".into()))?;
        mac.update(&frame);
        if mac.verify_slice(&signature).is_err() {
            return Err(LatticeError::CredInvalid);
        }

        let mut buf = UnpackBuf::new(Bytes::from(frame));
        let context_str = buf
            .unpackstr_required()
            .map_err(|_| LatticeError::CredUnpackFailure)?;
        let context =
            CredContext::from_str(&context_str).map_err(|_| LatticeError::CredUnpackFailure)?;
        let uid = buf.unpack32().map_err(|_| LatticeError::CredUnpackFailure)?;
        let gid = buf.unpack32().map_err(|_| LatticeError::CredUnpackFailure)?;
        let issue_time = buf
            .unpack_time()
            .map_err(|_| LatticeError::CredUnpackFailure)?;
        let expiration = buf
            .unpack_time()
            .map_err(|_| LatticeError::CredUnpackFailure)?;
        let payload =
            unpack_payload(context, &mut buf).map_err(|_| LatticeError::CredUnpackFailure)?;

        Ok(Credential {
            context,
            uid,
            gid,
            issue_time,
            expiration,
            payload,
            signature,
        })
    }
}
