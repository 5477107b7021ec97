// src/core/cred/mod.rs

//! The credential subsystem: signed, time-bounded tokens authorizing job
//! launch, file broadcast, and network-alias distribution.
//!
//! Three credential flavors share one token type distinguished by a
//! context tag. Two production backends are provided (keyed MAC and
//! signed claim) plus a `none` backend for tests; the backend is chosen
//! by `CredType` at startup. Verification is uniform: the backend checks
//! the signature and decodes the payload, then the manager enforces
//! expiration and replay. Replay inside the expiration window is a hard
//! failure except for `net` credentials, which may legitimately be
//! re-fetched by restarted tasks.

pub mod claim;
pub mod mac;
pub mod none;
pub mod replay;

use crate::core::LatticeError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// What a credential authorizes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CredContext {
    Launch,
    Sbcast,
    Net,
}

impl CredContext {
    /// Whether a token in this context may be presented more than once
    /// inside its expiration window.
    pub fn replay_okay(self) -> bool {
        matches!(self, CredContext::Net)
    }
}

/// Identity descriptor embedded in launch credentials so downstream
/// daemons can reconstruct the user without a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub user_name: String,
    /// Supplementary group ids.
    pub gids: Vec<u32>,
}

/// Launch authorization for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPayload {
    pub job_id: u32,
    pub step_id: u32,
    pub node_list: String,
    pub identity: Identity,
}

/// File-broadcast authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbcastPayload {
    pub job_id: u32,
    pub node_list: String,
    pub path: String,
    /// File mode bits for the delivered file.
    pub mode: u32,
}

/// One node-address mapping distributed to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAlias {
    pub node: String,
    pub addr: String,
    pub port: u16,
}

/// Network alias table authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPayload {
    pub job_id: u32,
    pub aliases: Vec<NodeAlias>,
}

/// Context-specific payload carried inside a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CredPayload {
    Launch(LaunchPayload),
    Sbcast(SbcastPayload),
    Net(NetPayload),
}

impl CredPayload {
    pub fn context(&self) -> CredContext {
        match self {
            CredPayload::Launch(_) => CredContext::Launch,
            CredPayload::Sbcast(_) => CredContext::Sbcast,
            CredPayload::Net(_) => CredContext::Net,
        }
    }
}

/// A decoded, verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub context: CredContext,
    pub uid: u32,
    pub gid: u32,
    pub issue_time: i64,
    pub expiration: i64,
    pub payload: CredPayload,
    /// The signature bytes, used as the replay-cache key.
    pub signature: Vec<u8>,
}

/// Signing key material. Replaced atomically on rotation; never mutated
/// in place.
#[derive(Clone)]
pub struct Keyring {
    key: Vec<u8>,
}

impl Keyring {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Loads key material from `path`, or generates an ephemeral key when
    /// no file is configured (single-controller test setups).
    pub fn load(path: Option<&str>) -> Result<Self, LatticeError> {
        match path {
            Some(p) => {
                let key = std::fs::read(p)?;
                if key.len() < 16 {
                    return Err(LatticeError::ParseFailure(format!(
                        "credential key file '{p}' too short ({} bytes)",
                        key.len()
                    )));
                }
                Ok(Self::new(key))
            }
            None => {
                let mut key = vec![0u8; 32];
                getrandom::fill(&mut key)
                    .map_err(|e| LatticeError::Internal(format!("key generation: {e}")))?;
                Ok(Self::new(key))
            }
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// A credential backend: packs and signs a payload into an opaque token,
/// and verifies a received token back into a [`Credential`].
pub trait CredSigner: Send + Sync {
    fn name(&self) -> &'static str;

    fn sign(
        &self,
        keyring: &Keyring,
        payload: &CredPayload,
        uid: u32,
        gid: u32,
        issue_time: i64,
        expiration: i64,
    ) -> Result<Vec<u8>, LatticeError>;

    /// Checks the signature and decodes the token. Expiration and replay
    /// are enforced by the manager, not here.
    fn verify(&self, keyring: &Keyring, token: &[u8]) -> Result<Credential, LatticeError>;
}

/// Resolves a backend by its configured name.
pub fn signer_for(name: &str) -> Result<Arc<dyn CredSigner>, LatticeError> {
    match name {
        "mac" => Ok(Arc::new(mac::MacSigner)),
        "claim" => Ok(Arc::new(claim::ClaimSigner)),
        "none" => Ok(Arc::new(none::NoneSigner)),
        other => Err(LatticeError::ParseFailure(format!(
            "unknown credential backend '{other}'"
        ))),
    }
}

/// Issues and verifies credentials. Owns the trust store and the replay
/// cache; the expiry sweeper calls [`CredManager::sweep_expired`].
pub struct CredManager {
    signer: Arc<dyn CredSigner>,
    keyring: RwLock<Arc<Keyring>>,
    replay: replay::ReplayCache,
    /// Default credential lifetime in seconds.
    pub lifetime: i64,
}

impl CredManager {
    pub fn new(signer: Arc<dyn CredSigner>, keyring: Keyring, lifetime: i64) -> Self {
        Self {
            signer,
            keyring: RwLock::new(Arc::new(keyring)),
            replay: replay::ReplayCache::new(),
            lifetime,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.signer.name()
    }

    /// Swaps the trust store on key rotation.
    pub fn rotate_keyring(&self, keyring: Keyring) {
        *self.keyring.write() = Arc::new(keyring);
    }

    /// The current trust store, shared with the RPC auth layer.
    pub fn keyring(&self) -> Arc<Keyring> {
        self.keyring.read().clone()
    }

    /// Issues a signed token for `payload`, expiring `lifetime` seconds
    /// after `now`.
    pub fn issue(
        &self,
        payload: CredPayload,
        uid: u32,
        gid: u32,
        now: i64,
    ) -> Result<Vec<u8>, LatticeError> {
        let keyring = self.keyring.read().clone();
        self.signer
            .sign(&keyring, &payload, uid, gid, now, now + self.lifetime)
    }

    /// Verifies a token: signature, context expectation, expiration, and
    /// replay, in that order. Expiration wins over the net-context replay
    /// allowance.
    pub fn verify(
        &self,
        token: &[u8],
        expect: CredContext,
        now: i64,
    ) -> Result<Credential, LatticeError> {
        let keyring = self.keyring.read().clone();
        let cred = self.signer.verify(&keyring, token)?;
        if cred.context != expect {
            return Err(LatticeError::CredSkip);
        }
        if now >= cred.expiration {
            return Err(LatticeError::CredExpired);
        }
        // The whole token is the replay key: two identical presentations
        // of one token are a replay even when the signature is a backend
        // sentinel.
        if !self.replay.record(token, cred.expiration) && !cred.context.replay_okay() {
            return Err(LatticeError::CredReplayed);
        }
        Ok(cred)
    }

    /// Drops replay-cache entries whose window has passed.
    pub fn sweep_expired(&self, now: i64) -> usize {
        self.replay.sweep(now)
    }
}
