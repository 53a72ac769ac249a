// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity & token service.
//!
//! Two token classes: a short-lived HS256 access JWT and an opaque refresh
//! token persisted only as its SHA-256. Rotation keeps the rotated-out token
//! alive as `previous` for a short overlap window so an in-flight client
//! retry gets a precise `refresh_token_reused` error instead of a bare 401;
//! presenting a rotated token is never rewarded with a fresh pair. Handoff
//! and mono-auth tokens are in-memory and swept on expiry.

use crate::error::ApiError;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vibe80_core::{
    AccessClaims, AuditEvent, AuditKind, Clock, HandoffToken, MonoAuthToken, RefreshTokenKind,
    RefreshTokenRecord, SessionId, WorkspaceId,
};
use vibe80_storage::Storage;

/// Access token lifetime.
pub const ACCESS_TTL: Duration = Duration::from_secs(3600);
/// Refresh token lifetime.
pub const REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
/// Handoff token lifetime.
pub const HANDOFF_TTL: Duration = Duration::from_secs(120);

const ISSUER: &str = "vibe80";
const AUDIENCE: &str = "workspace";

/// Hex SHA-256 of a secret or raw token.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// 256-bit random token, hex-encoded.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Access + refresh pair returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
    pub refresh_token: String,
    /// Seconds until the refresh token expires.
    pub refresh_expires_in: u64,
}

/// The identity & token service. One per process, built at boot.
pub struct IdentityService<C: Clock> {
    storage: Arc<dyn Storage>,
    clock: C,
    encoding: jsonwebtoken::EncodingKey,
    decoding: jsonwebtoken::DecodingKey,
    overlap: Duration,
    handoff: Mutex<HashMap<String, HandoffToken>>,
    mono: Mutex<HashMap<String, MonoAuthToken>>,
}

impl<C: Clock> IdentityService<C> {
    pub fn new(storage: Arc<dyn Storage>, key: &[u8], overlap: Duration, clock: C) -> Self {
        Self {
            storage,
            clock,
            encoding: jsonwebtoken::EncodingKey::from_secret(key),
            decoding: jsonwebtoken::DecodingKey::from_secret(key),
            overlap,
            handoff: Mutex::new(HashMap::new()),
            mono: Mutex::new(HashMap::new()),
        }
    }

    /// Load the signing key from `path`, or generate a 256-bit key and
    /// persist it at mode 0600 on first run.
    pub fn load_or_create_key(path: &Path) -> std::io::Result<Vec<u8>> {
        match std::fs::read(path) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut key = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                std::fs::write(path, &key)?;
                let mut perms = std::fs::metadata(path)?.permissions();
                std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o600);
                std::fs::set_permissions(path, perms)?;
                Ok(key)
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    // ---- access tokens ---------------------------------------------------

    fn sign_access_token(&self, workspace_id: &WorkspaceId) -> Result<String, ApiError> {
        let now_s = self.now_ms() / 1000;
        let claims = AccessClaims {
            sub: workspace_id.to_string(),
            iat: now_s,
            exp: now_s + ACCESS_TTL.as_secs(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))
    }

    /// Validate a bearer access token, returning the workspace it names.
    ///
    /// Expiry is checked against the service clock rather than the host
    /// clock so the whole token path is deterministic under test.
    pub fn verify_access(&self, token: &str) -> Result<WorkspaceId, ApiError> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.validate_exp = false;
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(|_| ApiError::auth("invalid access token"))?;
        if data.claims.exp <= self.now_ms() / 1000 {
            return Err(ApiError::auth("access token expired").with_code("token_expired"));
        }
        WorkspaceId::parse(&data.claims.sub)
            .map_err(|_| ApiError::auth("invalid access token subject"))
    }

    // ---- refresh tokens --------------------------------------------------

    /// Issue a fresh access+refresh pair, rotating any existing current
    /// refresh token into `previous` with the overlap window.
    pub async fn issue_tokens(&self, workspace_id: &WorkspaceId) -> Result<TokenPair, ApiError> {
        let now = self.now_ms();
        let access_token = self.sign_access_token(workspace_id)?;
        let raw_refresh = random_token();
        let refresh_hash = sha256_hex(&raw_refresh);

        let prior = self.storage.get_workspace_refresh_state(workspace_id).await?;
        let overlap_until = now + self.overlap.as_millis() as u64;
        let previous_token_hash = prior.as_ref().map(|p| p.token_hash.clone());

        if let Some(mut old) = prior {
            // Drop the grand-previous; only one overlap generation survives.
            if let Some(grand) = old.previous_token_hash.take() {
                self.storage.delete_workspace_refresh_token(&grand).await?;
            }
            old.kind = RefreshTokenKind::Previous;
            old.previous_valid_until_ms = Some(overlap_until);
            self.storage.save_workspace_refresh_token(&old).await?;
        }

        let previous_valid_until_ms = previous_token_hash.as_ref().map(|_| overlap_until);
        let record = RefreshTokenRecord {
            token_hash: refresh_hash,
            workspace_id: *workspace_id,
            kind: RefreshTokenKind::Current,
            expires_at_ms: now + REFRESH_TTL.as_millis() as u64,
            previous_token_hash,
            previous_valid_until_ms,
        };
        self.storage.save_workspace_refresh_token(&record).await?;

        Ok(TokenPair {
            access_token,
            expires_in: ACCESS_TTL.as_secs(),
            refresh_token: raw_refresh,
            refresh_expires_in: REFRESH_TTL.as_secs(),
        })
    }

    /// Rotate a raw refresh token into a new pair, detecting reuse.
    pub async fn refresh(&self, raw_token: &str) -> Result<TokenPair, ApiError> {
        let hash = sha256_hex(raw_token);
        let Some(record) = self.storage.get_workspace_refresh_token(&hash).await? else {
            return Err(ApiError::auth("invalid refresh token").with_code("invalid_refresh_token"));
        };
        let now = self.now_ms();

        match record.kind {
            RefreshTokenKind::Current => {
                if now > record.expires_at_ms {
                    self.storage.delete_workspace_refresh_token(&hash).await?;
                    return Err(ApiError::auth("refresh token expired")
                        .with_code("refresh_token_expired"));
                }
                self.issue_tokens(&record.workspace_id).await
            }
            RefreshTokenKind::Previous => {
                // A rotated-out token is never valid again. Inside the
                // overlap window this is a client retry; outside it, a theft
                // indicator. Both are audited and refused.
                let window_end = record.previous_valid_until_ms.unwrap_or(0);
                if now > window_end {
                    self.storage.delete_workspace_refresh_token(&hash).await?;
                }
                self.audit_reuse(&record.workspace_id).await;
                Err(ApiError::auth("refresh token reused").with_code("refresh_token_reused"))
            }
        }
    }

    async fn audit_reuse(&self, workspace_id: &WorkspaceId) {
        let event = AuditEvent {
            ts_ms: self.now_ms(),
            workspace_id: *workspace_id,
            event: AuditKind::RefreshTokenReused,
            details: None,
        };
        if let Err(e) = self.storage.append_audit_event(&event).await {
            tracing::error!(error = %e, "failed to audit refresh reuse");
        }
    }

    // ---- handoff tokens --------------------------------------------------

    /// Mint a single-use handoff token binding `{workspace, session}`.
    pub fn create_handoff(&self, workspace_id: WorkspaceId, session_id: SessionId) -> String {
        let token = random_token();
        let now = self.now_ms();
        self.handoff.lock().insert(
            token.clone(),
            HandoffToken {
                token: token.clone(),
                workspace_id,
                session_id,
                created_at_ms: now,
                used_at_ms: None,
                expires_at_ms: now + HANDOFF_TTL.as_millis() as u64,
            },
        );
        token
    }

    /// Consume a handoff token. Atomic: a concurrent double-consume elects
    /// exactly one winner.
    pub fn consume_handoff(
        &self,
        token: &str,
    ) -> Result<(WorkspaceId, SessionId), ApiError> {
        let now = self.now_ms();
        let mut handoff = self.handoff.lock();
        let Some(entry) = handoff.get_mut(token) else {
            return Err(ApiError::auth("invalid handoff token").with_code("invalid"));
        };
        if entry.is_used() || entry.is_expired(now) {
            return Err(ApiError::auth("invalid handoff token").with_code("invalid"));
        }
        entry.used_at_ms = Some(now);
        Ok((entry.workspace_id, entry.session_id))
    }

    // ---- mono-auth tokens ------------------------------------------------

    /// Mint the mono-user bootstrap token.
    pub fn issue_mono(&self, workspace_id: WorkspaceId, ttl: Duration) -> String {
        let token = random_token();
        let now = self.now_ms();
        self.mono.lock().insert(
            token.clone(),
            MonoAuthToken {
                token: token.clone(),
                workspace_id,
                expires_at_ms: now + ttl.as_millis() as u64,
            },
        );
        token
    }

    /// Resolve a mono token (TTL-bound, not single-use).
    pub fn verify_mono(&self, token: &str) -> Option<WorkspaceId> {
        let now = self.now_ms();
        let mono = self.mono.lock();
        mono.get(token).filter(|t| !t.is_expired(now)).map(|t| t.workspace_id)
    }

    /// Drop expired handoff and mono tokens. Called periodically.
    pub fn sweep_expired(&self) {
        let now = self.now_ms();
        self.handoff.lock().retain(|_, t| !t.is_expired(now) && !t.is_used());
        self.mono.lock().retain(|_, t| !t.is_expired(now));
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
