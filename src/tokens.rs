//! Refresh token issuance, validation, rotation, and revocation.
//!
//! Plaintext tokens are 64 bytes from the OS CSPRNG, base64url-encoded without
//! padding. Only their SHA-256 digest is persisted.

use crate::errors::TokenError;
use crate::settings::Tokens as TokensCfg;
use crate::storage::{TokenRecord, TokenStore};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 64;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to whole seconds, the resolution records are stored at.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// Manually driven clock for tests and tooling.
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Where token bytes come from.
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// SHA-256 of the plaintext, base64url without padding (43 chars).
pub fn hash_token(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

pub struct RefreshTokenManager {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    ttl: Duration,
    revoke_family_on_reuse: bool,
}

impl RefreshTokenManager {
    pub fn new(store: Arc<dyn TokenStore>, ttl: Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
            ttl,
            revoke_family_on_reuse: false,
        }
    }

    pub fn from_settings(store: Arc<dyn TokenStore>, cfg: &TokensCfg) -> Self {
        let ttl = Duration::try_seconds(cfg.ttl_secs).unwrap_or(Duration::MAX);
        Self::new(store, ttl)
            .with_reuse_detection(cfg.revoke_family_on_reuse)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn with_reuse_detection(mut self, enabled: bool) -> Self {
        self.revoke_family_on_reuse = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token for `user_id` and return its plaintext.
    ///
    /// Returns only after the record is persisted, so an immediate
    /// [`validate`](Self::validate) of the result always sees it.
    pub async fn issue(&self, user_id: &str) -> Result<String, TokenError> {
        let (plaintext, record) = self.issue_record(user_id, None).await?;
        debug!(user_id, token_id = %record.id, "Issued refresh token");
        Ok(plaintext)
    }

    /// Look up the record for a presented plaintext.
    ///
    /// `NotFound` never says whether the token once existed. Revoked and expired
    /// records both yield `ExpiredOrRevoked`; expiry is strict, so a record whose
    /// `expires_at` equals now is already invalid.
    pub async fn validate(&self, plaintext: &str) -> Result<TokenRecord, TokenError> {
        let record = self
            .store
            .find_by_hash(&hash_token(plaintext))
            .await?
            .ok_or(TokenError::NotFound)?;

        if record.is_usable_at(self.clock.now()) {
            return Ok(record);
        }

        if self.revoke_family_on_reuse && record.was_rotated() {
            let revoked = self.store.revoke_all_by_user(&record.user_id).await?;
            warn!(
                user_id = %record.user_id,
                token_id = %record.id,
                revoked,
                "Rotated refresh token presented again, revoked all sessions of user"
            );
        }

        Err(TokenError::ExpiredOrRevoked)
    }

    /// Replace `record` with a successor for the same user.
    ///
    /// The old record is retired with one conditional write; among concurrent
    /// callers holding the same record exactly one wins, the rest get
    /// `ExpiredOrRevoked`.
    pub async fn rotate(&self, record: &TokenRecord) -> Result<String, TokenError> {
        let now = self.clock.now();
        if !record.is_usable_at(now) {
            return Err(TokenError::ExpiredOrRevoked);
        }

        let retired = record.clone().into_rotated(now);
        if !self.store.conditional_revoke(&retired).await? {
            debug!(token_id = %record.id, "Refresh token already consumed");
            return Err(TokenError::ExpiredOrRevoked);
        }

        let (plaintext, successor) = self
            .issue_record(&record.user_id, Some(record.id.clone()))
            .await?;
        info!(
            user_id = %record.user_id,
            token_id = %record.id,
            successor_id = %successor.id,
            "Rotated refresh token"
        );
        Ok(plaintext)
    }

    /// Explicitly revoke the token behind `plaintext`. Revoking an already
    /// revoked token is a no-op.
    pub async fn revoke(&self, plaintext: &str) -> Result<(), TokenError> {
        let record = self
            .store
            .find_by_hash(&hash_token(plaintext))
            .await?
            .ok_or(TokenError::NotFound)?;

        let token_id = record.id.clone();
        if self.store.conditional_revoke(&record.into_revoked()).await? {
            info!(%token_id, "Revoked refresh token");
        }
        Ok(())
    }

    /// Revoke every live token of `user_id`. Idempotent; returns how many changed.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, TokenError> {
        let revoked = self.store.revoke_all_by_user(user_id).await?;
        info!(user_id, revoked, "Revoked all refresh tokens of user");
        Ok(revoked)
    }

    /// The user's records that would pass validation right now.
    pub async fn active_sessions(&self, user_id: &str) -> Result<Vec<TokenRecord>, TokenError> {
        let now = self.clock.now();
        let records = self.store.find_active_by_user(user_id).await?;
        Ok(records.into_iter().filter(|r| r.is_usable_at(now)).collect())
    }

    async fn issue_record(
        &self,
        user_id: &str,
        parent_id: Option<String>,
    ) -> Result<(String, TokenRecord), TokenError> {
        let now = self.clock.now();
        if now.checked_add_signed(self.ttl).is_none() {
            return Err(TokenError::Generation(format!(
                "ttl of {}s overflows the expiry timestamp",
                self.ttl.num_seconds()
            )));
        }

        let plaintext = self.generate()?;
        let record = TokenRecord::new(user_id, hash_token(&plaintext), now, self.ttl, parent_id);
        self.store.insert(&record).await?;
        Ok((plaintext, record))
    }

    fn generate(&self) -> Result<String, TokenError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.entropy
            .fill(&mut bytes)
            .map_err(|e| TokenError::Generation(format!("random source unavailable: {e}")))?;
        Ok(Base64UrlUnpadded::encode_string(&bytes))
    }
}
