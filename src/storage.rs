//! Durable storage for refresh-token records.
//!
//! The store is pure persistence: it never decides whether a token is usable.
//! Expiry and revocation policy live in [`crate::tokens`].

mod memory;

pub use memory::MemoryTokenStore;

use crate::entities;
use crate::errors::{AppError, StoreError};
use crate::settings::Database as DbCfg;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

/// One issued refresh token. Only the digest of the plaintext is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub rotated_at: Option<DateTime<Utc>>,
    pub parent_id: Option<String>, // For rotation chain tracking
}

impl TokenRecord {
    pub fn new(
        user_id: &str,
        token_hash: String,
        issued_at: DateTime<Utc>,
        ttl: Duration,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash,
            issued_at,
            expires_at: issued_at + ttl,
            revoked: false,
            rotated_at: None,
            parent_id,
        }
    }

    /// Usable means not revoked and strictly before expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }

    /// True once this record has been replaced by a successor.
    pub fn was_rotated(&self) -> bool {
        self.revoked && self.rotated_at.is_some()
    }

    /// The state this record moves to when a successor replaces it.
    pub fn into_rotated(self, now: DateTime<Utc>) -> Self {
        Self {
            revoked: true,
            rotated_at: Some(now),
            ..self
        }
    }

    /// The state this record moves to on explicit revocation. `rotated_at` stays unset.
    pub fn into_revoked(self) -> Self {
        Self {
            revoked: true,
            ..self
        }
    }
}

impl From<entities::refresh_token::Model> for TokenRecord {
    fn from(model: entities::refresh_token::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            token_hash: model.token_hash,
            issued_at: from_unix(model.issued_at),
            expires_at: from_unix(model.expires_at),
            revoked: model.revoked,
            rotated_at: model.rotated_at.map(from_unix),
            parent_id: model.parent_id,
        }
    }
}

// Out-of-range values collapse to the earliest instant, which reads as expired
fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(|| {
        tracing::warn!(secs, "Stored timestamp out of range, treating as expired");
        DateTime::<Utc>::MIN_UTC
    })
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new record. A duplicate `token_hash` yields [`StoreError::Conflict`].
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Write `revoked` (and `rotated_at`) from `revoked` only if the stored row is
    /// still unrevoked. Returns false when another writer got there first.
    async fn conditional_revoke(&self, revoked: &TokenRecord) -> Result<bool, StoreError>;

    /// Every unrevoked record of the user, newest first. Expiry is not checked here.
    async fn find_active_by_user(&self, user_id: &str) -> Result<Vec<TokenRecord>, StoreError>;

    /// Revoke every unrevoked record of the user and return how many changed.
    async fn revoke_all_by_user(&self, user_id: &str) -> Result<u64, StoreError>;
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AppError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

/// [`TokenStore`] backed by the `refresh_tokens` table.
#[derive(Clone)]
pub struct SqlTokenStore {
    db: DatabaseConnection,
}

impl SqlTokenStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let refresh_token = entities::refresh_token::ActiveModel {
            id: Set(record.id.clone()),
            user_id: Set(record.user_id.clone()),
            token_hash: Set(record.token_hash.clone()),
            issued_at: Set(record.issued_at.timestamp()),
            expires_at: Set(record.expires_at.timestamp()),
            revoked: Set(record.revoked),
            rotated_at: Set(record.rotated_at.map(|t| t.timestamp())),
            parent_id: Set(record.parent_id.clone()),
        };

        refresh_token.insert(&self.db).await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        use entities::refresh_token::{Column, Entity};

        let model = Entity::find()
            .filter(Column::TokenHash.eq(token_hash))
            .one(&self.db)
            .await?;

        Ok(model.map(TokenRecord::from))
    }

    async fn conditional_revoke(&self, revoked: &TokenRecord) -> Result<bool, StoreError> {
        use entities::refresh_token::{Column, Entity};

        // Single UPDATE guarded on revoked = false; the row count decides the winner
        let result = Entity::update_many()
            .col_expr(Column::Revoked, Expr::value(true))
            .col_expr(
                Column::RotatedAt,
                Expr::value(revoked.rotated_at.map(|t| t.timestamp())),
            )
            .filter(Column::Id.eq(&revoked.id))
            .filter(Column::Revoked.eq(false))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn find_active_by_user(&self, user_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        use entities::refresh_token::{Column, Entity};

        let models = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Revoked.eq(false))
            .order_by_desc(Column::IssuedAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(TokenRecord::from).collect())
    }

    async fn revoke_all_by_user(&self, user_id: &str) -> Result<u64, StoreError> {
        use entities::refresh_token::{Column, Entity};

        let result = Entity::update_many()
            .col_expr(Column::Revoked, Expr::value(true))
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Revoked.eq(false))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
