use super::{TokenRecord, TokenStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    by_id: HashMap<String, TokenRecord>,
    id_by_hash: HashMap<String, String>,
}

/// Process-local [`TokenStore`]. Every write happens under one write guard,
/// so the conditional revoke is a true check-and-set.
#[derive(Default)]
pub struct MemoryTokenStore {
    tables: RwLock<Tables>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.id_by_hash.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict("token_hash".to_string()));
        }
        if tables.by_id.contains_key(&record.id) {
            return Err(StoreError::Conflict("id".to_string()));
        }
        tables
            .id_by_hash
            .insert(record.token_hash.clone(), record.id.clone());
        tables.by_id.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .id_by_hash
            .get(token_hash)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn conditional_revoke(&self, revoked: &TokenRecord) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.by_id.get_mut(&revoked.id) {
            Some(stored) if !stored.revoked => {
                stored.revoked = true;
                stored.rotated_at = revoked.rotated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_active_by_user(&self, user_id: &str) -> Result<Vec<TokenRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut active: Vec<TokenRecord> = tables
            .by_id
            .values()
            .filter(|r| r.user_id == user_id && !r.revoked)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(active)
    }

    async fn revoke_all_by_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for record in tables.by_id.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
