use crate::entities::user::{self, Role, UserState};
use crate::errors::IdentityError;
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};

/// The identity and authority set attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub authorities: Vec<String>,
}

impl Principal {
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

/// Maps a token's owning user to a [`Principal`].
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn load_principal(&self, user_id: &str) -> Result<Principal, IdentityError>;
}

pub fn authorities_for(role: Role) -> Vec<String> {
    match role {
        Role::User => vec!["ROLE_USER".to_string()],
        Role::Admin => vec!["ROLE_ADMIN".to_string()],
    }
}

/// Resolves principals from the `users` table.
#[derive(Clone)]
pub struct DbIdentityResolver {
    db: DatabaseConnection,
}

impl DbIdentityResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityResolver for DbIdentityResolver {
    async fn load_principal(&self, user_id: &str) -> Result<Principal, IdentityError> {
        let model = user::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        // Suspended accounts must not be able to keep a session alive
        if model.state == UserState::Suspended {
            return Err(IdentityError::Disabled);
        }

        Ok(Principal {
            user_id: model.id,
            email: model.email,
            authorities: authorities_for(model.role),
        })
    }
}
