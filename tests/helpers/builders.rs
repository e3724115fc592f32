use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tokenward::entities::user::{self, Role, UserState};

/// Builder for creating test users
pub struct UserBuilder {
    email: String,
    username: Option<String>,
    role: Role,
    state: UserState,
}

impl UserBuilder {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            username: None,
            role: Role::User,
            state: UserState::Active,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn admin(mut self) -> Self {
        self.role = Role::Admin;
        self
    }

    pub fn suspended(mut self) -> Self {
        self.state = UserState::Suspended;
        self
    }

    pub fn in_state(mut self, state: UserState) -> Self {
        self.state = state;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> user::Model {
        user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(self.email),
            username: Set(self.username),
            role: Set(self.role),
            state: Set(self.state),
            created_at: Set(Utc::now().timestamp()),
        }
        .insert(db)
        .await
        .expect("Failed to create test user")
    }
}

/// Remove a user outright, as an external account-deletion flow would
pub async fn delete_user(db: &DatabaseConnection, user_id: &str) {
    user::Entity::delete_by_id(user_id.to_string())
        .exec(db)
        .await
        .expect("Failed to delete user");
}
