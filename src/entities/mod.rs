pub mod refresh_token;
pub mod user;

pub use refresh_token::Entity as RefreshToken;
pub use user::Entity as User;
