//! Tokenward - refresh-token session lifecycle and renewal gate
//!
//! Issues, validates, rotates, and revokes long-lived refresh tokens, and
//! guards the token-renewal route with a cookie-based authentication gate.
//! All modules are public for embedding and testing.

pub mod cookie;
pub mod entities;
pub mod errors;
pub mod gate;
pub mod identity;
pub mod settings;
pub mod storage;
pub mod tokens;
pub mod web;
