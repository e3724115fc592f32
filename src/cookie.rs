use crate::settings::Tokens;
use axum::http::{header, HeaderMap};
use std::fmt;

/// The plaintext refresh token as carried in its HTTP-only cookie.
#[derive(Clone)]
pub struct RefreshCookie {
    pub token: String,
}

// Never print the plaintext
impl fmt::Debug for RefreshCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCookie")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl RefreshCookie {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<Self> {
        for value in headers.get_all(header::COOKIE) {
            let Ok(cookie_header) = value.to_str() else {
                continue;
            };

            // Parse cookie header for our refresh cookie
            for cookie in cookie_header.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie
                    .strip_prefix(cookie_name)
                    .and_then(|s| s.strip_prefix('='))
                {
                    if token.is_empty() {
                        continue;
                    }
                    return Some(Self {
                        token: token.to_string(),
                    });
                }
            }
        }
        None
    }

    pub fn to_cookie_header(&self, cfg: &Tokens) -> String {
        format!(
            "{}={}; HttpOnly; {}SameSite=Strict; Path={}; Max-Age={}",
            cfg.cookie_name,
            self.token,
            if cfg.secure_cookie { "Secure; " } else { "" },
            cfg.cookie_path,
            cfg.ttl_secs
        )
    }

    pub fn delete_cookie_header(cfg: &Tokens) -> String {
        format!(
            "{}=; HttpOnly; {}SameSite=Strict; Path={}; Max-Age=0",
            cfg.cookie_name,
            if cfg.secure_cookie { "Secure; " } else { "" },
            cfg.cookie_path
        )
    }
}
