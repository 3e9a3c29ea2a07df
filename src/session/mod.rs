//! Cookie-backed sessions and anti-forgery tokens.

pub mod csrf;
pub mod manager;
pub mod store;

pub use manager::{extract_cookie, extract_session_token, SessionHandle, SessionManager, SESSION_COOKIE_NAME};
pub use store::{MemorySessionStore, PgSessionStore, SessionRecord, SessionStore};
