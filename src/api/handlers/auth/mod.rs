//! Authentication handlers: signup, verification, sessions and credentials.

pub mod identity;
pub mod password;
pub mod principal;
pub mod session;
pub mod signup;
pub mod types;

pub use principal::{optional_user, require_user};
