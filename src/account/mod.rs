//! Accounts: the user record, its verification tokens and the workflows that mutate it.

pub mod locks;
pub mod models;
pub mod password;
pub mod policy;
pub mod service;
pub mod state;
pub mod store;
pub mod tokens;

pub use models::{AdminLogEntry, Identity, TokenPurpose, User, VerificationToken};
pub use service::{AccountService, LoginOutcome, NewUser};
pub use state::{AccountStatus, Payment, Verification};
