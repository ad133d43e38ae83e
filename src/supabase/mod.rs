pub mod auth;
pub mod config;
pub mod rest;
pub mod storage;

pub use auth::{AuthSession, AuthUser, SupabaseAuth};
pub use rest::SupabaseRest;
pub use storage::SupabaseStorage;
