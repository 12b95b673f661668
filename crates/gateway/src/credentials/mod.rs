//! Per-user git-host credentials

pub mod connection;
pub mod store;
pub mod user;

pub use connection::{
    connections_config_map_name, storage_key, tokens_secret_name, GitConnection,
};
pub use store::CredentialStore;
pub use user::UserCredentials;
