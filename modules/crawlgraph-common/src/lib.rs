pub mod config;
pub mod credentials;
pub mod error;
pub mod source;
pub mod types;

pub use config::{Config, FileConfig};
pub use credentials::{CredentialKey, CredentialStore, Credentials, ServiceTarget};
pub use error::CrawlGraphError;
pub use source::*;
pub use types::*;
