// Library interface for hmcpl_scraper
// The binary and the integration tests drive the engine through these modules

pub mod auth;
pub mod browser;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod parser;
pub mod session;
pub mod transport;

pub use auth::{Authenticator, LoginOptions};
pub use client::LibraryClient;
pub use config::Config;
pub use error::{AuthError, ClientError, HoldError, ParseError, RenewError, StoreError, TransportError};
pub use models::*;
pub use session::{SessionArtifact, SessionStore};
pub use transport::{Endpoint, RawPayload, Transport};
