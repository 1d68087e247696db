//! # Certbroker
//!
//! Certificate issuance in front of heterogeneous certificate authorities:
//! an on-prem enrollment service, a cloud enrollment service and an
//! in-process fake authority.
//!
//! ## Architecture
//!
//! ```text
//! role name → RoleRegistry → ConnectorFactory → Connector
//!                                  ↓                ↓
//!                         transport (TLS)    AccessTokenManager
//!                                                   ↓
//!                       IssuanceService → certificate validator → bundle
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use certbroker::{
//!     config::AppConfig,
//!     issuance::{IssuanceRequest, IssuanceService, IssueFields},
//!     roles::{RoleRegistry, RoleRequest},
//!     storage::InMemoryStorage,
//!     Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(AppConfig::from_env()?);
//!     let registry = RoleRegistry::new(Arc::new(InMemoryStorage::new()));
//!     registry
//!         .write_role("dev", RoleRequest { fakemode: true, ..Default::default() })
//!         .await?;
//!
//!     let service = IssuanceService::with_default_connectors(config, registry);
//!     let request = IssuanceRequest::from_fields(IssueFields {
//!         common_name: "app.example.com".into(),
//!         ..Default::default()
//!     })?;
//!     let bundle = service.issue("dev", &request).await?;
//!     println!("{}", bundle.certificate);
//!     Ok(())
//! }
//! ```

pub mod certificates;
pub mod cli;
pub mod config;
pub mod connectors;
pub mod errors;
pub mod issuance;
pub mod observability;
pub mod roles;
pub mod secrets;
pub mod storage;
pub mod tokens;
pub mod transport;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Error, ErrorCategory, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
