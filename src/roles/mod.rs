//! # Roles
//!
//! Named configurations binding an authority kind, its connection parameters
//! and a credential reference. Role and credential records live in the
//! backing store; credentials are never copied into the role record.

pub mod registry;
pub mod request;
pub mod types;

pub use registry::{
    inline_credential_ref, ResolvedRole, RoleRegistry, CREDENTIAL_ROOT, INLINE_CREDENTIAL_PREFIX,
    ROLE_ROOT,
};
pub use request::RoleRequest;
pub use types::{
    AuthorityKind, AuthorityParams, CloudParams, Credential, FakeParams, OnPremParams,
    RoleConfig, TokenPair, DEFAULT_CLOUD_URL,
};
