//! # Issuance
//!
//! Request parsing and the orchestrators that drive a connector through
//! enrollment or CSR signing, token refresh and validation.

pub mod request;
pub mod service;

pub use request::{
    CertificateBundle, IssuanceRequest, IssueFields, IssueResponse, Lease, SignFields,
    SigningRequest,
};
pub use service::IssuanceService;
