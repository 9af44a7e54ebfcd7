//! Rust toolkit for Guatemala's SAT FEL e-invoicing (DTE rendering, certification, tokens, QR).
//!
//! # Examples
//! ```rust
//! use fel_core::config::FelConfig;
//!
//! let config = FelConfig::new(
//!     "https://felgtaws.digifact.com.gt/gt.com.apinuc/api/login/get_token",
//!     "https://felgtaws.digifact.com.gt/gt.com.apinuc/api/v2/transform/nuc",
//! );
//! # let _ = config;
//! ```
pub mod api;
pub mod certification;
pub mod company;
pub mod config;
pub mod failure;
pub mod invoice;
pub mod notify;
pub mod pos;

use thiserror::Error;

pub use api::{ApiError, CertificationResult, FelClient, NitVerification, TokenManager, TokenRecord};
pub use certification::{CertificationService, FelError};
pub use company::{Company, CompanyCredentials, Establishment, IsrRegime};
pub use config::{ConfigError, FelConfig};
pub use failure::{FailedOrderRecord, FailureSink, FailureSinkError, JsonLinesFailureLog};
pub use invoice::{InvoiceCertificationRequest, InvoiceError, Nit};
pub use notify::{FailureNotice, Notifier, NotifyError};
pub use pos::{CertificationState, Invoice, PosOrder};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::DteXmlError),
    #[error(transparent)]
    Qr(#[from] invoice::QrCodeError),
    #[error(transparent)]
    Api(#[from] api::ApiError),
    #[error(transparent)]
    Failure(#[from] failure::FailureSinkError),
    #[error(transparent)]
    Notify(#[from] notify::NotifyError),
    #[error(transparent)]
    Fel(#[from] certification::FelError),
}
