//! Order → invoice certification workflow.
//!
//! Certification failures never abort the sale: the invoice is kept, marked
//! `Failed`, audited and announced, and can be re-certified later.
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::{ApiError, CertificationResult, FelClient, NitVerification, TokenManager};
use crate::company::Company;
use crate::config::{DEFAULT_NOTIFICATION_EMAIL, FelConfig};
use crate::failure::{FailedOrderRecord, FailureSink};
use crate::invoice::{InvoiceError, QrGenerator, build_request, guatemala_now, xml::DteXmlError, xml::render};
use crate::notify::{FailureNotice, Notifier};
use crate::pos::{CertificationState, Invoice, PosOrder};

/// Error taxonomy of a certification attempt.
#[derive(Debug, Error)]
pub enum FelError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("certification error: {0}")]
    Certification(String),
    #[error("invoice {invoice} is already certified")]
    AlreadyCertified { invoice: String },
}

impl From<ApiError> for FelError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Authentication(message) => FelError::Authentication(message),
            ApiError::Certification(message) | ApiError::NitValidation(message) => {
                FelError::Certification(message)
            }
            ApiError::NotConfigured(_) | ApiError::Client(_) => {
                FelError::Configuration(err.to_string())
            }
        }
    }
}

impl From<InvoiceError> for FelError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::MissingCredentials | InvoiceError::InvalidNit { .. } => {
                FelError::Configuration(err.to_string())
            }
            InvoiceError::Validation(_) | InvoiceError::InvalidReceiverNit { .. } => {
                FelError::Certification(err.to_string())
            }
        }
    }
}

impl From<DteXmlError> for FelError {
    fn from(err: DteXmlError) -> Self {
        FelError::Certification(err.to_string())
    }
}

/// Drives certification for POS invoices.
///
/// # Examples
/// ```rust,no_run
/// use std::sync::Arc;
/// use fel_core::certification::CertificationService;
/// use fel_core::config::FelConfig;
/// use fel_core::failure::JsonLinesFailureLog;
/// use fel_core::notify::LogNotifier;
///
/// let service = CertificationService::new(
///     FelConfig::new("https://fel.example/token", "https://fel.example/certify"),
///     Arc::new(JsonLinesFailureLog::new("fel-failures.jsonl")),
///     Arc::new(LogNotifier),
/// )?;
/// # let _ = service;
/// # Ok::<(), fel_core::ApiError>(())
/// ```
pub struct CertificationService {
    client: Arc<FelClient>,
    tokens: TokenManager,
    qr: QrGenerator,
    failures: Arc<dyn FailureSink>,
    notifier: Arc<dyn Notifier>,
}

impl CertificationService {
    /// # Errors
    /// Returns [`ApiError::Client`] if the HTTP client cannot be built.
    pub fn new(
        config: FelConfig,
        failures: Arc<dyn FailureSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let qr = QrGenerator::new(config.qr_verification_url());
        let client = Arc::new(FelClient::new(config)?);
        Ok(Self {
            tokens: TokenManager::new(Arc::clone(&client)),
            client,
            qr,
            failures,
            notifier,
        })
    }

    pub fn config(&self) -> &FelConfig {
        self.client.config()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Invoice a POS order and certify it in line.
    ///
    /// The invoice is always returned; a failed certification leaves it `Failed`
    /// with an explanatory note.
    pub async fn create_invoice(
        &self,
        company: &Company,
        order: &mut PosOrder,
        name: impl Into<String>,
    ) -> Invoice {
        let mut invoice = order.prepare_invoice(name);
        if let Err(err) = self.certify(company, order, &mut invoice).await {
            warn!(invoice = invoice.name(), error = %err, "new invoice was not certified");
        }
        invoice
    }

    /// Run one certification attempt for `invoice`.
    ///
    /// Returns the resulting state. Remote and configuration failures are
    /// handled here and reported as `Ok(CertificationState::Failed)`.
    ///
    /// # Errors
    /// [`FelError::AlreadyCertified`] when the invoice is certified; nothing is changed.
    pub async fn certify(
        &self,
        company: &Company,
        order: &mut PosOrder,
        invoice: &mut Invoice,
    ) -> Result<CertificationState, FelError> {
        if invoice.is_certified() || invoice.state() == CertificationState::Certified {
            return Err(FelError::AlreadyCertified {
                invoice: invoice.name().to_string(),
            });
        }

        invoice.certification_mut().mark_certifying();
        order.certification_mut().mark_certifying();

        match self.attempt(company, order).await {
            Ok(result) => {
                self.apply_success(company, order, invoice, result);
                Ok(CertificationState::Certified)
            }
            Err(err) => {
                self.apply_failure(company, order, invoice, &err);
                Ok(CertificationState::Failed)
            }
        }
    }

    /// Manually retry a `Failed` or `Pending` invoice.
    ///
    /// # Errors
    /// [`FelError::AlreadyCertified`] when the invoice is certified.
    pub async fn recertify(
        &self,
        company: &Company,
        order: &mut PosOrder,
        invoice: &mut Invoice,
    ) -> Result<CertificationState, FelError> {
        info!(invoice = invoice.name(), state = ?invoice.state(), "re-running certification");
        self.certify(company, order, invoice).await
    }

    /// Look up a taxpayer with the company's FEL account.
    ///
    /// # Errors
    /// Returns [`crate::Error`] when credentials are missing, the token cannot be
    /// obtained or the lookup fails.
    pub async fn verify_nit(&self, company: &Company, nit: &str) -> Result<NitVerification, crate::Error> {
        let credentials = company
            .credentials()
            .ok_or(InvoiceError::MissingCredentials)?;
        let token = self.tokens.get_valid_token(credentials).await?;
        Ok(self.client.verify_nit(nit, &token, credentials).await?)
    }

    async fn attempt(&self, company: &Company, order: &PosOrder) -> Result<CertificationResult, FelError> {
        let credentials = company
            .credentials()
            .ok_or(InvoiceError::MissingCredentials)?;
        if !self.config().is_permitted(&company.nit) {
            return Err(FelError::Configuration(format!(
                "company NIT {} is not permitted to certify",
                company.nit
            )));
        }

        let request = build_request(order, company, guatemala_now())?;
        let xml = render(&request)?;
        let token = self.tokens.get_valid_token(credentials).await?;
        Ok(self.client.certify_dte(&xml, &token, credentials).await?)
    }

    fn apply_success(
        &self,
        company: &Company,
        order: &mut PosOrder,
        invoice: &mut Invoice,
        result: CertificationResult,
    ) {
        let original_ref = invoice.name().to_string();
        match self.qr.generate(Some(&result), &company.nit, invoice.receiver_nit()) {
            Ok(image) => invoice.set_qr(&image),
            Err(err) => warn!(invoice = %original_ref, error = %err, "could not render verification QR"),
        }
        order
            .certification_mut()
            .apply_success(result.clone(), &original_ref);
        invoice.certification_mut().apply_success(result, &original_ref);
        info!(
            invoice = %original_ref,
            order = %order.name,
            reference = invoice.certification().reference().unwrap_or_default(),
            "invoice certified"
        );
    }

    fn apply_failure(&self, company: &Company, order: &mut PosOrder, invoice: &mut Invoice, err: &FelError) {
        let message = err.to_string();
        error!(invoice = invoice.name(), order = %order.name, error = %message, "certification failed");

        invoice.certification_mut().apply_failure(message.clone());
        order.certification_mut().apply_failure(message.clone());

        let record = FailedOrderRecord::from_order(order, message.clone(), Utc::now());
        if let Err(sink_err) = self.failures.record(&record) {
            error!(order = %order.name, error = %sink_err, "could not record failed order");
        }

        let recipient = invoice
            .send_email_to()
            .or_else(|| self.config().error_email())
            .or_else(|| company.email())
            .unwrap_or(DEFAULT_NOTIFICATION_EMAIL);
        let notice = FailureNotice::certification_failed(recipient, &order.name, invoice.name(), &message);
        if let Err(notify_err) = self.notifier.notify(&notice) {
            error!(invoice = invoice.name(), error = %notify_err, "could not send failure notification");
        }
    }
}
