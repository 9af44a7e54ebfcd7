//! Failure notifications. Delivery (email, chat) belongs to the host; this crate
//! composes the notice and hands it to a [`Notifier`].
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to dispatch notification: {0}")]
    Dispatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub order_name: String,
    pub invoice_name: String,
}

impl FailureNotice {
    pub fn certification_failed(
        recipient: impl Into<String>,
        order_name: &str,
        invoice_name: &str,
        error: &str,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: format!("FEL certification failed for {invoice_name}"),
            body: format!(
                "Invoice {invoice_name} (order {order_name}) could not be certified.\n\nError: {error}\n\nRe-run certification once the problem is fixed."
            ),
            order_name: order_name.to_string(),
            invoice_name: invoice_name.to_string(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the `tracing` error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        error!(
            recipient = %notice.recipient,
            order = %notice.order_name,
            invoice = %notice.invoice_name,
            "{}",
            notice.subject
        );
        Ok(())
    }
}

/// Collects notices in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<FailureNotice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<FailureNotice> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice.clone());
        Ok(())
    }
}
