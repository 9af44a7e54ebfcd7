//! Point-of-sale orders and the invoices they produce.
use iso_currency::Currency;
use serde::{Deserialize, Serialize};

use crate::api::CertificationResult;
use crate::company::Establishment;
use crate::invoice::{ItemKind, QrImage};

/// Certification lifecycle of one invoice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationState {
    #[default]
    Pending,
    Certifying,
    Certified,
    Failed,
}

/// Certification fields shared by invoices and their originating orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationFields {
    state: CertificationState,
    certified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<CertificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl CertificationFields {
    pub fn state(&self) -> CertificationState {
        self.state
    }

    pub fn is_certified(&self) -> bool {
        self.certified
    }

    pub fn result(&self) -> Option<&CertificationResult> {
        self.result.as_ref()
    }

    /// `"{series}-{number} ({original ref})"` once certified.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub(crate) fn mark_certifying(&mut self) {
        self.state = CertificationState::Certifying;
    }

    pub(crate) fn apply_success(&mut self, result: CertificationResult, original_ref: &str) {
        self.reference = Some(format!("{}-{} ({original_ref})", result.series, result.number));
        self.result = Some(result);
        self.certified = true;
        self.note = None;
        self.state = CertificationState::Certified;
    }

    pub(crate) fn apply_failure(&mut self, note: impl Into<String>) {
        self.certified = false;
        self.note = Some(note.into());
        self.state = CertificationState::Failed;
    }
}

/// Buyer captured on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    #[serde(default)]
    pub nit: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_name: String,
    pub qty: f64,
    pub price_unit: f64,
    /// Tax-inclusive line subtotal as computed by the POS; derived from qty and price when absent.
    #[serde(default)]
    pub price_subtotal: Option<f64>,
    #[serde(default)]
    pub kind: ItemKind,
}

impl OrderLine {
    pub fn new(product_name: impl Into<String>, qty: f64, price_unit: f64) -> Self {
        Self {
            product_name: product_name.into(),
            qty,
            price_unit,
            price_subtotal: None,
            kind: ItemKind::Good,
        }
    }
}

/// A point-of-sale order.
///
/// # Examples
/// ```rust
/// use fel_core::pos::{OrderLine, PosOrder};
/// use iso_currency::Currency;
///
/// let order = PosOrder::new("Shop/0001", Currency::GTQ, vec![OrderLine::new("Cafe", 1.0, 12.0)], 12.0);
/// assert!(order.to_invoice());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosOrder {
    pub name: String,
    #[serde(default)]
    pub pos_reference: String,
    #[serde(default)]
    pub customer: Option<Customer>,
    pub currency: Currency,
    pub lines: Vec<OrderLine>,
    pub amount_total: f64,
    #[serde(default)]
    pub establishment: Option<Establishment>,
    #[serde(default)]
    certification: CertificationFields,
}

impl PosOrder {
    pub fn new(name: impl Into<String>, currency: Currency, lines: Vec<OrderLine>, amount_total: f64) -> Self {
        let name = name.into();
        Self {
            pos_reference: name.clone(),
            name,
            customer: None,
            currency,
            lines,
            amount_total,
            establishment: None,
            certification: CertificationFields::default(),
        }
    }

    /// Every POS order is invoiced.
    pub fn to_invoice(&self) -> bool {
        true
    }

    pub fn customer_name(&self) -> &str {
        self.customer
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or(crate::invoice::FINAL_CONSUMER_NAME)
    }

    /// Certification fields mirrored from the order's invoice.
    pub fn certification(&self) -> &CertificationFields {
        &self.certification
    }

    pub(crate) fn certification_mut(&mut self) -> &mut CertificationFields {
        &mut self.certification
    }

    /// Start the invoice for this order; its origin is the order name.
    pub fn prepare_invoice(&self, name: impl Into<String>) -> Invoice {
        Invoice {
            name: name.into(),
            origin: self.name.clone(),
            customer: self.customer.clone(),
            amount_total: self.amount_total,
            currency: self.currency,
            send_email_to: None,
            certification: CertificationFields::default(),
            qr_code: None,
        }
    }
}

/// Invoice produced from a POS order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    name: String,
    origin: String,
    #[serde(default)]
    customer: Option<Customer>,
    amount_total: f64,
    currency: Currency,
    #[serde(default)]
    send_email_to: Option<String>,
    #[serde(default)]
    certification: CertificationFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qr_code: Option<String>,
}

impl Invoice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn receiver_nit(&self) -> &str {
        self.customer
            .as_ref()
            .and_then(|c| c.nit.as_deref())
            .filter(|nit| !nit.trim().is_empty())
            .unwrap_or(crate::invoice::FINAL_CONSUMER_NIT)
    }

    pub fn amount_total(&self) -> f64 {
        self.amount_total
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn send_email_to(&self) -> Option<&str> {
        self.send_email_to.as_deref().filter(|e| !e.trim().is_empty())
    }

    pub fn with_send_email_to(mut self, email: impl Into<String>) -> Self {
        self.send_email_to = Some(email.into());
        self
    }

    pub fn certification(&self) -> &CertificationFields {
        &self.certification
    }

    pub(crate) fn certification_mut(&mut self) -> &mut CertificationFields {
        &mut self.certification
    }

    pub fn state(&self) -> CertificationState {
        self.certification.state()
    }

    pub fn is_certified(&self) -> bool {
        self.certification.is_certified()
    }

    /// Base64 PNG of the verification QR, if one was rendered.
    pub fn qr_code(&self) -> Option<&str> {
        self.qr_code.as_deref()
    }

    pub(crate) fn set_qr(&mut self, image: &QrImage) {
        self.qr_code = (!image.is_empty()).then(|| image.to_base64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> CertificationResult {
        CertificationResult {
            number: "123456".into(),
            series: "A1B2C3D4".into(),
            authorization: "A1B2C3D4-0001".into(),
            certified_at: "2024-05-17T09:30:05".into(),
        }
    }

    #[test]
    fn invoice_origin_is_order_name() {
        let order = PosOrder::new("Shop/0007", Currency::GTQ, vec![OrderLine::new("Pan", 1.0, 5.0)], 5.0);
        let invoice = order.prepare_invoice("INV/2024/0001");
        assert_eq!(invoice.origin(), "Shop/0007");
        assert_eq!(invoice.state(), CertificationState::Pending);
        assert_eq!(invoice.receiver_nit(), "CF");
        assert!(!invoice.is_certified());
        assert!(order.to_invoice());
    }

    #[test]
    fn success_composes_reference_and_clears_note() {
        let mut fields = CertificationFields::default();
        fields.apply_failure("timeout");
        fields.mark_certifying();
        fields.apply_success(result(), "INV/2024/0001");

        assert_eq!(fields.state(), CertificationState::Certified);
        assert!(fields.is_certified());
        assert_eq!(fields.reference(), Some("A1B2C3D4-123456 (INV/2024/0001)"));
        assert_eq!(fields.note(), None);
    }

    #[test]
    fn failure_sets_note() {
        let mut fields = CertificationFields::default();
        fields.apply_failure("certification failed: NIT inactivo");
        assert_eq!(fields.state(), CertificationState::Failed);
        assert!(!fields.is_certified());
        assert_eq!(fields.note(), Some("certification failed: NIT inactivo"));
    }

    #[test]
    fn order_deserializes_with_defaults() {
        let order: PosOrder = serde_json::from_str(
            r#"{"name":"Shop/0009","currency":"GTQ","lines":[{"product_name":"Cafe","qty":1,"price_unit":12}],"amount_total":12}"#,
        )
        .expect("order");
        assert_eq!(order.customer_name(), "Consumidor Final");
        assert_eq!(order.certification().state(), CertificationState::Pending);
        assert_eq!(order.lines[0].kind, ItemKind::Good);
    }
}
