//! DTE domain types: taxpayer ids, parties, line items and the certification request.
pub mod payload;
mod qr;
pub mod xml;

pub use payload::build_request;
pub use qr::{QrCodeError, QrGenerator, QrImage};

use chrono::{NaiveDateTime, TimeDelta, Utc};
use iso_currency::Currency;
use isocountry::CountryCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;

use crate::company::{Establishment, IsrRegime};

type Result<T> = std::result::Result<T, InvoiceError>;

/// Guatemalan VAT rate applied to tax-inclusive subtotals.
pub const VAT_RATE: f64 = 0.12;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("company has no FEL credentials configured")]
    MissingCredentials,
    #[error("invalid NIT '{value}'")]
    InvalidNit { value: String },
    #[error("invalid customer NIT '{value}'")]
    InvalidReceiverNit { value: String },
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| match issue.line_item_index {
            Some(index) => format!("{:?} {:?} (line {})", issue.field, issue.kind, index + 1),
            None => format!("{:?} {:?}", issue.field, issue.kind),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    LineItems,
    LineItemDescription,
    LineItemQuantity,
    LineItemUnitPrice,
    LineItemSubtotal,
    GrandTotal,
    ReceiverName,
    EmitterName,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Mismatch,
}

/// Guatemalan taxpayer id, or `CF` for the generic final consumer.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::Nit;
///
/// let nit = Nit::parse(" 1234567-8 ")?;
/// assert_eq!(nit.as_str(), "12345678");
/// assert_eq!(nit.zero_padded(), "000012345678");
/// assert!(Nit::parse("cf")?.is_final_consumer());
/// # Ok::<(), fel_core::InvoiceError>(())
/// ```
///
/// # Errors
/// Returns [`InvoiceError::InvalidNit`] when the body is not numeric or the check
/// character is neither a digit nor `K`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nit(String);

pub const FINAL_CONSUMER_NIT: &str = "CF";
pub const FINAL_CONSUMER_NAME: &str = "Consumidor Final";

impl Nit {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        let value = Self::normalize(s.as_ref());
        if Self::is_final_consumer_spelling(&value) {
            return Ok(Self::final_consumer());
        }
        if !Self::is_well_formed(&value) {
            return Err(InvoiceError::InvalidNit {
                value: s.as_ref().to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn final_consumer() -> Self {
        Self(FINAL_CONSUMER_NIT.to_string())
    }

    /// Strip whitespace and dashes and upper-case the check character.
    pub fn normalize(raw: &str) -> String {
        raw.chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }

    /// Left-pad to the 12 characters the certifier expects in usernames and query strings.
    pub fn pad(normalized: &str) -> String {
        format!("{normalized:0>12}")
    }

    /// `CF`, `C/F` and `C.F.` as typed at the till.
    fn is_final_consumer_spelling(value: &str) -> bool {
        value.chars().filter(|c| !matches!(c, '/' | '.')).eq(FINAL_CONSUMER_NIT.chars())
    }

    fn is_well_formed(value: &str) -> bool {
        if value.is_empty() || value.len() > 13 || !value.is_ascii() {
            return false;
        }
        let (body, check) = value.split_at(value.len() - 1);
        body.chars().all(|c| c.is_ascii_digit())
            && check.chars().all(|c| c.is_ascii_digit() || c == 'K')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_final_consumer(&self) -> bool {
        self.0 == FINAL_CONSUMER_NIT
    }

    pub fn zero_padded(&self) -> String {
        Self::pad(&self.0)
    }
}

impl fmt::Display for Nit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nit {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Nit {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        Nit::parse(s)
    }
}

impl TryFrom<String> for Nit {
    type Error = InvoiceError;
    fn try_from(value: String) -> Result<Self> {
        Nit::parse(value)
    }
}

impl From<Nit> for String {
    fn from(nit: Nit) -> Self {
        nit.0
    }
}

/// Postal address printed on the DTE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub postal_code: String,
    pub municipality: String,
    pub department: String,
    pub country_code: CountryCode,
}

impl Address {
    /// Emitter address: company street in Guatemala City.
    pub fn emitter(street: impl Into<String>) -> Self {
        Self {
            street: street.into(),
            postal_code: "0100".into(),
            municipality: "GUATEMALA".into(),
            department: "GUATEMALA".into(),
            country_code: CountryCode::GTM,
        }
    }

    /// Generic receiver address used for point-of-sale customers.
    pub fn receiver_default() -> Self {
        Self {
            street: "GUATEMALA".into(),
            postal_code: "01010".into(),
            municipality: "GUATEMALA".into(),
            department: "GUATEMALA".into(),
            country_code: CountryCode::GTM,
        }
    }

    pub fn country_alpha2(&self) -> &str {
        self.country_code.alpha2()
    }
}

// Marker roles
/// Marker trait for party role types.
pub trait PartyRole {}

/// Emitter role marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterRole;
impl PartyRole for EmitterRole {}
/// Receiver role marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverRole;
impl PartyRole for ReceiverRole {}

/// Party wrapper with role-specific typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party<R: PartyRole> {
    _marker: PhantomData<R>,
    name: String,
    nit: Nit,
    address: Address,
    establishment: Option<Establishment>,
}

pub type Emitter = Party<EmitterRole>;
pub type Receiver = Party<ReceiverRole>;

impl Party<EmitterRole> {
    /// Emitter with the establishment that issues the document.
    pub fn new(name: impl Into<String>, nit: Nit, address: Address, establishment: Establishment) -> Self {
        Party {
            _marker: PhantomData,
            name: name.into(),
            nit,
            address,
            establishment: Some(establishment),
        }
    }

    pub fn establishment_code(&self) -> &str {
        self.establishment
            .as_ref()
            .map(|e| e.code.as_str())
            .unwrap_or(crate::company::DEFAULT_ESTABLISHMENT_CODE)
    }

    pub fn commercial_name(&self) -> &str {
        self.establishment
            .as_ref()
            .map(|e| e.name.as_str())
            .unwrap_or(self.name.as_str())
    }
}

impl Party<ReceiverRole> {
    /// Receiver; a missing NIT or blank name falls back to the final consumer.
    pub fn new(name: Option<String>, nit: Option<Nit>, address: Address) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FINAL_CONSUMER_NAME.to_string());
        Party {
            _marker: PhantomData,
            name,
            nit: nit.unwrap_or_else(Nit::final_consumer),
            address,
            establishment: None,
        }
    }
}

impl<R: PartyRole> Party<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nit(&self) -> &Nit {
        &self.nit
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// `BienOServicio` classification of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Good,
    Service,
}

impl ItemKind {
    pub fn code(self) -> &'static str {
        match self {
            ItemKind::Good => "B",
            ItemKind::Service => "S",
        }
    }
}

pub const DEFAULT_UNIT_OF_MEASURE: &str = "CA";

/// Single DTE line. The subtotal is tax-inclusive.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::{ItemKind, LineItem, LineItemFields};
///
/// let item = LineItem::new(LineItemFields {
///     description: "Cafe".into(),
///     quantity: 2.0,
///     unit_price: 11.2,
///     kind: ItemKind::Good,
/// });
/// assert_eq!(item.subtotal(), 22.4);
/// assert_eq!(item.taxable_amount(), 20.0);
/// assert_eq!(item.vat_amount(), 2.4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    description: String,
    quantity: f64,
    unit_price: f64,
    subtotal: f64,
    kind: ItemKind,
    unit_of_measure: String,
}

/// Fields for a line whose subtotal is computed from quantity and price.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub kind: ItemKind,
}

/// Fields for a line whose subtotal comes from the order as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemSubtotalFields {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub subtotal: f64,
    pub kind: ItemKind,
}

impl LineItem {
    pub fn new(fields: LineItemFields) -> Self {
        let subtotal = round4(fields.quantity * fields.unit_price);
        Self::from_subtotal(LineItemSubtotalFields {
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            subtotal,
            kind: fields.kind,
        })
    }

    pub fn from_subtotal(fields: LineItemSubtotalFields) -> Self {
        Self {
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            subtotal: fields.subtotal,
            kind: fields.kind,
            unit_of_measure: DEFAULT_UNIT_OF_MEASURE.to_string(),
        }
    }

    pub fn with_unit_of_measure(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measure = unit.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn subtotal(&self) -> f64 {
        self.subtotal
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn unit_of_measure(&self) -> &str {
        &self.unit_of_measure
    }

    /// `MontoGravable`: subtotal without VAT, rounded to 4 decimals.
    pub fn taxable_amount(&self) -> f64 {
        round4(self.subtotal / (1.0 + VAT_RATE))
    }

    /// `MontoImpuesto`: VAT contained in the subtotal, rounded to 4 decimals.
    pub fn vat_amount(&self) -> f64 {
        round4(self.subtotal / (1.0 + VAT_RATE) * VAT_RATE)
    }
}

/// Round half away from zero to 4 decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Tax phrase declared on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub kind: u8,
    pub scenario: u8,
}

impl Phrase {
    pub fn for_regime(regime: IsrRegime) -> Self {
        Self {
            kind: 1,
            scenario: regime.phrase_scenario(),
        }
    }
}

/// Everything the renderer needs for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceCertificationRequest {
    emitter: Emitter,
    receiver: Receiver,
    currency: Currency,
    issued_at: NaiveDateTime,
    line_items: Vec<LineItem>,
    grand_total: f64,
    phrase: Phrase,
}

/// Parts of a request, checked by [`InvoiceCertificationRequest::try_new`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    pub emitter: Emitter,
    pub receiver: Receiver,
    pub currency: Currency,
    pub issued_at: NaiveDateTime,
    pub line_items: Vec<LineItem>,
    pub grand_total: f64,
    pub phrase: Phrase,
}

impl InvoiceCertificationRequest {
    /// Validate the parts and assemble a request.
    ///
    /// # Errors
    /// Returns [`ValidationError`] listing every offending field.
    pub fn try_new(parts: RequestParts) -> std::result::Result<Self, ValidationError> {
        const EPSILON: f64 = 0.01;
        let mut issues = Vec::new();
        let issue = |field, kind, line_item_index| ValidationIssue {
            field,
            kind,
            line_item_index,
        };

        if parts.emitter.name().trim().is_empty() {
            issues.push(issue(InvoiceField::EmitterName, ValidationKind::Empty, None));
        }
        if parts.line_items.is_empty() {
            issues.push(issue(InvoiceField::LineItems, ValidationKind::Empty, None));
        }
        for (index, item) in parts.line_items.iter().enumerate() {
            let at = Some(index);
            if item.description.trim().is_empty() {
                issues.push(issue(InvoiceField::LineItemDescription, ValidationKind::Empty, at));
            }
            if !item.quantity.is_finite() || item.quantity <= 0.0 {
                issues.push(issue(InvoiceField::LineItemQuantity, ValidationKind::OutOfRange, at));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                issues.push(issue(InvoiceField::LineItemUnitPrice, ValidationKind::OutOfRange, at));
            }
            if !item.subtotal.is_finite() || item.subtotal < 0.0 {
                issues.push(issue(InvoiceField::LineItemSubtotal, ValidationKind::OutOfRange, at));
            }
        }
        let lines_total: f64 = parts.line_items.iter().map(|li| li.subtotal).sum();
        if !parts.grand_total.is_finite() || (lines_total - parts.grand_total).abs() > EPSILON {
            issues.push(issue(InvoiceField::GrandTotal, ValidationKind::Mismatch, None));
        }
        if !issues.is_empty() {
            return Err(ValidationError::new(issues));
        }

        Ok(Self {
            emitter: parts.emitter,
            receiver: parts.receiver,
            currency: parts.currency,
            issued_at: parts.issued_at,
            line_items: parts.line_items,
            grand_total: parts.grand_total,
            phrase: parts.phrase,
        })
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn issued_at(&self) -> NaiveDateTime {
        self.issued_at
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn grand_total(&self) -> f64 {
        self.grand_total
    }

    pub fn phrase(&self) -> Phrase {
        self.phrase
    }

    /// Sum of the already rounded per-line VAT amounts.
    pub fn vat_total(&self) -> f64 {
        round4(self.line_items.iter().map(LineItem::vat_amount).sum())
    }
}

/// Current wall-clock time in Guatemala (UTC-6, no daylight saving).
pub fn guatemala_now() -> NaiveDateTime {
    (Utc::now() - TimeDelta::hours(6)).naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: f64, price: f64) -> LineItem {
        LineItem::new(LineItemFields {
            description: "Producto".into(),
            quantity: qty,
            unit_price: price,
            kind: ItemKind::Good,
        })
    }

    fn parts(line_items: Vec<LineItem>, grand_total: f64) -> RequestParts {
        let company = crate::company::Company::new("Napari", "1234567");
        RequestParts {
            emitter: Emitter::new(
                "Napari",
                Nit::parse("1234567").expect("nit"),
                Address::emitter("Zona 1"),
                Establishment::default_for(&company),
            ),
            receiver: Receiver::new(None, None, Address::receiver_default()),
            currency: Currency::GTQ,
            issued_at: NaiveDateTime::default(),
            line_items,
            grand_total,
            phrase: Phrase::for_regime(IsrRegime::None),
        }
    }

    #[test]
    fn nit_normalization_and_padding() {
        let nit = Nit::parse("576937-k").expect("nit");
        assert_eq!(nit.as_str(), "576937K");
        assert_eq!(nit.zero_padded(), "00000576937K");
        assert!(Nit::parse("12-34A").is_err());
        assert!(Nit::parse("").is_err());
        assert!(Nit::parse("c f").expect("cf").is_final_consumer());
    }

    #[test]
    fn cashier_spellings_of_final_consumer() {
        for raw in ["C/F", "C.F.", "c/f", " C.F "] {
            let nit = Nit::parse(raw).expect("final consumer");
            assert!(nit.is_final_consumer(), "{raw}");
            assert_eq!(nit.as_str(), FINAL_CONSUMER_NIT);
        }
        assert!(Nit::parse("C/F/1").is_err());
    }

    #[test]
    fn receiver_defaults_to_final_consumer() {
        let receiver = Receiver::new(Some("  ".into()), None, Address::receiver_default());
        assert_eq!(receiver.name(), FINAL_CONSUMER_NAME);
        assert!(receiver.nit().is_final_consumer());
        assert_eq!(receiver.address().country_alpha2(), "GT");
    }

    #[test]
    fn vat_is_tax_inclusive() {
        let li = item(1.0, 112.0);
        assert_eq!(li.taxable_amount(), 100.0);
        assert_eq!(li.vat_amount(), 12.0);
        let li = item(1.0, 5.0);
        assert_eq!(li.vat_amount(), 0.5357);
    }

    #[test]
    fn vat_total_sums_rounded_lines() {
        let request = InvoiceCertificationRequest::try_new(parts(
            vec![item(2.0, 10.0), item(1.0, 5.0)],
            25.0,
        ))
        .expect("request");
        let per_line: f64 = request.line_items().iter().map(LineItem::vat_amount).sum();
        assert_eq!(request.vat_total(), round4(per_line));
        assert_eq!(request.vat_total(), 2.6786);
    }

    #[test]
    fn try_new_collects_issues() {
        let mut bad = item(0.0, -1.0);
        bad.description = String::new();
        let err = InvoiceCertificationRequest::try_new(parts(vec![bad], 10.0)).expect_err("invalid");
        let fields: Vec<_> = err.issues.iter().map(|i| i.field).collect();
        assert!(fields.contains(&InvoiceField::LineItemDescription));
        assert!(fields.contains(&InvoiceField::LineItemQuantity));
        assert!(fields.contains(&InvoiceField::LineItemUnitPrice));
        assert!(fields.contains(&InvoiceField::GrandTotal));
        assert!(err.issues.iter().all(|i| i.field == InvoiceField::GrandTotal || i.line_item_index == Some(0)));
    }

    #[test]
    fn empty_lines_are_rejected() {
        let err = InvoiceCertificationRequest::try_new(parts(Vec::new(), 0.0)).expect_err("empty");
        assert_eq!(
            err.issues,
            vec![ValidationIssue {
                field: InvoiceField::LineItems,
                kind: ValidationKind::Empty,
                line_item_index: None,
            }]
        );
    }
}
