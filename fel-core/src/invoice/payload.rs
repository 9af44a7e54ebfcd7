//! POS order + company → [`InvoiceCertificationRequest`].
use chrono::NaiveDateTime;

use super::{
    Address, Emitter, InvoiceCertificationRequest, InvoiceError, LineItem, LineItemFields,
    LineItemSubtotalFields, Nit, Phrase, Receiver, RequestParts,
};
use crate::company::{Company, Establishment};
use crate::pos::{OrderLine, PosOrder};

/// Build the certification request for an order.
///
/// Quantities, prices, subtotals, currency and the order total are copied as-is.
/// A customer without a NIT is invoiced to `CF`.
///
/// # Errors
/// - [`InvoiceError::MissingCredentials`] when the company has no FEL account.
/// - [`InvoiceError::InvalidNit`] when the company NIT is malformed.
/// - [`InvoiceError::InvalidReceiverNit`] when the customer NIT is malformed.
/// - [`InvoiceError::Validation`] when lines or totals are inconsistent.
pub fn build_request(
    order: &PosOrder,
    company: &Company,
    issued_at: NaiveDateTime,
) -> Result<InvoiceCertificationRequest, InvoiceError> {
    if company.credentials().is_none() {
        return Err(InvoiceError::MissingCredentials);
    }

    let establishment = order
        .establishment
        .clone()
        .unwrap_or_else(|| Establishment::default_for(company));
    let emitter = Emitter::new(
        company.name.clone(),
        Nit::parse(&company.nit)?,
        Address::emitter(company.street.clone()),
        establishment,
    );

    let (receiver_name, receiver_nit) = match &order.customer {
        Some(customer) => {
            let nit = customer
                .nit
                .as_deref()
                .filter(|nit| !nit.trim().is_empty())
                .map(|raw| {
                    Nit::parse(raw).map_err(|_| InvoiceError::InvalidReceiverNit {
                        value: raw.to_string(),
                    })
                })
                .transpose()?;
            (Some(customer.name.clone()), nit)
        }
        None => (None, None),
    };
    let receiver = Receiver::new(receiver_name, receiver_nit, Address::receiver_default());

    let line_items = order.lines.iter().map(line_item).collect();

    let request = InvoiceCertificationRequest::try_new(RequestParts {
        emitter,
        receiver,
        currency: order.currency,
        issued_at,
        line_items,
        grand_total: order.amount_total,
        phrase: Phrase::for_regime(company.isr_regime),
    })?;
    Ok(request)
}

fn line_item(line: &OrderLine) -> LineItem {
    match line.price_subtotal {
        Some(subtotal) => LineItem::from_subtotal(LineItemSubtotalFields {
            description: line.product_name.clone(),
            quantity: line.qty,
            unit_price: line.price_unit,
            subtotal,
            kind: line.kind,
        }),
        None => LineItem::new(LineItemFields {
            description: line.product_name.clone(),
            quantity: line.qty,
            unit_price: line.price_unit,
            kind: line.kind,
        }),
    }
}
