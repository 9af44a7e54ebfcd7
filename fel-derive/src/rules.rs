//! Builtin validation rules. Every rule targets `String` fields.
use proc_macro2::{Ident, TokenStream};
use quote::quote;

pub(crate) fn dispatch(rule: &str, field: &Ident) -> Option<TokenStream> {
    match rule {
        "non_empty" => Some(non_empty(field)),
        "digits" => Some(digits(field)),
        "nit" => Some(nit(field)),
        _ => None,
    }
}

fn fail(field: &Ident, message: &str) -> TokenStream {
    quote! {
        return Err(::core::convert::From::from(format!(
            "{} {}",
            stringify!(#field),
            #message
        )));
    }
}

fn non_empty(field: &Ident) -> TokenStream {
    let err = fail(field, "must be non-empty");
    quote! {
        if #field.trim().is_empty() {
            #err
        }
    }
}

fn digits(field: &Ident) -> TokenStream {
    let err = fail(field, "must contain only digits");
    quote! {
        if #field.is_empty() || !#field.chars().all(|c| c.is_ascii_digit()) {
            #err
        }
    }
}

/// Guatemalan NIT: digits with an optional `-` before a check digit that may be `K`.
/// Whitespace and dashes are ignored, as in `Nit::normalize`.
fn nit(field: &Ident) -> TokenStream {
    let err = fail(field, "must be a valid NIT");
    quote! {
        {
            let compact: String = #field
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect();
            let valid = !compact.is_empty()
                && compact.len() <= 13
                && compact.is_ascii()
                && {
                    let (body, check) = compact.split_at(compact.len() - 1);
                    body.chars().all(|c| c.is_ascii_digit())
                        && check.chars().all(|c| c.is_ascii_digit() || c == 'K' || c == 'k')
                };
            if !valid {
                #err
            }
        }
    }
}
