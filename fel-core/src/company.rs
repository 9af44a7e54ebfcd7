//! Issuing company, its FEL credentials and the POS establishment.
use fel_derive::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::invoice::Nit;

/// FEL account of a company.
///
/// # Examples
/// ```rust
/// use fel_core::company::CompanyCredentials;
///
/// let creds = CompanyCredentials::new("1234567-8".into(), "ventas".into(), "secret".into())?;
/// assert_eq!(creds.token_username(), "GT.000012345678.ventas");
/// # Ok::<(), fel_core::ConfigError>(())
/// ```
///
/// # Errors
/// `new` returns [`ConfigError::Validation`] when a field is blank or the tax id is not a NIT.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(try_from = "RawCredentials")]
#[validate_error(ConfigError)]
#[validate(non_empty)]
pub struct CompanyCredentials {
    #[validate(nit)]
    tax_id: String,
    fel_user: String,
    fel_password: String,
}

#[derive(Deserialize)]
struct RawCredentials {
    tax_id: String,
    fel_user: String,
    fel_password: String,
}

impl TryFrom<RawCredentials> for CompanyCredentials {
    type Error = ConfigError;

    fn try_from(raw: RawCredentials) -> Result<Self, Self::Error> {
        CompanyCredentials::new(raw.tax_id, raw.fel_user, raw.fel_password)
    }
}

impl fmt::Debug for CompanyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompanyCredentials")
            .field("tax_id", &self.tax_id)
            .field("fel_user", &self.fel_user)
            .field("fel_password", &"<redacted>")
            .finish()
    }
}

impl CompanyCredentials {
    pub fn tax_id(&self) -> &str {
        &self.tax_id
    }

    pub fn fel_user(&self) -> &str {
        &self.fel_user
    }

    pub fn fel_password(&self) -> &str {
        &self.fel_password
    }

    /// Tax id without separators, left-padded with zeros to 12 characters.
    pub fn padded_tax_id(&self) -> String {
        Nit::pad(&Nit::normalize(&self.tax_id))
    }

    /// Identity username: `GT.<padded tax id>.<fel user>`.
    pub fn token_username(&self) -> String {
        format!("GT.{}.{}", self.padded_tax_id(), self.fel_user)
    }

    pub(crate) fn cache_key(&self) -> String {
        format!("{}:{}", Nit::normalize(&self.tax_id), self.fel_user)
    }
}

/// ISR regime declared by the company; selects the phrase scenario on the DTE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsrRegime {
    #[default]
    None,
    Quarterly,
    Monthly,
}

impl IsrRegime {
    /// `CodigoEscenario` for the type-1 phrase.
    pub fn phrase_scenario(self) -> u8 {
        match self {
            IsrRegime::Quarterly => 1,
            IsrRegime::Monthly | IsrRegime::None => 2,
        }
    }
}

/// Issuing company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    #[serde(default)]
    pub street: String,
    pub nit: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub isr_regime: IsrRegime,
    #[serde(default)]
    pub credentials: Option<CompanyCredentials>,
}

impl Company {
    pub fn new(name: impl Into<String>, nit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            street: String::new(),
            nit: nit.into(),
            email: None,
            isr_regime: IsrRegime::None,
            credentials: None,
        }
    }

    pub fn with_street(mut self, street: impl Into<String>) -> Self {
        self.street = street.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_isr_regime(mut self, regime: IsrRegime) -> Self {
        self.isr_regime = regime;
        self
    }

    pub fn with_credentials(mut self, credentials: CompanyCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn credentials(&self) -> Option<&CompanyCredentials> {
        self.credentials.as_ref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }
}

pub const DEFAULT_ESTABLISHMENT_CODE: &str = "1";

/// Establishment configured on the point of sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate_error(ConfigError)]
pub struct Establishment {
    #[validate(non_empty)]
    pub name: String,
    #[validate(digits)]
    pub code: String,
}

impl Establishment {
    /// Establishment `1` named after the company.
    pub fn default_for(company: &Company) -> Self {
        Self {
            name: company.name.clone(),
            code: DEFAULT_ESTABLISHMENT_CODE.to_string(),
        }
    }
}
