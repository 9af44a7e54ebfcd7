//! FEL certifier HTTP client and response types.
pub mod token;

pub use token::{TokenManager, TokenRecord};

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::company::CompanyCredentials;
use crate::config::FelConfig;
use crate::invoice::Nit;

const CERTIFY_TYPE: &str = "CERTIFICATE_DTE_XML_TOSIGN";
const CERTIFY_FORMAT: &str = "XML";
const NIT_LOOKUP_TAG: &str = "SHARED_GETINFONITcom";

/// Errors returned by the FEL API client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("certification failed: {0}")]
    Certification(String),
    #[error("NIT validation failed: {0}")]
    NitValidation(String),
    #[error("{0} URL is not configured")]
    NotConfigured(&'static str),
}

/// Identifiers assigned by the certifier to an accepted DTE.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificationResult {
    pub number: String,
    pub series: String,
    pub authorization: String,
    pub certified_at: String,
}

impl CertificationResult {
    /// All four identifiers are present.
    pub fn is_complete(&self) -> bool {
        [&self.number, &self.series, &self.authorization, &self.certified_at]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

/// Outcome of a taxpayer lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NitVerification {
    Valid {
        nit: String,
        name: String,
        address: String,
    },
    Invalid {
        reason: String,
    },
}

impl NitVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, NitVerification::Valid { .. })
    }
}

#[derive(Debug, Serialize)]
struct TokenRequestBody<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message", alias = "mensaje", alias = "Mensaje", default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CertifyResponse {
    #[serde(rename = "Codigo", alias = "codigo", default, deserialize_with = "text_or_number")]
    codigo: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(rename = "NUMERO", alias = "Numero", default, deserialize_with = "text_or_number")]
    numero: Option<String>,
    #[serde(rename = "Serie", alias = "SERIE", default, deserialize_with = "text_or_number")]
    serie: Option<String>,
    #[serde(rename = "Autorizacion", alias = "AUTORIZACION", default)]
    autorizacion: Option<String>,
    #[serde(rename = "Fecha_de_certificacion", alias = "FECHA_DE_CERTIFICACION", default)]
    fecha_de_certificacion: Option<String>,
    #[serde(rename = "Mensaje", alias = "mensaje", alias = "message", default)]
    mensaje: Option<String>,
    #[serde(rename = "ResponseDATA1", default)]
    response_data1: Option<String>,
}

impl CertifyResponse {
    fn accepted(&self) -> bool {
        self.codigo.as_deref().map(str::trim) == Some("1") || self.success == Some(true)
    }

    fn upstream_message(&self) -> Option<String> {
        let parts: Vec<&str> = [self.mensaje.as_deref(), self.response_data1.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Default, Deserialize)]
struct NitResponse {
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "REQUEST", default)]
    request: Vec<NitRequestEcho>,
    #[serde(rename = "RESPONSE", default)]
    response: Vec<NitTaxpayer>,
}

#[derive(Debug, Deserialize)]
struct NitRequestEcho {
    #[serde(rename = "Respuesta", default, deserialize_with = "text_or_number")]
    respuesta: Option<String>,
    #[serde(rename = "Mensaje", default)]
    mensaje: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NitTaxpayer {
    #[serde(rename = "NIT", default, deserialize_with = "text_or_number")]
    nit: Option<String>,
    #[serde(rename = "NOMBRE", default)]
    nombre: Option<String>,
    #[serde(rename = "Direccion", default)]
    direccion: Option<String>,
}

/// Codes and numbers arrive either as JSON numbers or strings.
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

/// FEL certifier client.
///
/// # Examples
/// ```rust,no_run
/// use fel_core::api::{ApiError, FelClient};
/// use fel_core::config::FelConfig;
///
/// let client = FelClient::new(FelConfig::new(
///     "https://fel.example/token",
///     "https://fel.example/certify",
/// ))?;
/// # let _ = client;
/// # Ok::<(), ApiError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FelClient {
    config: FelConfig,
    client: Client,
}

impl FelClient {
    /// Create a new API client using the provided configuration.
    ///
    /// # Errors
    /// Returns [`ApiError::Client`] if the HTTP client cannot be built.
    pub fn new(config: FelConfig) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FelConfig {
        &self.config
    }

    /// Request a fresh bearer token from the identity endpoint.
    ///
    /// # Errors
    /// Returns [`ApiError::Authentication`] for transport failures, non-200 answers
    /// or responses without a token.
    pub async fn request_token(
        &self,
        credentials: &CompanyCredentials,
    ) -> Result<TokenRecord, ApiError> {
        let username = credentials.token_username();
        info!(username = %username, "requesting FEL token");

        let response = self
            .client
            .post(self.config.token_url())
            .header("Accept", "application/json")
            .timeout(self.config.token_timeout())
            .json(&TokenRequestBody {
                username: &username,
                password: credentials.fel_password(),
            })
            .send()
            .await
            .map_err(|e| ApiError::Authentication(format!("token request failed: {e}")))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status != StatusCode::OK {
            warn!(%status, "token request rejected");
            return Err(ApiError::Authentication(format!(
                "status {status}: {}",
                error_message(&body)
            )));
        }

        let record = serde_json::from_str::<TokenRecord>(&body)
            .map_err(|e| ApiError::Authentication(format!("invalid token response: {e}")))?;
        if record.token().trim().is_empty() {
            return Err(ApiError::Authentication("response contained no token".into()));
        }
        debug!(expires_at = %record.expires_at(), "FEL token issued");
        Ok(record)
    }

    /// Submit a rendered DTE for certification.
    ///
    /// # Errors
    /// Returns [`ApiError::Certification`] unless the certifier answers 200 with a
    /// success code and all four identifiers.
    pub async fn certify_dte(
        &self,
        xml: &str,
        token: &str,
        credentials: &CompanyCredentials,
    ) -> Result<CertificationResult, ApiError> {
        let padded = credentials.padded_tax_id();
        let url = Url::parse_with_params(
            self.config.certify_url(),
            &[
                ("NIT", padded.as_str()),
                ("TIPO", CERTIFY_TYPE),
                ("FORMAT", CERTIFY_FORMAT),
                ("USERNAME", credentials.fel_user()),
            ],
        )
        .map_err(|e| ApiError::Certification(format!("invalid certification URL: {e}")))?;

        let response = self
            .client
            .post(url)
            .header("Authorization", token)
            .header("Content-Type", "application/xml")
            .timeout(self.config.certify_timeout())
            .body(xml.to_string())
            .send()
            .await
            .map_err(|e| ApiError::Certification(format!("could not reach certifier: {e}")))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let parsed = serde_json::from_str::<CertifyResponse>(&body);
        if status != StatusCode::OK {
            let message = parsed
                .ok()
                .and_then(|p| p.upstream_message())
                .unwrap_or_else(|| body.trim().to_string());
            return Err(ApiError::Certification(format!("status {status}: {message}")));
        }
        let parsed = parsed
            .map_err(|e| ApiError::Certification(format!("invalid certification response: {e}")))?;
        if !parsed.accepted() {
            return Err(ApiError::Certification(
                parsed.upstream_message().unwrap_or(body),
            ));
        }

        let result = CertificationResult {
            number: parsed.numero.unwrap_or_default(),
            series: parsed.serie.unwrap_or_default(),
            authorization: parsed.autorizacion.unwrap_or_default(),
            certified_at: parsed.fecha_de_certificacion.unwrap_or_default(),
        };
        if !result.is_complete() {
            return Err(ApiError::Certification(
                "response is missing certification identifiers".into(),
            ));
        }
        info!(series = %result.series, number = %result.number, "DTE certified");
        Ok(result)
    }

    /// Look up a taxpayer by NIT.
    ///
    /// # Errors
    /// Returns [`ApiError::NotConfigured`] without a lookup URL and
    /// [`ApiError::NitValidation`] for empty input, transport failures or non-success answers.
    pub async fn verify_nit(
        &self,
        nit: &str,
        token: &str,
        credentials: &CompanyCredentials,
    ) -> Result<NitVerification, ApiError> {
        let nit = Nit::normalize(nit);
        if nit.is_empty() {
            return Err(ApiError::NitValidation("NIT is required".into()));
        }
        let base = self
            .config
            .nit_validation_url()
            .ok_or(ApiError::NotConfigured("NIT validation"))?;

        let padded = credentials.padded_tax_id();
        let lookup = format!("NIT|{nit}");
        let url = Url::parse_with_params(
            base,
            &[
                ("NIT", padded.as_str()),
                ("DATA1", NIT_LOOKUP_TAG),
                ("DATA2", lookup.as_str()),
                ("USERNAME", credentials.fel_user()),
            ],
        )
        .map_err(|e| ApiError::NitValidation(format!("invalid NIT validation URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .header("Authorization", token)
            .timeout(self.config.token_timeout())
            .send()
            .await
            .map_err(|e| ApiError::NitValidation(format!("could not connect: {e}")))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::NitValidation(format!(
                "status {status}: {}",
                error_message(&body)
            )));
        }
        let parsed = serde_json::from_str::<NitResponse>(&body)
            .map_err(|e| ApiError::NitValidation(format!("invalid NIT response: {e}")))?;
        Ok(interpret_nit_response(parsed))
    }
}

fn interpret_nit_response(parsed: NitResponse) -> NitVerification {
    if let Some(message) = parsed.message {
        return NitVerification::Invalid { reason: message };
    }
    if let Some(echo) = parsed.request.first() {
        if echo.respuesta.as_deref().map(str::trim) == Some("0") {
            return NitVerification::Invalid {
                reason: echo
                    .mensaje
                    .clone()
                    .unwrap_or_else(|| "NIT rejected".to_string()),
            };
        }
    }
    match parsed.response.into_iter().next() {
        Some(NitTaxpayer {
            nit: Some(nit),
            nombre,
            direccion,
        }) if !nit.trim().is_empty() => NitVerification::Valid {
            nit,
            name: nombre.unwrap_or_default(),
            address: direccion.unwrap_or_default(),
        },
        _ => NitVerification::Invalid {
            reason: "no information available for NIT".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_certify(body: &str) -> CertifyResponse {
        serde_json::from_str(body).expect("certify response")
    }

    fn parse_nit(body: &str) -> NitVerification {
        interpret_nit_response(serde_json::from_str(body).expect("nit response"))
    }

    #[test]
    fn certify_response_accepts_numeric_and_text_codes() {
        assert!(parse_certify(r#"{"Codigo":1}"#).accepted());
        assert!(parse_certify(r#"{"Codigo":"1"}"#).accepted());
        assert!(parse_certify(r#"{"success":true}"#).accepted());
        assert!(!parse_certify(r#"{"Codigo":2}"#).accepted());
        assert!(!parse_certify(r#"{}"#).accepted());
    }

    #[test]
    fn certify_response_joins_upstream_messages() {
        let parsed = parse_certify(
            r#"{"Codigo":0,"Mensaje":"Error en validacion","ResponseDATA1":" NIT no activo "}"#,
        );
        assert_eq!(
            parsed.upstream_message().as_deref(),
            Some("Error en validacion NIT no activo")
        );
        assert_eq!(parse_certify(r#"{"Codigo":0}"#).upstream_message(), None);
    }

    #[test]
    fn certify_response_reads_numeric_number() {
        let parsed = parse_certify(r#"{"Codigo":1,"NUMERO":123456,"Serie":"ABCD"}"#);
        assert_eq!(parsed.numero.as_deref(), Some("123456"));
        assert_eq!(parsed.serie.as_deref(), Some("ABCD"));
    }

    #[test]
    fn nit_response_variants() {
        assert_eq!(
            parse_nit(r#"{"Message":"Authorization has been denied"}"#),
            NitVerification::Invalid {
                reason: "Authorization has been denied".into()
            }
        );
        assert_eq!(
            parse_nit(r#"{"REQUEST":[{"Respuesta":0,"Mensaje":"NIT no valido"}]}"#),
            NitVerification::Invalid {
                reason: "NIT no valido".into()
            }
        );
        assert_eq!(
            parse_nit(
                r#"{"REQUEST":[{"Respuesta":1}],"RESPONSE":[{"NIT":"576937K","NOMBRE":"ANA LOPEZ","Direccion":"CIUDAD"}]}"#
            ),
            NitVerification::Valid {
                nit: "576937K".into(),
                name: "ANA LOPEZ".into(),
                address: "CIUDAD".into(),
            }
        );
        assert!(!parse_nit(r#"{"RESPONSE":[{"NIT":""}]}"#).is_valid());
        assert!(!parse_nit("{}").is_valid());
    }

    #[test]
    fn error_message_prefers_json_message() {
        assert_eq!(error_message(r#"{"message":"bad password"}"#), "bad password");
        assert_eq!(error_message("  plain failure "), "plain failure");
    }

    #[test]
    fn certification_result_completeness() {
        let mut result = CertificationResult {
            number: "1".into(),
            series: "A".into(),
            authorization: "AUTH".into(),
            certified_at: "2024-01-01T00:00:00".into(),
        };
        assert!(result.is_complete());
        result.series = " ".into();
        assert!(!result.is_complete());
    }
}
