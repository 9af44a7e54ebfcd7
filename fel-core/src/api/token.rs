//! Per-company bearer token cache with single-flight refresh.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::{ApiError, FelClient};
use crate::company::CompanyCredentials;

/// Token issued by the identity endpoint, stored with the upstream field names.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "expira_en", with = "expiry_format")]
    expires_at: DateTime<Utc>,
    #[serde(rename = "otorgado_a", default, skip_serializing_if = "Option::is_none")]
    issued_to: Option<String>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issued_to", &self.issued_to)
            .finish()
    }
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, issued_to: Option<String>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            issued_to,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn issued_to(&self) -> Option<&str> {
        self.issued_to.as_deref()
    }

    /// A token is usable strictly before its expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now < self.expires_at
    }
}

/// `expira_en` is RFC 3339, or a naive timestamp in UTC.
mod expiry_format {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub(super) fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| D::Error::custom(format!("invalid expiry timestamp '{raw}'")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }
}

type Slot = Arc<AsyncMutex<Option<TokenRecord>>>;

/// Caches one token per company and refreshes it through the identity endpoint.
///
/// Callers for the same company serialize on a per-company lock, so an expired
/// token triggers exactly one refresh and the others reuse its result.
#[derive(Debug)]
pub struct TokenManager {
    client: Arc<FelClient>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenManager {
    pub fn new(client: Arc<FelClient>) -> Self {
        Self {
            client,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, credentials: &CompanyCredentials) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(credentials.cache_key()).or_default().clone()
    }

    /// Return a token that is valid now, refreshing it when missing or expired.
    ///
    /// # Errors
    /// Returns [`ApiError::Authentication`] when a refresh is needed and fails.
    pub async fn get_valid_token(&self, credentials: &CompanyCredentials) -> Result<String, ApiError> {
        self.get_valid_token_at(credentials, Utc::now()).await
    }

    /// Same as [`TokenManager::get_valid_token`] with an explicit clock reading.
    pub async fn get_valid_token_at(
        &self,
        credentials: &CompanyCredentials,
        now: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let slot = self.slot(credentials);
        let mut cached = slot.lock().await;

        if let Some(record) = cached.as_ref().filter(|record| record.is_valid_at(now)) {
            debug!(user = credentials.fel_user(), "reusing cached FEL token");
            return Ok(record.token().to_string());
        }

        let record = self.client.request_token(credentials).await?;
        info!(
            user = credentials.fel_user(),
            expires_at = %record.expires_at(),
            "stored refreshed FEL token"
        );
        let token = record.token().to_string();
        *cached = Some(record);
        Ok(token)
    }

    /// Load a previously persisted record, e.g. from disk.
    pub async fn seed(&self, credentials: &CompanyCredentials, record: TokenRecord) {
        let slot = self.slot(credentials);
        *slot.lock().await = Some(record);
    }

    /// Current cached record, valid or not.
    pub async fn snapshot(&self, credentials: &CompanyCredentials) -> Option<TokenRecord> {
        let slot = self.slot(credentials);
        let cached = slot.lock().await;
        cached.clone()
    }

    pub async fn invalidate(&self, credentials: &CompanyCredentials) {
        let slot = self.slot(credentials);
        *slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FelConfig;
    use chrono::TimeZone;

    fn creds(user: &str) -> CompanyCredentials {
        CompanyCredentials::new("1234567".into(), user.into(), "pw".into()).expect("creds")
    }

    fn manager() -> TokenManager {
        // unroutable endpoints: any refresh attempt fails
        let config = FelConfig::new("http://127.0.0.1:9/token", "http://127.0.0.1:9/certify");
        TokenManager::new(Arc::new(FelClient::new(config).expect("client")))
    }

    #[test]
    fn parses_upstream_expiry_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).single().expect("date");
        assert_eq!(expiry_format::parse("2024-05-17T12:00:00"), Some(expected));
        assert_eq!(expiry_format::parse("2024-05-17T12:00:00.000"), Some(expected));
        assert_eq!(expiry_format::parse("2024-05-17 12:00:00"), Some(expected));
        assert_eq!(expiry_format::parse("2024-05-17T06:00:00-06:00"), Some(expected));
        assert_eq!(expiry_format::parse("tomorrow"), None);
    }

    #[test]
    fn record_round_trips_with_upstream_names() {
        let record: TokenRecord = serde_json::from_str(
            r#"{"Token":"abc","expira_en":"2024-05-17T12:00:00","otorgado_a":"GT.000001234567.ventas"}"#,
        )
        .expect("record");
        assert_eq!(record.token(), "abc");
        assert_eq!(record.issued_to(), Some("GT.000001234567.ventas"));
        let json = serde_json::to_value(&record).expect("json");
        assert_eq!(json["expira_en"], "2024-05-17T12:00:00Z");
        assert!(!format!("{record:?}").contains("abc"));
    }

    #[test]
    fn validity_ends_at_expiry() {
        let expiry = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).single().expect("date");
        let record = TokenRecord::new("abc", expiry, None);
        assert!(record.is_valid_at(expiry - chrono::TimeDelta::seconds(1)));
        assert!(!record.is_valid_at(expiry));
        assert!(!record.is_valid_at(expiry + chrono::TimeDelta::seconds(1)));
    }

    #[tokio::test]
    async fn seeded_token_is_reused_until_expiry() {
        let manager = manager();
        let creds = creds("ventas");
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("date");
        manager.seed(&creds, TokenRecord::new("cached", expiry, None)).await;

        let token = manager
            .get_valid_token_at(&creds, expiry - chrono::TimeDelta::minutes(5))
            .await
            .expect("cached token");
        assert_eq!(token, "cached");

        let err = manager
            .get_valid_token_at(&creds, expiry)
            .await
            .expect_err("expired token must trigger a refresh");
        assert!(matches!(err, ApiError::Authentication(_)));
        assert_eq!(
            manager.snapshot(&creds).await.map(|r| r.token().to_string()),
            Some("cached".to_string())
        );
    }

    #[tokio::test]
    async fn caches_are_keyed_per_company_user() {
        let manager = manager();
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("date");
        manager.seed(&creds("a"), TokenRecord::new("token-a", expiry, None)).await;
        assert!(manager.snapshot(&creds("b")).await.is_none());
        manager.invalidate(&creds("a")).await;
        assert!(manager.snapshot(&creds("a")).await.is_none());
    }
}
