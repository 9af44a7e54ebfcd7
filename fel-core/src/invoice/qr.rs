use base64ct::{Base64, Encoding};
use image::{DynamicImage, ImageError, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode, types::QrError};
use reqwest::Url;
use std::io::Cursor;
use thiserror::Error;

use super::{FINAL_CONSUMER_NIT, Nit};
use crate::api::CertificationResult;
use crate::config::DEFAULT_QR_VERIFICATION_URL;

const MODULE_PIXELS: u32 = 10;

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("invalid QR verification URL: {0}")]
    InvalidVerificationUrl(String),
    #[error("failed to encode QR data: {0}")]
    Encode(#[from] QrError),
    #[error("failed to write QR image: {0}")]
    Image(#[from] ImageError),
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// PNG bytes of a verification QR code. Empty when there was nothing to verify.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QrImage {
    png: Vec<u8>,
}

impl QrImage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.png.is_empty()
    }

    pub fn as_png(&self) -> &[u8] {
        &self.png
    }

    pub fn into_png(self) -> Vec<u8> {
        self.png
    }

    /// Base64 for embedding in print templates; empty string for an empty image.
    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.png)
    }
}

/// Renders SAT verification QR codes for certified documents.
///
/// # Examples
/// ```rust
/// use fel_core::invoice::QrGenerator;
///
/// let qr = QrGenerator::default().generate(None, "1234567", "CF")?;
/// assert!(qr.is_empty());
/// # Ok::<(), fel_core::invoice::QrCodeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct QrGenerator {
    verification_url: String,
}

impl Default for QrGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_QR_VERIFICATION_URL)
    }
}

impl QrGenerator {
    pub fn new(verification_url: impl Into<String>) -> Self {
        Self {
            verification_url: verification_url.into(),
        }
    }

    /// Public verification link for an authorization number.
    pub fn verification_url(
        &self,
        authorization: &str,
        emitter_nit: &str,
        receiver_nit: &str,
    ) -> QrResult<Url> {
        let receiver = match Nit::normalize(receiver_nit) {
            nit if nit.is_empty() => FINAL_CONSUMER_NIT.to_string(),
            nit => Nit::parse(&nit).map(String::from).unwrap_or(nit),
        };
        Url::parse_with_params(
            &self.verification_url,
            &[
                ("tipo", "autorizacion"),
                ("numero", authorization),
                ("emisor", Nit::normalize(emitter_nit).as_str()),
                ("receptor", receiver.as_str()),
            ],
        )
        .map_err(|e| QrCodeError::InvalidVerificationUrl(format!("{}: {e}", self.verification_url)))
    }

    /// Render the QR for a certification result.
    ///
    /// # Errors
    /// Returns [`QrCodeError`] if the URL is malformed or the image cannot be encoded.
    /// A missing result, number or authorization yields [`QrImage::empty`].
    pub fn generate(
        &self,
        result: Option<&CertificationResult>,
        emitter_nit: &str,
        receiver_nit: &str,
    ) -> QrResult<QrImage> {
        let Some(result) = result else {
            return Ok(QrImage::empty());
        };
        if result.number.trim().is_empty() || result.authorization.trim().is_empty() {
            return Ok(QrImage::empty());
        }

        let url = self.verification_url(&result.authorization, emitter_nit, receiver_nit)?;
        let code = QrCode::with_error_correction_level(url.as_str(), EcLevel::L)?;
        let pixels = code
            .render::<Luma<u8>>()
            .quiet_zone(true)
            .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(pixels).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(QrImage { png })
    }
}
