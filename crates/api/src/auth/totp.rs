//! Time-based one-time passwords (RFC 6238)
//!
//! Enrollment generates a 160-bit base32 secret, an `otpauth://` provisioning URI
//! and a QR code of that URI as a self-contained PNG data URL. Validation accepts
//! the code for the current 30-second step and one step either side.
//!
//! The secret is a bearer credential: it is returned once at enrollment and must
//! never be logged.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::fmt;
use std::io::Cursor;
use subtle::{Choice, ConstantTimeEq};
use time::OffsetDateTime;
use totp_rs::{Algorithm, Secret, TOTP};

/// Time step in seconds
pub const TOTP_STEP: u64 = 30;

/// Digits per code
pub const TOTP_DIGITS: usize = 6;

/// Accepted steps of clock skew on either side of the current one
pub const TOTP_SKEW: u8 = 1;

/// Minimum edge length of the rendered QR code, in pixels
const QR_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("Invalid TOTP secret: {0}")]
    InvalidSecret(String),
    #[error("Invalid provisioning parameters: {0}")]
    Provisioning(String),
    #[error("Failed to render QR code: {0}")]
    QrRender(String),
}

/// Result of enrolling an account in 2FA
pub struct TotpEnrollment {
    pub secret: String,
    pub provisioning_uri: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

impl fmt::Debug for TotpEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpEnrollment")
            .field("secret", &"[redacted]")
            .field("provisioning_uri", &"[redacted]")
            .field("qr_code_len", &self.qr_code.len())
            .finish()
    }
}

/// Fresh random secret, base32 encoded
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

pub fn is_valid_secret(secret: &str) -> bool {
    build_totp(secret, None, String::new()).is_ok()
}

fn build_totp(secret: &str, issuer: Option<String>, account: String) -> Result<TOTP, TotpError> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| TotpError::InvalidSecret(format!("{:?}", e)))?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        bytes,
        issuer,
        account,
    )
    .map_err(|e| TotpError::Provisioning(format!("{:?}", e)))
}

/// Create a secret for `account` and everything an authenticator app needs to import it
pub fn enroll(issuer: &str, account: &str) -> Result<TotpEnrollment, TotpError> {
    let secret = generate_secret();
    let totp = build_totp(&secret, Some(issuer.to_string()), account.to_string())?;
    let provisioning_uri = totp.get_url();
    let qr_code = render_qr_data_url(&provisioning_uri)?;

    Ok(TotpEnrollment {
        secret,
        provisioning_uri,
        qr_code,
    })
}

fn render_qr_data_url(uri: &str) -> Result<String, TotpError> {
    let code = QrCode::new(uri.as_bytes()).map_err(|e| TotpError::QrRender(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| TotpError::QrRender(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Code for the step containing `unix_time`
pub fn generate_code_at(secret: &str, unix_time: u64) -> Result<String, TotpError> {
    Ok(build_totp(secret, None, String::new())?.generate(unix_time))
}

pub fn generate_current_code(secret: &str) -> Result<String, TotpError> {
    generate_code_at(secret, unix_now())
}

/// Check `code` against the steps around `unix_time`
///
/// Every candidate step is compared in constant time. Malformed codes and
/// secrets are rejected without raising.
pub fn validate_at(secret: &str, code: &str, unix_time: u64) -> bool {
    if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let Ok(totp) = build_totp(secret, None, String::new()) else {
        return false;
    };

    let skew = i64::from(TOTP_SKEW);
    let step = TOTP_STEP as i64;
    let mut matched = Choice::from(0u8);
    for offset in -skew..=skew {
        let Ok(at) = u64::try_from(unix_time as i64 + offset * step) else {
            continue;
        };
        matched |= totp.generate(at).as_bytes().ct_eq(code.as_bytes());
    }

    matched.into()
}

/// Check `code` against the current wall-clock time
pub fn validate(secret: &str, code: &str) -> bool {
    validate_at(secret, code, unix_now())
}

fn unix_now() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0)
}
