use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::signature;

const NONCE_BYTES: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Signature error: {0}")]
    SignatureError(#[from] signature::SignatureError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// Why a presented access token was refused before any database lookup.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has expired")]
    Expired,
}

/// Claims carried inside a door-access QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenPayload {
    /// User the token was issued to
    pub uid: Uuid,
    /// Single-use marker, checked against granted access logs
    pub nonce: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

/// A signed token ready to be rendered.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessTokenPayload {
    pub fn new(user_id: Uuid, now: DateTime<Utc>, ttl_seconds: i64) -> Result<Self, QrGenerationError> {
        Ok(Self {
            uid: user_id,
            nonce: signature::random_hex(NONCE_BYTES)?,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    /// Encodes as `base64url(json).hex(hmac)`.
    pub fn sign(&self, signing_key: &[u8]) -> Result<IssuedAccessToken, QrGenerationError> {
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?);
        let tag = signature::sign(&body, signing_key);

        Ok(IssuedAccessToken {
            token: format!("{}.{}", body, tag),
            expires_at: self.expires_at(),
        })
    }
}

/// Checks the signature first, then decodes, then checks expiry.
pub fn verify_token(
    token: &str,
    signing_key: &[u8],
    now: DateTime<Utc>,
) -> Result<AccessTokenPayload, TokenRejection> {
    let (body, tag) = token.trim().split_once('.').ok_or(TokenRejection::Malformed)?;
    if body.is_empty() || tag.is_empty() {
        return Err(TokenRejection::Malformed);
    }

    signature::verify(body, tag, signing_key).map_err(|e| match e {
        signature::SignatureError::MalformedSignature => TokenRejection::Malformed,
        _ => TokenRejection::BadSignature,
    })?;

    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| TokenRejection::Malformed)?;
    let payload: AccessTokenPayload =
        serde_json::from_slice(&json).map_err(|_| TokenRejection::Malformed)?;

    if payload.is_expired(now) {
        return Err(TokenRejection::Expired);
    }

    Ok(payload)
}

/// Renders the token as an SVG QR code.
pub fn generate_qr_svg(token: &str) -> Result<String, QrGenerationError> {
    let code = QrCode::new(token.as_bytes())?;
    let svg = code.render::<svg::Color>().min_dimensions(200, 200).build();
    Ok(svg)
}

/// Renders the token as a PNG QR code.
pub fn generate_qr_png(token: &str) -> Result<Vec<u8>, QrGenerationError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::new(token.as_bytes())?;

    let module_size = 10u32; // Each module is 10x10 pixels
    let width = code.width() as u32;
    let img_size = width * module_size;

    let mut img = ImageBuffer::<Luma<u8>, Vec<u8>>::new(img_size, img_size);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let module_color = code[((x / module_size) as usize, (y / module_size) as usize)];
        *pixel = match module_color {
            qrcode::types::Color::Dark => Luma([0u8]),
            qrcode::types::Color::Light => Luma([255u8]),
        };
    }

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-signing-key";

    fn issue(now: DateTime<Utc>, ttl: i64) -> (AccessTokenPayload, String) {
        let payload = AccessTokenPayload::new(Uuid::new_v4(), now, ttl).unwrap();
        let issued = payload.sign(KEY).unwrap();
        (payload, issued.token)
    }

    #[test]
    fn test_valid_token_round_trips() {
        let now = Utc::now();
        let (payload, token) = issue(now, 60);

        let verified = verify_token(&token, KEY, now).unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let now = Utc::now();
        let (_, token) = issue(now, 60);
        let (body, tag) = token.split_once('.').unwrap();

        let mut forged_payload = AccessTokenPayload::new(Uuid::new_v4(), now, 60).unwrap();
        forged_payload.nonce = "forged".to_string();
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_payload).unwrap());
        assert_ne!(forged_body, body);

        let forged = format!("{}.{}", forged_body, tag);
        assert_eq!(
            verify_token(&forged, KEY, now),
            Err(TokenRejection::BadSignature)
        );
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = Utc::now();
        let (_, token) = issue(now - Duration::seconds(120), 60);
        assert_eq!(verify_token(&token, KEY, now), Err(TokenRejection::Expired));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let now = Utc::now();
        assert_eq!(verify_token("garbage", KEY, now), Err(TokenRejection::Malformed));
        assert_eq!(verify_token(".abc", KEY, now), Err(TokenRejection::Malformed));
        assert_eq!(
            verify_token("abc.zz-not-hex", KEY, now),
            Err(TokenRejection::Malformed)
        );
    }

    #[test]
    fn test_wrong_key_is_bad_signature() {
        let now = Utc::now();
        let (_, token) = issue(now, 60);
        assert_eq!(
            verify_token(&token, b"another-key", now),
            Err(TokenRejection::BadSignature)
        );
    }

    #[test]
    fn test_qr_svg_generation() {
        let (_, token) = issue(Utc::now(), 60);
        let svg = generate_qr_svg(&token).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_qr_png_generation() {
        let (_, token) = issue(Utc::now(), 60);
        let png = generate_qr_png(&token).unwrap();

        assert_eq!(&png[1..4], b"PNG");
    }
}
