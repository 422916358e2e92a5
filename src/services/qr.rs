use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::render::svg;
use qrcode::QrCode;

use crate::errors::ServiceError;

const MIN_DIMENSION: u32 = 200;

/// Renders `text` as an SVG QR code and returns it as a base64 data URL,
/// suitable for `<img src>` in emails and pages.
pub fn qr_data_url(text: &str) -> Result<String, ServiceError> {
    if text.is_empty() {
        return Err(ServiceError::ValidationError(
            "QR code text must not be empty".to_string(),
        ));
    }
    let code = QrCode::new(text.as_bytes())
        .map_err(|e| ServiceError::BadRequest(format!("cannot encode QR code: {}", e)))?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn produces_svg_data_url() {
        let url = qr_data_url("https://daylove.app/pages/0b6f").unwrap();
        let payload = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn empty_text_is_rejected() {
        assert_matches!(qr_data_url(""), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn oversized_text_is_rejected() {
        let text = "x".repeat(8_000);
        assert_matches!(qr_data_url(&text), Err(ServiceError::BadRequest(_)));
    }
}
