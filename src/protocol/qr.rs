// ── Protocol Adapter: QR Image Rendering (§9 "QR image encoding") ──────────
// Encodes a raw QR payload string into a PNG, base64-ed once on emission and
// cached on the session snapshot by the runner — re-encoding on every GET
// /qr is wasteful and can diverge from the raw code (§9).

use base64::Engine as _;
use image::Luma;
use qrcode::QrCode;

/// Render `raw_code` as a base64-encoded PNG. Returns an empty string (never
/// fails the caller) if the payload can't be encoded as a QR symbol —
/// callers still have the raw code to fall back on.
pub fn render_qr_base64(raw_code: &str) -> String {
    let code = match QrCode::new(raw_code.as_bytes()) {
        Ok(c) => c,
        Err(_) => return String::new(),
    };
    let image = code.render::<Luma<u8>>().min_dimensions(256, 256).build();

    let mut png_bytes = Vec::new();
    {
        let mut cursor = std::io::Cursor::new(&mut png_bytes);
        if image
            .write_to(&mut cursor, image::ImageOutputFormat::Png)
            .is_err()
        {
            return String::new();
        }
    }
    base64::engine::general_purpose::STANDARD.encode(png_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nonempty_base64_for_valid_payload() {
        let encoded = render_qr_base64("2@abcdef1234567890");
        assert!(!encoded.is_empty());
        assert!(base64::engine::general_purpose::STANDARD.decode(&encoded).is_ok());
    }

    #[test]
    fn distinct_codes_render_distinct_images() {
        let a = render_qr_base64("2@aaaa");
        let b = render_qr_base64("2@bbbb");
        assert_ne!(a, b);
    }
}
