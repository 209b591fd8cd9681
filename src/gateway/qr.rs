use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Luma};
use qrcode::QrCode;

/// Render a pairing challenge into a scannable PNG data URL.
///
/// Rendered at response time, never stored — the challenge may already have
/// been superseded by the time the next status poll arrives.
pub fn challenge_to_data_url(payload: &str) -> Result<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        anyhow::bail!("QR payload is empty");
    }

    let code = QrCode::new(payload.as_bytes()).context("Failed to encode QR payload")?;
    let img = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(240, 240)
        .build();

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::L8)
        .context("Failed to encode QR image as PNG")?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
