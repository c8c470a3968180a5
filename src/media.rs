use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::WizardError;

/// Upload guard: files over this size are rejected before encoding.
pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Base64-encoded image plus its declared media type, ready to be inlined
/// into a Gemini request. Not retained beyond the call that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    // PNG
    if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    // JPEG
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    // WEBP (RIFF....WEBP)
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// Pre-encoding guard for the selection step: size cap and accepted types
/// (JPEG, PNG, WebP). Returns the sniffed media type.
pub async fn validate_selection(path: &Path) -> Result<&'static str, WizardError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| WizardError::Encoding(e.to_string()))?;
    if meta.len() > MAX_IMAGE_BYTES {
        return Err(WizardError::Encoding(format!(
            "image is {} bytes, the limit is 20 MiB",
            meta.len()
        )));
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| WizardError::Encoding(e.to_string()))?;
    sniff_mime_type(&bytes)
        .ok_or_else(|| WizardError::Encoding("unsupported image type (use JPEG, PNG or WebP)".to_string()))
}

/// Read the selected file and produce the base64 payload for the AI calls.
pub async fn encode_image(path: &Path) -> Result<ImagePayload, WizardError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| WizardError::Encoding(e.to_string()))?;
    let mime_type = sniff_mime_type(&bytes)
        .ok_or_else(|| WizardError::Encoding("unsupported image type (use JPEG, PNG or WebP)".to_string()))?;
    Ok(ImagePayload {
        data: B64.encode(&bytes),
        mime_type: mime_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    pub const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    fn webp_bytes() -> Vec<u8> {
        let mut v = b"RIFF".to_vec();
        v.extend_from_slice(&[0x10, 0x00, 0x00, 0x00]);
        v.extend_from_slice(b"WEBP");
        v.extend_from_slice(&[0u8; 8]);
        v
    }

    #[test]
    fn sniffs_the_accepted_types() {
        assert_eq!(sniff_mime_type(JPEG_MAGIC), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_mime_type(&webp_bytes()), Some("image/webp"));
        assert_eq!(sniff_mime_type(b"GIF89a"), None);
        assert_eq!(sniff_mime_type(b""), None);
    }

    #[tokio::test]
    async fn encode_round_trips_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = JPEG_MAGIC.to_vec();
        content.extend_from_slice(&[0xAB; 1024]);
        let path = dir.path().join("house.jpg");
        std::fs::write(&path, &content).unwrap();

        let payload = encode_image(&path).await.unwrap();
        assert_eq!(payload.mime_type, "image/jpeg");
        let decoded = B64.decode(&payload.data).unwrap();
        assert_eq!(decoded, content);
    }

    #[tokio::test]
    async fn validate_rejects_oversize_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        let f = std::fs::File::create(&path).unwrap();
        f.set_len(MAX_IMAGE_BYTES + 1).unwrap();

        let err = validate_selection(&path).await.unwrap_err();
        assert!(matches!(err, WizardError::Encoding(_)));
        assert!(err.to_string().contains("20 MiB"));
    }

    #[tokio::test]
    async fn validate_rejects_unknown_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, b"hello").unwrap();

        let err = validate_selection(&path).await.unwrap_err();
        assert!(err.to_string().contains("unsupported image type"));
    }

    #[tokio::test]
    async fn validate_accepts_a_normal_photo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("house.png");
        std::fs::write(&path, PNG_MAGIC).unwrap();

        assert_eq!(validate_selection(&path).await.unwrap(), "image/png");
    }

    #[tokio::test]
    async fn encode_fails_on_missing_file() {
        let err = encode_image(Path::new("/nonexistent/nope.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, WizardError::Encoding(_)));
    }
}
