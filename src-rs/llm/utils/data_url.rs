use base64::Engine as _;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MIME_TYPE_RE: Regex =
        Regex::new(r"^data:(image/[a-zA-Z+.-]+);base64,").unwrap();
    static ref BASE64_PAYLOAD_RE: Regex =
        Regex::new(r"^data:image/[a-zA-Z+.-]+;base64,(.+)$").unwrap();
}

/// MIME type embedded in an image data URL, defaulting to JPEG when absent.
pub fn mime_type_from_data_url(data_url: &str) -> String {
    MIME_TYPE_RE
        .captures(data_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}

/// Base64 payload of an image data URL. Returns None when the URL does not
/// carry a recognizable, decodable base64 image payload.
pub fn base64_from_data_url(data_url: &str) -> Option<String> {
    let payload = BASE64_PAYLOAD_RE
        .captures(data_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())?;

    if base64::engine::general_purpose::STANDARD.decode(payload).is_err() {
        return None;
    }

    Some(payload.to_string())
}
