//! `Want-Digest` / `Digest` header handling (RFC 3230).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Token sent in `Want-Digest` for a checksum algorithm name.
pub fn want_digest_token(algorithm: &str) -> String {
    match algorithm.to_ascii_lowercase().as_str() {
        "sha256" | "sha-256" => "SHA-256".to_string(),
        "sha512" | "sha-512" => "SHA-512".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Pick `algorithm` out of a `Digest` header and return it as lowercase hex.
///
/// Adler32 and CRC32C values are sent as hex already; the others arrive
/// base64 encoded.
///
/// ```
/// use strata_io::digest_from_header;
///
/// let header = "adler32=0a3b01c2, MD5=HUXZLQLMuI/KZ5KDcJPcOA==";
/// assert_eq!(digest_from_header(header, "adler32").as_deref(), Some("0a3b01c2"));
/// assert_eq!(
///     digest_from_header(header, "md5").as_deref(),
///     Some("1d45d92d02ccb88fca6792837093dc38")
/// );
/// assert_eq!(digest_from_header(header, "sha-256"), None);
/// ```
pub fn digest_from_header(value: &str, algorithm: &str) -> Option<String> {
    let wanted = want_digest_token(algorithm);
    let encoded = value.split(',').find_map(|item| {
        let (name, digest) = item.trim().split_once('=')?;
        name.trim().eq_ignore_ascii_case(&wanted).then_some(digest.trim())
    })?;
    if encoded.is_empty() {
        return None;
    }
    match wanted.as_str() {
        "ADLER32" | "CRC32C" | "UNIXSUM" => Some(encoded.to_ascii_lowercase()),
        _ => STANDARD.decode(encoded).ok().map(hex::encode),
    }
}

/// The MD5 carried by a plain object-store ETag.
///
/// Multipart ETags (`"<hash>-<parts>"`) are not content digests and yield
/// `None`.
pub fn md5_from_etag(etag: &str) -> Option<String> {
    let bare = etag.trim().trim_start_matches("W/").trim_matches('"');
    (bare.len() == 32 && bare.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| bare.to_ascii_lowercase())
}
