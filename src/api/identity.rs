use reqwest::header::HeaderMap;

/// Identifier shared by every client that arrives without proxy headers.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the rate-limit key for a request: the first `x-forwarded-for` entry, then
/// `x-real-ip`, else `UNKNOWN_CLIENT`.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
