use actix_web::http::header::HeaderValue;

use super::VerifyError;

/// Pull the token out of an `Authorization` header value.
pub fn extract_bearer(value: Option<&HeaderValue>) -> Result<&str, VerifyError> {
    let value = value.ok_or(VerifyError::MissingHeader)?;
    let text = value.to_str().map_err(|_| VerifyError::MalformedHeader)?;
    parse_bearer(text)
}

/// The header must be exactly `<scheme> <token>` (any whitespace between) with
/// a case-insensitive `Bearer` scheme.
pub fn parse_bearer(header: &str) -> Result<&str, VerifyError> {
    if header.trim().is_empty() {
        return Err(VerifyError::MissingHeader);
    }

    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(VerifyError::MalformedHeader),
    }
}
