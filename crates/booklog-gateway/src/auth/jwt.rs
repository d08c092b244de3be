//! Local JWT verification (HMAC and RSA families).

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use super::{subject_from_claims, VerifyError};

/// Signature algorithm families a token header can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Hmac,
    Rsa,
    Other,
}

impl AlgorithmFamily {
    pub fn of(alg: Algorithm) -> Self {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => AlgorithmFamily::Hmac,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => AlgorithmFamily::Rsa,
            _ => AlgorithmFamily::Other,
        }
    }
}

/// Parse a PEM public key once at startup. A bad key is logged and yields
/// `None` instead of aborting the process.
pub(super) fn parse_rsa_public_key(pem: &str) -> Option<DecodingKey> {
    match DecodingKey::from_rsa_pem(pem.as_bytes()) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::error!(error = %e, "failed parsing RSA public key; RSA verification disabled");
            None
        }
    }
}

/// Verify a token's signature and registered claims, returning its subject.
///
/// `select_key` sees the declared family before any signature work happens and
/// decides which key, if any, may be used.
pub(super) fn verify<'k, F>(token: &str, select_key: F) -> Result<Option<String>, VerifyError>
where
    F: FnOnce(AlgorithmFamily, Algorithm) -> Result<&'k DecodingKey, VerifyError>,
{
    let header = decode_header(token).map_err(|e| VerifyError::InvalidToken(e.to_string()))?;
    let key = select_key(AlgorithmFamily::of(header.alg), header.alg)?;

    let mut validation = Validation::new(header.alg);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Map<String, Value>>(token, key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        _ => VerifyError::InvalidToken(e.to_string()),
    })?;

    Ok(subject_from_claims(&data.claims))
}
