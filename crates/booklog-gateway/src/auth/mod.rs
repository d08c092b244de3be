//! Bearer-token verification.
//!
//! One [`TokenVerifier`] is built at startup from [`VerificationConfig`] and
//! shared by every request. Each call verifies the token from scratch; nothing
//! is cached between requests.

mod bearer;
mod introspect;
mod jwt;

pub use bearer::{extract_bearer, parse_bearer};
pub use introspect::Introspector;
pub use jwt::AlgorithmFamily;

use jsonwebtoken::DecodingKey;
use serde_json::{Map, Value};

use crate::config::{ConfigError, VerificationConfig, VerificationMode};

/// A successfully verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// User identifier taken from the token (`sub`, else `user_id`). Never empty.
    pub subject: String,
}

/// Why a token was not accepted. Rendered to clients only through
/// [`VerifyError::public_message`].
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("invalid Authorization header")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unexpected signing method: {0}")]
    UnexpectedAlgorithm(String),

    #[error("token expired")]
    Expired,

    #[error("verification key unavailable: {0}")]
    KeyUnavailable(&'static str),

    #[error("token inactive")]
    Inactive,

    #[error("token carries no subject")]
    EmptySubject,

    #[error("introspection failed: {0}")]
    IntrospectionFailed(String),
}

impl VerifyError {
    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::MissingHeader => "missing_header",
            VerifyError::MalformedHeader => "malformed_header",
            VerifyError::InvalidToken(_) => "invalid_token",
            VerifyError::UnexpectedAlgorithm(_) => "unexpected_algorithm",
            VerifyError::Expired => "expired",
            VerifyError::KeyUnavailable(_) => "key_unavailable",
            VerifyError::Inactive => "inactive",
            VerifyError::EmptySubject => "empty_subject",
            VerifyError::IntrospectionFailed(_) => "introspection_failed",
        }
    }

    /// Client-facing text. Token problems all collapse to one message.
    pub fn public_message(&self) -> &'static str {
        match self {
            VerifyError::MissingHeader => "missing Authorization header",
            VerifyError::MalformedHeader => "invalid Authorization header",
            _ => "token invalid",
        }
    }
}

/// The verification strategy, fixed at startup.
pub enum TokenVerifier {
    /// Remote introspection endpoint.
    Introspection(Introspector),
    /// HMAC family only, with the shared secret.
    Hmac(DecodingKey),
    /// RSA family only. `None` when the configured PEM failed to parse; every
    /// token is then rejected.
    Rsa(Option<DecodingKey>),
    /// HMAC or RSA depending on the token header and the keys available.
    Auto {
        hmac: Option<DecodingKey>,
        rsa: Option<DecodingKey>,
    },
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenVerifier::Introspection(i) => f
                .debug_tuple("Introspection")
                .field(&i.url())
                .finish(),
            TokenVerifier::Hmac(_) => f.write_str("Hmac"),
            TokenVerifier::Rsa(key) => f.debug_tuple("Rsa").field(&key.is_some()).finish(),
            TokenVerifier::Auto { hmac, rsa } => f
                .debug_struct("Auto")
                .field("hmac", &hmac.is_some())
                .field("rsa", &rsa.is_some())
                .finish(),
        }
    }
}

impl TokenVerifier {
    pub fn from_config(config: &VerificationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let hmac_key = config
            .hmac_secret
            .as_deref()
            .map(DecodingKey::from_secret);
        let rsa_key = config
            .rsa_public_key_pem
            .as_deref()
            .and_then(jwt::parse_rsa_public_key);

        let verifier = match config.mode {
            VerificationMode::Introspect => {
                let url = config
                    .introspect_url
                    .as_deref()
                    .ok_or(ConfigError::MissingRequired("AUTH_INTROSPECT_URL"))?;
                TokenVerifier::Introspection(Introspector::new(url, config.introspect_timeout)?)
            }
            VerificationMode::LocalHmac => TokenVerifier::Hmac(
                hmac_key.ok_or(ConfigError::MissingRequired("AUTH_HS_SECRET"))?,
            ),
            VerificationMode::LocalRsa => TokenVerifier::Rsa(rsa_key),
            VerificationMode::Auto => TokenVerifier::Auto {
                hmac: hmac_key,
                rsa: rsa_key,
            },
        };
        Ok(verifier)
    }

    pub fn mode(&self) -> VerificationMode {
        match self {
            TokenVerifier::Introspection(_) => VerificationMode::Introspect,
            TokenVerifier::Hmac(_) => VerificationMode::LocalHmac,
            TokenVerifier::Rsa(_) => VerificationMode::LocalRsa,
            TokenVerifier::Auto { .. } => VerificationMode::Auto,
        }
    }

    /// Verify a raw token (already stripped of the `Bearer` scheme).
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let subject = match self {
            TokenVerifier::Introspection(introspector) => introspector.introspect(token).await?,
            TokenVerifier::Hmac(key) => jwt::verify(token, |family, alg| match family {
                AlgorithmFamily::Hmac => Ok(key),
                _ => Err(VerifyError::UnexpectedAlgorithm(format!("{:?}", alg))),
            })?,
            TokenVerifier::Rsa(key) => jwt::verify(token, |family, alg| match family {
                AlgorithmFamily::Rsa => key.as_ref().ok_or(VerifyError::KeyUnavailable("rsa public key")),
                _ => Err(VerifyError::UnexpectedAlgorithm(format!("{:?}", alg))),
            })?,
            TokenVerifier::Auto { hmac, rsa } => jwt::verify(token, |family, alg| {
                match (family, hmac.as_ref(), rsa.as_ref()) {
                    (AlgorithmFamily::Hmac, Some(key), _) => Ok(key),
                    (AlgorithmFamily::Rsa, _, Some(key)) => Ok(key),
                    _ => Err(VerifyError::UnexpectedAlgorithm(format!("{:?}", alg))),
                }
            })?,
        };

        match subject {
            Some(subject) if !subject.is_empty() => Ok(VerifiedIdentity { subject }),
            _ => Err(VerifyError::EmptySubject),
        }
    }
}

/// Render a claim as a subject string. Integral numbers lose their decimal
/// part, strings pass through, anything else becomes compact JSON. `null`
/// counts as absent.
pub fn claim_to_subject(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| format!("{:.0}", f))
            }
        }
        other => Some(other.to_string()),
    }
}

/// `sub` when it yields a non-empty subject, else `user_id`.
pub fn subject_from_claims(claims: &Map<String, Value>) -> Option<String> {
    ["sub", "user_id"]
        .iter()
        .filter_map(|name| claims.get(*name).and_then(claim_to_subject))
        .find(|subject| !subject.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "test-secret-key-for-unit-tests-0123456789";
    const RSA_PUBLIC: &str = include_str!("../../tests/fixtures/rsa_public.pem");
    const RSA_PRIVATE: &str = include_str!("../../tests/fixtures/rsa_private.pem");
    const RSA_OTHER_PRIVATE: &str = include_str!("../../tests/fixtures/rsa_other_private.pem");

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    fn hs_token(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn rs_token(claims: Value, private_pem: &str) -> String {
        encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn config(mode: VerificationMode, secret: bool, rsa_pem: Option<&str>) -> VerificationConfig {
        VerificationConfig {
            mode,
            introspect_url: None,
            introspect_timeout: Duration::from_secs(5),
            hmac_secret: secret.then(|| SECRET.as_bytes().to_vec()),
            rsa_public_key_pem: rsa_pem.map(String::from),
        }
    }

    fn hmac_verifier() -> TokenVerifier {
        TokenVerifier::from_config(&config(VerificationMode::LocalHmac, true, None)).unwrap()
    }

    fn rsa_verifier() -> TokenVerifier {
        TokenVerifier::from_config(&config(VerificationMode::LocalRsa, false, Some(RSA_PUBLIC)))
            .unwrap()
    }

    // --- HMAC ---

    #[tokio::test]
    async fn test_hmac_valid_token() {
        let token = hs_token(json!({"sub": "u123", "exp": future_exp()}));
        let identity = hmac_verifier().verify(&token).await.unwrap();
        assert_eq!(identity.subject, "u123");
    }

    #[tokio::test]
    async fn test_hmac_expired_token() {
        let token = hs_token(json!({"sub": "u123", "exp": 1000}));
        let err = hmac_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Expired));
    }

    #[tokio::test]
    async fn test_hmac_missing_exp_rejected() {
        let token = hs_token(json!({"sub": "u123"}));
        let err = hmac_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_hmac_wrong_secret() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": "u123", "exp": future_exp()}),
            &EncodingKey::from_secret(b"another-secret"),
        )
        .unwrap();
        let err = hmac_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_hmac_rejects_rsa_token() {
        let token = rs_token(json!({"sub": "u123", "exp": future_exp()}), RSA_PRIVATE);
        let err = hmac_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnexpectedAlgorithm(_)));
    }

    #[tokio::test]
    async fn test_hmac_other_family_members_accepted() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &json!({"sub": "u9", "exp": future_exp()}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_eq!(hmac_verifier().verify(&token).await.unwrap().subject, "u9");
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let err = hmac_verifier().verify("not.a.jwt").await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken(_)));
        let err = hmac_verifier().verify("").await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken(_)));
    }

    // --- RSA ---

    #[tokio::test]
    async fn test_rsa_valid_token() {
        let token = rs_token(json!({"sub": "reader-7", "exp": future_exp()}), RSA_PRIVATE);
        let identity = rsa_verifier().verify(&token).await.unwrap();
        assert_eq!(identity.subject, "reader-7");
    }

    #[tokio::test]
    async fn test_rsa_wrong_key() {
        let token = rs_token(json!({"sub": "reader-7", "exp": future_exp()}), RSA_OTHER_PRIVATE);
        let err = rsa_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_rsa_rejects_hmac_signed_with_public_key() {
        // Classic confusion: HS256 keyed with the public PEM bytes.
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": "attacker", "exp": future_exp()}),
            &EncodingKey::from_secret(RSA_PUBLIC.as_bytes()),
        )
        .unwrap();
        let err = rsa_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnexpectedAlgorithm(_)));
    }

    #[tokio::test]
    async fn test_rsa_unparseable_key_rejects_everything() {
        let verifier = TokenVerifier::from_config(&config(
            VerificationMode::LocalRsa,
            false,
            Some("-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----"),
        ))
        .unwrap();
        assert!(matches!(verifier, TokenVerifier::Rsa(None)));

        let token = rs_token(json!({"sub": "reader-7", "exp": future_exp()}), RSA_PRIVATE);
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::KeyUnavailable(_)));
    }

    // --- Auto ---

    #[tokio::test]
    async fn test_auto_picks_key_by_family() {
        let verifier =
            TokenVerifier::from_config(&config(VerificationMode::Auto, true, Some(RSA_PUBLIC)))
                .unwrap();

        let hs = hs_token(json!({"sub": "h", "exp": future_exp()}));
        let rs = rs_token(json!({"sub": "r", "exp": future_exp()}), RSA_PRIVATE);
        assert_eq!(verifier.verify(&hs).await.unwrap().subject, "h");
        assert_eq!(verifier.verify(&rs).await.unwrap().subject, "r");
    }

    #[tokio::test]
    async fn test_auto_rejects_family_without_key() {
        let hmac_only =
            TokenVerifier::from_config(&config(VerificationMode::Auto, true, None)).unwrap();
        let rs = rs_token(json!({"sub": "r", "exp": future_exp()}), RSA_PRIVATE);
        let err = hmac_only.verify(&rs).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnexpectedAlgorithm(_)));

        let rsa_only =
            TokenVerifier::from_config(&config(VerificationMode::Auto, false, Some(RSA_PUBLIC)))
                .unwrap();
        let hs = hs_token(json!({"sub": "h", "exp": future_exp()}));
        let err = rsa_only.verify(&hs).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnexpectedAlgorithm(_)));
    }

    #[test]
    fn test_from_config_requires_material() {
        let err = TokenVerifier::from_config(&config(VerificationMode::LocalHmac, false, None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("AUTH_HS_SECRET")));

        let err =
            TokenVerifier::from_config(&config(VerificationMode::Introspect, true, None)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("AUTH_INTROSPECT_URL")));
    }

    // --- Subject extraction ---

    #[tokio::test]
    async fn test_user_id_fallback() {
        let token = hs_token(json!({"user_id": 42, "exp": future_exp()}));
        assert_eq!(hmac_verifier().verify(&token).await.unwrap().subject, "42");

        let token = hs_token(json!({"sub": "", "user_id": "u-55", "exp": future_exp()}));
        assert_eq!(hmac_verifier().verify(&token).await.unwrap().subject, "u-55");
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let token = hs_token(json!({"exp": future_exp()}));
        let err = hmac_verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::EmptySubject));
    }

    #[test]
    fn test_claim_coercion() {
        assert_eq!(claim_to_subject(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(claim_to_subject(&json!(100)).as_deref(), Some("100"));
        assert_eq!(claim_to_subject(&json!(-7)).as_deref(), Some("-7"));
        assert_eq!(claim_to_subject(&json!(123.0)).as_deref(), Some("123"));
        assert_eq!(claim_to_subject(&json!(true)).as_deref(), Some("true"));
        assert_eq!(
            claim_to_subject(&json!({"id": 1})).as_deref(),
            Some(r#"{"id":1}"#)
        );
        assert_eq!(claim_to_subject(&Value::Null), None);
    }

    #[test]
    fn test_public_messages_are_generic() {
        assert_eq!(VerifyError::MissingHeader.public_message(), "missing Authorization header");
        assert_eq!(VerifyError::MalformedHeader.public_message(), "invalid Authorization header");
        assert_eq!(
            VerifyError::InvalidToken("InvalidSignature".into()).public_message(),
            "token invalid"
        );
        assert_eq!(VerifyError::Inactive.public_message(), "token invalid");
    }
}
