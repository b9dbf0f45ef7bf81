//! Bearer extraction and JWT validation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::error::{AuthError, AuthResult};

/// Authorization scheme accepted by [`extract_bearer`], compared case-insensitively.
pub const BEARER_SCHEME: &str = "bearer";

/// Pull the token out of an `Authorization` header value.
///
/// Returns `Ok(None)` when the header is absent or empty: an anonymous request
/// is not an error at this layer. Anything other than exactly
/// `<scheme> <token>` with a `bearer` scheme and a non-empty token is
/// [`AuthError::MalformedHeader`].
pub fn extract_bearer(header_value: Option<&str>) -> AuthResult<Option<&str>> {
    let Some(value) = header_value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty() => {
            Ok(Some(*token))
        }
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Supplies the verification key for a token, given its unverified header.
///
/// Implemented for any matching closure so callers can inject key material
/// without the codec knowing where it comes from.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, header: &Header) -> AuthResult<DecodingKey>;
}

impl<F> KeyResolver for F
where
    F: Fn(&Header) -> AuthResult<DecodingKey> + Send + Sync,
{
    fn resolve(&self, header: &Header) -> AuthResult<DecodingKey> {
        self(header)
    }
}

/// A validated bearer token.
///
/// Only [`TokenCodec::parse`] constructs these, so holding one means the
/// signature and expiry were checked. There is no separate validity flag: an
/// invalid token never exists as a value.
#[derive(Clone)]
pub struct Token {
    raw: String,
    header: Header,
    claims: Map<String, Value>,
    algorithm: Algorithm,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("algorithm", &self.algorithm)
            .field("subject", &self.subject())
            .finish_non_exhaustive()
    }
}

impl Token {
    /// The encoded token as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// All decoded claims.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A string claim by name.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// The `sub` claim.
    pub fn subject(&self) -> Option<&str> {
        self.claim_str("sub")
    }

    /// The `exp` claim as a Unix timestamp.
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get("exp").and_then(Value::as_i64)
    }

    pub fn signing_method(&self) -> Algorithm {
        self.algorithm
    }
}

/// Verifies JWTs against an injected key resolver and a fixed signing method.
#[derive(Clone)]
pub struct TokenCodec {
    key_resolver: Arc<dyn KeyResolver>,
    algorithm: Algorithm,
    audience: Option<String>,
}

impl TokenCodec {
    /// Create a codec that accepts only `algorithm`.
    pub fn new(key_resolver: impl KeyResolver + 'static, algorithm: Algorithm) -> Self {
        Self {
            key_resolver: Arc::new(key_resolver),
            algorithm,
            audience: None,
        }
    }

    /// HS256 codec with a shared secret.
    pub fn hs256(secret: &[u8]) -> Self {
        let key = DecodingKey::from_secret(secret);
        Self::new(move |_: &Header| Ok(key.clone()), Algorithm::HS256)
    }

    /// Require the `aud` claim to contain `audience`.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Validate structure, signing method, signature and expiry.
    ///
    /// `exp` is optional; when present it must not be in the past. No leeway
    /// is applied.
    pub fn parse(&self, token: &str) -> AuthResult<Token> {
        if token.split('.').count() != 3 {
            return Err(AuthError::InvalidToken(
                "token must have three segments".to_string(),
            ));
        }

        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid JWT header: {}", e)))?;

        if header.alg != self.algorithm {
            return Err(AuthError::InvalidToken(format!(
                "unexpected signing method {:?}",
                header.alg
            )));
        }

        let key = self.key_resolver.resolve(&header)?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|e| {
            AuthError::InvalidToken(format!("Signature verification failed: {}", e))
        })?;

        debug!("JWT verified for subject: {:?}", data.claims.get("sub"));

        Ok(Token {
            raw: token.to_string(),
            header: data.header,
            claims: data.claims,
            algorithm: self.algorithm,
        })
    }
}
