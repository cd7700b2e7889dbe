//! Bearer token claims.
//!
//! Tokens are ES256-signed JWTs. The agent only needs two claims from them:
//! the audience, which names the events API host, and the feature scopes
//! that gate each stream. The signature is not verified here; the server
//! verifies every request it receives.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Audience carried by legacy tokens that predate per-region hosts.
pub const AUDIENCE_DEPRECATED: &str = "com.1password.streamingservice";

/// The only signing algorithm the events API issues.
const EXPECTED_ALGORITHM: Algorithm = Algorithm::ES256;

/// Errors that can occur while decoding token claims.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimsError {
    /// The token is not three dot-separated segments.
    #[error("token is not a compact JWT")]
    Malformed,

    /// A segment is not valid base64url.
    #[error("token {segment} is not valid base64url")]
    Encoding { segment: &'static str },

    /// A segment is not the expected JSON.
    #[error("token {segment} is not valid JSON: {message}")]
    Json {
        segment: &'static str,
        message: String,
    },

    /// The token is signed with an algorithm other than ES256.
    #[error("unsupported token algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// The token's audience does not name an API host.
    #[error("token does not have a url")]
    NoEventsUrl,
}

impl ClaimsError {
    fn from_jwt(err: jsonwebtoken::errors::Error, segment: &'static str) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken => ClaimsError::Malformed,
            ErrorKind::Base64(_) | ErrorKind::Utf8(_) => ClaimsError::Encoding { segment },
            _ => ClaimsError::Json {
                segment,
                message: err.to_string(),
            },
        }
    }
}

/// The claims the agent reads from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Audience; the first entry is the events API host.
    #[serde(rename = "aud", default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,

    /// Feature scopes granted to the token.
    #[serde(rename = "1password.com/fts", default)]
    pub features: Vec<String>,
}

impl TokenClaims {
    /// Decodes the claims of `token` without verifying its signature.
    ///
    /// Registered claims such as `exp` are not checked either.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let token = token.trim();
        if token.split('.').count() != 3 {
            return Err(ClaimsError::Malformed);
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ClaimsError::from_jwt(e, "header"))?;
        if header.alg != EXPECTED_ALGORITHM {
            return Err(ClaimsError::UnsupportedAlgorithm(header.alg));
        }

        let mut validation = Validation::new(EXPECTED_ALGORITHM);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| ClaimsError::from_jwt(e, "payload"))
    }

    /// Returns true if the token grants `scope`.
    pub fn has_feature(&self, scope: &str) -> bool {
        self.features.iter().any(|f| f == scope)
    }

    /// Returns the base URL of the events API this token is issued for.
    pub fn events_url(&self) -> Result<String, ClaimsError> {
        match self.audience.first() {
            Some(aud) if aud != AUDIENCE_DEPRECATED && !aud.is_empty() => {
                Ok(format!("https://{}", aud))
            }
            _ => Err(ClaimsError::NoEventsUrl),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
pub(crate) fn encode_test_token(header: &serde_json::Value, claims: &serde_json::Value) -> String {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let header = URL_SAFE_NO_PAD.encode(header.to_string());
    let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{claims}.c2lnbmF0dXJl")
}
