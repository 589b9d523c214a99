use super::CredentialVerifier;
use crate::config::JwtConfig;
use crate::error::{RelayError, RelayResult};
use crate::websocket::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Claims carried by relay access tokens.
///
/// Tokens issued by the account service put the user id in `userId`;
/// generic issuers only set `sub`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub sub: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Ids may be issued as strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl Claims {
    pub fn subject(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// JWT-backed credential verifier.
///
/// Signature and `exp` are always checked. Only the configured algorithm is
/// accepted, so an RS256 deployment never validates an HS256 token.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn from_secret(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    pub fn from_rsa_pem(public_key_pem: &str) -> RelayResult<Self> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| RelayError::Config(format!("invalid JWT public key: {}", e)))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// Prefer the RS256 public key when both are configured
    pub fn from_config(config: &JwtConfig) -> RelayResult<Self> {
        let verifier = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => Self::from_rsa_pem(pem)?,
            (None, Some(secret)) => Self::from_secret(secret),
            (None, None) => {
                return Err(RelayError::Config(
                    "JWT_SECRET or JWT_PUBLIC_KEY_PEM must be set".to_string(),
                ))
            }
        };

        Ok(match &config.issuer {
            Some(issuer) => verifier.with_issuer(issuer),
            None => verifier,
        })
    }

    /// Require `iss` to be present and equal to `issuer`
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self.validation.set_required_spec_claims(&["exp", "iss"]);
        self
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;
        Self { key, validation }
    }

    pub fn decode_claims(&self, token: &str) -> RelayResult<Claims> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> RelayResult<UserId> {
        let claims = self.decode_claims(token).map_err(|e| {
            tracing::debug!(error = %e, "credential rejected");
            e
        })?;

        claims
            .subject()
            .map(UserId::new)
            .ok_or_else(|| RelayError::unauthorized("Token carries no user id"))
    }
}
