//! Signed bearer tokens carrying identity and an optional tenant scope.
//!
//! Access tokens may carry a tenant scope; refresh tokens never do. The codec
//! performs no authorization: callers must check membership before asking for
//! a scoped token.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::SecurityConfig;
use crate::types::{TenantId, UserId};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing secret is not configured")]
    Configuration,

    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Malformed(String),

    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// HMAC algorithms accepted for signing. Exactly one is active per codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl SigningAlgorithm {
    fn as_jwt(&self) -> Algorithm {
        match self {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::HS384 => Algorithm::HS384,
            SigningAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
        };
        f.write_str(name)
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(SigningAlgorithm::HS256),
            "HS384" => Ok(SigningAlgorithm::HS384),
            "HS512" => Ok(SigningAlgorithm::HS512),
            other => Err(format!("unsupported signing algorithm: {}", other)),
        }
    }
}

/// Claims embedded in every token.
///
/// `tenant_id` is omitted from the payload entirely when absent, never
/// serialised as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

/// Access and refresh token pair returned at login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

pub struct TokenCodec {
    keys: Option<(EncodingKey, DecodingKey)>,
    algorithm: SigningAlgorithm,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(security: &SecurityConfig) -> Self {
        Self::from_parts(
            &security.jwt_secret,
            security.jwt_algorithm,
            &security.jwt_issuer,
            security.access_ttl_secs,
            security.refresh_ttl_secs,
        )
    }

    pub fn from_parts(
        secret: &str,
        algorithm: SigningAlgorithm,
        issuer: &str,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        let keys = if secret.is_empty() {
            None
        } else {
            Some((
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            ))
        };

        tracing::info!("Initializing token codec with issuer {} ({})", issuer, algorithm);

        Self {
            keys,
            algorithm,
            issuer: issuer.to_string(),
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Issue an access/refresh pair. Only the access token carries `tenant`.
    pub fn issue_pair(
        &self,
        user_id: UserId,
        username: &str,
        tenant: Option<TenantId>,
    ) -> Result<TokenPair, TokenError> {
        let now = Utc::now();

        let access_token = self.mint(user_id, username, tenant, self.access_ttl, now)?;
        let refresh_token = self.mint(user_id, username, None, self.refresh_ttl, now)?;

        tracing::info!(
            "Issued token pair for user {} (tenant scope: {})",
            user_id,
            describe_scope(tenant)
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate signature, algorithm, issuer, expiry (`now >= exp` fails) and
    /// the presence of a non-zero user id.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (_, decoding_key) = self.keys.as_ref().ok_or(TokenError::Configuration)?;

        let mut validation = Validation::new(self.algorithm.as_jwt());
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::InvalidAlgorithm => "unexpected signing algorithm".to_string(),
                _ => e.to_string(),
            };
            tracing::warn!("Token validation failed: {}", reason);
            TokenError::Malformed(reason)
        })?;

        let claims = data.claims;

        if now.timestamp() >= claims.exp {
            tracing::warn!("Token validation failed: token has expired");
            return Err(TokenError::Expired);
        }

        if claims.user_id.is_zero() {
            tracing::warn!("Token validation failed: missing required claim: user_id");
            return Err(TokenError::MissingClaim("user_id"));
        }

        tracing::debug!(
            "Token validated for user {} (tenant scope: {})",
            claims.user_id,
            describe_scope(claims.tenant_id)
        );

        Ok(claims)
    }

    /// Exchange a refresh token for a new pair scoped to `tenant`.
    ///
    /// The refresh token carries no scope of its own; the caller supplies it.
    pub fn refresh(&self, refresh_token: &str, tenant: Option<TenantId>) -> Result<TokenPair, TokenError> {
        let claims = self.validate(refresh_token)?;
        tracing::info!("Refreshing token pair for user {}", claims.user_id);
        self.issue_pair(claims.user_id, &claims.username, tenant)
    }

    /// Re-issue an access token with the same identity and a new scope.
    ///
    /// Performs no authorization.
    pub fn rescope(&self, access_token: &str, tenant: Option<TenantId>) -> Result<String, TokenError> {
        let claims = self.validate(access_token)?;

        tracing::info!(
            "Rescoping token for user {} from {} to {}",
            claims.user_id,
            describe_scope(claims.tenant_id),
            describe_scope(tenant)
        );

        self.mint(claims.user_id, &claims.username, tenant, self.access_ttl, Utc::now())
    }

    fn mint(
        &self,
        user_id: UserId,
        username: &str,
        tenant: Option<TenantId>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            user_id,
            username: username.to_string(),
            tenant_id: tenant,
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let (encoding_key, _) = self.keys.as_ref().ok_or(TokenError::Configuration)?;
        encode(&Header::new(self.algorithm.as_jwt()), claims, encoding_key).map_err(|e| {
            tracing::error!("Failed to sign token for user {}: {}", claims.user_id, e);
            TokenError::Signing(e)
        })
    }
}

fn describe_scope(tenant: Option<TenantId>) -> String {
    tenant.map_or_else(|| "<global>".to_string(), |t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-with-enough-entropy";

    fn codec() -> TokenCodec {
        TokenCodec::from_parts(SECRET, SigningAlgorithm::HS256, "silocore", 3600, 7 * 3600)
    }

    /// Decode the payload as raw JSON to inspect which claims are present.
    fn payload_json(token: &str) -> serde_json::Value {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        decode::<serde_json::Value>(token, &DecodingKey::from_secret(SECRET.as_bytes()), &validation)
            .unwrap()
            .claims
    }

    fn claims_expiring_at(exp: i64) -> Claims {
        Claims {
            iss: "silocore".to_string(),
            iat: exp - 60,
            exp,
            user_id: UserId::new(7),
            username: "ada@example.com".to_string(),
            tenant_id: Some(TenantId::new(3)),
        }
    }

    #[test]
    fn access_token_round_trips_identity_and_scope() {
        let codec = codec();
        let pair = codec
            .issue_pair(UserId::new(7), "ada@example.com", Some(TenantId::new(3)))
            .unwrap();

        let claims = codec.validate(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, UserId::new(7));
        assert_eq!(claims.username, "ada@example.com");
        assert_eq!(claims.tenant_id, Some(TenantId::new(3)));
        assert_eq!(claims.iss, "silocore");
        assert_eq!(pair.expires_in, 3600);
    }

    #[test]
    fn refresh_token_never_carries_scope() {
        let codec = codec();
        for scope in [None, Some(TenantId::new(1)), Some(TenantId::new(99))] {
            let pair = codec.issue_pair(UserId::new(7), "ada@example.com", scope).unwrap();
            let claims = codec.validate(&pair.refresh_token).unwrap();
            assert_eq!(claims.tenant_id, None);
        }
    }

    #[test]
    fn absent_scope_is_omitted_from_payload() {
        let codec = codec();
        let pair = codec.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();
        let payload = payload_json(&pair.access_token);
        assert!(payload.get("tenant_id").is_none());

        let scoped = codec
            .issue_pair(UserId::new(7), "ada@example.com", Some(TenantId::new(5)))
            .unwrap();
        assert_eq!(payload_json(&scoped.access_token)["tenant_id"], 5);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let codec = codec();
        let now = Utc::now();

        let expired = codec.sign(&claims_expiring_at(now.timestamp() - 1)).unwrap();
        assert!(matches!(codec.validate_at(&expired, now), Err(TokenError::Expired)));

        let at_boundary = codec.sign(&claims_expiring_at(now.timestamp())).unwrap();
        assert!(matches!(codec.validate_at(&at_boundary, now), Err(TokenError::Expired)));

        let live = codec.sign(&claims_expiring_at(now.timestamp() + 1)).unwrap();
        assert!(codec.validate_at(&live, now).is_ok());
    }

    #[test]
    fn zero_user_id_is_a_missing_claim() {
        let codec = codec();
        let mut claims = claims_expiring_at(Utc::now().timestamp() + 60);
        claims.user_id = UserId::new(0);
        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.validate(&token), Err(TokenError::MissingClaim("user_id"))));
    }

    #[test]
    fn rejects_tampered_and_foreign_tokens() {
        let codec = codec();
        let pair = codec.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();

        let mut tampered = pair.access_token.clone();
        tampered.pop();
        tampered.push('x');
        assert!(matches!(codec.validate(&tampered), Err(TokenError::Malformed(_))));

        let other = TokenCodec::from_parts("another-secret", SigningAlgorithm::HS256, "silocore", 3600, 3600);
        let foreign = other.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();
        assert!(matches!(codec.validate(&foreign.access_token), Err(TokenError::Malformed(_))));

        assert!(matches!(codec.validate("not-a-token"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn rejects_algorithm_substitution() {
        let hs256 = codec();
        let hs512 = TokenCodec::from_parts(SECRET, SigningAlgorithm::HS512, "silocore", 3600, 3600);

        let pair = hs512.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();
        assert!(matches!(hs256.validate(&pair.access_token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn rejects_unexpected_issuer() {
        let codec = codec();
        let other = TokenCodec::from_parts(SECRET, SigningAlgorithm::HS256, "someone-else", 3600, 3600);
        let pair = other.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();
        assert!(matches!(codec.validate(&pair.access_token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let codec = TokenCodec::from_parts("", SigningAlgorithm::HS256, "silocore", 3600, 3600);
        assert!(matches!(
            codec.issue_pair(UserId::new(7), "ada@example.com", None),
            Err(TokenError::Configuration)
        ));
        assert!(matches!(codec.validate("a.b.c"), Err(TokenError::Configuration)));
    }

    #[test]
    fn refresh_applies_supplied_scope() {
        let codec = codec();
        let pair = codec
            .issue_pair(UserId::new(7), "ada@example.com", Some(TenantId::new(3)))
            .unwrap();

        let refreshed = codec.refresh(&pair.refresh_token, Some(TenantId::new(4))).unwrap();
        let claims = codec.validate(&refreshed.access_token).unwrap();
        assert_eq!(claims.tenant_id, Some(TenantId::new(4)));
        assert_eq!(claims.user_id, UserId::new(7));

        let global = codec.refresh(&pair.refresh_token, None).unwrap();
        assert_eq!(codec.validate(&global.access_token).unwrap().tenant_id, None);
    }

    #[test]
    fn rescope_preserves_identity() {
        let codec = codec();
        let pair = codec.issue_pair(UserId::new(7), "ada@example.com", None).unwrap();

        let token = codec.rescope(&pair.access_token, Some(TenantId::new(8))).unwrap();
        let claims = codec.validate(&token).unwrap();
        assert_eq!(claims.user_id, UserId::new(7));
        assert_eq!(claims.username, "ada@example.com");
        assert_eq!(claims.tenant_id, Some(TenantId::new(8)));

        // the original token is untouched
        assert_eq!(codec.validate(&pair.access_token).unwrap().tenant_id, None);
    }
}
