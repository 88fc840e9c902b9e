//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id in `sub` and optional group
//! ids in `groups`. The engine only ever sees the resolved
//! [`RequestContext`].

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use mms_core::{Error, Result};
use mms_engine::RequestContext;

use crate::error::ApiError;
use crate::AppState;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub audience: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("audience", &self.audience)
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            audience: None,
        }
    }

    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MMS_JWT_SECRET` | required | HS256 signing secret |
    /// | `MMS_JWT_AUDIENCE` | unset | Required `aud` claim |
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("MMS_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("MMS_JWT_SECRET must be set".into()))?;
        let audience = std::env::var("MMS_JWT_AUDIENCE").ok().filter(|s| !s.is_empty());
        Ok(Self { secret, audience })
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

/// Verifies bearer tokens.
pub struct Authenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    audience: Option<String>,
}

impl Authenticator {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }
        Self {
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            validation,
            audience: config.audience.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))
    }

    /// Sign a token for `user`, valid for `ttl_secs`.
    pub fn issue(&self, user: &str, groups: &[String], ttl_secs: i64) -> Result<String> {
        let claims = Claims {
            sub: user.to_string(),
            groups: groups.to_vec(),
            exp: chrono::Utc::now().timestamp() + ttl_secs,
            aud: self.audience.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| Error::Authentication("Bearer token required".into()))?;

        let claims = state.auth.verify(token)?;
        if claims.sub.is_empty() {
            return Err(Error::Authentication("Token has no subject".into()).into());
        }

        let mut ctx = RequestContext::new(state.engine.iris(), &claims.sub, &claims.groups);
        if let Some(id) = parts.headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
            ctx = ctx.with_request_id(id);
        }
        Ok(Caller(ctx))
    }
}
