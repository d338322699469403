//! Access/refresh token lifecycle.
//!
//! Access tokens are verified statelessly. Refresh tokens are additionally
//! mirrored onto the user document, and that stored value is a
//! compare-and-swap cell: a rotation only lands if the stored token is still
//! the one presented. A superseded or cleared token therefore fails with
//! [`CoreError::SessionRevoked`] even before it expires, and of two
//! concurrent rotations with the same token exactly one wins.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_types::api::{AccessClaims, RefreshClaims};
use vidtube_types::models::User;

use crate::error::{CoreError, CoreResult};
use crate::run_blocking;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl SessionConfig {
    /// Defaults to 15 minute access tokens and 10 day refresh tokens.
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(10),
        }
    }

    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }
}

/// Never log these.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct SessionManager {
    db: Arc<Database>,
    access: Keys,
    refresh: Keys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, config: SessionConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            db,
            access: Keys::new(&config.access_secret),
            refresh: Keys::new(&config.refresh_secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            validation,
        }
    }

    /// Signs a fresh pair and stores the refresh token on the user,
    /// replacing whatever was there.
    pub async fn issue(&self, user_id: Uuid) -> CoreResult<TokenPair> {
        let user = run_blocking(&self.db, move |db| db.get_user_by_id(user_id))
            .await?
            .ok_or_else(|| CoreError::Persistence(anyhow!("user {} could not be loaded", user_id)))?;

        let pair = self.sign_pair(&user)?;

        let token = pair.refresh_token.clone();
        let saved = run_blocking(&self.db, move |db| db.set_refresh_token(user_id, Some(&token))).await?;
        if !saved {
            return Err(CoreError::Persistence(anyhow!(
                "user {} disappeared before the session was saved",
                user_id
            )));
        }

        debug!(user_id = %user_id, "Issued session");
        Ok(pair)
    }

    pub fn verify_access(&self, token: &str) -> CoreResult<Uuid> {
        Ok(self.decode_access(token)?.sub)
    }

    pub fn decode_access(&self, token: &str) -> CoreResult<AccessClaims> {
        decode::<AccessClaims>(token, &self.access.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(classify)
    }

    /// Trades a refresh token for a new pair, invalidating the one presented.
    pub async fn rotate(&self, presented: &str) -> CoreResult<TokenPair> {
        let claims = decode::<RefreshClaims>(presented, &self.refresh.decoding, &self.validation)
            .map_err(classify)?
            .claims;
        let user_id = claims.sub;

        let Some(user) = run_blocking(&self.db, move |db| db.get_user_by_id(user_id)).await? else {
            warn!(user_id = %user_id, "Refresh token for a user that no longer exists");
            return Err(CoreError::SessionRevoked);
        };

        if user.refresh_token.as_deref() != Some(presented) {
            warn!(user_id = %user_id, "Refresh token reuse detected");
            return Err(CoreError::SessionRevoked);
        }

        let pair = self.sign_pair(&user)?;

        let expected = presented.to_string();
        let next = pair.refresh_token.clone();
        let swapped = run_blocking(&self.db, move |db| {
            db.swap_refresh_token(user_id, &expected, &next)
        })
        .await?;
        if !swapped {
            warn!(user_id = %user_id, "Refresh token superseded by a concurrent rotation");
            return Err(CoreError::SessionRevoked);
        }

        debug!(user_id = %user_id, "Rotated session");
        Ok(pair)
    }

    /// Clears the stored refresh token. Revoking twice, or revoking an
    /// unknown user, is not an error.
    pub async fn revoke(&self, user_id: Uuid) -> CoreResult<()> {
        let cleared = run_blocking(&self.db, move |db| db.set_refresh_token(user_id, None)).await?;
        if !cleared {
            debug!(user_id = %user_id, "Revoke for unknown user ignored");
        }
        Ok(())
    }

    fn sign_pair(&self, user: &User) -> CoreResult<TokenPair> {
        let now = Utc::now();

        let access = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4(),
        };
        let refresh = RefreshClaims {
            sub: user.id,
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            jti: Uuid::new_v4(),
        };

        let access_token =
            encode(&Header::default(), &access, &self.access.encoding).map_err(CoreError::Signing)?;
        let refresh_token =
            encode(&Header::default(), &refresh, &self.refresh.encoding).map_err(CoreError::Signing)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

/// Signature is checked before expiry, so only a correctly signed token can
/// come back as expired.
fn classify(err: jsonwebtoken::errors::Error) -> CoreError {
    match err.kind() {
        ErrorKind::ExpiredSignature => CoreError::TokenExpired,
        _ => CoreError::TokenInvalid,
    }
}
