//! Credential service: mints, verifies, revokes signed bearer credentials.
//!
//! Credentials are HS256 JWTs (symmetric MAC over the compact
//! `header.payload.signature` form). Access credentials are stateless;
//! refresh credentials are additionally keyed into the session store by
//! `jti` and become invalid the moment that record is deleted.
//!
//! Externally every verification failure is the same `Error::Authentication`;
//! the specific cause is only logged.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::principal::UserPrincipal;
use crate::session::{SessionRecord, SessionStore};
use crate::users::User;
use crate::{Error, Result};

/// Distinguishes the two credential kinds inside the signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed claims carried by both credential kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: user id.
    pub sub: String,
    /// User email; only present in access credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Roles minted at issuance; only present in access credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Unique credential id; session-store key for refresh credentials.
    pub jti: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds). Invalid at exactly `exp`.
    pub exp: i64,
    pub kind: TokenKind,
    /// Optional device label for refresh credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// A minted credential with its envelope metadata.
#[derive(Debug, Clone)]
pub struct SignedCredential {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Access + refresh pair returned by login and rotation.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SignedCredential,
    pub refresh: SignedCredential,
}

/// Signing configuration, read-only after startup.
#[derive(Clone)]
pub struct CredentialConfig {
    pub signing_key: Vec<u8>,
    /// Key id stamped into the JWT header for future rotation.
    pub key_id: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl CredentialConfig {
    pub fn new(signing_key: impl Into<Vec<u8>>) -> Self {
        Self {
            signing_key: signing_key.into(),
            key_id: "v1".into(),
            access_ttl: Duration::minutes(30),
            refresh_ttl: Duration::days(7),
        }
    }
}

pub struct CredentialService {
    config: CredentialConfig,
    sessions: Arc<dyn SessionStore>,
}

impl CredentialService {
    pub fn new(config: CredentialConfig, sessions: Arc<dyn SessionStore>) -> Self {
        Self { config, sessions }
    }

    pub fn access_ttl(&self) -> Duration {
        self.config.access_ttl
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.config.key_id.clone());
        encode(
            &header,
            claims,
            &EncodingKey::from_secret(&self.config.signing_key),
        )
        .map_err(|e| Error::Internal(format!("credential encode: {e}")))
    }

    /// Decode and MAC-verify a token. Expiry and kind are checked by the
    /// caller via [`check_claims`] so the boundary is exact.
    fn decode_claims(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.config.signing_key),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(cause = %e, "credential signature rejected");
            Error::Authentication
        })
    }

    /// Mint a short-lived stateless access credential.
    pub fn mint_access(&self, user: &User) -> Result<SignedCredential> {
        let now = Utc::now();
        let expires_at = now + self.config.access_ttl;
        let claims = Claims {
            sub: user.id.clone(),
            email: Some(user.email.clone()),
            roles: user.roles.clone(),
            jti: crate::uuid::uuidv4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kind: TokenKind::Access,
            device: None,
        };
        Ok(SignedCredential {
            token: self.encode_claims(&claims)?,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Mint a refresh credential and record its session.
    pub async fn mint_refresh(
        &self,
        user: &User,
        device: Option<&str>,
    ) -> Result<SignedCredential> {
        let now = Utc::now();
        let expires_at = now + self.config.refresh_ttl;
        let claims = Claims {
            sub: user.id.clone(),
            email: None,
            roles: Vec::new(),
            jti: crate::uuid::uuidv4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kind: TokenKind::Refresh,
            device: device.map(|d| d.to_string()),
        };
        let token = self.encode_claims(&claims)?;
        self.sessions
            .put(SessionRecord {
                jti: claims.jti.clone(),
                user_id: user.id.clone(),
                issued_at: now,
                expires_at,
                device: claims.device.clone(),
                metadata: Default::default(),
            })
            .await?;
        Ok(SignedCredential {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Mint a full access + refresh pair.
    pub async fn mint_pair(&self, user: &User, device: Option<&str>) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.mint_access(user)?,
            refresh: self.mint_refresh(user, device).await?,
        })
    }

    /// Verify an access credential. Pure: never consults the session store.
    pub fn verify_access(&self, token: &str) -> Result<UserPrincipal> {
        let claims = self.decode_claims(token)?;
        check_claims(&claims, Utc::now(), TokenKind::Access)?;
        Ok(UserPrincipal {
            id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        })
    }

    /// Verify a refresh credential: signature, kind, expiry, and an
    /// unrevoked session record for its jti.
    pub async fn verify_refresh(&self, token: &str) -> Result<SessionRecord> {
        let claims = self.decode_claims(token)?;
        check_claims(&claims, Utc::now(), TokenKind::Refresh)?;
        match self.sessions.get(&claims.jti).await? {
            Some(record) if record.user_id == claims.sub => Ok(record),
            _ => {
                debug!(jti = %claims.jti, "refresh credential has no live session");
                Err(Error::Authentication)
            }
        }
    }

    /// Rotate a refresh credential: insert the successor's session, then
    /// delete the predecessor's. Under concurrent rotation of the same
    /// credential the delete succeeds exactly once; losers remove the
    /// session they just inserted and fail authentication, so the old
    /// credential stays valid only until exactly one rotation commits.
    ///
    /// `user` must be the current directory record for the credential's
    /// subject; roles are re-derived here, not copied from the old token.
    pub async fn rotate(&self, refresh_token: &str, user: &User) -> Result<TokenPair> {
        let old = self.verify_refresh(refresh_token).await?;
        if old.user_id != user.id {
            debug!("rotate called with mismatched user");
            return Err(Error::Authentication);
        }

        let device = old.device.as_deref();
        let new_refresh = self.mint_refresh(user, device).await?;

        if !self.sessions.delete(&old.jti).await? {
            // Lost the race: another rotation already consumed the old jti.
            let _ = self.sessions.delete(&new_refresh.jti).await;
            return Err(Error::Authentication);
        }

        Ok(TokenPair {
            access: self.mint_access(user)?,
            refresh: new_refresh,
        })
    }

    /// Revoke one session. Idempotent; absent jti is a no-op.
    pub async fn revoke(&self, jti: &str) -> Result<()> {
        self.sessions.delete(jti).await?;
        Ok(())
    }

    /// Revoke every session for a user, returning the count removed.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64> {
        self.sessions.delete_by_user(user_id).await
    }
}

/// Kind and expiry checks, separated for exact-boundary semantics:
/// a credential is valid iff `now < exp`. Zero clock-skew tolerance.
fn check_claims(claims: &Claims, now: DateTime<Utc>, expected: TokenKind) -> Result<()> {
    if claims.kind != expected {
        debug!(?claims.kind, ?expected, "credential kind mismatch");
        return Err(Error::Authentication);
    }
    let exp = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or(Error::Authentication)?;
    if now >= exp {
        debug!(jti = %claims.jti, "credential expired");
        return Err(Error::Authentication);
    }
    Ok(())
}
