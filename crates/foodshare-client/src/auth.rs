use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::rest::RestClient;

/// Claims we read from a session token. The signature is the backend's
/// business; locally the token is only inspected for its subject and expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub exp: i64,
}

impl SessionClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_none_or(|at| at <= now)
    }
}

/// Read the claims of an access token without verifying its signature.
pub fn inspect_token(token: &str) -> Result<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| ClientError::Decode(format!("access token: {}", e)))
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
}

/// The signed-in user according to the auth service, or `None` when there is
/// no session, the token has expired, or the service rejects it.
pub async fn current_user(rest: &RestClient) -> Result<Option<Uuid>> {
    let Some(token) = rest.config().access_token.as_deref() else {
        return Ok(None);
    };

    match inspect_token(token) {
        Ok(claims) if claims.is_expired(Utc::now()) => {
            info!(user = %claims.sub, "Access token expired, treating as signed out");
            return Ok(None);
        }
        Ok(_) => {}
        // Opaque tokens are left to the auth service to judge.
        Err(e) => debug!("Could not inspect access token: {}", e),
    }

    let url = rest.config().auth_user_url()?;
    match rest.get_json::<AuthUser>(url).await {
        Ok(user) => Ok(Some(user.id)),
        Err(ClientError::Unauthorized) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Claims {
        sub: Uuid,
        exp: i64,
        role: &'static str,
    }

    fn token(sub: Uuid, exp: DateTime<Utc>) -> String {
        encode(
            &Header::default(),
            &Claims { sub, exp: exp.timestamp(), role: "authenticated" },
            &EncodingKey::from_secret(b"not-the-server-secret"),
        )
        .unwrap()
    }

    #[test]
    fn reads_subject_and_expiry_without_the_secret() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let claims = inspect_token(&token(user, now + TimeDelta::hours(1))).unwrap();

        assert_eq!(claims.sub, user);
        assert!(!claims.is_expired(now));
        assert!(claims.is_expired(now + TimeDelta::hours(2)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(inspect_token("not-a-jwt"), Err(ClientError::Decode(_))));
    }
}
