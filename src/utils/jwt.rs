use crate::entities::UserRole;
use crate::error::{AppError, AppResult};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Access token claims. Tokens are minted by the identity service
/// with the shared secret, this side only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub role: UserRole,
}

#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(AppError::JwtError)
    }

    pub fn authenticate(&self, token: &str) -> AppResult<CurrentUser> {
        let claims = self.verify_token(token)?;
        let id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid subject in access token".to_string()))?;
        Ok(CurrentUser {
            id,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn sign(secret: &str, sub: &str, role: UserRole, ttl: Duration) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            role,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let service = JwtService::new("secret");
        let token = sign("secret", "42", UserRole::Organizer, Duration::hours(1));
        let user = service.authenticate(&token).unwrap();
        assert_eq!(
            user,
            CurrentUser {
                id: 42,
                role: UserRole::Organizer
            }
        );
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let service = JwtService::new("secret");

        let forged = sign("other", "42", UserRole::Admin, Duration::hours(1));
        assert!(matches!(
            service.authenticate(&forged),
            Err(AppError::JwtError(_))
        ));

        let expired = sign("secret", "42", UserRole::Admin, Duration::hours(-2));
        assert!(service.authenticate(&expired).is_err());
    }

    #[test]
    fn non_numeric_subject_is_an_auth_error() {
        let service = JwtService::new("secret");
        let token = sign("secret", "abc", UserRole::Attendee, Duration::hours(1));
        assert!(matches!(
            service.authenticate(&token),
            Err(AppError::AuthError(_))
        ));
    }
}
