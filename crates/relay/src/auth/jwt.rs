use anyhow::{bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use picedit_common::types::UserId;
use serde::{Deserialize, Serialize};
use chrono::Utc;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Verifies HS256 access tokens issued by the account service.
///
/// The relay only needs `issue_user_token` for tests and local tooling;
/// production tokens come from the login flow that shares the secret.
#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_user_token(&self, user_id: UserId) -> anyhow::Result<String> {
        self.issue_user_token_at(user_id, current_unix_timestamp())
    }

    fn issue_user_token_at(&self, user_id: UserId, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_user_token(&self, token: &str) -> anyhow::Result<UserId> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        claims
            .sub
            .parse::<UserId>()
            .with_context(|| format!("access token subject '{}' is not a user id", claims.sub))
    }
}

fn current_unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::{
        current_unix_timestamp, AccessTokenClaims, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS,
    };
    use chrono::Utc;
    use jsonwebtoken::{decode, encode, Algorithm, EncodingKey, Header};
    use picedit_common::types::UserId;
    use serde::Serialize;

    const TEST_SECRET: &str = "picedit_test_secret_that_is_definitely_long_enough";

    fn signed(sub: &'static str) -> String {
        #[derive(Serialize)]
        struct RawClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let now = current_unix_timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &RawClaims { sub, iat: now, exp: now + ACCESS_TOKEN_TTL_SECONDS },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode")
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn issues_and_validates_user_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let user_id = UserId(1_879_048_192_512_345_678);

        let token = service.issue_user_token(user_id).expect("token should be issued");
        let validated = service.validate_user_token(&token).expect("token should validate");

        assert_eq!(validated, user_id);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_user_token(UserId(7)).expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(service.validate_user_token(&tampered).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let other = JwtAccessTokenService::new("another_secret_that_is_also_long_enough_123")
            .expect("service should initialize");
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = other.issue_user_token(UserId(7)).expect("token should be issued");

        assert!(service.validate_user_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp()
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token =
            service.issue_user_token_at(UserId(7), issued_at).expect("token should be issued");

        assert!(service.validate_user_token(&token).is_err());
    }

    #[test]
    fn subject_must_be_a_positive_decimal_id() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");

        assert_eq!(
            service.validate_user_token(&signed("42")).expect("numeric subject should validate"),
            UserId(42)
        );
        assert!(service.validate_user_token(&signed("not-a-user")).is_err());
        assert!(service.validate_user_token(&signed("-5")).is_err());
    }

    #[test]
    fn issued_claims_use_wall_clock_seconds() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_user_token(UserId(7)).expect("token should be issued");
        let claims = decode::<AccessTokenClaims>(&token, &service.decoding_key, &service.validation)
            .expect("token should decode")
            .claims;

        assert!((claims.iat - Utc::now().timestamp()).abs() <= 2);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECONDS);
        assert_eq!(claims.sub, "7");
    }
}
