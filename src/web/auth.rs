use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

pub const TOKEN_ISSUER: &str = "nbpod";
pub const TOKEN_COOKIE: &str = "nbpod_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // uid
    #[serde(default)]
    pub can_demo: bool,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
}

pub fn create_token(uid: &str, can_demo: bool, secret: &str, duration_hours: i64) -> Result<String> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::hours(duration_hours))
        .ok_or_else(|| anyhow::anyhow!("token lifetime out of range"))?;

    let claims = Claims {
        sub: uid.to_string(),
        can_demo,
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
        iss: TOKEN_ISSUER.to_string(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[TOKEN_ISSUER]);

    let token_data: TokenData<Claims> = decode(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_uid_and_demo_access() {
        let token = create_token("u1", true, "secret", 1).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.can_demo);
        assert_eq!(claims.iss, TOKEN_ISSUER);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let token = create_token("u1", true, "secret", 1).unwrap();
        assert!(decode_token(&token, "other").is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = create_token("u1", true, "secret", -2).unwrap();
        assert!(decode_token(&token, "secret").is_err());
    }
}
