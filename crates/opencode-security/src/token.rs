//! Role tokens: RS256-signed JWTs carrying a role claim.
//!
//! Tokens are issued by the CLI with the project's private key and
//! verified against `authentication.publicKey` from the security
//! config. Revocation is a `jti` list check.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SecurityError, SecurityResult};
use crate::types::AuthenticationConfig;

/// File name of the signing key, relative to the project root.
pub const PRIVATE_KEY_FILE_NAME: &str = ".opencode-security-key.pem";

/// Claims carried by a role token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTokenClaims {
    /// The role this token grants.
    pub role: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Token ID, checked against the revocation list.
    pub jti: String,
    /// Optional project scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// Sign a role token with an RSA private key (PEM).
///
/// # Errors
///
/// Returns [`SecurityError::KeyError`] for an unusable key and
/// [`SecurityError::TokenInvalid`] when signing fails.
pub fn issue_role_token(
    private_key_pem: &[u8],
    role: &str,
    validity: Duration,
    project: Option<&str>,
) -> SecurityResult<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem)
        .map_err(|e| SecurityError::KeyError(e.to_string()))?;

    let now = Utc::now();
    let claims = RoleTokenClaims {
        role: role.to_owned(),
        iat: now.timestamp(),
        exp: (now + validity).timestamp(),
        jti: Uuid::new_v4().to_string(),
        project: project.map(ToOwned::to_owned),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| SecurityError::TokenInvalid(e.to_string()))
}

/// Verify a role token against the configured public key and
/// revocation list.
///
/// # Errors
///
/// Returns [`SecurityError::KeyError`] for an unusable public key,
/// [`SecurityError::TokenInvalid`] for a bad signature or expired
/// token, and [`SecurityError::TokenRevoked`] when the `jti` is on the
/// revocation list.
pub fn verify_role_token(
    token: &str,
    auth: &AuthenticationConfig,
) -> SecurityResult<RoleTokenClaims> {
    let key = DecodingKey::from_rsa_pem(auth.public_key.as_bytes())
        .map_err(|e| SecurityError::KeyError(e.to_string()))?;

    let validation = Validation::new(Algorithm::RS256);
    let data = decode::<RoleTokenClaims>(token, &key, &validation)
        .map_err(|e| SecurityError::TokenInvalid(e.to_string()))?;

    if auth.revoked_tokens.contains(&data.claims.jti) {
        return Err(SecurityError::TokenRevoked {
            jti: data.claims.jti,
        });
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn test_keypair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (
            private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            public.to_public_key_pem(LineEnding::LF).unwrap(),
        )
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let (private_pem, public_pem) = test_keypair();
        let token =
            issue_role_token(private_pem.as_bytes(), "admin", Duration::hours(1), None).unwrap();

        let auth = AuthenticationConfig {
            public_key: public_pem,
            revoked_tokens: vec![],
        };
        let claims = verify_role_token(&token, &auth).unwrap();
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_revoked_token_rejected() {
        let (private_pem, public_pem) = test_keypair();
        let token = issue_role_token(
            private_pem.as_bytes(),
            "dev",
            Duration::hours(1),
            Some("billing"),
        )
        .unwrap();

        let auth = AuthenticationConfig {
            public_key: public_pem.clone(),
            revoked_tokens: vec![],
        };
        let claims = verify_role_token(&token, &auth).unwrap();

        let revoking = AuthenticationConfig {
            public_key: public_pem,
            revoked_tokens: vec![claims.jti],
        };
        assert!(matches!(
            verify_role_token(&token, &revoking),
            Err(SecurityError::TokenRevoked { .. })
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let (private_pem, public_pem) = test_keypair();
        let token =
            issue_role_token(private_pem.as_bytes(), "dev", Duration::hours(-2), None).unwrap();

        let auth = AuthenticationConfig {
            public_key: public_pem,
            revoked_tokens: vec![],
        };
        assert!(matches!(
            verify_role_token(&token, &auth),
            Err(SecurityError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let (_, public_pem) = test_keypair();
        let auth = AuthenticationConfig {
            public_key: public_pem,
            revoked_tokens: vec![],
        };
        assert!(verify_role_token("not.a.token", &auth).is_err());
    }
}
