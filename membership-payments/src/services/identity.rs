use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// Caller identity taken from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Verifies bearer tokens issued by the identity provider.
#[derive(Clone)]
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    /// Build a verifier from configuration. `Ok(None)` when no key material
    /// is configured at all.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>, anyhow::Error> {
        if let Some(path) = &config.jwt_public_key_path {
            let pem = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read public key from {}: {}", path.display(), e)
            })?;
            let verifier = Self::rs256(
                pem.as_bytes(),
                config.issuer.as_deref(),
                config.audience.as_deref(),
            )?;
            tracing::info!("Identity verifier initialized with RS256 public key");
            return Ok(Some(verifier));
        }

        if let Some(secret) = &config.jwt_secret {
            let verifier = Self::hs256(
                secret.expose_secret().as_bytes(),
                config.issuer.as_deref(),
                config.audience.as_deref(),
            );
            tracing::info!("Identity verifier initialized with HS256 secret");
            return Ok(Some(verifier));
        }

        Ok(None)
    }

    pub fn rs256(
        public_key_pem: &[u8],
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;
        Ok(Self {
            decoding_key,
            validation: validation(Algorithm::RS256, issuer, audience),
        })
    }

    pub fn hs256(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: validation(Algorithm::HS256, issuer, audience),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, anyhow::Error> {
        let data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| anyhow::anyhow!("Invalid identity token: {}", e))?;

        Ok(Identity {
            uid: data.claims.sub,
            email: data.claims.email,
            email_verified: data.claims.email_verified,
        })
    }
}

fn validation(algorithm: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    match audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    validation
}
