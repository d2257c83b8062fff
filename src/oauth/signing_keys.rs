//! RSA signing key lifecycle: bootstrap, rotation, JWKS publication and
//! RS256 signing/verification.
//!
//! Key material is persisted as JWK-shaped JSON through [`SigningKeyStore`].
//! The active key is cached as an `Arc<SigningCredentials>`; rotation swaps
//! the cache but never invalidates credentials a request already holds.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;
use uuid::Uuid;

use crate::errors::{KeyError, StorageError};
use crate::oauth::types::SigningKey;
use crate::storage::traits::OAuthStorage;

/// RSA modulus size for generated keys
pub const RSA_KEY_BITS: usize = 2048;

/// The only signing algorithm issued by this server
pub const SIGNING_ALGORITHM: &str = "RS256";

/// Public JWK as published in the JWKS document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

/// JWKS document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Private signing material for one key, ready to sign JWTs
pub struct SigningCredentials {
    key_id: String,
    encoding_key: EncodingKey,
}

impl SigningCredentials {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign claims as an RS256 JWT with the `kid` header set.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| KeyError::SigningFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Result of a key rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRotation {
    pub key_id: String,
    pub previous_key_id: Option<String>,
}

struct CachedCredentials {
    credentials: Arc<SigningCredentials>,
    loaded_at: Instant,
}

/// Owns the active signing key and the verification key set
pub struct SigningKeyManager {
    storage: Arc<dyn OAuthStorage>,
    cache: RwLock<Option<CachedCredentials>>,
    write_lock: Mutex<()>,
    cache_ttl: Duration,
}

impl SigningKeyManager {
    pub fn new(storage: Arc<dyn OAuthStorage>, cache_ttl: Duration) -> Self {
        Self {
            storage,
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
            cache_ttl,
        }
    }

    /// Credentials of the single active key.
    ///
    /// Generates and persists a key on first use when none exists.
    pub async fn get_active_signing_credentials(
        &self,
    ) -> Result<Arc<SigningCredentials>, KeyError> {
        if let Some(credentials) = self.cached().await {
            return Ok(credentials);
        }

        let _guard = self.write_lock.lock().await;
        if let Some(credentials) = self.cached().await {
            return Ok(credentials);
        }

        let key = match self.storage.get_active_signing_key().await? {
            Some(key) => key,
            None => {
                let key = generate_signing_key().await?;
                activate_or_adopt(self.storage.as_ref(), key).await?
            }
        };

        let credentials = Arc::new(credentials_from_key(&key)?);
        self.store_cache(credentials.clone()).await;
        Ok(credentials)
    }

    /// Public keys of every key that is active or not yet expired.
    pub async fn get_verification_key_set(&self) -> Result<JsonWebKeySet, KeyError> {
        let now = Utc::now();
        let keys = self.storage.list_signing_keys().await?;
        let keys = keys
            .iter()
            .filter(|key| key.is_verifiable(now))
            .map(public_jwk)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JsonWebKeySet { keys })
    }

    /// Generate a new active key. The previous key is demoted but stays in
    /// the verification set until it is given an expiry.
    pub async fn rotate_key(&self) -> Result<KeyRotation, KeyError> {
        let _guard = self.write_lock.lock().await;

        let key = generate_signing_key().await?;
        let previous_key_id = self.storage.activate_signing_key(&key).await?;
        let credentials = Arc::new(credentials_from_key(&key)?);
        self.store_cache(credentials).await;

        tracing::info!(kid = %key.key_id, previous = ?previous_key_id, "rotated signing key");

        Ok(KeyRotation {
            key_id: key.key_id,
            previous_key_id,
        })
    }

    /// Bound how long a demoted key stays in the verification set.
    pub async fn expire_key(
        &self,
        key_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), KeyError> {
        let keys = self.storage.list_signing_keys().await?;
        match keys.iter().find(|key| key.key_id == key_id) {
            Some(key) if key.is_active => Err(KeyError::ActiveKey(key_id.to_string())),
            Some(_) => {
                self.storage
                    .set_signing_key_expiration(key_id, Some(expires_at))
                    .await?;
                Ok(())
            }
            None => Err(KeyError::UnknownKeyId(key_id.to_string())),
        }
    }

    /// Verify an RS256 JWT against the verification key set.
    pub async fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<T, KeyError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| KeyError::VerificationFailed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(KeyError::VerificationFailed(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| KeyError::VerificationFailed("missing kid".to_string()))?;

        let key_set = self.get_verification_key_set().await?;
        let jwk = key_set
            .find(&kid)
            .ok_or_else(|| KeyError::UnknownKeyId(kid.clone()))?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| KeyError::InvalidKeyMaterial(kid.clone(), e.to_string()))?;

        jsonwebtoken::decode::<T>(token, &decoding_key, validation)
            .map(|data| data.claims)
            .map_err(|e| KeyError::VerificationFailed(e.to_string()))
    }

    async fn cached(&self) -> Option<Arc<SigningCredentials>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < self.cache_ttl)
            .map(|cached| cached.credentials.clone())
    }

    async fn store_cache(&self, credentials: Arc<SigningCredentials>) {
        let mut cache = self.cache.write().await;
        *cache = Some(CachedCredentials {
            credentials,
            loaded_at: Instant::now(),
        });
    }
}

fn encode_uint(value: &BigUint) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(jwk: &Value, field: &str, kid: &str) -> Result<BigUint, KeyError> {
    let encoded = jwk
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| KeyError::InvalidKeyMaterial(kid.to_string(), format!("missing {field}")))?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| KeyError::InvalidKeyMaterial(kid.to_string(), format!("{field}: {e}")))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn jwk_string(jwk: &Value, field: &str, kid: &str) -> Result<String, KeyError> {
    jwk.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| KeyError::InvalidKeyMaterial(kid.to_string(), format!("missing {field}")))
}

/// Generate a new RSA key on the blocking pool.
pub async fn generate_signing_key() -> Result<SigningKey, KeyError> {
    tokio::task::spawn_blocking(build_signing_key)
        .await
        .map_err(|e| KeyError::GenerationFailed(e.to_string()))?
}

/// Activate a freshly generated bootstrap key. When another instance wins
/// the race and its key is already active, that key is used instead.
async fn activate_or_adopt(
    storage: &dyn OAuthStorage,
    key: SigningKey,
) -> Result<SigningKey, KeyError> {
    match storage.activate_signing_key(&key).await {
        Ok(_) => {
            tracing::info!(kid = %key.key_id, "bootstrapped signing key");
            Ok(key)
        }
        Err(StorageError::Duplicate(message)) => {
            match storage.get_active_signing_key().await? {
                Some(active) => {
                    tracing::info!(kid = %active.key_id, "adopted signing key bootstrapped elsewhere");
                    Ok(active)
                }
                None => Err(StorageError::Duplicate(message).into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

fn build_signing_key() -> Result<SigningKey, KeyError> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;

    let key_id = Ulid::new().to_string();
    let n = encode_uint(private_key.n());
    let e = encode_uint(private_key.e());

    let primes = private_key.primes();
    if primes.len() != 2 {
        return Err(KeyError::GenerationFailed(format!(
            "expected two primes, got {}",
            primes.len()
        )));
    }
    let missing = |field: &str| KeyError::GenerationFailed(format!("missing {field}"));
    let dp = private_key.dp().ok_or_else(|| missing("dp"))?;
    let dq = private_key.dq().ok_or_else(|| missing("dq"))?;
    let (_, qi) = private_key.qinv().ok_or_else(|| missing("qi"))?.to_bytes_be();

    let public_key = json!({
        "kty": "RSA",
        "n": n,
        "e": e,
    });
    let private_jwk = json!({
        "kty": "RSA",
        "n": n,
        "e": e,
        "d": encode_uint(private_key.d()),
        "p": encode_uint(&primes[0]),
        "q": encode_uint(&primes[1]),
        "dp": encode_uint(dp),
        "dq": encode_uint(dq),
        "qi": BASE64_URL_SAFE_NO_PAD.encode(qi),
    });

    Ok(SigningKey {
        id: Uuid::new_v4().to_string(),
        key_id,
        algorithm: SIGNING_ALGORITHM.to_string(),
        public_key,
        private_key: private_jwk,
        is_active: true,
        expires_at: None,
        created_at: Utc::now(),
    })
}

/// Rebuild signing credentials from a stored private JWK.
fn credentials_from_key(key: &SigningKey) -> Result<SigningCredentials, KeyError> {
    let kid = key.key_id.as_str();
    let jwk = &key.private_key;
    let invalid = |e: String| KeyError::InvalidKeyMaterial(kid.to_string(), e);

    let mut private_key = RsaPrivateKey::from_components(
        decode_uint(jwk, "n", kid)?,
        decode_uint(jwk, "e", kid)?,
        decode_uint(jwk, "d", kid)?,
        vec![decode_uint(jwk, "p", kid)?, decode_uint(jwk, "q", kid)?],
    )
    .map_err(|e| invalid(e.to_string()))?;
    private_key.precompute().map_err(|e| invalid(e.to_string()))?;

    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| invalid(e.to_string()))?;
    let encoding_key =
        EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| invalid(e.to_string()))?;

    Ok(SigningCredentials {
        key_id: key.key_id.clone(),
        encoding_key,
    })
}

fn public_jwk(key: &SigningKey) -> Result<JsonWebKey, KeyError> {
    Ok(JsonWebKey {
        kty: "RSA".to_string(),
        key_use: "sig".to_string(),
        kid: key.key_id.clone(),
        alg: key.algorithm.clone(),
        n: jwk_string(&key.public_key, "n", &key.key_id)?,
        e: jwk_string(&key.public_key, "e", &key.key_id)?,
    })
}

/// RS256 validation with issuer and audience pinned.
pub fn rs256_validation(issuer: &str, audience: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation
}
