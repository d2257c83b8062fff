//! Environment-based configuration for the authd server runtime.

use anyhow::Result;
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;
use crate::oauth::session::SessionSettings;
use crate::oauth::tokens::TokenLifetimes;

/// HTTP server port configuration
#[derive(Clone)]
pub struct HttpPort(u16);

/// A lifetime read from a human duration string such as `5m` or `14d`
#[derive(Clone, Copy, Debug)]
pub struct Lifetime(chrono::Duration);

/// Boolean toggle accepting true/false/1/0/yes/no/on/off
#[derive(Clone, Copy, Debug)]
pub struct Toggle(bool);

/// CORS allowed origins, semicolon-separated
#[derive(Clone, Default)]
pub struct CorsAllowedOrigins(Vec<String>);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub external_base: String,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub login_url: String,
    pub access_token_lifetime: Lifetime,
    pub id_token_lifetime: Lifetime,
    pub authorization_code_lifetime: Lifetime,
    pub refresh_token_lifetime: Lifetime,
    pub refresh_token_reuse_leeway: Lifetime,
    pub access_token_audience: String,
    pub session_cookie_name: String,
    pub session_lifetime: Lifetime,
    pub session_cookie_secure: Toggle,
    pub one_time_token_ttl: Lifetime,
    pub signing_key_cache_ttl: Lifetime,
    pub cors_allowed_origins: CorsAllowedOrigins,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let external_base = require_env("EXTERNAL_BASE")?;
        Self::from_lookup(&external_base, optional_env)
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(external_base: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |name: &str, default_value: &str| lookup(name).unwrap_or_else(|| default_value.to_string());

        let external_base = parse_url("EXTERNAL_BASE", external_base)?
            .trim_end_matches('/')
            .to_string();
        let http_port: HttpPort = or_default("HTTP_PORT", "8080").try_into()?;
        let storage_backend = or_default("STORAGE_BACKEND", "memory");
        let database_url = lookup("DATABASE_URL").filter(|value| !value.is_empty());
        let redis_url = lookup("REDIS_URL").filter(|value| !value.is_empty());

        let login_url = match lookup("LOGIN_URL").filter(|value| !value.is_empty()) {
            Some(value) => parse_url("LOGIN_URL", &value)?,
            None => format!("{}/account/login", external_base),
        };

        let access_token_lifetime: Lifetime = or_default("ACCESS_TOKEN_LIFETIME", "1h").try_into()?;
        let id_token_lifetime: Lifetime = or_default("ID_TOKEN_LIFETIME", "1h").try_into()?;
        let authorization_code_lifetime: Lifetime =
            or_default("AUTHORIZATION_CODE_LIFETIME", "5m").try_into()?;
        let refresh_token_lifetime: Lifetime =
            or_default("REFRESH_TOKEN_LIFETIME", "14d").try_into()?;
        let refresh_token_reuse_leeway: Lifetime =
            or_default("REFRESH_TOKEN_REUSE_LEEWAY", "10s").try_into()?;
        let access_token_audience = or_default("ACCESS_TOKEN_AUDIENCE", &external_base);
        let session_cookie_name = or_default("SESSION_COOKIE_NAME", "authd_session");
        let session_lifetime: Lifetime = or_default("SESSION_LIFETIME", "8h").try_into()?;
        let session_cookie_secure: Toggle = or_default("SESSION_COOKIE_SECURE", "true").try_into()?;
        let one_time_token_ttl: Lifetime = or_default("ONE_TIME_TOKEN_TTL", "2m").try_into()?;
        let signing_key_cache_ttl: Lifetime =
            or_default("SIGNING_KEY_CACHE_TTL", "5m").try_into()?;
        let cors_allowed_origins: CorsAllowedOrigins = lookup("CORS_ALLOWED_ORIGINS").into();

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            storage_backend,
            database_url,
            redis_url,
            login_url,
            access_token_lifetime,
            id_token_lifetime,
            authorization_code_lifetime,
            refresh_token_lifetime,
            refresh_token_reuse_leeway,
            access_token_audience,
            session_cookie_name,
            session_lifetime,
            session_cookie_secure,
            one_time_token_ttl,
            signing_key_cache_ttl,
            cors_allowed_origins,
        })
    }

    /// Token lifetimes for the token factory
    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            authorization_code: *self.authorization_code_lifetime.as_ref(),
            access_token: *self.access_token_lifetime.as_ref(),
            refresh_token: *self.refresh_token_lifetime.as_ref(),
            id_token: *self.id_token_lifetime.as_ref(),
            refresh_token_reuse_leeway: *self.refresh_token_reuse_leeway.as_ref(),
        }
    }

    /// Session cookie settings
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            cookie_name: self.session_cookie_name.clone(),
            lifetime: *self.session_lifetime.as_ref(),
            secure: *self.session_cookie_secure.as_ref(),
        }
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_url(name: &str, value: &str) -> Result<String> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl(name.to_string(), e.to_string()))?;
    Ok(value.to_string())
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for Lifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for Lifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl Lifetime {
    /// The lifetime as a std duration, clamped at zero
    pub fn to_std(&self) -> Duration {
        self.0.to_std().unwrap_or(Duration::ZERO)
    }
}

impl TryFrom<String> for Toggle {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl AsRef<bool> for Toggle {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl From<Option<String>> for CorsAllowedOrigins {
    fn from(value: Option<String>) -> Self {
        let value = value.unwrap_or_default();
        Self(
            value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl AsRef<Vec<String>> for CorsAllowedOrigins {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}
