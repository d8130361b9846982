/*
 * Responsibility
 * - Read environment / .env settings (listen address, public paths, issuers, trust source, refresh policy)
 * - Validate them once at startup (missing or invalid values fail the boot)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::services::auth::refresh::RefreshSettings;
use crate::services::auth::route_policy::RoutePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where signing keys come from. Exactly one is configured.
#[derive(Debug, Clone, PartialEq)]
pub enum TrustSourceConfig {
    Discovery {
        issuer: String,
    },
    Jwks {
        url: String,
    },
    StaticPem {
        pem: String,
        kid: String,
        algorithm: Algorithm,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub routes: RoutePolicy,

    pub auth_issuers: Vec<String>,
    pub auth_audience: Option<String>,
    pub access_token_leeway_seconds: u64,

    pub trust_source: TrustSourceConfig,
    pub refresh: RefreshSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_or(&var, "PORT", 8080)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(var("APP_ENV").as_deref());

        let public_patterns = var("PUBLIC_PATH_PATTERNS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| vec!["/actuator/**".to_string()]);
        let routes = RoutePolicy::from_public_patterns(&public_patterns)
            .map_err(|_| ConfigError::Invalid("PUBLIC_PATH_PATTERNS"))?;

        let auth_issuers = var("AUTH_ISSUERS")
            .map(|raw| split_list(&raw))
            .filter(|issuers| !issuers.is_empty())
            .ok_or(ConfigError::Missing("AUTH_ISSUERS"))?;

        let auth_audience = var("AUTH_AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let access_token_leeway_seconds = parse_or(&var, "ACCESS_TOKEN_LEEWAY_SECONDS", 60)?;

        let trust_source = trust_source(&var, &auth_issuers)?;

        let defaults = RefreshSettings::default();
        let refresh = RefreshSettings {
            interval: secs(&var, "TRUST_REFRESH_INTERVAL_SECONDS", defaults.interval)?,
            fetch_timeout: secs(&var, "TRUST_FETCH_TIMEOUT_SECONDS", defaults.fetch_timeout)?,
            retry_attempts: parse_or(&var, "TRUST_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base_delay: millis(&var, "TRUST_RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis(&var, "TRUST_RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            key_overlap: secs(&var, "TRUST_KEY_OVERLAP_SECONDS", defaults.key_overlap)?,
            bootstrap_attempts: parse_or(
                &var,
                "TRUST_BOOTSTRAP_ATTEMPTS",
                defaults.bootstrap_attempts,
            )?,
            allow_empty_bootstrap: flag(&var, "ALLOW_EMPTY_BOOTSTRAP")?,
        };

        if refresh.interval.is_zero() {
            return Err(ConfigError::Invalid("TRUST_REFRESH_INTERVAL_SECONDS"));
        }
        if refresh.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("TRUST_FETCH_TIMEOUT_SECONDS"));
        }
        if refresh.retry_attempts == 0 {
            return Err(ConfigError::Invalid("TRUST_RETRY_ATTEMPTS"));
        }
        if refresh.bootstrap_attempts == 0 {
            return Err(ConfigError::Invalid("TRUST_BOOTSTRAP_ATTEMPTS"));
        }

        Ok(Self {
            addr,
            app_env,
            routes,
            auth_issuers,
            auth_audience,
            access_token_leeway_seconds,
            trust_source,
            refresh,
        })
    }
}

fn trust_source<F>(var: &F, issuers: &[String]) -> Result<TrustSourceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let discovery = flag(var, "AUTH_DISCOVERY")?;
    let jwks_url = var("AUTH_JWKS_URL").filter(|s| !s.trim().is_empty());
    // PEM in env vars usually arrives with escaped newlines.
    let pem = var("ACCESS_JWT_PUBLIC_KEY_PEM")
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.replace("\\n", "\n"));

    let configured = [discovery, jwks_url.is_some(), pem.is_some()]
        .iter()
        .filter(|on| **on)
        .count();
    if configured > 1 {
        return Err(ConfigError::Invalid("AUTH_JWKS_URL"));
    }

    if discovery {
        let issuer = issuers
            .first()
            .cloned()
            .ok_or(ConfigError::Missing("AUTH_ISSUERS"))?;
        url::Url::parse(&issuer).map_err(|_| ConfigError::Invalid("AUTH_ISSUERS"))?;
        return Ok(TrustSourceConfig::Discovery { issuer });
    }

    if let Some(url) = jwks_url {
        let url = url.trim().to_string();
        url::Url::parse(&url).map_err(|_| ConfigError::Invalid("AUTH_JWKS_URL"))?;
        return Ok(TrustSourceConfig::Jwks { url });
    }

    if let Some(pem) = pem {
        let kid = var("ACCESS_JWT_KEY_ID").unwrap_or_else(|| "static".to_string());
        let algorithm = var("ACCESS_JWT_ALGORITHM")
            .map(|raw| Algorithm::from_str(raw.trim()))
            .unwrap_or(Ok(Algorithm::EdDSA))
            .map_err(|_| ConfigError::Invalid("ACCESS_JWT_ALGORITHM"))?;
        return Ok(TrustSourceConfig::StaticPem {
            pem,
            kid,
            algorithm,
        });
    }

    Err(ConfigError::Missing("AUTH_JWKS_URL"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<F, T>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn secs<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default.as_secs()).map(Duration::from_secs)
}

fn millis<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn flag<F>(var: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(_) => Err(ConfigError::Invalid(key)),
    }
}
