use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RAZORPAY_API_BASE_URL: &str = "https://api.razorpay.com/v1";

#[derive(Clone, Debug)]
pub struct Config {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub razorpay: RazorpayConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub http: HttpConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        *self == Environment::Prod
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "dev" | "development" | "test" => Ok(Environment::Dev),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    /// Secret for `X-Razorpay-Signature` on webhooks. `None` means unset.
    pub webhook_secret: Option<Secret<String>>,
    /// Reject webhooks outright when no webhook secret is configured.
    pub require_webhook_signature: bool,
    pub api_base_url: String,
    pub request_timeout: Duration,
}

/// Where the document store credentials come from, if anywhere.
#[derive(Clone, Debug)]
pub enum StoreCredentials {
    /// JSON key file: `{ "uri": "...", "database": "..." }`.
    KeyFile(PathBuf),
    Discrete {
        host: String,
        username: String,
        password: Secret<String>,
    },
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub credentials: Option<StoreCredentials>,
    pub database: String,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// PEM file with the identity provider's RS256 public key.
    pub jwt_public_key_path: Option<PathBuf>,
    /// Shared HS256 secret, used when no public key is configured.
    pub jwt_secret: Option<Secret<String>>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Let required-auth routes through when no verifier is configured.
    pub allow_unverified: bool,
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub frontend_url: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    /// Read the client address from `x-forwarded-for` (set behind a proxy).
    pub trust_forwarded_for: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(mut common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("ENVIRONMENT").or_else(|| get("NODE_ENV")) {
            Some(value) => value
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            None => Environment::Dev,
        };

        if let Some(port) = get("PORT") {
            common.port = parse_value("PORT", &port)?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            common.log_level = level;
        }

        let razorpay = RazorpayConfig {
            key_id: get("RAZORPAY_KEY_ID").unwrap_or_default(),
            key_secret: Secret::new(get("RAZORPAY_KEY_SECRET").unwrap_or_default()),
            webhook_secret: get("RAZORPAY_WEBHOOK_SECRET").map(Secret::new),
            require_webhook_signature: parse_or(
                "RAZORPAY_REQUIRE_WEBHOOK_SIGNATURE",
                get("RAZORPAY_REQUIRE_WEBHOOK_SIGNATURE"),
                true,
            )?,
            api_base_url: get("RAZORPAY_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_RAZORPAY_API_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(parse_or(
                "GATEWAY_TIMEOUT_SECS",
                get("GATEWAY_TIMEOUT_SECS"),
                15,
            )?),
        };

        let credentials = match get("STORE_SERVICE_ACCOUNT_PATH") {
            Some(path) => Some(StoreCredentials::KeyFile(PathBuf::from(path))),
            None => match (
                get("MONGODB_HOST"),
                get("MONGODB_USERNAME"),
                get("MONGODB_PASSWORD"),
            ) {
                (Some(host), Some(username), Some(password)) => Some(StoreCredentials::Discrete {
                    host,
                    username,
                    password: Secret::new(password),
                }),
                _ => None,
            },
        };

        let store = StoreConfig {
            credentials,
            database: get("MONGODB_DATABASE").unwrap_or_else(|| "payments".to_string()),
            request_timeout: Duration::from_secs(parse_or(
                "STORE_TIMEOUT_SECS",
                get("STORE_TIMEOUT_SECS"),
                10,
            )?),
        };

        let auth = AuthConfig {
            jwt_public_key_path: get("AUTH_JWT_PUBLIC_KEY_PATH").map(PathBuf::from),
            jwt_secret: get("AUTH_JWT_SECRET").map(Secret::new),
            issuer: get("AUTH_JWT_ISSUER"),
            audience: get("AUTH_JWT_AUDIENCE"),
            allow_unverified: parse_or(
                "AUTH_ALLOW_UNVERIFIED",
                get("AUTH_ALLOW_UNVERIFIED"),
                false,
            )?,
        };

        let http = HttpConfig {
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            rate_limit_window: Duration::from_millis(parse_or(
                "RATE_LIMIT_WINDOW_MS",
                get("RATE_LIMIT_WINDOW_MS"),
                15 * 60 * 1000,
            )?),
            rate_limit_max_requests: parse_or(
                "RATE_LIMIT_MAX_REQUESTS",
                get("RATE_LIMIT_MAX_REQUESTS"),
                100,
            )?,
            trust_forwarded_for: parse_or("TRUST_PROXY", get("TRUST_PROXY"), false)?,
        };

        Ok(Self {
            common,
            environment,
            service_name: get("SERVICE_NAME").unwrap_or_else(|| "membership-payments".to_string()),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            razorpay,
            store,
            auth,
            http,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
