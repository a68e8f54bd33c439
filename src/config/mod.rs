use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::workflows::hiring::credential::{CredentialSigner, SigningKeyError};
use crate::workflows::hiring::stage::PipelineConfig;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
    pub agents: AgentGatewayConfig,
    pub event_bus: EventBusConfig,
    pub signing: SigningConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            company_fairness_threshold: parse_var(
                "COMPANY_FAIRNESS_THRESHOLD",
                defaults.company_fairness_threshold,
            )?,
            portfolio_strong_threshold: parse_var(
                "PORTFOLIO_STRONG_THRESHOLD",
                defaults.portfolio_strong_threshold,
            )?,
            bias_batch_size: parse_var("BIAS_BATCH_SIZE", defaults.bias_batch_size)?,
            enable_llm_cache: parse_var("ENABLE_LLM_CACHE", defaults.enable_llm_cache)?,
            cache_ttl_seconds: parse_var("CACHE_TTL_SECONDS", defaults.cache_ttl_seconds)?,
            agent_retry_limit: parse_var("AGENT_RETRY_LIMIT", defaults.agent_retry_limit)?,
            retry_base_delay_ms: defaults.retry_base_delay_ms,
            agent_concurrency: parse_var("AGENT_CONCURRENCY", defaults.agent_concurrency)?,
            skill_evidence_sources: defaults.skill_evidence_sources,
        };

        let agents = AgentGatewayConfig {
            base_url: env::var("AGENT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8100".to_string()),
            timeout_seconds: parse_var("AGENT_TIMEOUT_SECONDS", 60)?,
        };

        let event_bus = EventBusConfig {
            host: env::var("EVENT_BUS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("EVENT_BUS_PORT", 6379)?,
        };

        let signing = SigningConfig {
            key_seed_hex: env::var("CREDENTIAL_SIGNING_KEY").ok(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            pipeline,
            agents,
            event_bus,
            signing,
        })
    }

    /// Build the credential signer from configuration. Production requires a
    /// persistent key; development and test fall back to an ephemeral one so
    /// restarts invalidate previously issued signatures only there.
    pub fn credential_signer(&self) -> Result<CredentialSigner, ConfigError> {
        match (&self.signing.key_seed_hex, self.environment) {
            (Some(seed), _) => {
                CredentialSigner::from_seed_hex(seed).map_err(|source| match source {
                    SigningKeyError::InvalidSeed => ConfigError::InvalidSigningKey,
                    other => ConfigError::SigningKey(other),
                })
            }
            (None, AppEnvironment::Production) => Err(ConfigError::MissingSigningKey),
            (None, _) => {
                tracing::warn!(
                    "CREDENTIAL_SIGNING_KEY not set; using an ephemeral signing key"
                );
                Ok(CredentialSigner::ephemeral())
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidVar { name }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Upstream agent gateway settings.
#[derive(Debug, Clone)]
pub struct AgentGatewayConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

/// Address of the pub/sub bus pipeline events are published to.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub host: String,
    pub port: u16,
}

impl EventBusConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Credential signing key material. The seed itself must never be logged.
#[derive(Clone)]
pub struct SigningConfig {
    pub key_seed_hex: Option<String>,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field(
                "key_seed_hex",
                &self.key_seed_hex.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidVar { name: &'static str },
    MissingSigningKey,
    InvalidSigningKey,
    SigningKey(SigningKeyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidVar { name } => {
                write!(f, "{name} holds a value of the wrong type")
            }
            ConfigError::MissingSigningKey => {
                write!(f, "CREDENTIAL_SIGNING_KEY is required in production")
            }
            ConfigError::InvalidSigningKey => {
                write!(
                    f,
                    "CREDENTIAL_SIGNING_KEY must be a 64-character hex-encoded seed"
                )
            }
            ConfigError::SigningKey(_) => write!(f, "credential signing key rejected"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::SigningKey(source) => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "COMPANY_FAIRNESS_THRESHOLD",
            "PORTFOLIO_STRONG_THRESHOLD",
            "BIAS_BATCH_SIZE",
            "ENABLE_LLM_CACHE",
            "CACHE_TTL_SECONDS",
            "AGENT_RETRY_LIMIT",
            "AGENT_CONCURRENCY",
            "AGENT_BASE_URL",
            "AGENT_TIMEOUT_SECONDS",
            "EVENT_BUS_HOST",
            "EVENT_BUS_PORT",
            "CREDENTIAL_SIGNING_KEY",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.pipeline.company_fairness_threshold, 60.0);
        assert_eq!(config.pipeline.portfolio_strong_threshold, 70.0);
        assert_eq!(config.pipeline.bias_batch_size, 50);
        assert!(config.pipeline.enable_llm_cache);
        assert_eq!(config.agents.timeout_seconds, 60);
        assert_eq!(config.event_bus.address(), "127.0.0.1:6379");
    }

    #[test]
    fn pipeline_dials_come_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("COMPANY_FAIRNESS_THRESHOLD", "55.5");
        env::set_var("BIAS_BATCH_SIZE", "10");
        env::set_var("ENABLE_LLM_CACHE", "false");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.pipeline.company_fairness_threshold, 55.5);
        assert_eq!(config.pipeline.bias_batch_size, 10);
        assert!(!config.pipeline.enable_llm_cache);
        reset_env();
    }

    #[test]
    fn rejects_malformed_batch_size() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("BIAS_BATCH_SIZE", "fifty");
        let result = AppConfig::load();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVar {
                name: "BIAS_BATCH_SIZE"
            })
        ));
        reset_env();
    }

    #[test]
    fn production_requires_signing_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        let config = AppConfig::load().expect("config loads");
        assert!(matches!(
            config.credential_signer(),
            Err(ConfigError::MissingSigningKey)
        ));
        reset_env();
    }

    #[test]
    fn development_falls_back_to_ephemeral_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads");
        let signer = config.credential_signer().expect("ephemeral signer");
        assert_eq!(signer.public_key_hex().len(), 64);
    }

    #[test]
    fn rejects_short_signing_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CREDENTIAL_SIGNING_KEY", "abcd");
        let config = AppConfig::load().expect("config loads");
        assert!(matches!(
            config.credential_signer(),
            Err(ConfigError::InvalidSigningKey)
        ));
        reset_env();
    }
}
