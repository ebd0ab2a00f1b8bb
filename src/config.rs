//! Configuration types.
//!
//! Settings come from environment variables; the route table is JSON, either
//! in a file (`RELAY_ROUTES_FILE`) or inline (`RELAY_ROUTES`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::events::model::{DeploymentVersion, StreamKey, Topic};
use crate::gateway::RetryPolicy;
use crate::gateway::telegram::TELEGRAM_API_BASE;
use crate::telemetry::MonitorConfig;

/// Prefix reserved for the fallback route's stream key.
pub const DEFAULT_KEY_PREFIX: &str = "default:";

/// Where events for one route hint go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub stream_key: StreamKey,
    pub topic: Topic,
}

#[derive(Debug, Deserialize)]
struct RouteSpec {
    #[serde(default)]
    stream_key: Option<String>,
    chat_id: String,
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RouteTableSpec {
    default: RouteSpec,
    #[serde(default)]
    routes: HashMap<String, RouteSpec>,
}

/// Static mapping from route hints to `{stream_key, topic}` plus a fallback.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
    default: Route,
}

impl RouteTable {
    /// Parse and validate a JSON route table.
    ///
    /// The fallback's stream key is namespaced under `default:` and no
    /// configured route may use that prefix, so the two can never alias.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let spec: RouteTableSpec = serde_json::from_str(json)
            .map_err(|e| ConfigError::ParseError(format!("route table: {e}")))?;

        let default_name = spec
            .default
            .stream_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("fallback");
        let default_key = if default_name.starts_with(DEFAULT_KEY_PREFIX) {
            default_name.to_string()
        } else {
            format!("{DEFAULT_KEY_PREFIX}{default_name}")
        };
        let default = Route {
            stream_key: StreamKey::new(default_key),
            topic: build_topic("default", &spec.default)?,
        };

        let mut routes = HashMap::with_capacity(spec.routes.len());
        for (hint, route) in &spec.routes {
            let hint = hint.trim();
            if hint.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "routes".into(),
                    message: "route hints must not be empty".into(),
                });
            }
            let key = route
                .stream_key
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(hint);
            if key.starts_with(DEFAULT_KEY_PREFIX) {
                return Err(ConfigError::InvalidValue {
                    key: format!("routes.{hint}.stream_key"),
                    message: format!("the {DEFAULT_KEY_PREFIX} prefix is reserved for the fallback route"),
                });
            }
            routes.insert(
                hint.to_string(),
                Route {
                    stream_key: StreamKey::new(key),
                    topic: build_topic(hint, route)?,
                },
            );
        }

        Ok(Self { routes, default })
    }

    /// Look up a hint. `None` for absent, blank or unknown hints.
    pub fn get(&self, hint: &str) -> Option<&Route> {
        self.routes.get(hint.trim())
    }

    pub fn default_route(&self) -> &Route {
        &self.default
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn build_topic(name: &str, spec: &RouteSpec) -> Result<Topic, ConfigError> {
    let chat_id = spec.chat_id.trim();
    if chat_id.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: format!("routes.{name}.chat_id"),
            message: "must not be empty".into(),
        });
    }
    Ok(Topic::new(chat_id, spec.thread_id))
}

/// Relay configuration.
#[derive(Debug)]
pub struct RelayConfig {
    /// Telegram bot token.
    pub bot_token: SecretString,
    /// Credential required on inbound requests.
    pub auth_token: SecretString,
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Version tag attached to every telemetry record.
    pub deployment_version: DeploymentVersion,
    /// Retry settings for gateway calls.
    pub retry: RetryPolicy,
    /// Timeout for each state store call.
    pub store_timeout: Duration,
    /// Extra pin attempts after a successful send.
    pub pin_retries: u32,
    /// Rollback monitor policy.
    pub monitor: MonitorConfig,
    /// Bot API host.
    pub telegram_api_base: String,
    pub routes: RouteTable,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let number = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected a non-negative integer, got {raw:?}"),
                }),
                None => Ok(default),
            }
        };
        let count = |key: &str, default: u32| -> Result<u32, ConfigError> {
            let value = number(key, u64::from(default))?;
            u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{value} is out of range (max {})", u32::MAX),
            })
        };

        let bot_token = SecretString::from(required("TELEGRAM_BOT_TOKEN")?);
        let auth_token = SecretString::from(required("RELAY_AUTH_TOKEN")?);

        let routes_json = match lookup("RELAY_ROUTES_FILE") {
            Some(path) => std::fs::read_to_string(path.trim())?,
            None => lookup("RELAY_ROUTES")
                .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_ROUTES_FILE".into()))?,
        };
        let routes = RouteTable::from_json(&routes_json)?;

        let port = u16::try_from(number("RELAY_PORT", 8080)?).map_err(|_| {
            ConfigError::InvalidValue {
                key: "RELAY_PORT".into(),
                message: "port out of range".into(),
            }
        })?;

        let db_path = lookup("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/pin-relay.db"));

        let deployment_version = lookup("RELAY_DEPLOYMENT_VERSION")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(DeploymentVersion)
            .unwrap_or_default();

        let retry = RetryPolicy {
            max_attempts: count("RELAY_GATEWAY_MAX_ATTEMPTS", 3)?.max(1),
            base_delay: Duration::from_millis(number("RELAY_GATEWAY_BASE_DELAY_MS", 200)?),
            max_delay: Duration::from_millis(number("RELAY_GATEWAY_MAX_DELAY_MS", 5_000)?),
            call_timeout: Duration::from_millis(number("RELAY_GATEWAY_TIMEOUT_MS", 10_000)?),
        };

        let monitor = MonitorConfig {
            window: Duration::from_secs(number("RELAY_SLO_WINDOW_SECS", 86_400)?),
            p99_threshold: Duration::from_millis(number("RELAY_SLO_P99_MS", 500)?),
            min_samples: count("RELAY_SLO_MIN_SAMPLES", 20)? as usize,
            max_samples: count("RELAY_SLO_MAX_SAMPLES", 1000)?.max(1) as usize,
        };

        Ok(Self {
            bot_token,
            auth_token,
            port,
            db_path,
            deployment_version,
            retry,
            store_timeout: Duration::from_millis(number("RELAY_STORE_TIMEOUT_MS", 5_000)?),
            pin_retries: count("RELAY_PIN_RETRIES", 1)?,
            monitor,
            telegram_api_base: lookup("TELEGRAM_API_BASE")
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            routes,
        })
    }
}
