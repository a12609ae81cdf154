//! Application configuration
//!
//! Values come from the managed backend's outputs document, then environment
//! overrides.

use crate::backend::CompletionRoute;
use crate::runtime::DEFAULT_IDLE_TIMEOUT;
use crate::state_machine::ReplyChannel;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OUTPUTS_PATH: &str = "amplify_outputs.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(
        "No GraphQL endpoint configured (set ARCANE_GRAPHQL_URL or provide amplify_outputs.json)"
    )]
    MissingEndpoint,
    #[error("Invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Subset of the backend outputs document this service reads
#[derive(Debug, Default, Deserialize)]
pub struct BackendOutputs {
    #[serde(default)]
    pub data: Option<DataOutputs>,
    #[serde(default)]
    pub auth: Option<AuthOutputs>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataOutputs {
    pub url: String,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthOutputs {
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub user_pool_id: Option<String>,
}

impl BackendOutputs {
    /// Read the document; a missing file yields `None`
    pub fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub graphql_url: String,
    pub region: String,
    pub api_key: Option<String>,
    pub user_pool_id: Option<String>,
    pub push_url: Option<String>,
    /// Well-known conversation to use instead of creating one per session
    pub conversation_id: Option<String>,
    pub primary_channel: ReplyChannel,
    pub completion_route: CompletionRoute,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    /// Quiet period after which a session no view watches is stopped
    pub session_idle_timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let outputs_path = std::env::var("ARCANE_OUTPUTS_PATH")
            .unwrap_or_else(|_| DEFAULT_OUTPUTS_PATH.to_string());
        let outputs = BackendOutputs::read(Path::new(&outputs_path))?;
        if outputs.is_some() {
            tracing::info!(path = %outputs_path, "Loaded backend outputs");
        }
        Self::from_sources(outputs.unwrap_or_default(), |name| std::env::var(name).ok())
    }

    /// Merge the outputs document with overrides looked up through `env`
    pub fn from_sources(
        outputs: BackendOutputs,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let data = outputs.data.unwrap_or_default();
        let auth = outputs.auth.unwrap_or_default();

        let graphql_url = var("ARCANE_GRAPHQL_URL")
            .or(Some(data.url).filter(|url| !url.is_empty()))
            .ok_or(ConfigError::MissingEndpoint)?;

        let region = var("ARCANE_REGION")
            .or(data.aws_region)
            .or(auth.aws_region)
            .unwrap_or_else(|| "us-east-1".to_string());

        let port = parse_var(&var, "ARCANE_PORT", 8000)?;
        let timeout_secs = parse_var(&var, "ARCANE_HTTP_TIMEOUT_SECS", 60)?;
        let idle_secs = parse_var(
            &var,
            "ARCANE_SESSION_IDLE_SECS",
            DEFAULT_IDLE_TIMEOUT.as_secs(),
        )?;

        let primary_channel = match var("ARCANE_PRIMARY_CHANNEL") {
            Some(value) => value.parse().map_err(|message| ConfigError::Invalid {
                name: "ARCANE_PRIMARY_CHANNEL",
                message,
            })?,
            None => ReplyChannel::default(),
        };

        let completion_route = match var("ARCANE_COMPLETION_ROUTE") {
            Some(value) => value.parse().map_err(|message| ConfigError::Invalid {
                name: "ARCANE_COMPLETION_ROUTE",
                message,
            })?,
            None => CompletionRoute::default(),
        };

        let data_dir = var("ARCANE_DATA_DIR").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".arcane-kitchen")
            },
            PathBuf::from,
        );

        Ok(Self {
            port,
            graphql_url,
            region,
            api_key: var("ARCANE_API_KEY").or(data.api_key),
            user_pool_id: auth.user_pool_id,
            push_url: var("ARCANE_PUSH_URL"),
            conversation_id: var("ARCANE_CONVERSATION_ID"),
            primary_channel,
            completion_route,
            data_dir,
            http_timeout: Duration::from_secs(timeout_secs),
            session_idle_timeout: Duration::from_secs(idle_secs),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
