use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, Property, WellKnownItem};
use crate::error::KiraError;
use crate::resolver::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "kira-kb.json";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_QUERY_ENDPOINT: &str = "https://query.wikidata.org/sparql";
pub const DEFAULT_API_ENDPOINT: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_NCBI_DELAY_MS: u64 = 500;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub query_endpoint: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub properties: BTreeMap<Property, String>,
    #[serde(default)]
    pub items: BTreeMap<WellKnownItem, String>,
    #[serde(default)]
    pub ncbi: Option<NcbiEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NcbiEntry {
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMap {
    ids: BTreeMap<Property, String>,
}

impl PropertyMap {
    pub fn id(&self, property: Property) -> &str {
        self.ids
            .get(&property)
            .map(String::as_str)
            .unwrap_or_else(|| property.default_id())
    }
}

impl Default for PropertyMap {
    fn default() -> Self {
        Self {
            ids: Property::ALL
                .iter()
                .map(|property| (*property, property.default_id().to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCatalog {
    ids: BTreeMap<WellKnownItem, EntityId>,
}

impl ItemCatalog {
    pub fn id(&self, item: WellKnownItem) -> EntityId {
        self.ids
            .get(&item)
            .cloned()
            .unwrap_or_else(|| EntityId::builtin(item.default_id()))
    }
}

impl Default for ItemCatalog {
    fn default() -> Self {
        let ids = WellKnownItem::ALL
            .iter()
            .map(|item| (*item, EntityId::builtin(item.default_id())))
            .collect();
        Self { ids }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("WIKIBASE_USERNAME").ok()?;
        let password = std::env::var("WIKIBASE_PASSWORD").ok()?;
        if username.trim().is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.trim().to_string(),
            password,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub language: String,
    pub query_endpoint: String,
    pub api_endpoint: String,
    pub retry: RetryPolicy,
    pub properties: PropertyMap,
    pub items: ItemCatalog,
    pub ncbi_delay: Duration,
    pub ncbi_email: Option<String>,
    pub credentials: Option<Credentials>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            language: DEFAULT_LANGUAGE.to_string(),
            query_endpoint: DEFAULT_QUERY_ENDPOINT.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            properties: PropertyMap::default(),
            items: ItemCatalog::default(),
            ncbi_delay: Duration::from_millis(DEFAULT_NCBI_DELAY_MS),
            ncbi_email: None,
            credentials: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config)?;
        resolved.credentials = Credentials::from_env();
        if resolved.ncbi_email.is_none() {
            resolved.ncbi_email = std::env::var("NCBI_EMAIL")
                .ok()
                .filter(|value| !value.trim().is_empty());
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();

        let language = config
            .language
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.language);

        let retry = match config.retry {
            Some(entry) => {
                let base = defaults.retry;
                let max_attempts = entry.max_attempts.unwrap_or(base.max_attempts);
                if max_attempts == 0 {
                    return Err(KiraError::ConfigParse(
                        "retry.max_attempts must be at least 1".to_string(),
                    ));
                }
                RetryPolicy {
                    max_attempts,
                    base_delay: entry
                        .base_delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or(base.base_delay),
                    max_delay: entry
                        .max_delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or(base.max_delay),
                }
            }
            None => defaults.retry,
        };

        let mut properties = defaults.properties;
        for (property, id) in config.properties {
            let normalized = id.trim().to_uppercase();
            let is_valid = normalized.starts_with('P')
                && normalized.len() > 1
                && normalized[1..].chars().all(|ch| ch.is_ascii_digit());
            if !is_valid {
                return Err(KiraError::InvalidPropertyId(id));
            }
            properties.ids.insert(property, normalized);
        }

        let mut items = defaults.items;
        for (item, id) in config.items {
            items.ids.insert(item, EntityId::from_uri(&id)?);
        }

        let (ncbi_delay, ncbi_email) = match config.ncbi {
            Some(entry) => (
                entry
                    .delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.ncbi_delay),
                entry.email.filter(|value| !value.trim().is_empty()),
            ),
            None => (defaults.ncbi_delay, None),
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            language,
            query_endpoint: config
                .query_endpoint
                .unwrap_or(defaults.query_endpoint),
            api_endpoint: config.api_endpoint.unwrap_or(defaults.api_endpoint),
            retry,
            properties,
            items,
            ncbi_delay,
            ncbi_email,
            credentials: None,
        })
    }
}
