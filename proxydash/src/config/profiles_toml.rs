use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use proxydash_core::DEFAULT_FEED_CAPACITY;

use super::error::{ConfigError, Result};

/// Default port of the proxy's HTTP management API.
pub const DEFAULT_API_PORT: u16 = 6171;

const PROFILE_ID_LEN: usize = 12;
const MAX_PROFILE_NAME_LEN: usize = 64;

/// Operating system family the proxy runs on, detected from `x-system`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "macos")]
    MacOs,
    Ios,
    #[default]
    Unknown,
}

impl Platform {
    /// Anything that doesn't report macOS is treated as iOS.
    pub fn from_system_header(value: Option<&str>) -> Self {
        match value {
            Some(system) if system.contains("macOS") => Platform::MacOs,
            _ => Platform::Ios,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::MacOs => "macos",
            Platform::Ios => "ios",
            Platform::Unknown => "unknown",
        }
    }
}

/// A saved connection to one proxy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    pub key: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub platform_build: String,
}

impl Profile {
    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }
}

pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

/// Everything needed to create a profile; the id is generated on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub key: String,
    pub platform: Platform,
    pub platform_version: String,
    pub platform_build: String,
}

impl NewProfile {
    /// Check the fields `ProfilesToml::add` would reject, without touching the store.
    pub fn validate(&self) -> Result<()> {
        validate_profile_fields(self.name.trim(), self.host.trim(), self.port, &self.key)
    }
}

/// Polling and display tuning from the `[dashboard]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// Request feed refresh interval; 0 disables auto-refresh.
    pub requests_interval_ms: u64,
    /// Traffic refresh interval used by `traffic --watch`.
    pub traffic_interval_ms: u64,
    /// Per-request HTTP timeout.
    pub timeout_ms: u64,
    /// Rows kept in the request feed.
    pub feed_capacity: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            requests_interval_ms: 5_000,
            traffic_interval_ms: 2_000,
            timeout_ms: 3_000,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl DashboardSettings {
    pub fn requests_interval(&self) -> Duration {
        Duration::from_millis(self.requests_interval_ms)
    }

    pub fn traffic_interval(&self) -> Duration {
        Duration::from_millis(self.traffic_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "dashboard.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.feed_capacity == 0 {
            return Err(ConfigError::Validation(
                "dashboard.feed_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    profiles: Vec<Profile>,
    #[serde(default)]
    last_used: Option<String>,
    #[serde(default)]
    dashboard: DashboardSettings,
}

/// Saved profiles from ~/.proxydash/config.toml `[[profiles]]`, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilesToml {
    pub profiles: Vec<Profile>,

    /// Id of the profile used when no `--profile` is given.
    pub last_used: Option<String>,

    pub dashboard: DashboardSettings,
}

impl ProfilesToml {
    /// Get the default config path (~/.proxydash/config.toml).
    pub fn default_path() -> Result<PathBuf> {
        let home = crate::paths::proxydash_home_dir().map_err(|e| {
            ConfigError::Validation(format!(
                "Could not determine proxydash home directory: {}",
                e
            ))
        })?;
        Ok(home.join("config.toml"))
    }

    /// Load profiles from the default location. A missing file is an empty config.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            return Self::load_from_file(&path);
        }
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(path.as_ref().to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: RawConfig = toml::from_str(content)?;
        let mut config = ProfilesToml {
            profiles: raw.profiles,
            last_used: raw.last_used,
            dashboard: raw.dashboard,
        };

        // A dangling pointer just means nothing is selected.
        if let Some(id) = config.last_used.as_deref()
            && !config.profiles.iter().any(|p| p.id == id)
        {
            config.last_used = None;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, profile) in self.profiles.iter().enumerate() {
            validate_profile_fields(&profile.name, &profile.host, profile.port, &profile.key)?;
            if profile.id.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Profile '{}' has an empty id",
                    profile.name
                )));
            }

            let earlier = &self.profiles[..idx];
            if earlier.iter().any(|p| p.id == profile.id) {
                return Err(ConfigError::DuplicateProfileId(profile.id.clone()));
            }
            if earlier.iter().any(|p| p.name == profile.name) {
                return Err(ConfigError::DuplicateProfileName(profile.name.clone()));
            }
        }

        self.dashboard.validate()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to_file(&path)
    }

    /// Save to a specific TOML file, preserving unrelated top-level keys.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::FileWrite(parent.to_path_buf(), e))?;
        }

        let mut doc = if path.exists() {
            let existing = fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
            if existing.trim().is_empty() {
                toml::Value::Table(toml::map::Map::new())
            } else {
                toml::from_str::<toml::Value>(&existing)?
            }
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let root = doc
            .as_table_mut()
            .ok_or_else(|| ConfigError::Validation("Config must be a TOML table".to_string()))?;

        match self.last_used.as_deref() {
            Some(id) => {
                root.insert("last_used".to_string(), toml::Value::String(id.to_string()));
            }
            None => {
                root.remove("last_used");
            }
        }

        if self.dashboard == DashboardSettings::default() {
            root.remove("dashboard");
        } else {
            root.insert("dashboard".to_string(), dashboard_table(&self.dashboard));
        }

        let profiles: Vec<toml::Value> = self.profiles.iter().map(profile_table).collect();
        if profiles.is_empty() {
            root.remove("profiles");
        } else {
            root.insert("profiles".to_string(), toml::Value::Array(profiles));
        }

        let content = toml::to_string_pretty(&doc)?;
        fs::write(path, content).map_err(|e| ConfigError::FileWrite(path.to_path_buf(), e))?;

        Ok(())
    }

    /// Find a profile by id, then by name.
    pub fn get(&self, selector: &str) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.id == selector)
            .or_else(|| self.profiles.iter().find(|p| p.name == selector))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.name == name)
    }

    pub fn last_used(&self) -> Option<&Profile> {
        let id = self.last_used.as_deref()?;
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Pick the profile to talk to: the explicit selector, else the last used
    /// one, else the only saved profile.
    pub fn resolve(&self, selector: Option<&str>) -> Result<&Profile> {
        if let Some(selector) = selector {
            return self
                .get(selector)
                .ok_or_else(|| ConfigError::ProfileNotFound(selector.to_string()));
        }

        if let Some(profile) = self.last_used() {
            return Ok(profile);
        }

        match self.profiles.as_slice() {
            [only] => Ok(only),
            _ => Err(ConfigError::NoActiveProfile),
        }
    }

    /// Add a profile at the front of the list and mark it last used.
    pub fn add(&mut self, new: NewProfile) -> Result<Profile> {
        let name = new.name.trim().to_string();
        let host = new.host.trim().to_string();
        validate_profile_fields(&name, &host, new.port, &new.key)?;
        if self.contains_name(&name) {
            return Err(ConfigError::DuplicateProfileName(name));
        }

        let mut id = generate_profile_id();
        while self.profiles.iter().any(|p| p.id == id) {
            id = generate_profile_id();
        }

        let profile = Profile {
            id,
            name,
            host,
            port: new.port,
            key: new.key,
            platform: new.platform,
            platform_version: new.platform_version,
            platform_build: new.platform_build,
        };

        self.profiles.insert(0, profile.clone());
        self.last_used = Some(profile.id.clone());
        Ok(profile)
    }

    pub fn remove(&mut self, selector: &str) -> Result<Profile> {
        let id = self
            .get(selector)
            .map(|p| p.id.clone())
            .ok_or_else(|| ConfigError::ProfileNotFound(selector.to_string()))?;

        let idx = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ConfigError::ProfileNotFound(selector.to_string()))?;
        let removed = self.profiles.remove(idx);

        if self.last_used.as_deref() == Some(removed.id.as_str()) {
            self.last_used = None;
        }
        Ok(removed)
    }

    /// Mark a profile as last used.
    pub fn select(&mut self, selector: &str) -> Result<&Profile> {
        let id = self
            .get(selector)
            .map(|p| p.id.clone())
            .ok_or_else(|| ConfigError::ProfileNotFound(selector.to_string()))?;
        self.last_used = Some(id);
        self.last_used()
            .ok_or_else(|| ConfigError::ProfileNotFound(selector.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn generate_profile_id() -> String {
    nanoid::nanoid!(PROFILE_ID_LEN)
}

fn profile_table(profile: &Profile) -> toml::Value {
    let mut table = toml::map::Map::new();
    table.insert("id".to_string(), toml::Value::String(profile.id.clone()));
    table.insert(
        "name".to_string(),
        toml::Value::String(profile.name.clone()),
    );
    table.insert(
        "host".to_string(),
        toml::Value::String(profile.host.clone()),
    );
    if profile.port != DEFAULT_API_PORT {
        table.insert(
            "port".to_string(),
            toml::Value::Integer(profile.port as i64),
        );
    }
    table.insert("key".to_string(), toml::Value::String(profile.key.clone()));
    table.insert(
        "platform".to_string(),
        toml::Value::String(profile.platform.as_str().to_string()),
    );
    if !profile.platform_version.is_empty() {
        table.insert(
            "platform_version".to_string(),
            toml::Value::String(profile.platform_version.clone()),
        );
    }
    if !profile.platform_build.is_empty() {
        table.insert(
            "platform_build".to_string(),
            toml::Value::String(profile.platform_build.clone()),
        );
    }
    toml::Value::Table(table)
}

fn dashboard_table(settings: &DashboardSettings) -> toml::Value {
    let mut table = toml::map::Map::new();
    table.insert(
        "requests_interval_ms".to_string(),
        toml::Value::Integer(settings.requests_interval_ms.min(i64::MAX as u64) as i64),
    );
    table.insert(
        "traffic_interval_ms".to_string(),
        toml::Value::Integer(settings.traffic_interval_ms.min(i64::MAX as u64) as i64),
    );
    table.insert(
        "timeout_ms".to_string(),
        toml::Value::Integer(settings.timeout_ms.min(i64::MAX as u64) as i64),
    );
    table.insert(
        "feed_capacity".to_string(),
        toml::Value::Integer(settings.feed_capacity.min(i64::MAX as usize) as i64),
    );
    toml::Value::Table(table)
}

fn validate_profile_fields(name: &str, host: &str, port: u16, key: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "Profile name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_PROFILE_NAME_LEN {
        return Err(ConfigError::Validation(format!(
            "Profile name cannot exceed {} characters",
            MAX_PROFILE_NAME_LEN
        )));
    }

    if host.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "Profile '{}' has empty host",
            name
        )));
    }

    if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "Profile '{}' host must be a bare hostname or IP address, got '{}'",
            name, host
        )));
    }

    if port == 0 {
        return Err(ConfigError::Validation(format!(
            "Profile '{}' has invalid port 0",
            name
        )));
    }

    if key.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Profile '{}' has an empty API key",
            name
        )));
    }

    Ok(())
}
