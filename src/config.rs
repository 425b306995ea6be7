use crate::core::{Result, ScopeDbError};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Connection settings: the four values a scope needs to connect.
///
/// The TOML form uses the field names verbatim:
///
/// ```toml
/// DB_HOST = "localhost"
/// DB_NAME = "app.db"
/// DB_USER = "app"
/// DB_PASS = "secret"
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(rename = "DB_HOST")]
    host: String,
    #[serde(rename = "DB_NAME")]
    name: String,
    #[serde(rename = "DB_USER")]
    user: String,
    #[serde(rename = "DB_PASS", default)]
    password: String,
}

impl Settings {
    /// Environment variable names, in host/name/user/password order.
    pub const ENV_KEYS: [&'static str; 4] = ["DB_HOST", "DB_NAME", "DB_USER", "DB_PASS"];

    /// Builds validated settings.
    ///
    /// # Errors
    ///
    /// `ScopeDbError::Config` if host, name or user is empty, or any field
    /// contains a NUL byte.
    pub fn new(
        host: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let settings = Settings {
            host: host.into(),
            name: name.into(),
            user: user.into(),
            password: password.into(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file at the given path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// let settings = scopedb::config::Settings::load("database.toml")?;
    /// # Ok::<(), scopedb::core::ScopeDbError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reads `DB_HOST`, `DB_NAME`, `DB_USER` and `DB_PASS` from the environment.
    ///
    /// A missing `DB_PASS` is treated as an empty password.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let [host_key, name_key, user_key, pass_key] = Self::ENV_KEYS;
        let required = |key: &str| {
            lookup(key).ok_or_else(|| ScopeDbError::Config(format!("{} is not set", key)))
        };
        Self::new(
            required(host_key)?,
            required(name_key)?,
            required(user_key)?,
            lookup(pass_key).unwrap_or_default(),
        )
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in Self::ENV_KEYS.iter().zip(self.fields()) {
            if value.contains('\0') {
                return Err(ScopeDbError::Config(format!("{} contains a NUL byte", key)));
            }
        }
        for (key, value) in [("DB_HOST", &self.host), ("DB_NAME", &self.name), ("DB_USER", &self.user)] {
            if value.trim().is_empty() {
                return Err(ScopeDbError::Config(format!("{} must not be empty", key)));
            }
        }
        Ok(())
    }

    fn fields(&self) -> [&str; 4] {
        [&self.host, &self.name, &self.user, &self.password]
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
