//! Per-system connection configuration.

use std::fmt;

use serde::Deserialize;

use super::settings::{expand_env_vars, SettingsError};
use crate::crypto::{self, MasterKey};

/// Connection parameters for one named system.
///
/// `engine` is free text resolved case-insensitively by the router. Which of
/// the optional parameters are required depends on the engine; adapters check
/// them when they run.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Table key in the settings file. Filled in by the loader.
    #[serde(skip)]
    pub name: String,

    pub engine: String,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    pub password: Option<String>,

    /// Bearer access token for REST engines.
    pub token: Option<String>,
    /// Snowflake token type (`OAUTH` or `KEYPAIR_JWT`).
    pub token_type: Option<String>,

    pub project_id: Option<String>,
    pub location: Option<String>,

    pub account: Option<String>,
    pub warehouse: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,

    /// File path for embedded engines.
    pub path: Option<String>,

    /// Base URL override for REST engines.
    pub endpoint: Option<String>,

    /// Used verbatim by worker-backed engines when present.
    pub connection_string: Option<String>,

    /// Require TLS.
    pub ssl: bool,
    pub trust_server_certificate: Option<bool>,
}

impl SystemConfig {
    /// A config for `engine` with every parameter unset.
    pub fn new(name: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Look up a string parameter by its settings key.
    pub fn param(&self, parameter: &str) -> Option<&str> {
        let value = match parameter {
            "host" => &self.host,
            "database" => &self.database,
            "username" => &self.username,
            "password" => &self.password,
            "token" => &self.token,
            "token_type" => &self.token_type,
            "project_id" => &self.project_id,
            "location" => &self.location,
            "account" => &self.account,
            "warehouse" => &self.warehouse,
            "schema" => &self.schema,
            "role" => &self.role,
            "path" => &self.path,
            "endpoint" => &self.endpoint,
            "connection_string" => &self.connection_string,
            _ => return None,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Expand environment variables and decrypt `enc:` values in place.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingEnvVar`] for an unset variable,
    /// [`SettingsError::MissingMasterKey`] when an encrypted value is present
    /// but no key was supplied, and [`SettingsError::Crypto`] when decryption
    /// fails.
    pub fn resolve(&mut self, key: Option<&MasterKey>) -> Result<(), SettingsError> {
        self.engine = expand_env_vars(&self.engine)?;

        let name = self.name.clone();
        for slot in self.string_params_mut() {
            let Some(raw) = slot.take() else { continue };
            let expanded = expand_env_vars(&raw)?;
            let resolved = match crypto::encrypted_payload(&expanded) {
                Some(payload) => {
                    let key = key.ok_or_else(|| SettingsError::MissingMasterKey(name.clone()))?;
                    key.decrypt_to_string(payload)
                        .map_err(|source| SettingsError::Crypto {
                            system: name.clone(),
                            source,
                        })?
                }
                None => expanded,
            };
            *slot = Some(resolved);
        }
        Ok(())
    }

    fn string_params_mut(&mut self) -> [&mut Option<String>; 15] {
        [
            &mut self.host,
            &mut self.database,
            &mut self.username,
            &mut self.password,
            &mut self.token,
            &mut self.token_type,
            &mut self.project_id,
            &mut self.location,
            &mut self.account,
            &mut self.warehouse,
            &mut self.schema,
            &mut self.role,
            &mut self.path,
            &mut self.endpoint,
            &mut self.connection_string,
        ]
    }
}

// Credentials never reach logs.
impl fmt::Debug for SystemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SystemConfig")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("project_id", &self.project_id)
            .field("account", &self.account)
            .field("path", &self.path)
            .field("connection_string", &redact(&self.connection_string))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_ignores_blank_values() {
        let mut config = SystemConfig::new("orders", "postgres");
        config.host = Some("  ".into());
        config.database = Some("orders".into());
        assert_eq!(config.param("host"), None);
        assert_eq!(config.param("database"), Some("orders"));
        assert_eq!(config.param("nonsense"), None);
    }

    #[test]
    fn test_resolve_decrypts_encrypted_values() {
        let key = MasterKey::generate().unwrap();
        let mut config = SystemConfig::new("orders", "postgres");
        config.password = Some(key.encrypt_secret("hunter2").unwrap());

        config.resolve(Some(&key)).unwrap();
        assert_eq!(config.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_resolve_without_key_fails() {
        let key = MasterKey::generate().unwrap();
        let mut config = SystemConfig::new("orders", "postgres");
        config.password = Some(key.encrypt_secret("hunter2").unwrap());

        let err = config.resolve(None).unwrap_err();
        assert!(matches!(err, SettingsError::MissingMasterKey(ref s) if s == "orders"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut config = SystemConfig::new("orders", "postgres");
        config.password = Some("hunter2".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
