//! Environment-driven kernel configuration.
//!
//! The kernel is launched by a notebook manager, not by hand, so everything
//! it needs arrives through environment variables. Missing required variables
//! are fatal: no request can be served without them.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use skiff_bridge::SessionConfig;

/// A configuration variable that is required but absent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
}

/// Everything the kernel needs to come up.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Path to the toolchain shared library to load.
    pub library_path: PathBuf,
    /// Remote API endpoint (package and dataset indices).
    pub api_endpoint: String,
    /// Remote execution endpoint.
    pub exec_endpoint: String,
    /// Directory with certificates for the remote instance.
    pub trust_store_dir: PathBuf,
    /// Local directory for materialized results.
    pub data_dir: PathBuf,
    /// Identity that receives workflow results.
    pub result_user: String,
    /// Force ANSI colour in rendered diagnostics.
    pub force_colour: bool,
}

impl KernelConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let require = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        Ok(Self {
            library_path: PathBuf::from(require("SKIFF_LIBRARY")?),
            api_endpoint: require("SKIFF_API_ADDR")?,
            exec_endpoint: require("SKIFF_EXEC_ADDR")?,
            trust_store_dir: PathBuf::from(require("SKIFF_TRUST_DIR")?),
            data_dir: PathBuf::from(require("SKIFF_DATA_DIR")?),
            result_user: require("SKIFF_RESULT_USER")?,
            force_colour: lookup("SKIFF_FORCE_COLOUR")
                .is_some_and(|value| !value.is_empty() && value != "0"),
        })
    }

    /// The session construction inputs carried by this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            api_endpoint: self.api_endpoint.clone(),
            exec_endpoint: self.exec_endpoint.clone(),
            trust_store_dir: self.trust_store_dir.clone(),
            data_dir: self.data_dir.clone(),
            result_user: Some(self.result_user.clone()),
        }
    }
}
