use std::env::{self, current_dir};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub(crate) mod directory;

/// Environment variable that holds the Canvas instance base URL.
pub(crate) const API_URL_VAR: &str = "CANVAS_API_URL";

/// Environment variable that holds the Canvas API access token.
pub(crate) const API_TOKEN_VAR: &str = "CANVAS_API_TOKEN";

/// Environment variable that overrides the archive output directory.
pub(crate) const OUTPUT_DIR_VAR: &str = "CANVAS_ARCHIVE_DIR";

/// Default Canvas instance when none is configured.
const DEFAULT_API_URL: &str = "https://canvas.instructure.com";

/// Default output directory, relative to the working directory.
const DEFAULT_OUTPUT_DIR: &str = "canvas_archive";

/// Errors raised while assembling the configuration. All of them are fatal
/// and abort the run before any network call.
#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("{API_TOKEN_VAR} is not set. Generate an access token in Canvas and export it (or place it in a .env file).")]
    MissingToken,

    #[error("{0} is set but empty")]
    EmptyVariable(&'static str),
}

/// Config that is used to do general setup. Built once at startup and passed
/// by reference to everything that needs it.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Base URL of the Canvas instance, without a trailing slash.
    api_url: String,
    /// The user's API access token.
    api_token: String,
    /// Root directory all artifacts are archived under.
    output_dir: PathBuf,
}

impl Config {
    /// Loads the configuration from the environment, validating eagerly.
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        Self::from_parts(
            env::var(API_URL_VAR).ok(),
            env::var(API_TOKEN_VAR).ok(),
            env::var(OUTPUT_DIR_VAR).ok(),
        )
    }

    /// Assembles a configuration from optional raw values, applying defaults.
    pub(crate) fn from_parts(
        api_url: Option<String>,
        api_token: Option<String>,
        output_dir: Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_url = match api_url {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyVariable(API_URL_VAR));
            }
            Some(url) => url.trim().trim_end_matches('/').to_string(),
            None => DEFAULT_API_URL.to_string(),
        };

        let api_token = match api_token {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::MissingToken),
            Some(token) => token.trim().to_string(),
            None => return Err(ConfigError::MissingToken),
        };

        let output_dir = match output_dir {
            Some(dir) if dir.trim().is_empty() => {
                return Err(ConfigError::EmptyVariable(OUTPUT_DIR_VAR));
            }
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(DEFAULT_OUTPUT_DIR),
        };

        Ok(Config {
            api_url,
            api_token,
            output_dir,
        })
    }

    /// Base URL of the Canvas instance.
    pub(crate) fn api_url(&self) -> &str {
        &self.api_url
    }

    /// The user's API access token.
    pub(crate) fn api_token(&self) -> &str {
        &self.api_token
    }

    /// Root directory all artifacts are archived under.
    pub(crate) fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The output directory resolved to an absolute path for user-facing
    /// reporting. Falls back to the configured path if the working directory
    /// is unavailable.
    pub(crate) fn absolute_output_dir(&self) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            current_dir()
                .map(|dir| dir.join(&self.output_dir))
                .unwrap_or_else(|_| self.output_dir.clone())
        }
    }
}
