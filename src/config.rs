// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that tabmig reads to fill in
//! defaults the command line leaves out. File I/O is left to the caller to
//! figure out.
//!
//! # General Layout
//!
//! The configuration file is composed of two basic parts: settings and
//! server profiles. The settings section holds defaults for every
//! migration, e.g., the directory that rewritten documents are saved into.
//! Each server profile gives a short name to a server address together with
//! the credentials to sign in with.

use crate::server::Credentials;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default directory rewritten documents are saved into.
pub const DEFAULT_DIRECTORY: &str = "migrated";

/// Migration configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MigrateConfig {
    /// Settings for every migration.
    #[serde(default)]
    pub settings: MigrateSettings,

    /// Server profiles.
    #[serde(default, rename = "server", skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerProfile>,
}

impl MigrateConfig {
    /// Look up server profile by name.
    pub fn profile(&self, name: &str) -> Option<&ServerProfile> {
        self.servers.iter().find(|profile| profile.name == name)
    }

    /// Resolve command line server argument into server login.
    ///
    /// The argument names a profile, or is used as the address itself.
    /// Command line values take precedence over profile values.
    pub fn resolve_server(
        &self,
        server: &str,
        username: Option<String>,
        password: Option<String>,
        site: Option<String>,
    ) -> ServerLogin {
        match self.profile(server) {
            Some(profile) => ServerLogin {
                address: profile.address.clone(),
                username: username.or_else(|| profile.username.clone()),
                password: password.or_else(|| profile.password.clone()),
                site: site.or_else(|| profile.site.clone()),
            },
            None => ServerLogin {
                address: server.into(),
                username,
                password,
                site,
            },
        }
    }
}

impl FromStr for MigrateConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: MigrateConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on directory and address fields.
        config.settings.directory = PathBuf::from(
            shellexpand::full(config.settings.directory.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );
        for profile in &mut config.servers {
            profile.address = shellexpand::full(&profile.address)
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
        }

        Ok(config)
    }
}

impl Display for MigrateConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Migration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MigrateSettings {
    /// Directory rewritten documents are saved into.
    pub directory: PathBuf,
}

impl MigrateSettings {
    /// Treat directory as [`Path`] slice.
    pub fn directory(&self) -> &Path {
        self.directory.as_path()
    }
}

impl Default for MigrateSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
        }
    }
}

/// Named server profile.
#[derive(Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ServerProfile {
    /// Short name to refer to the server by.
    pub name: String,

    /// Server address.
    pub address: String,

    /// User to sign in as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password of user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Site to sign in to, if not the default site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl std::fmt::Debug for ServerProfile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ServerProfile")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "HIDDEN"))
            .field("site", &self.site)
            .finish()
    }
}

/// Server address plus whatever credentials are known for it.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerLogin {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub site: Option<String>,
}

impl ServerLogin {
    /// Complete login into sign in credentials.
    ///
    /// Missing username or password are asked for through the given prompt,
    /// which receives the name of the missing field.
    ///
    /// # Errors
    ///
    /// - Return whatever error the prompt returns.
    pub fn into_credentials<E>(
        self,
        mut prompt: impl FnMut(&str) -> Result<String, E>,
    ) -> Result<Credentials, E> {
        let username = match self.username {
            Some(username) => username,
            None => prompt("username")?,
        };
        let password = match self.password {
            Some(password) => password,
            None => prompt("password")?,
        };

        Ok(Credentials {
            username,
            password,
            site: self.site,
        })
    }
}

impl std::fmt::Debug for ServerLogin {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ServerLogin")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "HIDDEN"))
            .field("site", &self.site)
            .finish()
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
