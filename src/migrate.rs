// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Migration flows.
//!
//! Two flows move content from one server to another:
//!
//! - [`DatasourceMigration`] points the connection of datasource documents
//!   at a new database, and publishes them into a project.
//! - [`WorkbookMigration`] rewrites the published datasource references of
//!   workbooks so they resolve on the target server, and publishes them into
//!   the target project.
//!
//! Both save the rewritten document into a migration directory before
//! publishing it, so the exact file sent to the server can be inspected
//! afterwards.

use crate::{
    catalog::{find_project, Catalog, CatalogError},
    document::{DocumentError, DocumentParser, MultiConnectionUnsupported},
    path::{migrated_datasource_path, migrated_workbook_path},
    remap::{RemapError, Remapper},
    server::{
        ConnectionCredentials, DatasourceItem, ProjectItem, PublishMode, ServerClient,
        ServerError, WorkbookItem, FALLBACK_API_VERSION,
    },
};

use mkdirp::mkdirp;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Run publish call, retrying once with an older API version on mismatch.
///
/// # Errors
///
/// - Return [`ServerError`] of the publish call, or of the retry if the
///   first call failed for version mismatch.
pub fn publish_with_fallback<C, T, F>(client: &mut C, mut publish: F) -> Result<T, ServerError>
where
    C: ServerClient + ?Sized,
    F: FnMut(&mut C) -> Result<T, ServerError>,
{
    match publish(client) {
        Err(ServerError::VersionMismatch {
            requested,
            supported,
        }) => {
            warn!(
                "{} rejected API version {requested} (newest supported {supported}), retry with {FALLBACK_API_VERSION}",
                client.base_url()
            );
            client.set_version(FALLBACK_API_VERSION);
            publish(client)
        }
        result => result,
    }
}

/// Create migration directory, including missing parents.
///
/// # Errors
///
/// - Return [`MigrateError::CreateDirectory`] if directory cannot be created.
pub fn prepare_directory(directory: impl AsRef<Path>) -> Result<()> {
    let directory = directory.as_ref();
    if let Some(created) = mkdirp(directory).map_err(|err| MigrateError::CreateDirectory {
        source: err,
        path: directory.to_path_buf(),
    })? {
        debug!("created migration directory {:?}", created.display());
    }

    Ok(())
}

/// Database connection settings datasources are pointed at.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOverride {
    pub host: String,
    pub port: String,
    pub database: String,
    pub login: String,
    pub password: String,
}

impl ConnectionOverride {
    fn credentials(&self) -> ConnectionCredentials {
        ConnectionCredentials {
            name: self.login.clone(),
            password: self.password.clone(),
            embed: true,
        }
    }
}

impl Debug for ConnectionOverride {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ConnectionOverride")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("login", &self.login)
            .field("password", &"HIDDEN")
            .finish()
    }
}

/// Publish datasources against a new database.
#[derive(Debug, Clone)]
pub struct DatasourceMigration {
    project: ProjectItem,
    connection: ConnectionOverride,
    directory: PathBuf,
}

impl DatasourceMigration {
    /// Prepare datasource migration into named project.
    ///
    /// # Errors
    ///
    /// - Return [`MigrateError::Catalog`] if project cannot be found.
    /// - Return [`MigrateError::CreateDirectory`] if migration directory
    ///   cannot be created.
    #[instrument(skip(client, connection, directory), level = "debug")]
    pub fn prepare<C>(
        client: &C,
        project: &str,
        connection: ConnectionOverride,
        directory: impl Into<PathBuf>,
    ) -> Result<Self>
    where
        C: ServerClient + ?Sized,
    {
        let project = find_project(client, project)?;
        let directory = directory.into();
        prepare_directory(&directory)?;

        Ok(Self {
            project,
            connection,
            directory,
        })
    }

    /// Project datasources are published into.
    pub fn project(&self) -> &ProjectItem {
        &self.project
    }

    /// Rewrite connection of datasource document, save it, and publish it.
    ///
    /// # Errors
    ///
    /// - Return [`MigrateError::Document`] if document cannot be read or
    ///   saved.
    /// - Return [`MigrateError::NotADatasource`] if document is a workbook.
    /// - Return [`MigrateError::MultiConnection`] if datasource has more than
    ///   one connection.
    /// - Return [`MigrateError::MissingConnection`] if datasource has no
    ///   connection.
    /// - Return [`MigrateError::Server`] if publishing fails.
    #[instrument(skip(self, client, parser), level = "debug")]
    pub fn migrate<C, P>(&self, client: &mut C, parser: &P, source: &Path) -> Result<DatasourceItem>
    where
        C: ServerClient + ?Sized,
        P: DocumentParser + ?Sized,
    {
        let mut document = parser.open(source)?;
        let datasource = document
            .datasource_mut()
            .ok_or_else(|| MigrateError::NotADatasource {
                path: source.to_path_buf(),
            })?;

        let connection = datasource
            .sole_connection_mut()?
            .ok_or_else(|| MigrateError::MissingConnection {
                path: source.to_path_buf(),
            })?;
        connection.dbname = Some(self.connection.database.clone());
        connection.server = Some(self.connection.host.clone());
        connection.port = Some(self.connection.port.clone());
        connection.username = Some(self.connection.login.clone());

        let invalid = || MigrateError::InvalidFileName {
            path: source.to_path_buf(),
        };
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(invalid)?;
        let target = migrated_datasource_path(&self.directory, source, &self.connection.database)
            .ok_or_else(invalid)?;
        parser.save_as(&document, &target)?;
        info!("saved {:?} as {:?}", source.display(), target.display());

        let credentials = self.connection.credentials();
        let published = publish_with_fallback(client, |client| {
            client.publish_datasource(
                DatasourceItem::new(self.project.id.clone(), name.clone()),
                &target,
                PublishMode::Overwrite,
                Some(&credentials),
            )
        })?;

        Ok(published)
    }
}

/// Publish workbooks with datasource references remapped to the target.
#[derive(Debug, Clone)]
pub struct WorkbookMigration {
    source_project: ProjectItem,
    target_project: ProjectItem,
    remapper: Remapper,
    directory: PathBuf,
}

impl WorkbookMigration {
    /// Prepare workbook migration between two projects.
    ///
    /// Looks up both projects before building any catalog.
    ///
    /// # Errors
    ///
    /// - Return [`MigrateError::Catalog`] if either project cannot be found,
    ///   or a catalog cannot be built.
    /// - Return [`MigrateError::CreateDirectory`] if migration directory
    ///   cannot be created.
    #[instrument(skip(source, target, directory), level = "debug")]
    pub fn prepare<S, T>(
        source: &S,
        target: &T,
        source_project: &str,
        target_project: &str,
        directory: impl Into<PathBuf>,
    ) -> Result<Self>
    where
        S: ServerClient + ?Sized,
        T: ServerClient + ?Sized,
    {
        let source_project = find_project(source, source_project)?;
        let target_project = find_project(target, target_project)?;

        let source_catalog = Catalog::build(source, &source_project)?;
        let target_catalog = Catalog::build(target, &target_project)?;
        let remapper = Remapper::new(&source_catalog, target_catalog);

        let directory = directory.into();
        prepare_directory(&directory)?;

        Ok(Self {
            source_project,
            target_project,
            remapper,
            directory,
        })
    }

    /// Project workbooks come from.
    pub fn source_project(&self) -> &ProjectItem {
        &self.source_project
    }

    /// Project workbooks are published into.
    pub fn target_project(&self) -> &ProjectItem {
        &self.target_project
    }

    /// Remapper shared by every workbook.
    pub fn remapper(&self) -> &Remapper {
        &self.remapper
    }

    /// Remap datasource references of workbook, save it, and publish it.
    ///
    /// Nothing is saved or published when remapping fails.
    ///
    /// # Errors
    ///
    /// - Return [`MigrateError::Document`] if document cannot be read or
    ///   saved.
    /// - Return [`MigrateError::Remap`] if a reference cannot be remapped.
    /// - Return [`MigrateError::Server`] if publishing fails.
    #[instrument(skip(self, client, parser), level = "debug")]
    pub fn migrate<C, P>(&self, client: &mut C, parser: &P, source: &Path) -> Result<WorkbookItem>
    where
        C: ServerClient + ?Sized,
        P: DocumentParser + ?Sized,
    {
        let mut document = parser.open(source)?;
        document.datasources = self
            .remapper
            .remap(std::mem::take(&mut document.datasources))?;

        let invalid = || MigrateError::InvalidFileName {
            path: source.to_path_buf(),
        };
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(invalid)?;
        let target = migrated_workbook_path(&self.directory, source).ok_or_else(invalid)?;
        parser.save_as(&document, &target)?;
        info!("saved {:?} as {:?}", source.display(), target.display());

        let published = publish_with_fallback(client, |client| {
            client.publish_workbook(
                WorkbookItem::new(self.target_project.id.clone(), name.clone()),
                &target,
                PublishMode::Overwrite,
            )
        })?;

        Ok(published)
    }
}

/// Migration error types.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Project lookup or catalog construction fails.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Datasource reference remapping fails.
    #[error(transparent)]
    Remap(#[from] RemapError),

    /// Datasource has more than one connection.
    #[error(transparent)]
    MultiConnection(#[from] MultiConnectionUnsupported),

    /// Document cannot be read or written.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Server interaction fails.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Migration directory cannot be created.
    #[error("failed to create migration directory {:?}", path.display())]
    CreateDirectory {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Document path has no usable file name.
    #[error("cannot derive item name from {:?}", path.display())]
    InvalidFileName { path: PathBuf },

    /// Datasource migration was handed a workbook.
    #[error("{:?} is not a datasource document", path.display())]
    NotADatasource { path: PathBuf },

    /// Datasource has no connection to point at the new database.
    #[error("datasource in {:?} has no connection", path.display())]
    MissingConnection { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = MigrateError> = std::result::Result<T, E>;
