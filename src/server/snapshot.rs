// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Site snapshot server.
//!
//! A site snapshot is a directory that stands in for one site of a Tableau
//! Server. It lets migrations be rehearsed offline, and it is what the test
//! suite publishes against.
//!
//! # Snapshot Layout
//!
//! ```text
//! <root>/site.toml      inventory of users, projects, datasources, workbooks
//! <root>/content/       published documents, one file per item id
//! ```
//!
//! The inventory is rewritten after every successful publish.

use crate::{
    document::{Connection, DocumentParser, TomlDocumentParser},
    server::{
        ApiVersion, ConnectionCredentials, Credentials, DatasourceItem, Page, PageRequest,
        ProjectItem, PublishMode, Result, ServerClient, ServerError, WorkbookItem,
        DEFAULT_API_VERSION, DEFAULT_PAGE_SIZE,
    },
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{copy, create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Server client backed by a site snapshot directory.
#[derive(Debug)]
pub struct SnapshotServer {
    root: PathBuf,
    address: String,
    site: SiteDefinition,
    version: ApiVersion,
    session: Option<String>,
}

impl SnapshotServer {
    /// Open site snapshot at target directory.
    ///
    /// # Errors
    ///
    /// - Return [`ServerError::ReadSite`] if `site.toml` cannot be read.
    /// - Return [`ServerError::MalformedSite`] if `site.toml` is malformed.
    #[instrument(skip(root), level = "debug")]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join("site.toml");
        debug!("open site snapshot {:?}", path.display());

        let data = read_to_string(&path).map_err(|err| ServerError::ReadSite {
            source: err,
            path: path.clone(),
        })?;
        let site = data
            .parse::<SiteDefinition>()
            .map_err(|err| ServerError::MalformedSite { source: err, path })?;

        Ok(Self {
            address: format!("file://{}", root.display()),
            root,
            site,
            version: DEFAULT_API_VERSION,
            session: None,
        })
    }

    /// Current site inventory.
    pub fn site(&self) -> &SiteDefinition {
        &self.site
    }

    fn require_session(&self) -> Result<()> {
        match self.session {
            Some(_) => Ok(()),
            None => Err(ServerError::NotSignedIn {
                address: self.address.clone(),
            }),
        }
    }

    fn require_publish_version(&self) -> Result<()> {
        match self.site.server.max_publish_version {
            Some(supported) if self.version > supported => Err(ServerError::VersionMismatch {
                requested: self.version,
                supported,
            }),
            _ => Ok(()),
        }
    }

    fn project(&self, id: &str) -> Result<&ProjectRecord> {
        self.site
            .projects
            .iter()
            .find(|project| project.id == id)
            .ok_or_else(|| ServerError::UnknownProject { id: id.into() })
    }

    fn next_id(&self, prefix: &str) -> String {
        let taken = |id: &str| {
            self.site.datasources.iter().any(|record| record.id == id)
                || self.site.workbooks.iter().any(|record| record.id == id)
        };

        let mut counter = self.site.datasources.len() + self.site.workbooks.len() + 1;
        loop {
            let id = format!("{prefix}-{counter}");
            if !taken(&id) {
                return id;
            }
            counter += 1;
        }
    }

    fn next_content_url(&self, name: &str) -> String {
        let base = content_url_for(name);
        let taken =
            |url: &str| self.site.datasources.iter().any(|record| record.content_url == url);

        if !taken(&base) {
            return base;
        }

        let mut counter = 1;
        loop {
            let url = format!("{base}_{counter}");
            if !taken(&url) {
                return url;
            }
            counter += 1;
        }
    }

    fn store_content(&self, id: &str, file: &Path) -> Result<String> {
        let content_dir = self.root.join("content");
        create_dir_all(&content_dir).map_err(|err| ServerError::Write {
            source: err,
            path: content_dir.clone(),
        })?;

        let file_name = match file.extension() {
            Some(ext) => format!("{id}.{}", ext.to_string_lossy()),
            None => id.to_string(),
        };
        let target = content_dir.join(&file_name);
        copy(file, &target).map_err(|err| ServerError::Write {
            source: err,
            path: target,
        })?;

        Ok(format!("content/{file_name}"))
    }

    fn persist(&self) -> Result<()> {
        let path = self.root.join("site.toml");
        let data = toml::ser::to_string_pretty(&self.site)?;
        write(&path, data).map_err(|err| ServerError::Write { source: err, path })
    }
}

impl ServerClient for SnapshotServer {
    fn base_url(&self) -> &str {
        &self.address
    }

    #[instrument(skip(self), level = "debug")]
    fn sign_in(&mut self, credentials: &Credentials) -> Result<()> {
        let rejected = || ServerError::Authentication {
            username: credentials.username.clone(),
        };

        if let Some(site) = &credentials.site {
            if self.site.server.site.as_ref() != Some(site) {
                return Err(rejected());
            }
        }

        // INVARIANT: An inventory without users accepts anyone.
        if !self.site.users.is_empty()
            && !self.site.users.iter().any(|user| {
                user.name == credentials.username && user.password == credentials.password
            })
        {
            return Err(rejected());
        }

        info!("signed in to {} as {}", self.address, credentials.username);
        self.session = Some(credentials.username.clone());

        Ok(())
    }

    fn sign_out(&mut self) -> Result<()> {
        if let Some(username) = self.session.take() {
            debug!("signed out of {} as {username}", self.address);
        }

        Ok(())
    }

    fn use_server_version(&mut self) -> Result<()> {
        debug!(
            "use server API version {} for {}",
            self.site.server.api_version, self.address
        );
        self.version = self.site.server.api_version;
        Ok(())
    }

    fn version(&self) -> ApiVersion {
        self.version
    }

    fn set_version(&mut self, version: ApiVersion) {
        self.version = version;
    }

    fn projects(&self) -> Result<Vec<ProjectItem>> {
        self.require_session()?;
        Ok(self
            .site
            .projects
            .iter()
            .map(|project| ProjectItem {
                id: project.id.clone(),
                name: project.name.clone(),
            })
            .collect())
    }

    fn datasources(&self, request: PageRequest) -> Result<Page<DatasourceItem>> {
        self.require_session()?;
        let size = request.size.max(1).min(self.site.server.page_size.max(1));
        let start = request.number.saturating_sub(1).saturating_mul(size);
        let items = self
            .site
            .datasources
            .iter()
            .skip(start)
            .take(size)
            .map(|record| DatasourceItem {
                id: Some(record.id.clone()),
                name: record.name.clone(),
                content_url: record.content_url.clone(),
                project_id: record.project_id.clone(),
                project_name: self.project(&record.project_id).ok().map(|p| p.name.clone()),
                connections: Vec::new(),
            })
            .collect();

        Ok(Page {
            items,
            number: request.number,
            size,
            total: self.site.datasources.len(),
        })
    }

    fn populate_connections(&self, item: &mut DatasourceItem) -> Result<()> {
        self.require_session()?;
        let id = item.id.clone().unwrap_or_default();
        let record = self
            .site
            .datasources
            .iter()
            .find(|record| record.id == id)
            .ok_or(ServerError::UnknownItem { id })?;
        item.connections = record.connections.clone();

        Ok(())
    }

    #[instrument(skip(self, item, credentials), level = "debug")]
    fn publish_datasource(
        &mut self,
        item: DatasourceItem,
        file: &Path,
        mode: PublishMode,
        credentials: Option<&ConnectionCredentials>,
    ) -> Result<DatasourceItem> {
        self.require_session()?;
        self.require_publish_version()?;
        let project_name = self.project(&item.project_id)?.name.clone();

        let document = TomlDocumentParser::new().open(file)?;
        let mut connections = document
            .datasources
            .into_iter()
            .flat_map(|datasource| datasource.connections)
            .collect::<Vec<_>>();
        if let Some(credentials) = credentials.filter(|credentials| credentials.embed) {
            for connection in &mut connections {
                connection.username = Some(credentials.name.clone());
            }
        }

        let existing = self
            .site
            .datasources
            .iter()
            .position(|record| record.project_id == item.project_id && record.name == item.name);
        let (id, content_url) = match (existing, mode) {
            (Some(_), PublishMode::CreateNew) => {
                return Err(ServerError::Conflict {
                    name: item.name,
                    project_id: item.project_id,
                })
            }
            (Some(index), PublishMode::Overwrite) => {
                let record = &self.site.datasources[index];
                (record.id.clone(), record.content_url.clone())
            }
            (None, _) => (self.next_id("ds"), self.next_content_url(&item.name)),
        };

        let record = DatasourceRecord {
            id: id.clone(),
            name: item.name.clone(),
            content_url: content_url.clone(),
            project_id: item.project_id.clone(),
            file: Some(self.store_content(&id, file)?),
            connections: connections.clone(),
        };
        match existing {
            Some(index) => self.site.datasources[index] = record,
            None => self.site.datasources.push(record),
        }
        self.persist()?;
        info!("published datasource {:?} as {id}", item.name);

        Ok(DatasourceItem {
            id: Some(id),
            content_url,
            project_name: Some(project_name),
            connections,
            ..item
        })
    }

    #[instrument(skip(self, item), level = "debug")]
    fn publish_workbook(
        &mut self,
        item: WorkbookItem,
        file: &Path,
        mode: PublishMode,
    ) -> Result<WorkbookItem> {
        self.require_session()?;
        self.require_publish_version()?;
        self.project(&item.project_id)?;

        // Reject documents that do not parse before touching the inventory.
        TomlDocumentParser::new().open(file)?;

        let existing = self
            .site
            .workbooks
            .iter()
            .position(|record| record.project_id == item.project_id && record.name == item.name);
        let id = match (existing, mode) {
            (Some(_), PublishMode::CreateNew) => {
                return Err(ServerError::Conflict {
                    name: item.name,
                    project_id: item.project_id,
                })
            }
            (Some(index), PublishMode::Overwrite) => self.site.workbooks[index].id.clone(),
            (None, _) => self.next_id("wb"),
        };

        let record = WorkbookRecord {
            id: id.clone(),
            name: item.name.clone(),
            project_id: item.project_id.clone(),
            file: Some(self.store_content(&id, file)?),
        };
        match existing {
            Some(index) => self.site.workbooks[index] = record,
            None => self.site.workbooks.push(record),
        }
        self.persist()?;
        info!("published workbook {:?} as {id}", item.name);

        Ok(WorkbookItem {
            id: Some(id),
            ..item
        })
    }
}

/// Derive content URL from item name.
///
/// Keeps ASCII alphanumerics, dashes, and underscores, dropping everything
/// else.
pub fn content_url_for(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Site snapshot inventory layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SiteDefinition {
    /// Server settings.
    pub server: ServerSettings,

    /// Users allowed to sign in.
    #[serde(default, rename = "user", skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserRecord>,

    /// Projects of the site.
    #[serde(default, rename = "project", skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectRecord>,

    /// Published datasources.
    #[serde(default, rename = "datasource", skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceRecord>,

    /// Published workbooks.
    #[serde(default, rename = "workbook", skip_serializing_if = "Vec::is_empty")]
    pub workbooks: Vec<WorkbookRecord>,
}

impl FromStr for SiteDefinition {
    type Err = toml::de::Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data)
    }
}

impl Display for SiteDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

/// Server settings of a site snapshot.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Newest API version the server speaks.
    pub api_version: ApiVersion,

    /// Newest API version the publish endpoint accepts, if older.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_publish_version: Option<ApiVersion>,

    /// Largest page the server hands out.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Content URL of the site, if not the default site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION,
            max_publish_version: None,
            page_size: DEFAULT_PAGE_SIZE,
            site: None,
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// User allowed to sign in.
#[derive(Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct UserRecord {
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("UserRecord")
            .field("name", &self.name)
            .field("password", &"HIDDEN")
            .finish()
    }
}

/// Project of a site.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
}

/// Published datasource of a site.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DatasourceRecord {
    pub id: String,
    pub name: String,
    pub content_url: String,
    pub project_id: String,

    /// Published document, relative to the snapshot root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, rename = "connection", skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

/// Published workbook of a site.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WorkbookRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,

    /// Published document, relative to the snapshot root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DatasourceReference, Document, DocumentKind};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    const SITE: &str = indoc! {r#"
        [server]
        api_version = "3.4"
        max_publish_version = "2.4"
        page_size = 2
        site = "marketing"

        [[user]]
        name = "admin"
        password = "secret"

        [[project]]
        id = "p1"
        name = "Finance"

        [[project]]
        id = "p2"
        name = "Sales"

        [[datasource]]
        id = "ds-a"
        name = "Orders"
        content_url = "Orders"
        project_id = "p1"

        [[datasource.connection]]
        class = "postgres"
        server = "db.example.com"
        port = "5432"
        dbname = "orders"
    "#};

    fn admin() -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "secret".into(),
            site: Some("marketing".into()),
        }
    }

    fn signed_in() -> anyhow::Result<SnapshotServer> {
        write("site.toml", SITE)?;
        let mut server = SnapshotServer::open(".")?;
        server.sign_in(&admin())?;
        Ok(server)
    }

    fn write_datasource_document(path: &str) -> anyhow::Result<()> {
        let mut document = Document::new(DocumentKind::Datasource);
        document
            .datasources
            .push(DatasourceReference::new("orders", "").with_connection(Connection {
                server: Some("db2.example.com".into()),
                dbname: Some("orders_v2".into()),
                ..Connection::new("postgres")
            }));
        TomlDocumentParser::new().save_as(&document, Path::new(path))?;
        Ok(())
    }

    #[test_case("Sales Data", "SalesData"; "spaces")]
    #[test_case("Q1 (2024)", "Q12024"; "punctuation")]
    #[test_case("snake_case-name", "snake_case-name"; "kept characters")]
    #[test]
    fn derive_content_url(name: &str, expect: &str) {
        pretty_assertions::assert_eq!(content_url_for(name), expect);
    }

    #[sealed_test]
    fn sign_in_checks_users_and_site() -> anyhow::Result<()> {
        write("site.toml", SITE)?;
        let mut server = SnapshotServer::open(".")?;

        let wrong_password = Credentials {
            password: "nope".into(),
            ..admin()
        };
        assert!(matches!(
            server.sign_in(&wrong_password),
            Err(ServerError::Authentication { .. })
        ));

        let wrong_site = Credentials {
            site: Some("finance".into()),
            ..admin()
        };
        assert!(matches!(
            server.sign_in(&wrong_site),
            Err(ServerError::Authentication { .. })
        ));

        assert!(matches!(
            server.projects(),
            Err(ServerError::NotSignedIn { .. })
        ));

        server.sign_in(&admin())?;
        assert_eq!(server.projects()?.len(), 2);

        Ok(())
    }

    #[sealed_test]
    fn use_server_version_switches_version() -> anyhow::Result<()> {
        let mut server = signed_in()?;
        assert_eq!(server.version(), DEFAULT_API_VERSION);
        server.use_server_version()?;
        assert_eq!(server.version(), ApiVersion::new(3, 4));

        Ok(())
    }

    #[sealed_test]
    fn datasources_come_without_connections_until_populated() -> anyhow::Result<()> {
        let server = signed_in()?;
        let page = server.datasources(PageRequest { number: 1, size: 50 })?;
        assert_eq!(page.size, 2);
        assert_eq!(page.total, 1);

        let mut item = page.items[0].clone();
        assert_eq!(item.project_name.as_deref(), Some("Finance"));
        assert!(item.connections.is_empty());

        server.populate_connections(&mut item)?;
        assert_eq!(item.connections[0].dbname.as_deref(), Some("orders"));

        Ok(())
    }

    #[sealed_test]
    fn publish_rejects_newer_api_version() -> anyhow::Result<()> {
        let mut server = signed_in()?;
        server.use_server_version()?;
        write_datasource_document("orders.tds")?;

        let result = server.publish_datasource(
            DatasourceItem::new("p2", "orders"),
            Path::new("orders.tds"),
            PublishMode::Overwrite,
            None,
        );
        assert!(matches!(
            result,
            Err(ServerError::VersionMismatch { requested, supported })
                if requested == ApiVersion::new(3, 4) && supported == ApiVersion::new(2, 4)
        ));

        Ok(())
    }

    #[sealed_test]
    fn publish_datasource_persists_inventory() -> anyhow::Result<()> {
        let mut server = signed_in()?;
        write_datasource_document("orders.tds")?;
        let credentials = ConnectionCredentials {
            name: "etl".into(),
            password: "pw".into(),
            embed: true,
        };

        let published = server.publish_datasource(
            DatasourceItem::new("p2", "Orders"),
            Path::new("orders.tds"),
            PublishMode::Overwrite,
            Some(&credentials),
        )?;
        assert_eq!(published.id.as_deref(), Some("ds-2"));
        assert_eq!(published.content_url, "Orders_1");
        assert_eq!(published.project_name.as_deref(), Some("Sales"));
        assert_eq!(published.connections[0].username.as_deref(), Some("etl"));
        assert!(Path::new("content/ds-2.tds").exists());

        let reopened = SnapshotServer::open(".")?;
        let record = &reopened.site().datasources[1];
        assert_eq!(record.name, "Orders");
        assert_eq!(record.file.as_deref(), Some("content/ds-2.tds"));
        assert!(!read_to_string("site.toml")?.contains("pw"));

        Ok(())
    }

    #[sealed_test]
    fn publish_modes_control_replacement() -> anyhow::Result<()> {
        let mut server = signed_in()?;
        write_datasource_document("orders.tds")?;

        let result = server.publish_datasource(
            DatasourceItem::new("p1", "Orders"),
            Path::new("orders.tds"),
            PublishMode::CreateNew,
            None,
        );
        assert!(matches!(result, Err(ServerError::Conflict { .. })));

        let replaced = server.publish_datasource(
            DatasourceItem::new("p1", "Orders"),
            Path::new("orders.tds"),
            PublishMode::Overwrite,
            None,
        )?;
        assert_eq!(replaced.id.as_deref(), Some("ds-a"));
        assert_eq!(replaced.content_url, "Orders");
        assert_eq!(server.site().datasources.len(), 1);
        assert_eq!(
            server.site().datasources[0].connections[0].dbname.as_deref(),
            Some("orders_v2")
        );

        Ok(())
    }

    #[sealed_test]
    fn publish_workbook_into_unknown_project_fails() -> anyhow::Result<()> {
        let mut server = signed_in()?;
        TomlDocumentParser::new()
            .save_as(&Document::new(DocumentKind::Workbook), Path::new("sales.twb"))?;

        let result = server.publish_workbook(
            WorkbookItem::new("p9", "sales"),
            Path::new("sales.twb"),
            PublishMode::Overwrite,
        );
        assert!(matches!(result, Err(ServerError::UnknownProject { .. })));

        let published = server.publish_workbook(
            WorkbookItem::new("p2", "sales"),
            Path::new("sales.twb"),
            PublishMode::Overwrite,
        )?;
        assert_eq!(published.id.as_deref(), Some("wb-2"));
        assert!(Path::new("content/wb-2.twb").exists());

        Ok(())
    }
}
