// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Server client abstraction.
//!
//! Every interaction with a Tableau Server goes through a [`ServerClient`]:
//! signing in, selecting the REST API version, listing projects and
//! datasources, fetching connection details, and publishing documents. The
//! remapping logic never talks to a server directly, it only consumes the
//! items a client hands back.
//!
//! # Site Snapshots
//!
//! The stock client, [`SnapshotServer`], is backed by a __site snapshot__: a
//! directory holding a `site.toml` inventory of projects, datasources and
//! workbooks, together with a `content/` directory of published files. A
//! snapshot is addressed by plain path or by `file://` URL.

pub mod snapshot;

pub use snapshot::SnapshotServer;

use crate::document::{Connection, DocumentError};

use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// API version a client starts with before asking the server.
pub const DEFAULT_API_VERSION: ApiVersion = ApiVersion::new(2, 3);

/// API version to downgrade to when a publish call is rejected for version
/// mismatch.
pub const FALLBACK_API_VERSION: ApiVersion = ApiVersion::new(2, 4);

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Layer of indirection for server access.
pub trait ServerClient {
    /// Address of the server.
    fn base_url(&self) -> &str;

    /// Sign in to server.
    fn sign_in(&mut self, credentials: &Credentials) -> Result<()>;

    /// Sign out of server.
    fn sign_out(&mut self) -> Result<()>;

    /// Switch to the newest API version the server supports.
    fn use_server_version(&mut self) -> Result<()>;

    /// Current API version.
    fn version(&self) -> ApiVersion;

    /// Force a specific API version.
    fn set_version(&mut self, version: ApiVersion);

    /// List all projects.
    fn projects(&self) -> Result<Vec<ProjectItem>>;

    /// List one page of datasources across all projects.
    fn datasources(&self, request: PageRequest) -> Result<Page<DatasourceItem>>;

    /// Fetch connection details of datasource item.
    fn populate_connections(&self, item: &mut DatasourceItem) -> Result<()>;

    /// Publish datasource document.
    fn publish_datasource(
        &mut self,
        item: DatasourceItem,
        file: &Path,
        mode: PublishMode,
        credentials: Option<&ConnectionCredentials>,
    ) -> Result<DatasourceItem>;

    /// Publish workbook document.
    fn publish_workbook(
        &mut self,
        item: WorkbookItem,
        file: &Path,
        mode: PublishMode,
    ) -> Result<WorkbookItem>;
}

/// Connect to server at target address.
///
/// # Errors
///
/// - Return [`ServerError::UnsupportedAddress`] for network addresses.
/// - Return [`ServerError`] if site snapshot cannot be opened.
pub fn connect(address: &str) -> Result<Box<dyn ServerClient>> {
    if address.starts_with("http://") || address.starts_with("https://") {
        return Err(ServerError::UnsupportedAddress {
            address: address.into(),
        });
    }

    let path = address.strip_prefix("file://").unwrap_or(address);
    Ok(Box::new(SnapshotServer::open(path)?))
}

/// Iterate over every datasource of a server page by page.
pub struct Pager<'a, C>
where
    C: ServerClient + ?Sized,
{
    client: &'a C,
    size: usize,
    next: Option<usize>,
    buffer: VecDeque<DatasourceItem>,
}

impl<'a, C> Pager<'a, C>
where
    C: ServerClient + ?Sized,
{
    /// Construct new pager with default page size.
    pub fn new(client: &'a C) -> Self {
        Self::with_page_size(client, DEFAULT_PAGE_SIZE)
    }

    /// Construct new pager with custom page size.
    pub fn with_page_size(client: &'a C, size: usize) -> Self {
        Self {
            client,
            size: size.max(1),
            next: Some(1),
            buffer: VecDeque::new(),
        }
    }
}

impl<C> Iterator for Pager<'_, C>
where
    C: ServerClient + ?Sized,
{
    type Item = Result<DatasourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }

            let number = self.next?;
            match self.client.datasources(PageRequest {
                number,
                size: self.size,
            }) {
                Ok(page) => {
                    self.next = if page.is_last() || page.items.is_empty() {
                        None
                    } else {
                        Some(number + 1)
                    };
                    self.buffer.extend(page.items);
                }
                Err(error) => {
                    self.next = None;
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Request for one page of items, numbered from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: usize,
    pub size: usize,
}

/// One page of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Check if no further page exists.
    pub fn is_last(&self) -> bool {
        self.number.saturating_mul(self.size) >= self.total
    }
}

/// Project on a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItem {
    pub id: String,
    pub name: String,
}

/// Datasource item of a server.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DatasourceItem {
    /// Identifier assigned by the server. `None` until published.
    pub id: Option<String>,

    /// Name of the datasource, unique within its project.
    pub name: String,

    /// Content URL addressing the published datasource.
    pub content_url: String,

    /// Project the datasource belongs to.
    pub project_id: String,

    /// Name of project the datasource belongs to.
    pub project_name: Option<String>,

    /// Connection details. Empty until populated.
    pub connections: Vec<Connection>,
}

impl DatasourceItem {
    /// Construct new datasource item to publish into target project.
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project_id: project_id.into(),
            ..Self::default()
        }
    }
}

/// Workbook item of a server.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct WorkbookItem {
    /// Identifier assigned by the server. `None` until published.
    pub id: Option<String>,

    /// Name of the workbook.
    pub name: String,

    /// Project the workbook belongs to.
    pub project_id: String,
}

impl WorkbookItem {
    /// Construct new workbook item to publish into target project.
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            project_id: project_id.into(),
        }
    }
}

/// How to treat an item that already exists when publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Fail if an item with the same name exists in the project.
    CreateNew,

    /// Replace the existing item.
    Overwrite,
}

/// Credentials to sign in to a server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub site: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"HIDDEN")
            .field("site", &self.site)
            .finish()
    }
}

/// Database credentials sent along with a published datasource.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredentials {
    pub name: String,
    pub password: String,
    pub embed: bool,
}

impl Debug for ConnectionCredentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ConnectionCredentials")
            .field("name", &self.name)
            .field("password", &"HIDDEN")
            .field("embed", &self.embed)
            .finish()
    }
}

/// REST API version as "major.minor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

impl ApiVersion {
    /// Construct new API version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ApiVersion {
    type Err = InvalidApiVersion;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidApiVersion(data.into());
        let (major, minor) = data.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = InvalidApiVersion;

    fn try_from(data: String) -> Result<Self, Self::Error> {
        data.parse()
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

impl Display for ApiVersion {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}.{}", self.major, self.minor)
    }
}

/// API version string is not "major.minor".
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid API version {0:?}")]
pub struct InvalidApiVersion(pub String);

/// Server interaction error types.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Server address uses a transport this build cannot speak.
    #[error("unsupported server address {address:?}, expected a site snapshot path")]
    UnsupportedAddress { address: String },

    /// Operation requires an authenticated session.
    #[error("not signed in to {address}")]
    NotSignedIn { address: String },

    /// Credentials were rejected.
    #[error("authentication failed for user {username:?}")]
    Authentication { username: String },

    /// Server rejected the requested API version.
    #[error("server rejected API version {requested}, newest supported version is {supported}")]
    VersionMismatch {
        requested: ApiVersion,
        supported: ApiVersion,
    },

    /// Item already exists and publish mode forbids replacing it.
    #[error("item {name:?} already exists in project {project_id:?}")]
    Conflict { name: String, project_id: String },

    /// Referenced project does not exist.
    #[error("no project with id {id:?}")]
    UnknownProject { id: String },

    /// Referenced item does not exist.
    #[error("no item with id {id:?}")]
    UnknownItem { id: String },

    /// Site inventory cannot be read.
    #[error("failed to read site inventory at {:?}", path.display())]
    ReadSite {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Site inventory is malformed.
    #[error("malformed site inventory at {:?}", path.display())]
    MalformedSite {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    /// Site inventory or published content cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Site inventory cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Published document cannot be parsed.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Friendly result alias :3
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::cell::Cell;

    #[test_case("2.4", ApiVersion::new(2, 4); "fallback")]
    #[test_case("3.19", ApiVersion::new(3, 19); "two digit minor")]
    #[test_case(" 10.0 ", ApiVersion::new(10, 0); "surrounding whitespace")]
    #[test]
    fn parse_api_version(input: &str, expect: ApiVersion) {
        pretty_assertions::assert_eq!(input.parse::<ApiVersion>(), Ok(expect));
        pretty_assertions::assert_eq!(expect.to_string(), input.trim());
    }

    #[test_case("3"; "missing minor")]
    #[test_case("three.four"; "not numeric")]
    #[test_case(""; "empty")]
    #[test]
    fn reject_invalid_api_version(input: &str) {
        pretty_assertions::assert_eq!(
            input.parse::<ApiVersion>(),
            Err(InvalidApiVersion(input.into()))
        );
    }

    #[test]
    fn api_versions_order_numerically() {
        assert!(ApiVersion::new(2, 4) < ApiVersion::new(2, 10));
        assert!(ApiVersion::new(2, 10) < ApiVersion::new(3, 0));
    }

    #[test]
    fn credentials_hide_password() {
        let credentials = Credentials {
            username: "admin".into(),
            password: "hunter2".into(),
            site: None,
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));

        let credentials = ConnectionCredentials {
            name: "etl".into(),
            password: "hunter2".into(),
            embed: true,
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }

    #[test]
    fn network_addresses_are_unsupported() {
        let result = connect("https://tableau.example.com");
        assert!(matches!(
            result,
            Err(ServerError::UnsupportedAddress { .. })
        ));
    }

    /// Serves a fixed number of numbered datasources.
    struct PagedServer {
        total: usize,
        calls: Cell<usize>,
        fail_on: Option<usize>,
    }

    impl ServerClient for PagedServer {
        fn base_url(&self) -> &str {
            "paged"
        }

        fn sign_in(&mut self, _credentials: &Credentials) -> Result<()> {
            Ok(())
        }

        fn sign_out(&mut self) -> Result<()> {
            Ok(())
        }

        fn use_server_version(&mut self) -> Result<()> {
            Ok(())
        }

        fn version(&self) -> ApiVersion {
            DEFAULT_API_VERSION
        }

        fn set_version(&mut self, _version: ApiVersion) {}

        fn projects(&self) -> Result<Vec<ProjectItem>> {
            Ok(Vec::new())
        }

        fn datasources(&self, request: PageRequest) -> Result<Page<DatasourceItem>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_on == Some(request.number) {
                return Err(ServerError::NotSignedIn {
                    address: "paged".into(),
                });
            }

            let start = (request.number - 1) * request.size;
            let end = (start + request.size).min(self.total);
            let items = (start..end)
                .map(|index| DatasourceItem::new("p", format!("ds{index}")))
                .collect();

            Ok(Page {
                items,
                number: request.number,
                size: request.size,
                total: self.total,
            })
        }

        fn populate_connections(&self, _item: &mut DatasourceItem) -> Result<()> {
            Ok(())
        }

        fn publish_datasource(
            &mut self,
            item: DatasourceItem,
            _file: &Path,
            _mode: PublishMode,
            _credentials: Option<&ConnectionCredentials>,
        ) -> Result<DatasourceItem> {
            Ok(item)
        }

        fn publish_workbook(
            &mut self,
            item: WorkbookItem,
            _file: &Path,
            _mode: PublishMode,
        ) -> Result<WorkbookItem> {
            Ok(item)
        }
    }

    #[test]
    fn pager_walks_every_page() -> anyhow::Result<()> {
        let server = PagedServer {
            total: 7,
            calls: Cell::new(0),
            fail_on: None,
        };

        let names = Pager::with_page_size(&server, 3)
            .map(|item| item.map(|item| item.name))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(
            names,
            vec!["ds0", "ds1", "ds2", "ds3", "ds4", "ds5", "ds6"]
        );
        assert_eq!(server.calls.get(), 3);

        Ok(())
    }

    #[test]
    fn pager_stops_after_error() {
        let server = PagedServer {
            total: 10,
            calls: Cell::new(0),
            fail_on: Some(2),
        };

        let results = Pager::with_page_size(&server, 5).collect::<Vec<_>>();
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(|result| result.is_ok()));
        assert!(results[5].is_err());
        assert_eq!(server.calls.get(), 2);
    }

    #[test]
    fn pager_handles_empty_server() {
        let server = PagedServer {
            total: 0,
            calls: Cell::new(0),
            fail_on: None,
        };

        assert_eq!(Pager::new(&server).count(), 0);
        assert_eq!(server.calls.get(), 1);
    }
}
