// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workbook and datasource document model.
//!
//! Tableau ships two kinds of documents that matter for migration:
//! __workbooks__, which contain visualizations together with a listing of
//! datasource references, and __datasources__, which contain exactly one
//! datasource definition. Both are modelled by [`Document`] so the same
//! connection rewriting logic applies to either.
//!
//! # Published Datasource References
//!
//! A workbook can embed raw database connections, or it can point at a
//! datasource that was published separately to the server. The latter is
//! marked by a connection whose database class is "sqlproxy". Older
//! documents store the content URL of the published datasource inside the
//! database name field of that connection. The model keeps the two apart:
//! [`Connection::content_url`] holds the locator, and parsing lifts a legacy
//! database name into it.
//!
//! # Document Parsing
//!
//! Reading and writing documents is delegated to a [`DocumentParser`]. The
//! stock parser, [`TomlDocumentParser`], stores documents as TOML.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Database class tag of connections that point at a published datasource.
pub const SQLPROXY: &str = "sqlproxy";

/// A parsed workbook or datasource document.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Document {
    /// What kind of document this is.
    pub kind: DocumentKind,

    /// Datasource definitions or references held by the document.
    #[serde(default, rename = "datasource", skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceReference>,
}

impl Document {
    /// Construct new empty document.
    pub fn new(kind: DocumentKind) -> Self {
        Self {
            kind,
            datasources: Vec::new(),
        }
    }

    /// Mutable access to the datasource definition of a datasource document.
    ///
    /// Returns `None` for workbooks.
    pub fn datasource_mut(&mut self) -> Option<&mut DatasourceReference> {
        match self.kind {
            DocumentKind::Datasource => self.datasources.first_mut(),
            DocumentKind::Workbook => None,
        }
    }
}

impl FromStr for Document {
    type Err = FormatError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut document: Document = toml::de::from_str(data)?;

        // INVARIANT: Datasource documents hold exactly one datasource.
        if document.kind == DocumentKind::Datasource && document.datasources.len() != 1 {
            return Err(FormatError::DatasourceCount {
                count: document.datasources.len(),
            });
        }

        // INVARIANT: Published datasource locators never live in the database name.
        for connection in document
            .datasources
            .iter_mut()
            .flat_map(|datasource| datasource.connections.iter_mut())
        {
            if connection.is_published_reference() && connection.content_url.is_none() {
                connection.content_url = connection.dbname.take();
            }
        }

        Ok(document)
    }
}

impl Display for Document {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(FormatError::Serialize)?
                .as_str(),
        )
    }
}

/// Kind of document.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Workbook,
    Datasource,
}

/// Datasource definition, or reference to a published datasource.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DatasourceReference {
    /// Internal identifier of the datasource.
    pub name: String,

    /// Display label. Empty unless an end user renamed the datasource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caption: String,

    /// Connections of the datasource.
    #[serde(default, rename = "connection", skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

impl DatasourceReference {
    /// Construct new datasource reference without any connection.
    pub fn new(name: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caption: caption.into(),
            connections: Vec::new(),
        }
    }

    /// Attach a connection.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Single connection of datasource, if any.
    ///
    /// # Errors
    ///
    /// - Return [`MultiConnectionUnsupported`] if datasource has more than one
    ///   connection.
    pub fn sole_connection(&self) -> Result<Option<&Connection>, MultiConnectionUnsupported> {
        self.check_single_connection()?;
        Ok(self.connections.first())
    }

    /// Mutable access to single connection of datasource, if any.
    ///
    /// # Errors
    ///
    /// - Return [`MultiConnectionUnsupported`] if datasource has more than one
    ///   connection.
    pub fn sole_connection_mut(
        &mut self,
    ) -> Result<Option<&mut Connection>, MultiConnectionUnsupported> {
        self.check_single_connection()?;
        Ok(self.connections.first_mut())
    }

    fn check_single_connection(&self) -> Result<(), MultiConnectionUnsupported> {
        if self.connections.len() > 1 {
            return Err(MultiConnectionUnsupported {
                name: self.name.clone(),
                count: self.connections.len(),
            });
        }

        Ok(())
    }
}

/// Connection descriptor.
///
/// Shared by document datasources and by datasource items fetched from a
/// server.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Connection {
    /// Database class, e.g., "postgres" or "sqlproxy".
    pub class: String,

    /// Database server host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Database server port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// Database name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,

    /// Login used to connect to the database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Content URL of the published datasource a sqlproxy connection points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
}

impl Connection {
    /// Construct new connection of a given database class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }

    /// Construct new connection to a published datasource.
    pub fn published(content_url: impl Into<String>) -> Self {
        Self {
            class: SQLPROXY.into(),
            content_url: Some(content_url.into()),
            ..Self::default()
        }
    }

    /// Check if connection points at a published datasource.
    pub fn is_published_reference(&self) -> bool {
        self.class == SQLPROXY
    }
}

/// Read and write documents.
pub trait DocumentParser {
    /// Parse document at target path.
    fn open(&self, path: &Path) -> Result<Document>;

    /// Serialize document to target path.
    fn save_as(&self, document: &Document, path: &Path) -> Result<()>;
}

/// Document parser for the TOML document format.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlDocumentParser;

impl TomlDocumentParser {
    /// Construct new TOML document parser.
    pub fn new() -> Self {
        Self
    }
}

impl DocumentParser for TomlDocumentParser {
    #[instrument(skip(self), level = "debug")]
    fn open(&self, path: &Path) -> Result<Document> {
        debug!("parse document {:?}", path.display());
        let data = read_to_string(path).map_err(|err| DocumentError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

        data.parse::<Document>().map_err(|err| DocumentError::Format {
            source: err,
            path: path.to_path_buf(),
        })
    }

    #[instrument(skip(self, document), level = "debug")]
    fn save_as(&self, document: &Document, path: &Path) -> Result<()> {
        debug!("save document to {:?}", path.display());
        let data = toml::ser::to_string_pretty(document).map_err(|err| DocumentError::Format {
            source: FormatError::Serialize(err),
            path: path.to_path_buf(),
        })?;

        write(path, data).map_err(|err| DocumentError::Write {
            source: err,
            path: path.to_path_buf(),
        })
    }
}

/// Datasource has more than one connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "datasource {name:?} has {count} connections, only single connection datasources are supported"
)]
pub struct MultiConnectionUnsupported {
    /// Name of offending datasource.
    pub name: String,

    /// Number of connections it has.
    pub count: usize,
}

/// Document format error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FormatError {
    /// Failed to deserialize document.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize document.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Datasource document does not hold exactly one datasource.
    #[error("datasource document must define exactly one datasource, found {count}")]
    DatasourceCount { count: usize },
}

impl From<FormatError> for FmtError {
    fn from(_: FormatError) -> Self {
        FmtError
    }
}

/// Document parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Document cannot be read.
    #[error("failed to read document at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Document cannot be written.
    #[error("failed to write document to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Document content is malformed.
    #[error("malformed document at {:?}", path.display())]
    Format {
        #[source]
        source: FormatError,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DocumentError> = std::result::Result<T, E>;
