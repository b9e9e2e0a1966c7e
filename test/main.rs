// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use tabmig::{
    document::{Document, DocumentParser, TomlDocumentParser},
    server::{snapshot::SiteDefinition, Credentials, ServerClient, SnapshotServer},
};

use anyhow::Result;
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

/// Site snapshot directory on disk.
pub(crate) struct SiteFixture {
    root: PathBuf,
}

impl SiteFixture {
    pub(crate) fn new(root: impl AsRef<Path>, site: impl AsRef<str>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir_all(&root)?;
        write(root.join("site.toml"), site.as_ref())?;

        Ok(Self { root })
    }

    pub(crate) fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Open snapshot signed in, speaking the server's API version.
    pub(crate) fn connect(&self) -> Result<SnapshotServer> {
        let mut server = SnapshotServer::open(&self.root)?;
        server.sign_in(&Credentials {
            username: "admin".into(),
            password: "secret".into(),
            site: None,
        })?;
        server.use_server_version()?;

        Ok(server)
    }

    /// Inventory as currently persisted on disk.
    pub(crate) fn inventory(&self) -> Result<SiteDefinition> {
        let data = read_to_string(self.root.join("site.toml"))?;
        Ok(data.parse::<SiteDefinition>()?)
    }
}

pub(crate) fn write_document(path: impl AsRef<Path>, document: &Document) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    TomlDocumentParser::new().save_as(document, path)?;

    Ok(())
}

pub(crate) fn read_document(path: impl AsRef<Path>) -> Result<Document> {
    Ok(TomlDocumentParser::new().open(path.as_ref())?)
}
