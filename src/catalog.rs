// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project datasource catalogs.
//!
//! A __catalog__ is a name-keyed inventory of the datasources published into
//! one project on one server. Migrating a workbook needs two of them: one for
//! the source project, and one for the target project. Matching the two by
//! datasource name yields the [`CrossReferenceMap`], which translates a
//! source content URL into the content URL of the equivalent datasource on
//! the target.
//!
//! Catalogs are built once per run, and only read afterwards.

use crate::server::{DatasourceItem, Pager, ProjectItem, ServerClient, ServerError};

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument, warn};

/// Find project by exact name.
///
/// When several projects share the name, the last one listed wins.
///
/// # Errors
///
/// - Return [`CatalogError::ProjectNotFound`] if no project has that name.
/// - Return [`CatalogError::Server`] if projects cannot be listed.
#[instrument(skip(client), level = "debug")]
pub fn find_project<C>(client: &C, name: &str) -> Result<ProjectItem>
where
    C: ServerClient + ?Sized,
{
    client
        .projects()?
        .into_iter()
        .filter(|project| project.name == name)
        .last()
        .ok_or_else(|| CatalogError::ProjectNotFound { name: name.into() })
}

/// Name-keyed inventory of the datasources of one project.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, DatasourceItem>,
}

impl Catalog {
    /// Construct new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build catalog of target project.
    ///
    /// Walks every datasource page of the server, keeps the datasources that
    /// belong to the project, and populates their connection details.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Server`] if listing or populating fails.
    #[instrument(skip(client, project), fields(project = %project.name), level = "debug")]
    pub fn build<C>(client: &C, project: &ProjectItem) -> Result<Self>
    where
        C: ServerClient + ?Sized,
    {
        let mut catalog = Self::new();
        for item in Pager::new(client) {
            let mut item = item?;
            if item.project_id != project.id {
                continue;
            }

            client.populate_connections(&mut item)?;
            debug!("catalog {:?} -> {:?}", item.name, item.content_url);
            catalog.insert(item);
        }

        info!(
            "catalog of {} [{}] holds {} datasources",
            client.base_url(),
            project.name,
            catalog.len()
        );

        Ok(catalog)
    }

    /// Insert datasource item keyed by its name.
    ///
    /// A later item with the same name replaces the earlier one.
    pub fn insert(&mut self, item: DatasourceItem) {
        if let Some(previous) = self.entries.insert(item.name.clone(), item) {
            warn!(
                "duplicate datasource name {:?}, replacing {:?}",
                previous.name, previous.content_url
            );
        }
    }

    /// Look up datasource item by name.
    pub fn get(&self, name: &str) -> Option<&DatasourceItem> {
        self.entries.get(name)
    }

    /// Number of datasources in catalog.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over datasources ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatasourceItem)> {
        self.entries.iter().map(|(name, item)| (name.as_str(), item))
    }
}

impl FromIterator<DatasourceItem> for Catalog {
    fn from_iter<I: IntoIterator<Item = DatasourceItem>>(items: I) -> Self {
        let mut catalog = Self::new();
        for item in items {
            catalog.insert(item);
        }
        catalog
    }
}

/// Mapping from source content URL to target content URL.
///
/// # Invariant
///
/// - Every pair refers to datasources that share a name in both catalogs.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CrossReferenceMap {
    locators: HashMap<String, String>,
}

impl CrossReferenceMap {
    /// Build cross reference map by matching source and target by name.
    pub fn build(source: &Catalog, target: &Catalog) -> Self {
        let locators = target
            .iter()
            .filter_map(|(name, target)| {
                source
                    .get(name)
                    .map(|source| (source.content_url.clone(), target.content_url.clone()))
            })
            .collect();

        Self { locators }
    }

    /// Target content URL of source content URL.
    pub fn get(&self, source: &str) -> Option<&str> {
        self.locators.get(source).map(String::as_str)
    }

    /// Number of mapped content URLs.
    pub fn len(&self) -> usize {
        self.locators.len()
    }

    /// Check if no content URL is mapped.
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}

/// Catalog construction error types.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Project lookup by name fails.
    #[error("no project named {name:?} found")]
    ProjectNotFound { name: String },

    /// Server interaction fails.
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Friendly result alias :3
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::Connection,
        server::{
            ApiVersion, ConnectionCredentials, Credentials, Page, PageRequest, PublishMode,
            WorkbookItem, DEFAULT_API_VERSION,
        },
    };
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn item(project_id: &str, name: &str, content_url: &str) -> DatasourceItem {
        DatasourceItem {
            id: Some(format!("{project_id}/{content_url}")),
            content_url: content_url.into(),
            ..DatasourceItem::new(project_id, name)
        }
    }

    /// In-memory server listing a fixed set of datasources, two per page.
    struct FixedServer {
        projects: Vec<ProjectItem>,
        datasources: Vec<DatasourceItem>,
    }

    impl ServerClient for FixedServer {
        fn base_url(&self) -> &str {
            "fixed"
        }

        fn sign_in(&mut self, _credentials: &Credentials) -> crate::server::Result<()> {
            Ok(())
        }

        fn sign_out(&mut self) -> crate::server::Result<()> {
            Ok(())
        }

        fn use_server_version(&mut self) -> crate::server::Result<()> {
            Ok(())
        }

        fn version(&self) -> ApiVersion {
            DEFAULT_API_VERSION
        }

        fn set_version(&mut self, _version: ApiVersion) {}

        fn projects(&self) -> crate::server::Result<Vec<ProjectItem>> {
            Ok(self.projects.clone())
        }

        fn datasources(
            &self,
            request: PageRequest,
        ) -> crate::server::Result<Page<DatasourceItem>> {
            let size = 2;
            let items = self
                .datasources
                .iter()
                .skip((request.number - 1) * size)
                .take(size)
                .cloned()
                .collect();
            Ok(Page {
                items,
                number: request.number,
                size,
                total: self.datasources.len(),
            })
        }

        fn populate_connections(&self, item: &mut DatasourceItem) -> crate::server::Result<()> {
            item.connections = vec![Connection::published(item.content_url.clone())];
            Ok(())
        }

        fn publish_datasource(
            &mut self,
            item: DatasourceItem,
            _file: &Path,
            _mode: PublishMode,
            _credentials: Option<&ConnectionCredentials>,
        ) -> crate::server::Result<DatasourceItem> {
            Ok(item)
        }

        fn publish_workbook(
            &mut self,
            item: WorkbookItem,
            _file: &Path,
            _mode: PublishMode,
        ) -> crate::server::Result<WorkbookItem> {
            Ok(item)
        }
    }

    fn fixed_server() -> FixedServer {
        FixedServer {
            projects: vec![
                ProjectItem {
                    id: "p1".into(),
                    name: "Finance".into(),
                },
                ProjectItem {
                    id: "p2".into(),
                    name: "Sales".into(),
                },
                ProjectItem {
                    id: "p3".into(),
                    name: "Sales".into(),
                },
            ],
            datasources: vec![
                item("p1", "Orders", "Orders"),
                item("p2", "Orders", "Orders_1"),
                item("p1", "Invoices", "Invoices"),
                item("p2", "Leads", "Leads"),
                item("p1", "Orders", "Orders_2"),
            ],
        }
    }

    #[test]
    fn find_project_by_name() -> anyhow::Result<()> {
        let server = fixed_server();
        assert_eq!(find_project(&server, "Finance")?.id, "p1");
        // Last project listed wins on name collision.
        assert_eq!(find_project(&server, "Sales")?.id, "p3");

        Ok(())
    }

    #[test]
    fn find_project_reports_missing_project() {
        let result = find_project(&fixed_server(), "Marketing");
        assert!(matches!(
            result,
            Err(CatalogError::ProjectNotFound { name }) if name == "Marketing"
        ));
    }

    #[test]
    fn build_catalog_across_pages() -> anyhow::Result<()> {
        let server = fixed_server();
        let project = find_project(&server, "Finance")?;
        let catalog = Catalog::build(&server, &project)?;

        let names = catalog.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, vec!["Invoices", "Orders"]);

        // Later duplicate replaces earlier one.
        let orders = catalog.get("Orders").unwrap();
        assert_eq!(orders.content_url, "Orders_2");
        assert_eq!(orders.connections, vec![Connection::published("Orders_2")]);

        Ok(())
    }

    #[test]
    fn cross_reference_map_matches_on_shared_names() {
        let source: Catalog = [
            item("s", "Orders", "src1"),
            item("s", "Invoices", "src2"),
            item("s", "Returns", "src3"),
        ]
        .into_iter()
        .collect();
        let target: Catalog = [
            item("t", "Orders", "tgt1"),
            item("t", "Returns", "tgt3"),
            item("t", "Leads", "tgt4"),
        ]
        .into_iter()
        .collect();

        let map = CrossReferenceMap::build(&source, &target);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("src1"), Some("tgt1"));
        assert_eq!(map.get("src3"), Some("tgt3"));
        assert_eq!(map.get("src2"), None);
        assert_eq!(map.get("tgt4"), None);

        // Every key is a source locator of a name found on both sides.
        for (name, source_item) in source.iter() {
            let expect = target.get(name).map(|target| target.content_url.as_str());
            assert_eq!(map.get(&source_item.content_url), expect);
        }
    }

    #[test]
    fn cross_reference_map_without_overlap_is_empty() {
        let source: Catalog = [item("s", "Orders", "src1")].into_iter().collect();
        let target: Catalog = [item("t", "Leads", "tgt1")].into_iter().collect();

        assert!(CrossReferenceMap::build(&source, &target).is_empty());
        assert!(CrossReferenceMap::build(&Catalog::new(), &target).is_empty());
    }
}
