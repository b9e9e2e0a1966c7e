// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cross-server datasource reference remapping.
//!
//! A workbook that uses published datasources points at them through
//! "sqlproxy" connections. Those connections only make sense on the server
//! the workbook came from. Before the workbook can be published to another
//! server, every such reference has to be rewritten so it points at the
//! equivalent datasource of the target project.
//!
//! # Resolution Strategies
//!
//! Each reference is resolved on its own by trying the following strategies
//! in order, taking the first that matches:
//!
//! 1. __Unrenamed name__: the caption is empty, so the user never renamed
//!    the datasource and its internal name is trustworthy. If the target
//!    catalog has a datasource of that name, take over its connection.
//! 2. __Cross reference__: the connection's content URL belongs to a source
//!    datasource that has a namesake on the target. Point the connection at
//!    the content URL of that namesake.
//! 3. __Cleaned caption__: strip the disambiguation suffix from the caption,
//!    and take over the connection of the target datasource of that name.
//!
//! When none of them matches, the source and target catalogs disagree about
//! the reference. That is fatal for the workbook being migrated.
//!
//! # See Also
//!
//! 1. [`Catalog`](crate::catalog::Catalog)
//! 2. [`CrossReferenceMap`](crate::catalog::CrossReferenceMap)
//! 3. [`clean_name`](crate::remap::name::clean_name)

pub mod name;

pub use name::clean_name;

use crate::{
    catalog::{Catalog, CrossReferenceMap},
    document::{Connection, DatasourceReference, MultiConnectionUnsupported},
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument};

/// Resolution strategies in the order they are tried.
pub const STRATEGIES: [Strategy; 3] = [
    Strategy::UnrenamedName,
    Strategy::CrossReference,
    Strategy::CleanedCaption,
];

/// Rewrite datasource references against source and target catalogs.
///
/// Builds a one-shot [`Remapper`] and runs it over the references.
///
/// # Errors
///
/// - Return [`RemapError::MultiConnection`] if a reference has more than one
///   connection.
/// - Return [`RemapError::ReferenceResolution`] if a published datasource
///   reference cannot be resolved.
pub fn remap_references(
    references: Vec<DatasourceReference>,
    source: &Catalog,
    target: &Catalog,
) -> Result<Vec<DatasourceReference>> {
    Remapper::new(source, target.clone()).remap(references)
}

/// Datasource reference remapper.
///
/// Holds the target catalog and the cross reference map for the whole run.
/// Neither is modified while remapping.
#[derive(Debug, Clone)]
pub struct Remapper {
    target: Catalog,
    cross_reference: CrossReferenceMap,
}

impl Remapper {
    /// Construct new remapper from source and target catalogs.
    pub fn new(source: &Catalog, target: Catalog) -> Self {
        let cross_reference = CrossReferenceMap::build(source, &target);
        debug!(
            "cross reference map holds {} content urls",
            cross_reference.len()
        );

        Self {
            target,
            cross_reference,
        }
    }

    /// Cross reference map between source and target content URLs.
    pub fn cross_reference(&self) -> &CrossReferenceMap {
        &self.cross_reference
    }

    /// Rewrite every reference.
    ///
    /// Returns either all references, rewritten where needed, or the first
    /// error. No partial result is produced.
    ///
    /// # Errors
    ///
    /// - Return [`RemapError::MultiConnection`] if a reference has more than
    ///   one connection.
    /// - Return [`RemapError::ReferenceResolution`] if a published datasource
    ///   reference cannot be resolved.
    #[instrument(skip(self, references), level = "debug")]
    pub fn remap(&self, references: Vec<DatasourceReference>) -> Result<Vec<DatasourceReference>> {
        references
            .into_iter()
            .map(|mut reference| -> Result<DatasourceReference> {
                let resolution = self.resolve(&mut reference)?;
                let value = resolution
                    .as_ref()
                    .map(|resolution| resolution.value.as_str())
                    .unwrap_or_default();
                info!("{}, {} --> {}", reference.caption, reference.name, value);

                Ok(reference)
            })
            .collect()
    }

    /// Rewrite one reference in place.
    ///
    /// Returns `None` when the reference does not point at a published
    /// datasource and was left alone.
    ///
    /// # Errors
    ///
    /// - Return [`RemapError::MultiConnection`] if the reference has more
    ///   than one connection.
    /// - Return [`RemapError::ReferenceResolution`] if no strategy matches.
    pub fn resolve(&self, reference: &mut DatasourceReference) -> Result<Option<Resolution>> {
        let Some(connection) = reference.sole_connection()? else {
            return Ok(None);
        };

        if !connection.is_published_reference() {
            return Ok(None);
        }

        let attempt = STRATEGIES.iter().find_map(|strategy| {
            let found = strategy.attempt(self, reference, connection);
            debug!(
                "strategy {strategy} for {:?}: {}",
                reference.name,
                found.as_ref().map(|(_, value)| value.as_str()).unwrap_or_default()
            );
            found.map(|(rewrite, value)| (*strategy, rewrite, value))
        });

        let Some((strategy, rewrite, value)) = attempt else {
            return Err(RemapError::ReferenceResolution {
                caption: reference.caption.clone(),
                locator: connection.content_url.clone(),
            });
        };

        if let Some(connection) = reference.sole_connection_mut()? {
            match rewrite {
                Rewrite::Replace(replacement) => *connection = replacement,
                Rewrite::Relocate(content_url) => connection.content_url = Some(content_url),
            }
        }

        Ok(Some(Resolution { strategy, value }))
    }
}

/// Way of resolving a published datasource reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Empty caption, and name present in target catalog.
    UnrenamedName,

    /// Content URL present in cross reference map.
    CrossReference,

    /// Caption without suffix present in target catalog.
    CleanedCaption,
}

impl Strategy {
    fn attempt(
        &self,
        remapper: &Remapper,
        reference: &DatasourceReference,
        connection: &Connection,
    ) -> Option<(Rewrite, String)> {
        match self {
            Self::UnrenamedName => {
                if !reference.caption.is_empty() {
                    return None;
                }

                replacement_for(&remapper.target, &reference.name)
                    .map(|replacement| (Rewrite::Replace(replacement), reference.name.clone()))
            }
            Self::CrossReference => connection
                .content_url
                .as_deref()
                .and_then(|content_url| remapper.cross_reference.get(content_url))
                .map(|target| (Rewrite::Relocate(target.to_string()), target.to_string())),
            Self::CleanedCaption => {
                let cleaned = clean_name(&reference.caption);
                replacement_for(&remapper.target, cleaned)
                    .map(|replacement| (Rewrite::Replace(replacement), cleaned.to_string()))
            }
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::UnrenamedName => "unrenamed-name",
            Self::CrossReference => "cross-reference",
            Self::CleanedCaption => "cleaned-caption",
        };
        fmt.write_str(name)
    }
}

// INVARIANT: A target datasource without populated connections is no match.
fn replacement_for(target: &Catalog, name: &str) -> Option<Connection> {
    target
        .get(name)
        .and_then(|item| item.connections.first())
        .cloned()
}

enum Rewrite {
    Replace(Connection),
    Relocate(String),
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Strategy that matched.
    pub strategy: Strategy,

    /// Target name or content URL the reference now points at.
    pub value: String,
}

/// Remapping error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemapError {
    /// Reference has more than one connection.
    #[error(transparent)]
    MultiConnection(#[from] MultiConnectionUnsupported),

    /// No strategy resolves the reference.
    #[error(
        "lookup information between target and source is inconsistent, datasource caption: {caption:?}, connection: {}",
        .locator.as_deref().unwrap_or("<none>")
    )]
    ReferenceResolution {
        caption: String,
        locator: Option<String>,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RemapError> = std::result::Result<T, E>;
