// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Migrate Tableau datasources and workbooks between servers.
//!
//! Published datasources and the workbooks that use them are tied to the
//! server they were published on. Moving them elsewhere means pointing
//! datasource connections at a new database, and rewriting the published
//! datasource references of workbooks so they resolve on the new server.
//!
//! # Layout
//!
//! - [`document`]: in-memory model of datasource and workbook documents.
//! - [`server`]: server client interface and a file-backed implementation.
//! - [`catalog`]: name-indexed datasource catalogs of a project.
//! - [`remap`]: datasource reference remapping between catalogs.
//! - [`migrate`]: datasource and workbook migration flows.
//! - [`config`]: configuration file layout.
//! - [`path`]: path resolution utilities.

pub mod catalog;
pub mod config;
pub mod document;
pub mod migrate;
pub mod path;
pub mod remap;
pub mod server;

pub use catalog::{find_project, Catalog, CrossReferenceMap};
pub use document::{Connection, DatasourceReference, Document, DocumentKind, DocumentParser};
pub use migrate::{publish_with_fallback, DatasourceMigration, WorkbookMigration};
pub use remap::{clean_name, remap_references, Remapper};
pub use server::{connect, ServerClient, SnapshotServer};
