// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! read or written in some way.

use std::path::{Path, PathBuf};

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/tabmig/config.toml` as the
/// default absolute path for the configuration file. Does not check if the
/// path returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigDir`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("tabmig").join("config.toml"))
        .ok_or(NoConfigDir)
}

/// Path a rewritten datasource document is saved to.
///
/// Appends the target database name to the file stem, e.g.,
/// `sales.tds` becomes `<directory>/sales_<database>.tds`.
///
/// Returns `None` if the source path has no file stem.
pub fn migrated_datasource_path(
    directory: impl AsRef<Path>,
    source: impl AsRef<Path>,
    database: &str,
) -> Option<PathBuf> {
    let source = source.as_ref();
    let stem = source.file_stem()?.to_string_lossy();
    let file_name = match source.extension() {
        Some(ext) => format!("{stem}_{database}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{database}"),
    };

    Some(directory.as_ref().join(file_name))
}

/// Path a rewritten workbook document is saved to.
///
/// Keeps the file name of the source, dropping its parent directories.
///
/// Returns `None` if the source path has no file name.
pub fn migrated_workbook_path(
    directory: impl AsRef<Path>,
    source: impl AsRef<Path>,
) -> Option<PathBuf> {
    source
        .as_ref()
        .file_name()
        .map(|name| directory.as_ref().join(name))
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigDir;

/// Friendly result alias :3
pub type Result<T, E = NoConfigDir> = std::result::Result<T, E>;
