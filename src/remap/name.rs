// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Datasource caption cleaning.
//!
//! Tableau disambiguates datasources that share a name by appending a
//! parenthesized suffix to their caption, e.g., "Sales (prod)". Stripping
//! that suffix recovers the name the datasource was published under.
//!
//! Every stacked suffix is stripped, not only the last one, so
//! "Sales (a) (b)" cleans to "Sales" rather than "Sales (a)".

use regex::Regex;
use std::sync::OnceLock;

/// Remove trailing " (...)" suffixes from caption.
///
/// The parenthesized group must not contain parentheses itself. Stacked
/// suffixes are all removed so cleaning twice gives the same result as
/// cleaning once.
pub fn clean_name(name: &str) -> &str {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let suffix = SUFFIX.get_or_init(|| Regex::new(r" \([^()]*\)$").expect("valid suffix regex"));

    let mut cleaned = name;
    while let Some(found) = suffix.find(cleaned) {
        cleaned = &cleaned[..found.start()];
    }

    cleaned
}
