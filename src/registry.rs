//! IPsec connection name discovery
//!
//! The name is taken verbatim from an override when one is configured.
//! Otherwise the IPsec configuration sources are scanned for `conn <name>`
//! declarations: the first name matching the keyword pattern wins, else the
//! first name that is not a reserved default section.

use crate::error::{Result, TunnelError};
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Section names that configure defaults rather than a connection
const RESERVED_SECTIONS: &[&str] = &["%default", "default"];

lazy_static::lazy_static! {
    static ref CONN_DECLARATION: Regex = Regex::new(r"^\s*conn\s+(\S+)").unwrap();
}

/// Memoizing resolver for the connection name of one run
pub struct ConnectionRegistry {
    override_name: Option<String>,
    sources: Vec<PathBuf>,
    keyword: Regex,
    resolved: Option<String>,
}

impl ConnectionRegistry {
    pub fn new(override_name: Option<String>, sources: Vec<PathBuf>, keyword: &str) -> Result<Self> {
        Ok(Self {
            override_name,
            sources,
            keyword: Regex::new(keyword)?,
            resolved: None,
        })
    }

    /// Connection name, computed on first call and cached afterwards
    pub fn resolve_connection_name(&mut self) -> Result<String> {
        if let Some(name) = &self.resolved {
            return Ok(name.clone());
        }
        let name = resolve_connection_name(
            self.override_name.as_deref(),
            &self.sources,
            &self.keyword,
        )?;
        self.resolved = Some(name.clone());
        Ok(name)
    }

    /// Cached name, if resolution already happened
    pub fn cached(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    /// Forget the cached name
    pub fn reset(&mut self) {
        self.resolved = None;
    }
}

/// Uncached resolution; see the module docs for the tie-break
pub fn resolve_connection_name(
    override_name: Option<&str>,
    sources: &[PathBuf],
    keyword: &Regex,
) -> Result<String> {
    if let Some(name) = override_name.filter(|n| !n.is_empty()) {
        info!("Using IPsec connection '{name}' from override");
        return Ok(name.to_string());
    }

    let existing: Vec<&PathBuf> = sources.iter().filter(|p| p.is_file()).collect();
    if existing.is_empty() {
        return Err(TunnelError::NoConfigFound(join_paths(sources.iter())));
    }

    let mut declared = Vec::new();
    for path in &existing {
        declared.extend(declared_connections(path)?);
    }
    debug!("Declared IPsec connections: {declared:?}");

    let chosen = declared
        .iter()
        .find(|name| keyword.is_match(name))
        .or_else(|| {
            declared
                .iter()
                .find(|name| !RESERVED_SECTIONS.contains(&name.as_str()))
        })
        .cloned()
        .ok_or_else(|| TunnelError::NoConnectionFound(join_paths(existing.iter().copied())))?;

    info!("Auto-detected IPsec connection '{chosen}'");
    Ok(chosen)
}

/// `conn` names declared in one file, in file order
pub fn declared_connections(path: &Path) -> Result<Vec<String>> {
    // Comments in legacy encodings must not hide the declarations
    let contents = fs::read(path)?;
    Ok(parse_declarations(&String::from_utf8_lossy(&contents)))
}

fn parse_declarations(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| CONN_DECLARATION.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn join_paths<'p>(paths: impl Iterator<Item = &'p PathBuf>) -> String {
    paths
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
