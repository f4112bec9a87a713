//! Connector auth metadata from bundled documentation
//!
//! Each connector ships `<docs_dir>/<connector>/README.md`. The scheme is read
//! from its "Authentication" section by keyword, and the environment variables
//! from any markdown table whose first column is an env var name. Nothing is
//! cached: the descriptor is rebuilt from disk on every call.

use std::fmt;
use std::path::{Path, PathBuf};

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::SCOPE_URL_PREFIX;
use crate::profile::is_valid_name;

/// How a connector authenticates against its API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    OAuth,
    #[default]
    ApiKey,
    Bearer,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::OAuth => "oauth",
            AuthScheme::ApiKey => "apikey",
            AuthScheme::Bearer => "bearer",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An environment variable a connector declares in its documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    pub description: String,
}

/// Auth scheme, env vars and scopes derived from a connector's docs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorAuthDescriptor {
    pub connector_name: String,
    pub auth_scheme: AuthScheme,
    /// Declared env vars in order of first appearance
    pub env_vars: Vec<EnvVarSpec>,
    /// OAuth scopes named in the authentication section
    pub scopes: Vec<String>,
}

impl ConnectorAuthDescriptor {
    /// Descriptor for a connector without usable documentation.
    pub fn fallback(connector: &str) -> Self {
        Self {
            connector_name: connector.to_string(),
            auth_scheme: AuthScheme::ApiKey,
            env_vars: Vec::new(),
            scopes: Vec::new(),
        }
    }
}

/// Location of a connector's documentation.
pub fn docs_path(docs_dir: &Path, connector: &str) -> PathBuf {
    docs_dir.join(connector).join("README.md")
}

/// Classify a connector from its documentation. Never fails: missing or
/// unreadable docs degrade to an API-key descriptor with no env vars.
pub async fn classify(docs_dir: &Path, connector: &str) -> ConnectorAuthDescriptor {
    if !is_valid_name(connector) {
        return ConnectorAuthDescriptor::fallback(connector);
    }
    let path = docs_path(docs_dir, connector);
    match tokio::fs::read_to_string(&path).await {
        Ok(doc) => parse_descriptor(connector, &doc),
        Err(e) => {
            debug!(connector, path = %path.display(), error = %e, "no connector documentation");
            ConnectorAuthDescriptor::fallback(connector)
        }
    }
}

/// Build a descriptor from markdown documentation.
pub fn parse_descriptor(connector: &str, doc: &str) -> ConnectorAuthDescriptor {
    let scan = DocScan::run(doc);
    let auth_scheme = scheme_from_section(scan.section.as_deref().unwrap_or_default());
    let scopes = if auth_scheme == AuthScheme::OAuth {
        scopes_from_code(&scan.section_code)
    } else {
        Vec::new()
    };

    ConnectorAuthDescriptor {
        connector_name: connector.to_string(),
        auth_scheme,
        env_vars: scan.env_vars,
        scopes,
    }
}

/// Prefix connector env vars share: `google-drive` → `GOOGLE_DRIVE`.
pub fn env_prefix(connector: &str) -> String {
    connector.to_ascii_uppercase().replace('-', "_")
}

/// Everything the descriptor needs, gathered in one pass over the parsed
/// markdown. Code blocks are skipped entirely.
#[derive(Default)]
struct DocScan {
    /// Text of the first "Authentication" section, heading included
    section: Option<String>,
    section_level: Option<usize>,
    section_closed: bool,
    /// Inline code spans inside that section
    section_code: Vec<String>,
    env_vars: Vec<EnvVarSpec>,
    heading: Option<String>,
    cell: Option<String>,
    row: Vec<String>,
    in_code_block: bool,
}

impl DocScan {
    fn run(doc: &str) -> Self {
        let mut scan = Self::default();
        for event in Parser::new_ext(doc, Options::ENABLE_TABLES) {
            match event {
                Event::Start(Tag::Heading { .. }) => scan.heading = Some(String::new()),
                Event::End(TagEnd::Heading(level)) => scan.end_heading(level as usize),
                Event::Start(Tag::CodeBlock(_)) => scan.in_code_block = true,
                Event::End(TagEnd::CodeBlock) => scan.in_code_block = false,
                Event::Start(Tag::TableHead | Tag::TableRow) => scan.row.clear(),
                Event::Start(Tag::TableCell) => scan.cell = Some(String::new()),
                Event::End(TagEnd::TableCell) => {
                    let cell = scan.cell.take().unwrap_or_default();
                    scan.row.push(cell.trim().to_string());
                    scan.text(" ");
                }
                Event::End(TagEnd::TableHead | TagEnd::TableRow) => scan.end_row(),
                Event::End(TagEnd::Paragraph | TagEnd::Item) => scan.text("\n"),
                Event::Text(text) if !scan.in_code_block => scan.text(&text),
                Event::Code(code) => {
                    if scan.heading.is_none() && scan.in_section() {
                        scan.section_code.push(code.trim().to_string());
                    }
                    scan.text(&code);
                }
                Event::SoftBreak | Event::HardBreak => scan.text(" "),
                _ => {}
            }
        }
        scan
    }

    fn in_section(&self) -> bool {
        self.section.is_some() && !self.section_closed
    }

    fn text(&mut self, text: &str) {
        if let Some(heading) = self.heading.as_mut() {
            heading.push_str(text);
            return;
        }
        if let Some(cell) = self.cell.as_mut() {
            cell.push_str(text);
        }
        if self.in_section()
            && let Some(section) = self.section.as_mut()
        {
            section.push_str(text);
        }
    }

    /// The section runs until the next heading of the same or higher level.
    fn end_heading(&mut self, level: usize) {
        let text = self.heading.take().unwrap_or_default();
        match self.section_level {
            None if text.to_lowercase().contains("authentication") => {
                self.section_level = Some(level);
                self.section = Some(text);
            }
            Some(start) if self.in_section() => {
                if level <= start {
                    self.section_closed = true;
                } else if let Some(section) = self.section.as_mut() {
                    section.push('\n');
                    section.push_str(&text);
                }
            }
            _ => {}
        }
    }

    /// A row declares an env var when its first cell is one.
    fn end_row(&mut self) {
        let row = std::mem::take(&mut self.row);
        let Some(name) = row.first().map(|c| c.trim_matches('`')) else {
            return;
        };
        if !is_env_var_name(name) || self.env_vars.iter().any(|v| v.name == name) {
            return;
        }
        self.env_vars.push(EnvVarSpec {
            name: name.to_string(),
            description: row.get(1).cloned().unwrap_or_default(),
        });
    }
}

fn scheme_from_section(section: &str) -> AuthScheme {
    let lower = section.to_lowercase();
    if lower.contains("oauth") {
        AuthScheme::OAuth
    } else if lower.contains("bearer token") {
        AuthScheme::Bearer
    } else {
        AuthScheme::ApiKey
    }
}

/// Scope URLs among the section's code spans, in order, without duplicates.
fn scopes_from_code(spans: &[String]) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for code in spans {
        if code.starts_with(SCOPE_URL_PREFIX) && !scopes.contains(code) {
            scopes.push(code.clone());
        }
    }
    scopes
}

fn is_env_var_name(name: &str) -> bool {
    name.contains('_')
        && name.starts_with(|c: char| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
