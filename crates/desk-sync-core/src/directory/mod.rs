//! Read-only view of the LDAP / Active Directory service.
//!
//! The directory is the source of truth for users and computers; everything
//! stored locally is a cache reconciled against it by [`crate::sync`].

pub mod ldap;

use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::error::Error;

pub use ldap::LdapDirectory;

/// Attribute names as they appear in [`DirectoryEntry::attributes`] (lowercased).
pub mod attr {
    pub const COMMON_NAME: &str = "cn";
    pub const ACCOUNT_NAME: &str = "samaccountname";
    pub const EMAIL: &str = "mail";
    pub const DESCRIPTION: &str = "description";
    pub const OPERATING_SYSTEM: &str = "operatingsystem";
    pub const DNS_HOST_NAME: &str = "dnshostname";
    pub const ACCOUNT_CONTROL: &str = "useraccountcontrol";
}

/// One object returned by the directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of `name`, matched case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|v| !v.is_empty())
    }

    /// The `cn` attribute, or the value of the leading RDN when absent.
    pub fn common_name(&self) -> &str {
        self.attribute(attr::COMMON_NAME).unwrap_or_else(|| {
            self.dn
                .split(',')
                .next()
                .and_then(|rdn| rdn.split_once('='))
                .map(|(_, value)| value)
                .unwrap_or(&self.dn)
        })
    }
}

/// Base filter applied to a directory search.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Present(String),
    Equals(String, String),
    And(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn present(attribute: &str) -> Self {
        Filter::Present(attribute.to_string())
    }

    /// Render as an RFC 4515 filter string.
    pub fn to_ldap(&self) -> String {
        match self {
            Filter::All => "(objectClass=*)".to_string(),
            Filter::Present(attribute) => format!("({}=*)", attribute),
            Filter::Equals(attribute, value) => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            Filter::And(filters) => {
                let inner: String = filters.iter().map(Filter::to_ldap).collect();
                format!("(&{})", inner)
            }
            Filter::Not(filter) => format!("(!{})", filter.to_ldap()),
        }
    }

    /// Evaluate against an already fetched entry.
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::All => true,
            Filter::Present(attribute) => entry.has(attribute),
            Filter::Equals(attribute, value) => entry
                .attributes
                .get(&attribute.to_ascii_lowercase())
                .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value))),
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
        }
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Order entries by common name (case-insensitive), then DN.
pub fn sort_by_common_name(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        a.common_name()
            .to_lowercase()
            .cmp(&b.common_name().to_lowercase())
            .then_with(|| a.dn.cmp(&b.dn))
    });
}

/// Directory capability consumed by the sync engine.
///
/// Search results come back ordered by common name ascending so runs are
/// deterministic.
pub trait Directory: Send + Sync {
    /// Returns `Error::Cancelled` once `cancel` fires, abandoning any
    /// listing still in progress.
    fn search_users(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error>;

    fn search_computers(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error>;

    fn find_by_key(&self, dn: &str) -> Result<Option<DirectoryEntry>, Error>;
}
