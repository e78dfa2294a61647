use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry, SearchResult};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{sort_by_common_name, Directory, DirectoryEntry, Filter};
use crate::cancel::CancelToken;
use crate::config::DirectoryConfig;
use crate::error::Error;

/// LDAP result code for noSuchObject.
const LDAP_NO_SUCH_OBJECT: u32 = 32;

const USER_CLASS_FILTER: &str = "(objectCategory=person)(objectClass=user)";
const COMPUTER_CLASS_FILTER: &str = "(objectClass=computer)";

const USER_ATTRIBUTES: &[&str] = &[
    "cn",
    "sAMAccountName",
    "mail",
    "description",
    "userAccountControl",
];

const COMPUTER_ATTRIBUTES: &[&str] = &["cn", "dNSHostName", "operatingSystem", "description"];

/// Active Directory over a synchronous ldap3 connection.
///
/// The connection is bound once in [`LdapDirectory::connect`]; a failure
/// there is what aborts a sync run before any entry is touched.
pub struct LdapDirectory {
    conn: Mutex<LdapConn>,
    base_dn: String,
    page_size: i32,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn connect(config: &DirectoryConfig) -> Result<Self, Error> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let settings = LdapConnSettings::new().set_conn_timeout(timeout);

        debug!(url = %config.url, "Connecting to directory");
        let mut ldap = LdapConn::with_settings(settings, &config.url)?;

        if !config.bind_dn.is_empty() {
            let password = config.bind_password.as_deref().unwrap_or("");
            debug!(bind_dn = %config.bind_dn, "Binding to directory");
            ldap.simple_bind(&config.bind_dn, password)?.success()?;
        }

        info!(url = %config.url, "Directory connection established");

        Ok(Self {
            conn: Mutex::new(ldap),
            base_dn: config.base_dn.clone(),
            page_size: config.page_size,
            timeout,
        })
    }

    fn paged_search(
        &self,
        class_filter: &str,
        filter: &Filter,
        attributes: &[&str],
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        let query = format!("(&{}{})", class_filter, filter.to_ldap());
        debug!(base = %self.base_dn, filter = %query, "Searching directory");

        let mut ldap = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.page_size)),
        ];
        let mut stream = ldap.with_timeout(self.timeout).streaming_search_with(
            adapters,
            &self.base_dn,
            Scope::Subtree,
            &query,
            attributes.to_vec(),
        )?;

        let mut entries = Vec::new();
        let abandoned = loop {
            if cancel.is_cancelled() {
                break Some(stream.last_id());
            }
            match stream.next()? {
                Some(entry) => entries.push(to_directory_entry(SearchEntry::construct(entry))),
                None => break None,
            }
        };

        if let Some(msgid) = abandoned {
            drop(stream);
            warn!(fetched = entries.len(), "Abandoning directory search");
            if let Err(e) = ldap.abandon(msgid) {
                warn!(error = %e, "Directory abandon failed");
            }
            return Err(Error::Cancelled);
        }
        stream.result().success()?;

        sort_by_common_name(&mut entries);
        debug!("Directory returned {} entries", entries.len());
        Ok(entries)
    }
}

fn to_directory_entry(entry: SearchEntry) -> DirectoryEntry {
    let attributes = entry
        .attrs
        .into_iter()
        .map(|(name, values)| (name.to_ascii_lowercase(), values))
        .collect();
    DirectoryEntry {
        dn: entry.dn,
        attributes,
    }
}

impl Directory for LdapDirectory {
    fn search_users(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        self.paged_search(USER_CLASS_FILTER, filter, USER_ATTRIBUTES, cancel)
    }

    fn search_computers(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        self.paged_search(COMPUTER_CLASS_FILTER, filter, COMPUTER_ATTRIBUTES, cancel)
    }

    fn find_by_key(&self, dn: &str) -> Result<Option<DirectoryEntry>, Error> {
        let mut attributes: Vec<&str> = USER_ATTRIBUTES.to_vec();
        for &name in COMPUTER_ATTRIBUTES {
            if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                attributes.push(name);
            }
        }

        let mut ldap = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let SearchResult(entries, result) = ldap.with_timeout(self.timeout).search(
            dn,
            Scope::Base,
            &Filter::All.to_ldap(),
            attributes,
        )?;

        if result.rc == LDAP_NO_SUCH_OBJECT {
            return Ok(None);
        }
        result.success()?;

        Ok(entries
            .into_iter()
            .next()
            .map(|entry| to_directory_entry(SearchEntry::construct(entry))))
    }
}

impl Drop for LdapDirectory {
    fn drop(&mut self) {
        let ldap = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = ldap.unbind() {
            warn!(error = %e, "Directory unbind failed");
        }
    }
}
