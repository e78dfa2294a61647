#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use desk_sync_core::directory::{sort_by_common_name, Directory, DirectoryEntry, Filter};
use desk_sync_core::inventory::{DriveInfo, InventorySession, RemoteInventory};
use desk_sync_core::{CancelToken, Credentials, Database, Error};

/// In-memory directory. Entries can be swapped between runs.
#[derive(Default)]
pub struct FakeDirectory {
    pub users: Mutex<Vec<DirectoryEntry>>,
    pub computers: Mutex<Vec<DirectoryEntry>>,
    pub offline: bool,
    /// Never finishes a listing; only cancellation ends it.
    pub stalled: bool,
}

impl FakeDirectory {
    pub fn with_users(users: Vec<DirectoryEntry>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Default::default()
        }
    }

    pub fn with_computers(computers: Vec<DirectoryEntry>) -> Self {
        Self {
            computers: Mutex::new(computers),
            ..Default::default()
        }
    }

    pub fn set_computers(&self, computers: Vec<DirectoryEntry>) {
        *self.computers.lock().unwrap() = computers;
    }

    pub fn set_users(&self, users: Vec<DirectoryEntry>) {
        *self.users.lock().unwrap() = users;
    }

    fn search(
        &self,
        entries: &Mutex<Vec<DirectoryEntry>>,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        if self.offline {
            return Err(Error::Connection("ldap://dc01.corp.local: connection refused".into()));
        }
        while self.stalled {
            if !cancel.sleep(Duration::from_millis(10)) {
                return Err(Error::Cancelled);
            }
        }
        cancel.check()?;
        let mut found: Vec<DirectoryEntry> = entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_by_common_name(&mut found);
        Ok(found)
    }
}

impl Directory for FakeDirectory {
    fn search_users(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        self.search(&self.users, filter, cancel)
    }

    fn search_computers(
        &self,
        filter: &Filter,
        cancel: &CancelToken,
    ) -> Result<Vec<DirectoryEntry>, Error> {
        self.search(&self.computers, filter, cancel)
    }

    fn find_by_key(&self, dn: &str) -> Result<Option<DirectoryEntry>, Error> {
        if self.offline {
            return Err(Error::Connection("connection refused".into()));
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
            .cloned())
    }
}

pub fn user(cn: &str, mail: Option<&str>) -> DirectoryEntry {
    let entry = DirectoryEntry::new(format!("CN={},OU=Staff,DC=corp,DC=local", cn))
        .with_attr("cn", cn)
        .with_attr("sAMAccountName", cn.to_lowercase())
        .with_attr("userAccountControl", "512");
    match mail {
        Some(mail) => entry.with_attr("mail", mail),
        None => entry,
    }
}

pub fn computer(cn: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={},OU=Workstations,DC=corp,DC=local", cn))
        .with_attr("cn", cn)
        .with_attr("dNSHostName", format!("{}.corp.local", cn.to_lowercase()))
        .with_attr("operatingSystem", "Windows 10 Pro")
}

/// Remote inventory double. Records who connected with what and how many
/// sessions were open at once.
#[derive(Default)]
pub struct FakeInventory {
    pub drives: HashMap<String, Vec<DriveInfo>>,
    pub unreachable: HashSet<String>,
    pub auth_failures: HashSet<String>,
    pub delay: Duration,
    pub connections: Mutex<Vec<(String, Credentials)>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeInventory {
    pub fn with_drives(mut self, host: &str, drives: Vec<DriveInfo>) -> Self {
        self.drives.insert(host.to_string(), drives);
        self
    }

    pub fn with_unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    pub fn with_auth_failure(mut self, host: &str) -> Self {
        self.auth_failures.insert(host.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn credentials_for(&self, host: &str) -> Vec<Credentials> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

struct FakeSession {
    drives: Vec<DriveInfo>,
}

impl InventorySession for FakeSession {
    fn list_drives(&mut self) -> Result<Vec<DriveInfo>, Error> {
        Ok(self.drives.clone())
    }
}

impl RemoteInventory for FakeInventory {
    fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<Box<dyn InventorySession>, Error> {
        self.connections
            .lock()
            .unwrap()
            .push((host.to_string(), credentials.clone()));

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        cancel.check()?;
        if self.unreachable.contains(host) {
            return Err(Error::Connection(format!("{}: RPC server is unavailable", host)));
        }
        if self.auth_failures.contains(host) {
            return Err(Error::Auth(format!("{}: NT_STATUS_LOGON_FAILURE", host)));
        }
        Ok(Box::new(FakeSession {
            drives: self.drives.get(host).cloned().unwrap_or_default(),
        }))
    }
}

pub fn drive(name: &str) -> DriveInfo {
    DriveInfo {
        name: name.to_string(),
        path: format!("{}\\", name),
        is_network: false,
    }
}

pub fn network_drive(name: &str, share: &str) -> DriveInfo {
    DriveInfo {
        name: name.to_string(),
        path: share.to_string(),
        is_network: true,
    }
}

pub fn count(db: &Database, table: &str) -> i64 {
    db.connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
