/// A directory user cached locally, keyed by distinguished name.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub dn: String,
    pub username: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub description: Option<String>,
    pub disabled: bool,
    pub locked: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A directory computer plus the outcome of its most recent scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Computer {
    pub id: i64,
    pub dn: String,
    pub name: String,
    pub dns_host_name: Option<String>,
    pub operating_system: Option<String>,
    pub description: Option<String>,
    /// `None` until the first scan attempt.
    pub reachable: Option<bool>,
    pub last_error: Option<String>,
    pub last_scanned_at: Option<i64>,
    pub absent_from_directory: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Computer {
    /// Host to contact for remote inventory: the DNS name when the directory
    /// has one, otherwise the NetBIOS name.
    pub fn host(&self) -> &str {
        self.dns_host_name
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Operator-supplied credentials for one computer.
#[derive(Clone, PartialEq)]
pub struct ComputerAccess {
    pub id: i64,
    pub computer_id: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub updated_at: i64,
}

impl std::fmt::Debug for ComputerAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputerAccess")
            .field("id", &self.id)
            .field("computer_id", &self.computer_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A logical disk found on a computer during its last successful scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Drive {
    pub id: i64,
    pub computer_id: i64,
    pub name: String,
    pub path: String,
    pub is_network: bool,
    pub scanned_at: i64,
}

/// One scan attempt against a computer, kept as history until swept.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputerScan {
    pub id: i64,
    pub computer_id: i64,
    pub scanned_at: i64,
    pub reachable: bool,
    pub error: Option<String>,
    pub drive_count: i64,
}
