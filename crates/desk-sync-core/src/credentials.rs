use tracing::debug;

use crate::config::AdminConfig;
use crate::error::Error;
use crate::storage::models::Computer;
use crate::storage::Database;

/// Username/password pair used to reach a computer.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Where a resolved credential pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    AccessOverride,
    GlobalAdmin,
}

/// Picks the credentials for a computer: its access override when both
/// fields are filled in, the global administrative account otherwise.
///
/// Nothing is cached; every call reads the current override row.
pub struct CredentialResolver<'a> {
    db: &'a Database,
    admin: &'a AdminConfig,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(db: &'a Database, admin: &'a AdminConfig) -> Self {
        Self { db, admin }
    }

    pub fn resolve(&self, computer: &Computer) -> Result<Credentials, Error> {
        self.resolve_with_source(computer).map(|(credentials, _)| credentials)
    }

    pub fn resolve_with_source(
        &self,
        computer: &Computer,
    ) -> Result<(Credentials, CredentialSource), Error> {
        if let Some(access) = self.db.get_computer_access(computer.id)? {
            match (non_empty(access.username), non_empty(access.password)) {
                (Some(username), Some(password)) => {
                    debug!(
                        computer = %computer.name,
                        username = %username,
                        "Using access override"
                    );
                    return Ok((
                        Credentials { username, password },
                        CredentialSource::AccessOverride,
                    ));
                }
                _ => debug!(
                    computer = %computer.name,
                    "Incomplete access override, using admin account"
                ),
            }
        }

        self.admin_credentials()
            .map(|credentials| (credentials, CredentialSource::GlobalAdmin))
    }

    /// `admin_username` immediately followed by `account_suffix`.
    pub fn admin_credentials(&self) -> Result<Credentials, Error> {
        let username = non_empty(self.admin.admin_username.clone()).ok_or_else(|| {
            Error::Configuration("admin.admin_username is not configured".into())
        })?;
        let password = self.admin.admin_password.clone().ok_or_else(|| {
            Error::Configuration("admin.admin_password is not configured".into())
        })?;

        Ok(Credentials {
            username: format!("{}{}", username, self.admin.account_suffix),
            password,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
