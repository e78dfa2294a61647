use thiserror::Error;

/// LDAP result code for invalidCredentials.
const LDAP_INVALID_CREDENTIALS: u32 = 49;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error aborts a whole run rather than a single entity.
    ///
    /// Constraint violations and similar row-level failures are recoverable;
    /// a store that cannot be opened or written at all is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Configuration(_) | Error::Cancelled => true,
            Error::Persistence(err) => is_store_unavailable(err),
            _ => false,
        }
    }
}

fn is_store_unavailable(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    match err.sqlite_error_code() {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::ReadOnly,
        ) => true,
        _ => false,
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<ldap3::LdapError> for Error {
    fn from(err: ldap3::LdapError) -> Self {
        match &err {
            ldap3::LdapError::LdapResult { result } if result.rc == LDAP_INVALID_CREDENTIALS => {
                Error::Auth(format!("directory bind rejected: {}", result.text))
            }
            _ => Error::Connection(err.to_string()),
        }
    }
}
