//! Remote hardware inventory over WMI.

pub mod wmic;

use crate::cancel::CancelToken;
use crate::credentials::Credentials;
use crate::error::Error;

pub use wmic::WmicInventory;

/// A logical disk reported by a remote machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveInfo {
    pub name: String,
    pub path: String,
    pub is_network: bool,
}

/// Remote management capability used by the scan engine.
///
/// `connect` authenticates against the host and fails with
/// [`Error::Connection`] or [`Error::Auth`]. Implementations must stop
/// promptly once `cancel` fires, dropping any open connection.
pub trait RemoteInventory: Send + Sync {
    fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<Box<dyn InventorySession>, Error>;
}

/// An authenticated session against one machine.
pub trait InventorySession {
    fn list_drives(&mut self) -> Result<Vec<DriveInfo>, Error>;
}
