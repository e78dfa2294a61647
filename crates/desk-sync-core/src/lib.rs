pub mod cancel;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod jobs;
pub mod progress;
pub mod retention;
pub mod run;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use credentials::{CredentialResolver, Credentials};
pub use engine::{ComputerLocks, ScanEngine};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use retention::RetentionSweeper;
pub use run::{EntryOutcome, FailedEntry, SyncRun};
pub use scheduler::{Dispatch, Job, Scheduler};
pub use storage::Database;
pub use sync::{SyncEngine, SyncKind};
