use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::{DriveInfo, InventorySession, RemoteInventory};
use crate::cancel::CancelToken;
use crate::config::InventoryConfig;
use crate::credentials::Credentials;
use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const PROBE_QUERY: &str = "SELECT Caption FROM Win32_OperatingSystem";
const DRIVE_QUERY: &str =
    "SELECT DeviceID, DriveType, ProviderName, VolumeName FROM Win32_LogicalDisk";

/// Win32_LogicalDisk.DriveType for a mapped network share.
const DRIVE_TYPE_NETWORK: &str = "4";

const AUTH_FAILURE_MARKERS: &[&str] = &[
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_ACCESS_DENIED",
    "NT_STATUS_ACCOUNT_DISABLED",
    "NT_STATUS_ACCOUNT_LOCKED_OUT",
    "NT_STATUS_PASSWORD_EXPIRED",
    "WBEM_E_ACCESS_DENIED",
];

/// WMI inventory through the Samba/OpenVAS `wmic` DCOM client.
///
/// Credentials are handed over in a private auth file rather than on the
/// command line, so they never show up in the process table.
pub struct WmicInventory {
    program: String,
    timeout: Duration,
}

impl WmicInventory {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            program: config.wmic_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl RemoteInventory for WmicInventory {
    fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<Box<dyn InventorySession>, Error> {
        let auth_file = write_auth_file(credentials)?;
        let mut session = WmicSession {
            program: self.program.clone(),
            host: host.to_string(),
            auth_file,
            timeout: self.timeout,
            cancel: cancel.clone(),
        };

        session.query(PROBE_QUERY)?;
        debug!(host = %host, "WMI session established");
        Ok(Box::new(session))
    }
}

struct WmicSession {
    program: String,
    host: String,
    auth_file: NamedTempFile,
    timeout: Duration,
    cancel: CancelToken,
}

impl WmicSession {
    fn query(&mut self, wql: &str) -> Result<Vec<HashMap<String, String>>, Error> {
        let mut command = Command::new(&self.program);
        command
            .arg("-A")
            .arg(self.auth_file.path())
            .arg(format!("//{}", self.host))
            .arg(wql)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        trace!(host = %self.host, query = %wql, "Running WMI query");
        let child = command.spawn().map_err(|e| {
            Error::Connection(format!("failed to start {}: {}", self.program, e))
        })?;

        let output = wait_with_cancel(child, self.timeout, &self.cancel).map_err(|e| match e {
            Error::Connection(msg) => Error::Connection(format!("{}: {}", self.host, msg)),
            other => other,
        })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stdout, &output.stderr));
        }

        Ok(parse_wmic_output(&output.stdout))
    }
}

impl InventorySession for WmicSession {
    fn list_drives(&mut self) -> Result<Vec<DriveInfo>, Error> {
        let rows = self.query(DRIVE_QUERY)?;
        Ok(rows.iter().filter_map(drive_from_row).collect())
    }
}

struct ProcessOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Wait for `child`, killing it once the run is cancelled or `timeout` passes.
fn wait_with_cancel(
    mut child: Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ProcessOutput, Error> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Connection(format!(
                "timed out after {}s",
                timeout.as_secs()
            )));
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(ProcessOutput {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

fn write_auth_file(credentials: &Credentials) -> Result<NamedTempFile, Error> {
    let (domain, user) = match credentials.username.split_once('\\') {
        Some((domain, user)) => (Some(domain), user),
        None => (None, credentials.username.as_str()),
    };

    let mut file = NamedTempFile::new()?;
    writeln!(file, "username = {}", user)?;
    writeln!(file, "password = {}", credentials.password)?;
    if let Some(domain) = domain {
        writeln!(file, "domain = {}", domain)?;
    }
    file.flush()?;
    Ok(file)
}

fn classify_failure(stdout: &str, stderr: &str) -> Error {
    let combined = format!("{}\n{}", stderr, stdout);
    if AUTH_FAILURE_MARKERS.iter().any(|m| combined.contains(m)) {
        return Error::Auth(last_line(&combined).to_string());
    }
    Error::Connection(last_line(&combined).to_string())
}

fn last_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("wmic exited with an error")
}

/// Parse wmic's `CLASS:` / header / pipe-delimited row layout.
fn parse_wmic_output(text: &str) -> Vec<HashMap<String, String>> {
    let mut lines = text
        .lines()
        .skip_while(|line| !line.starts_with("CLASS:"))
        .skip(1);

    let header: Vec<&str> = match lines.next() {
        Some(header) => header.split('|').map(str::trim).collect(),
        None => return Vec::new(),
    };

    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            header
                .iter()
                .zip(line.splitn(header.len(), '|'))
                .map(|(name, value)| (name.to_string(), value.trim().to_string()))
                .collect()
        })
        .collect()
}

fn non_null(value: Option<&String>) -> Option<&str> {
    value
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != "(null)")
}

fn drive_from_row(row: &HashMap<String, String>) -> Option<DriveInfo> {
    let device_id = non_null(row.get("DeviceID"))?;
    let is_network = row.get("DriveType").map(String::as_str) == Some(DRIVE_TYPE_NETWORK);

    let path = match non_null(row.get("ProviderName")) {
        Some(provider) if is_network => provider.to_string(),
        _ => format!("{}\\", device_id),
    };

    Some(DriveInfo {
        name: device_id.to_string(),
        path,
        is_network,
    })
}
