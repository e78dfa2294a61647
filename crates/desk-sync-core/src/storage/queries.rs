use super::models::*;
use super::sqlite::Database;
use crate::inventory::DriveInfo;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};
use std::collections::HashSet;
use tracing::debug;

const COMPUTER_COLUMNS: &str = "id, dn, name, dns_host_name, operating_system, description, \
     reachable, last_error, last_scanned_at, absent_from_directory, created_at, updated_at";

const USER_COLUMNS: &str =
    "id, dn, username, name, email, description, disabled, locked, created_at, updated_at";

fn computer_from_row(row: &Row<'_>) -> Result<Computer> {
    Ok(Computer {
        id: row.get(0)?,
        dn: row.get(1)?,
        name: row.get(2)?,
        dns_host_name: row.get(3)?,
        operating_system: row.get(4)?,
        description: row.get(5)?,
        reachable: row.get(6)?,
        last_error: row.get(7)?,
        last_scanned_at: row.get(8)?,
        absent_from_directory: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        dn: row.get(1)?,
        username: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        description: row.get(5)?,
        disabled: row.get(6)?,
        locked: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn drive_from_row(row: &Row<'_>) -> Result<Drive> {
    Ok(Drive {
        id: row.get(0)?,
        computer_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        is_network: row.get(4)?,
        scanned_at: row.get(5)?,
    })
}

// ── Mapped directory records ─────────────────────────────────────
//
// Table and column names come from the static field maps in `sync::mapping`,
// never from directory data, so they are safe to splice into SQL.

/// Load the id and the mapped column values of the record keyed by `dn`.
pub fn find_mapped(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    dn: &str,
) -> Result<Option<(i64, Vec<Value>)>> {
    let sql = format!(
        "SELECT id, {} FROM {} WHERE dn = ?1",
        columns.join(", "),
        table
    );
    conn.query_row(&sql, params![dn], |row| {
        let id: i64 = row.get(0)?;
        let values = (0..columns.len())
            .map(|i| row.get::<_, Value>(i + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok((id, values))
    })
    .optional()
}

pub fn insert_mapped(
    conn: &Connection,
    table: &str,
    dn: &str,
    columns: &[&str],
    values: Vec<Value>,
    now: i64,
) -> Result<i64> {
    let placeholders: Vec<String> = (0..columns.len() + 3).map(|i| format!("?{}", i + 1)).collect();
    let sql = format!(
        "INSERT INTO {} (dn, {}, created_at, updated_at) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut bound: Vec<Value> = Vec::with_capacity(values.len() + 3);
    bound.push(Value::Text(dn.to_string()));
    bound.extend(values);
    bound.push(Value::Integer(now));
    bound.push(Value::Integer(now));

    conn.execute(&sql, params_from_iter(bound))?;
    Ok(conn.last_insert_rowid())
}

/// Write only the changed columns of one record.
pub fn update_mapped(
    conn: &Connection,
    table: &str,
    id: i64,
    changes: Vec<(&'static str, Value)>,
    now: i64,
) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let assignments: Vec<String> = changes
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {}, updated_at = ?{} WHERE id = ?{}",
        table,
        assignments.join(", "),
        changes.len() + 1,
        changes.len() + 2
    );

    let mut bound: Vec<Value> = changes.into_iter().map(|(_, v)| v).collect();
    bound.push(Value::Integer(now));
    bound.push(Value::Integer(id));

    conn.execute(&sql, params_from_iter(bound))?;
    Ok(())
}

impl Database {
    // ── Users ────────────────────────────────────────────────────

    pub fn find_user_by_dn(&self, dn: &str) -> Result<Option<User>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM directory_user WHERE dn = ?1", USER_COLUMNS),
                params![dn],
                user_from_row,
            )
            .optional()
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM directory_user ORDER BY name COLLATE NOCASE",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(users)
    }

    // ── Computers ────────────────────────────────────────────────

    pub fn find_computer_by_dn(&self, dn: &str) -> Result<Option<Computer>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM computer WHERE dn = ?1", COMPUTER_COLUMNS),
                params![dn],
                computer_from_row,
            )
            .optional()
    }

    pub fn find_computer_by_name(&self, name: &str) -> Result<Option<Computer>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM computer WHERE name = ?1 COLLATE NOCASE \
                     ORDER BY absent_from_directory, id LIMIT 1",
                    COMPUTER_COLUMNS
                ),
                params![name],
                computer_from_row,
            )
            .optional()
    }

    pub fn list_computers(&self) -> Result<Vec<Computer>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM computer ORDER BY name COLLATE NOCASE",
            COMPUTER_COLUMNS
        ))?;
        let computers = stmt
            .query_map([], computer_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(computers)
    }

    /// Computers still present in the directory, i.e. the scan fleet.
    pub fn list_scannable_computers(&self) -> Result<Vec<Computer>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM computer WHERE absent_from_directory = 0 \
             ORDER BY name COLLATE NOCASE",
            COMPUTER_COLUMNS
        ))?;
        let computers = stmt
            .query_map([], computer_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(computers)
    }

    /// Flag computers missing from a complete directory listing and clear the
    /// flag on those that came back. Returns (flagged, restored).
    pub fn reconcile_computer_presence(
        &self,
        seen_dns: &HashSet<String>,
    ) -> Result<(usize, usize)> {
        self.with_transaction(|tx| {
            tx.execute_batch(
                "CREATE TEMP TABLE IF NOT EXISTS seen_dn (dn TEXT PRIMARY KEY COLLATE NOCASE);
                 DELETE FROM seen_dn;",
            )?;
            {
                let mut stmt = tx.prepare_cached("INSERT OR IGNORE INTO seen_dn (dn) VALUES (?1)")?;
                for dn in seen_dns {
                    stmt.execute(params![dn])?;
                }
            }

            let now = chrono::Utc::now().timestamp();
            let flagged = tx.execute(
                "UPDATE computer SET absent_from_directory = 1, updated_at = ?1 \
                 WHERE absent_from_directory = 0 AND dn NOT IN (SELECT dn FROM seen_dn)",
                params![now],
            )?;
            let restored = tx.execute(
                "UPDATE computer SET absent_from_directory = 0, updated_at = ?1 \
                 WHERE absent_from_directory = 1 AND dn IN (SELECT dn FROM seen_dn)",
                params![now],
            )?;
            tx.execute("DELETE FROM seen_dn", [])?;

            debug!("Presence reconciled: {} flagged absent, {} restored", flagged, restored);
            Ok((flagged, restored))
        })
    }

    // ── Access overrides ─────────────────────────────────────────

    pub fn get_computer_access(&self, computer_id: i64) -> Result<Option<ComputerAccess>> {
        self.connection()
            .query_row(
                "SELECT id, computer_id, username, password, updated_at \
                 FROM computer_access WHERE computer_id = ?1",
                params![computer_id],
                |row| {
                    Ok(ComputerAccess {
                        id: row.get(0)?,
                        computer_id: row.get(1)?,
                        username: row.get(2)?,
                        password: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn set_computer_access(
        &self,
        computer_id: i64,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.connection().execute(
            "INSERT INTO computer_access (computer_id, username, password, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(computer_id) DO UPDATE SET \
                 username = excluded.username, \
                 password = excluded.password, \
                 updated_at = excluded.updated_at",
            params![computer_id, username, password, now],
        )?;
        Ok(())
    }

    pub fn clear_computer_access(&self, computer_id: i64) -> Result<bool> {
        let removed = self.connection().execute(
            "DELETE FROM computer_access WHERE computer_id = ?1",
            params![computer_id],
        )?;
        Ok(removed > 0)
    }

    // ── Scan results ─────────────────────────────────────────────

    /// Swap the computer's drive set for `drives` and mark it reachable,
    /// all in one transaction.
    pub fn replace_drives(
        &self,
        computer_id: i64,
        drives: &[DriveInfo],
        now: i64,
    ) -> Result<usize> {
        self.with_transaction(|tx| {
            tx.execute("DELETE FROM drive WHERE computer_id = ?1", params![computer_id])?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO drive (computer_id, name, path, is_network, scanned_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for drive in drives {
                    stmt.execute(params![
                        computer_id,
                        drive.name,
                        drive.path,
                        drive.is_network,
                        now
                    ])?;
                }
            }
            tx.execute(
                "UPDATE computer SET reachable = 1, last_error = NULL, last_scanned_at = ?1 \
                 WHERE id = ?2",
                params![now, computer_id],
            )?;
            tx.execute(
                "INSERT INTO computer_scan \
                 (computer_id, scanned_at, reachable, error, drive_count) \
                 VALUES (?1, ?2, 1, NULL, ?3)",
                params![computer_id, now, drives.len() as i64],
            )?;
            Ok(drives.len())
        })
    }

    /// Record a failed scan. The drive set is left as it was.
    pub fn mark_unreachable(&self, computer_id: i64, error: &str, now: i64) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "UPDATE computer SET reachable = 0, last_error = ?1 WHERE id = ?2",
                params![error, computer_id],
            )?;
            tx.execute(
                "INSERT INTO computer_scan \
                 (computer_id, scanned_at, reachable, error, drive_count) \
                 VALUES (?1, ?2, 0, ?3, 0)",
                params![computer_id, now, error],
            )?;
            Ok(())
        })
    }

    pub fn get_drives_for_computer(&self, computer_id: i64) -> Result<Vec<Drive>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT id, computer_id, name, path, is_network, scanned_at \
             FROM drive WHERE computer_id = ?1 ORDER BY name",
        )?;
        let drives = stmt
            .query_map(params![computer_id], drive_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(drives)
    }

    pub fn get_scan_history(&self, computer_id: i64) -> Result<Vec<ComputerScan>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT id, computer_id, scanned_at, reachable, error, drive_count \
             FROM computer_scan WHERE computer_id = ?1 ORDER BY scanned_at DESC, id DESC",
        )?;
        let scans = stmt
            .query_map(params![computer_id], |row| {
                Ok(ComputerScan {
                    id: row.get(0)?,
                    computer_id: row.get(1)?,
                    scanned_at: row.get(2)?,
                    reachable: row.get(3)?,
                    error: row.get(4)?,
                    drive_count: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(scans)
    }
}
