//! Static directory-attribute → local-column tables.
//!
//! Only attributes listed here are copied; anything else the directory
//! returns is ignored.

use rusqlite::types::Value;

use crate::directory::{attr, DirectoryEntry};
use crate::error::Error;

/// Disabled account bit of `userAccountControl`.
pub const UAC_ACCOUNT_DISABLE: u32 = 0x0002;
/// Locked-out account bit of `userAccountControl`.
pub const UAC_LOCKOUT: u32 = 0x0010;

/// One mapped field: where it comes from, where it goes, and how to read
/// the mapped value back for comparison.
pub struct FieldMapping<T> {
    pub attribute: &'static str,
    pub column: &'static str,
    pub apply: fn(&mut T, Option<&str>) -> Result<(), String>,
    pub value: fn(&T) -> Value,
}

/// A local record populated from a directory entry through a field map.
pub trait MappedRecord: Default + 'static {
    const TABLE: &'static str;

    fn field_map() -> &'static [FieldMapping<Self>]
    where
        Self: Sized;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFields {
    pub username: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub description: Option<String>,
    pub disabled: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputerFields {
    pub name: String,
    pub dns_host_name: Option<String>,
    pub operating_system: Option<String>,
    pub description: Option<String>,
}

fn optional(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn required(attribute: &str, value: Option<&str>) -> Result<String, String> {
    optional(value).ok_or_else(|| format!("required attribute '{}' is missing", attribute))
}

fn account_control(value: Option<&str>) -> Result<u32, String> {
    match optional(value) {
        None => Ok(0),
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("userAccountControl '{}' is not a number", raw)),
    }
}

fn text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}

fn flag(value: bool) -> Value {
    Value::Integer(value as i64)
}

// ── Users ────────────────────────────────────────────────────────

fn set_user_name(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.name = required(attr::COMMON_NAME, v)?;
    Ok(())
}

fn set_user_username(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.username = optional(v);
    Ok(())
}

fn set_user_email(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.email = optional(v);
    Ok(())
}

fn set_user_description(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.description = optional(v);
    Ok(())
}

fn set_user_disabled(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.disabled = account_control(v)? & UAC_ACCOUNT_DISABLE != 0;
    Ok(())
}

fn set_user_locked(u: &mut UserFields, v: Option<&str>) -> Result<(), String> {
    u.locked = account_control(v)? & UAC_LOCKOUT != 0;
    Ok(())
}

static USER_FIELDS: [FieldMapping<UserFields>; 6] = [
    FieldMapping {
        attribute: attr::COMMON_NAME,
        column: "name",
        apply: set_user_name,
        value: |u| Value::Text(u.name.clone()),
    },
    FieldMapping {
        attribute: attr::ACCOUNT_NAME,
        column: "username",
        apply: set_user_username,
        value: |u| text(&u.username),
    },
    FieldMapping {
        attribute: attr::EMAIL,
        column: "email",
        apply: set_user_email,
        value: |u| text(&u.email),
    },
    FieldMapping {
        attribute: attr::DESCRIPTION,
        column: "description",
        apply: set_user_description,
        value: |u| text(&u.description),
    },
    FieldMapping {
        attribute: attr::ACCOUNT_CONTROL,
        column: "disabled",
        apply: set_user_disabled,
        value: |u| flag(u.disabled),
    },
    FieldMapping {
        attribute: attr::ACCOUNT_CONTROL,
        column: "locked",
        apply: set_user_locked,
        value: |u| flag(u.locked),
    },
];

impl MappedRecord for UserFields {
    const TABLE: &'static str = "directory_user";

    fn field_map() -> &'static [FieldMapping<Self>] {
        &USER_FIELDS
    }
}

// ── Computers ────────────────────────────────────────────────────

fn set_computer_name(c: &mut ComputerFields, v: Option<&str>) -> Result<(), String> {
    c.name = required(attr::COMMON_NAME, v)?;
    Ok(())
}

fn set_computer_dns_host_name(c: &mut ComputerFields, v: Option<&str>) -> Result<(), String> {
    c.dns_host_name = optional(v);
    Ok(())
}

fn set_computer_operating_system(c: &mut ComputerFields, v: Option<&str>) -> Result<(), String> {
    c.operating_system = optional(v);
    Ok(())
}

fn set_computer_description(c: &mut ComputerFields, v: Option<&str>) -> Result<(), String> {
    c.description = optional(v);
    Ok(())
}

static COMPUTER_FIELDS: [FieldMapping<ComputerFields>; 4] = [
    FieldMapping {
        attribute: attr::COMMON_NAME,
        column: "name",
        apply: set_computer_name,
        value: |c| Value::Text(c.name.clone()),
    },
    FieldMapping {
        attribute: attr::DNS_HOST_NAME,
        column: "dns_host_name",
        apply: set_computer_dns_host_name,
        value: |c| text(&c.dns_host_name),
    },
    FieldMapping {
        attribute: attr::OPERATING_SYSTEM,
        column: "operating_system",
        apply: set_computer_operating_system,
        value: |c| text(&c.operating_system),
    },
    FieldMapping {
        attribute: attr::DESCRIPTION,
        column: "description",
        apply: set_computer_description,
        value: |c| text(&c.description),
    },
];

impl MappedRecord for ComputerFields {
    const TABLE: &'static str = "computer";

    fn field_map() -> &'static [FieldMapping<Self>] {
        &COMPUTER_FIELDS
    }
}

// ── Mapping operations ───────────────────────────────────────────

pub fn map_entry<T: MappedRecord>(entry: &DirectoryEntry) -> Result<T, Error> {
    let mut record = T::default();
    for field in T::field_map() {
        (field.apply)(&mut record, entry.attribute(field.attribute))
            .map_err(|reason| Error::Mapping(format!("{}: {}", entry.dn, reason)))?;
    }
    Ok(record)
}

pub fn columns<T: MappedRecord>() -> Vec<&'static str> {
    T::field_map().iter().map(|f| f.column).collect()
}

pub fn values<T: MappedRecord>(record: &T) -> Vec<Value> {
    T::field_map().iter().map(|f| (f.value)(record)).collect()
}

/// Columns whose stored value differs from the freshly mapped one.
/// `stored` is in field-map order, as returned by `find_mapped`.
pub fn diff<T: MappedRecord>(stored: &[Value], record: &T) -> Vec<(&'static str, Value)> {
    T::field_map()
        .iter()
        .zip(stored)
        .filter_map(|(field, old)| {
            let new = (field.value)(record);
            (new != *old).then_some((field.column, new))
        })
        .collect()
}
