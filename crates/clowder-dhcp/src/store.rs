//! The external binding/PXE store. `spec.md` treats the reservation and
//! inventory database as an out-of-scope collaborator; what's in scope is
//! the two read-only accessor functions the core calls once at startup —
//! `load_bindings` and `load_pxe`. This implements the simplest store that
//! satisfies that boundary: two TOML files, read once and never touched
//! again.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

use clowder_core::{Error, Result};
use crate::pxe::{parse_uuid, PxeRecord};

#[derive(Debug, Deserialize)]
struct BindingsFile {
    #[serde(default)]
    binding: Vec<BindingEntry>,
}

#[derive(Debug, Deserialize)]
struct BindingEntry {
    mac: String,
    ip: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
struct PxeFile {
    #[serde(default)]
    record: Vec<PxeEntry>,
}

#[derive(Debug, Deserialize)]
struct PxeEntry {
    uuid: String,
    root_path: String,
    boot_file: String,
}

/// Load `(mac, ip)` bindings. Missing file is treated as empty — a fleet
/// may start with no pre-bound hardware.
pub fn load_bindings(path: &Path) -> Result<Vec<(String, Ipv4Addr)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::FatalInit(format!("failed to read bindings store {}: {e}", path.display())))?;
    let parsed: BindingsFile = toml::from_str(&content)
        .map_err(|e| Error::FatalInit(format!("failed to parse bindings store {}: {e}", path.display())))?;
    Ok(parsed
        .binding
        .into_iter()
        .map(|b| (b.mac.to_lowercase(), b.ip))
        .collect())
}

/// Load `(uuid, rootPath, bootFile)` PXE records.
pub fn load_pxe(path: &Path) -> Result<Vec<PxeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::FatalInit(format!("failed to read PXE store {}: {e}", path.display())))?;
    let parsed: PxeFile = toml::from_str(&content)
        .map_err(|e| Error::FatalInit(format!("failed to parse PXE store {}: {e}", path.display())))?;

    parsed
        .record
        .into_iter()
        .map(|r| {
            let uuid = parse_uuid(&r.uuid).ok_or_else(|| {
                Error::FatalInit(format!("malformed PXE uuid {:?} in {}", r.uuid, path.display()))
            })?;
            Ok(PxeRecord {
                uuid,
                root_path: r.root_path,
                boot_file: r.boot_file,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_bindings_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[binding]]
mac = "AA:BB:CC:DD:EE:01"
ip = "10.0.0.103"
"#
        )
        .unwrap();

        let bindings = load_bindings(file.path()).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, "aa:bb:cc:dd:ee:01");
        assert_eq!(bindings[0].1, "10.0.0.103".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn missing_store_file_is_empty() {
        assert!(load_bindings(Path::new("/nonexistent/bindings.toml")).unwrap().is_empty());
        assert!(load_pxe(Path::new("/nonexistent/pxe.toml")).unwrap().is_empty());
    }

    #[test]
    fn loads_pxe_records_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[record]]
uuid = "03020100-0504-0706-0809-0a0b0c0d0e0f"
root_path = "/srv/a"
boot_file = "pxelinux.0"
"#
        )
        .unwrap();

        let records = load_pxe(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].root_path, "/srv/a");
        assert_eq!(records[0].boot_file, "pxelinux.0");
    }

    #[test]
    fn rejects_malformed_uuid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[record]]
uuid = "not-a-uuid"
root_path = "/srv/a"
boot_file = "pxelinux.0"
"#
        )
        .unwrap();

        assert!(load_pxe(file.path()).is_err());
    }
}
