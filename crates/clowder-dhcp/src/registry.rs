//! Hardware registry: records the last-seen UUID for a MAC the first time
//! a DISCOVER arrives from it, so operators can find and pre-bind new
//! machines later (the `NEWHARDWARE` control command dumps this table).

use std::collections::HashMap;

use crate::pxe::format_uuid;

/// MAC string → last-seen UUID (16 bytes, all-zero for a non-PXE client).
#[derive(Debug, Clone, Default)]
pub struct HardwareRegistry {
    entries: HashMap<String, [u8; 16]>,
}

impl HardwareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `mac → uuid`. Idempotent: a repeat DISCOVER from the same
    /// MAC just overwrites with the (presumably identical) UUID.
    pub fn record(&mut self, mac: &str, uuid: [u8; 16]) {
        self.entries.insert(mac.to_string(), uuid);
    }

    pub fn get(&self, mac: &str) -> Option<&[u8; 16]> {
        self.entries.get(mac)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tab-separated `mac\tuuid\n` dump, one entry per line.
    pub fn export(&self) -> String {
        let mut out = String::new();
        for (mac, uuid) in &self.entries {
            out.push_str(&format!("{}\t{}\n", mac, format_uuid(uuid)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_first_seen_uuid_and_is_idempotent() {
        let mut reg = HardwareRegistry::new();
        let mut uuid = [0u8; 16];
        uuid[0] = 0xaa;

        reg.record("aa:bb:cc:dd:ee:99", uuid);
        assert_eq!(reg.get("aa:bb:cc:dd:ee:99"), Some(&uuid));

        reg.record("aa:bb:cc:dd:ee:99", uuid);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn non_pxe_discover_registers_zero_uuid() {
        let mut reg = HardwareRegistry::new();
        reg.record("aa:bb:cc:dd:ee:01", [0u8; 16]);
        assert_eq!(reg.get("aa:bb:cc:dd:ee:01"), Some(&[0u8; 16]));
    }

    #[test]
    fn unknown_mac_is_absent() {
        let reg = HardwareRegistry::new();
        assert!(reg.get("aa:bb:cc:dd:ee:01").is_none());
    }
}
