//! Dense, ordered lease pools. Each pool owns a contiguous IPv4 range and
//! is searched linearly — fleets are small (tens of machines), so a hash
//! index would add complexity without a measurable benefit, and the
//! insertion-ordered scan keeps `OFFER` selection deterministic.

use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;

/// Lease status. `AVAILABLE` leases carry no MAC and no expiry; every
/// other status implies a bound MAC (`status=ALLOCATED` additionally
/// implies a non-zero expiry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Available,
    Reserved,
    Allocated,
    NotAvailable,
}

#[derive(Debug, Clone)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub status: LeaseStatus,
    pub mac: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl Lease {
    fn available(ip: Ipv4Addr) -> Self {
        Lease {
            ip,
            status: LeaseStatus::Available,
            mac: String::new(),
            expiry: None,
        }
    }
}

/// One population's worth of leases (`machines` or `devices`), covering
/// `[start, start + range)` in address order.
pub struct LeasePool {
    leases: Vec<Lease>,
}

impl LeasePool {
    /// Build a fresh pool of `range` addresses starting at `start`, all
    /// `AVAILABLE`.
    pub fn new(start: Ipv4Addr, range: u32) -> Self {
        let base: u32 = start.into();
        let leases = (0..range)
            .map(|i| Lease::available(Ipv4Addr::from(base.wrapping_add(i))))
            .collect();
        LeasePool { leases }
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.iter()
    }

    /// O(n) linear search by IP.
    pub fn get_lease(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.leases.iter().find(|l| l.ip == ip)
    }

    pub fn get_lease_mut(&mut self, ip: Ipv4Addr) -> Option<&mut Lease> {
        self.leases.iter_mut().find(|l| l.ip == ip)
    }

    /// First lease whose MAC equals `mac`. Empty MACs never match — every
    /// `AVAILABLE` lease's `mac` is empty by invariant.
    pub fn get_lease_by_mac(&self, mac: &str) -> Option<&Lease> {
        if mac.is_empty() {
            return None;
        }
        self.leases.iter().find(|l| l.mac == mac)
    }

    pub fn get_lease_by_mac_mut(&mut self, mac: &str) -> Option<&mut Lease> {
        if mac.is_empty() {
            return None;
        }
        self.leases.iter_mut().find(|l| l.mac == mac)
    }

    /// First lease with status `AVAILABLE`, in pool order.
    pub fn get_available(&mut self) -> Option<&mut Lease> {
        self.leases
            .iter_mut()
            .find(|l| l.status == LeaseStatus::Available)
    }

    pub fn set_status(&mut self, ip: Ipv4Addr, status: LeaseStatus) {
        if let Some(l) = self.get_lease_mut(ip) {
            l.status = status;
        }
    }

    pub fn set_mac(&mut self, ip: Ipv4Addr, mac: &str) {
        if let Some(l) = self.get_lease_mut(ip) {
            l.mac = mac.to_string();
        }
    }

    pub fn set_expiry(&mut self, ip: Ipv4Addr, expiry: Option<DateTime<Utc>>) {
        if let Some(l) = self.get_lease_mut(ip) {
            l.expiry = expiry;
        }
    }

    /// Every `ALLOCATED` lease whose `expiry` has passed reverts to
    /// `RESERVED` with its expiry cleared; the MAC binding is kept so the
    /// client retains its reservation. `RESERVED` and `NOTAVAILABLE`
    /// leases are never swept.
    pub fn refresh(&mut self) {
        let now = Utc::now();
        for lease in &mut self.leases {
            if lease.status == LeaseStatus::Allocated {
                if let Some(expiry) = lease.expiry {
                    if expiry < now {
                        lease.status = LeaseStatus::Reserved;
                        lease.expiry = None;
                    }
                }
            }
        }
    }

    /// Bind a MAC to a specific IP from the external binding table,
    /// marking it `RESERVED`. Used only at startup load.
    pub fn bind(&mut self, mac: &str, ip: Ipv4Addr) -> bool {
        match self.get_lease_mut(ip) {
            Some(lease) => {
                lease.status = LeaseStatus::Reserved;
                lease.mac = mac.to_string();
                true
            }
            None => false,
        }
    }

    /// Tab-separated dump used by the `LEASES`/`STATUS` control commands:
    /// `ip\tstatus\tmac\texpiry\n` per lease, in pool order.
    pub fn export(&self) -> String {
        let mut out = String::new();
        for lease in &self.leases {
            let status = match lease.status {
                LeaseStatus::Available => "AVAILABLE",
                LeaseStatus::Reserved => "RESERVED",
                LeaseStatus::Allocated => "ALLOCATED",
                LeaseStatus::NotAvailable => "NOTAVAILABLE",
            };
            let expiry = lease
                .expiry
                .map(|e| e.to_rfc3339())
                .unwrap_or_else(String::new);
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                lease.ip, status, lease.mac, expiry
            ));
        }
        out
    }
}
