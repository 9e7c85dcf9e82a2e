//! The DHCP responder: a pure function from `(request, server tables)` to
//! an optional response, implementing the DISCOVER/REQUEST/DECLINE/RELEASE
//! state machine with PXE extensions (`spec.md` §4.4). `None` means
//! "silently drop" — the caller (the UDP listener) never writes anything.

use chrono::{Duration as ChronoDuration, Utc};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

use crate::packet::{
    u32_option, MessageType, Packet, OPT_ADDRESS_REQUEST, OPT_ADDRESS_TIME, OPT_CLASS_ID,
    OPT_CLIENT_NETWORK_DEVICE_INTERFACE, OPT_CLIENT_SYSTEM_ARCH, OPT_DHCP_MESSAGE_TYPE,
    OPT_DOMAIN_NAME, OPT_DOMAIN_SERVER, OPT_ROOT_PATH, OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK,
    OPT_UUID_GUID,
};
use crate::pool::{LeasePool, LeaseStatus};
use crate::pxe::PxeRecord;
use crate::state::{Identity, ServerTables};

/// Handle one request under the tables lock. Mirrors the preamble and
/// branches described in `spec.md` §4.4 exactly.
pub fn handle(identity: &Identity, tables: &mut ServerTables, request: &Packet) -> Option<Packet> {
    let options = request.options();

    let msg_type_raw = options.get(&OPT_DHCP_MESSAGE_TYPE)?;
    if msg_type_raw.len() != 1 {
        return None;
    }
    let msg_type = MessageType::from_u8(msg_type_raw[0])?;

    let is_pxe = options.contains_key(&OPT_CLASS_ID)
        && options.contains_key(&OPT_CLIENT_SYSTEM_ARCH)
        && options.contains_key(&OPT_CLIENT_NETWORK_DEVICE_INTERFACE)
        && options.contains_key(&OPT_UUID_GUID);

    let uuid = if is_pxe {
        options.get(&OPT_UUID_GUID).and_then(|raw| {
            if raw.len() == 17 {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&raw[1..]);
                Some(bytes)
            } else {
                None
            }
        })
    } else {
        None
    };

    let pxe_record: Option<PxeRecord> = uuid.and_then(|u| tables.pxe.get_record(&u).cloned());

    let mac = request.mac_address();
    let duration_secs = identity.lease_duration_secs;

    let pool: &mut LeasePool = if is_pxe {
        &mut tables.machines
    } else {
        &mut tables.devices
    };
    pool.refresh();
    let lease_ip = pool.get_lease_by_mac(&mac).map(|l| l.ip);

    match msg_type {
        MessageType::Discover => {
            let Some(ip) = lease_ip else {
                debug!(mac = %mac, "DISCOVER from unknown MAC, registering and dropping");
                tables.registry.record(&mac, uuid.unwrap_or([0u8; 16]));
                return None;
            };
            if is_pxe && pxe_record.is_none() {
                warn!(mac = %mac, "PXE DISCOVER with no matching PXE record, dropping");
                return None;
            }
            Some(build_offer_or_ack(
                identity,
                request,
                ip,
                duration_secs,
                MessageType::Offer,
                pxe_record.as_ref(),
            ))
        }

        MessageType::Request => {
            if let Some(server_id) = options.get(&OPT_SERVER_ID) {
                if server_id.as_slice() != identity.ip.octets().as_slice() {
                    return None;
                }
            }
            let Some(ip) = lease_ip else {
                warn!(mac = %mac, "REQUEST from MAC with no lease, dropping");
                return None;
            };

            let requested_ip = options
                .get(&OPT_ADDRESS_REQUEST)
                .and_then(|v| parse_ipv4(v))
                .unwrap_or(request.ciaddr);

            if requested_ip == Ipv4Addr::UNSPECIFIED || requested_ip != ip {
                return Some(build_nak(request));
            }
            if is_pxe && pxe_record.is_none() {
                return Some(build_nak(request));
            }

            let response = build_offer_or_ack(
                identity,
                request,
                ip,
                duration_secs,
                MessageType::Ack,
                pxe_record.as_ref(),
            );

            let pool: &mut LeasePool = if is_pxe {
                &mut tables.machines
            } else {
                &mut tables.devices
            };
            pool.set_status(ip, LeaseStatus::Allocated);
            pool.set_expiry(ip, Some(Utc::now() + ChronoDuration::seconds(duration_secs as i64)));

            Some(response)
        }

        MessageType::Decline => {
            if options.get(&OPT_SERVER_ID).map(|v| v.as_slice()) != Some(identity.ip.octets().as_slice()) {
                return None;
            }
            let Some(ip) = lease_ip else {
                return None;
            };

            let pool: &mut LeasePool = if is_pxe {
                &mut tables.machines
            } else {
                &mut tables.devices
            };
            pool.set_status(ip, LeaseStatus::NotAvailable);
            pool.set_mac(ip, "");
            if let Some(new_lease) = pool.get_available() {
                let new_ip = new_lease.ip;
                pool.set_status(new_ip, LeaseStatus::Reserved);
                pool.set_mac(new_ip, &mac);
            }
            None
        }

        MessageType::Release => {
            if options.get(&OPT_SERVER_ID).map(|v| v.as_slice()) != Some(identity.ip.octets().as_slice()) {
                return None;
            }
            if lease_ip.is_none() {
                return None;
            }
            let ip = lease_ip.unwrap();
            let pool: &mut LeasePool = if is_pxe {
                &mut tables.machines
            } else {
                &mut tables.devices
            };
            pool.set_status(ip, LeaseStatus::Reserved);
            None
        }

        MessageType::Offer | MessageType::Ack | MessageType::Nak | MessageType::Inform => None,
    }
}

fn parse_ipv4(bytes: &[u8]) -> Option<Ipv4Addr> {
    if bytes.len() == 4 {
        Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    } else {
        None
    }
}

fn build_offer_or_ack(
    identity: &Identity,
    request: &Packet,
    ip: Ipv4Addr,
    duration_secs: u32,
    msg_type: MessageType,
    pxe_record: Option<&PxeRecord>,
) -> Packet {
    let mut response = Packet::new_reply(request);
    response.yiaddr = ip;
    response.set_server_name(&identity.server_name);

    response.add_option(OPT_DHCP_MESSAGE_TYPE, vec![msg_type as u8]);
    response.add_option(OPT_ADDRESS_TIME, u32_option(duration_secs));
    response.add_option(OPT_SERVER_ID, identity.ip.octets().to_vec());
    response.add_option(OPT_SUBNET_MASK, identity.mask.octets().to_vec());
    response.add_option(OPT_ROUTER, identity.router.octets().to_vec());
    response.add_option(OPT_DOMAIN_SERVER, identity.dns.octets().to_vec());
    response.add_option(OPT_DOMAIN_NAME, identity.domain_name.as_bytes().to_vec());

    if let Some(pxe) = pxe_record {
        response.set_boot_file(&pxe.boot_file);
        response.add_option(OPT_ROOT_PATH, pxe.root_path.as_bytes().to_vec());
    }

    response
}

fn build_nak(request: &Packet) -> Packet {
    let mut response = Packet::new_reply(request);
    response.add_option(OPT_DHCP_MESSAGE_TYPE, vec![MessageType::Nak as u8]);
    response
}

/// `true` iff the response to `request` must go to the limited broadcast
/// address rather than unicast to the packet's source (`spec.md` §4.5).
pub fn should_broadcast(request: &Packet, src_is_unspecified: bool) -> bool {
    src_is_unspecified || request.broadcast()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{BOOTREQUEST, ETHERNET};
    use crate::pool::LeasePool;
    use crate::pxe::PxeTable;
    use crate::registry::HardwareRegistry;

    const MAC: &str = "aa:bb:cc:dd:ee:01";
    const SERVER_IP: &str = "10.0.0.1";

    fn identity() -> Identity {
        Identity {
            ip: SERVER_IP.parse().unwrap(),
            mask: "255.255.255.0".parse().unwrap(),
            dns: SERVER_IP.parse().unwrap(),
            router: SERVER_IP.parse().unwrap(),
            domain_name: "lab.local".to_string(),
            server_name: "clowder".to_string(),
            lease_duration_secs: 3600,
        }
    }

    fn tables_with_binding() -> ServerTables {
        let mut machines = LeasePool::new("10.0.0.100".parse().unwrap(), 10);
        machines.bind(MAC, "10.0.0.103".parse().unwrap());
        let devices = LeasePool::new("10.0.0.200".parse().unwrap(), 10);

        let mut pxe_uuid = [0u8; 16];
        pxe_uuid[0] = 0xAB;
        let pxe = PxeTable::new(vec![PxeRecord {
            uuid: pxe_uuid,
            root_path: "/srv/a".to_string(),
            boot_file: "pxelinux.0".to_string(),
        }]);

        ServerTables {
            machines,
            devices,
            pxe,
            registry: HardwareRegistry::new(),
        }
    }

    fn base_request(msg_type: MessageType) -> Packet {
        let mut p = Packet::parse(&{
            let mut raw = vec![0u8; 240];
            raw[0] = BOOTREQUEST;
            raw[1] = ETHERNET;
            raw[2] = 6;
            raw[236..240].copy_from_slice(&[99, 130, 83, 99]);
            raw.push(255);
            raw
        })
        .unwrap();
        p.set_hardware_address(MAC);
        p.add_option(OPT_DHCP_MESSAGE_TYPE, vec![msg_type as u8]);
        p
    }

    fn pxe_uuid_option() -> Vec<u8> {
        let mut v = vec![0u8]; // type prefix
        let mut uuid = [0u8; 16];
        uuid[0] = 0xAB;
        v.extend_from_slice(&uuid);
        v
    }

    fn add_pxe_options(p: &mut Packet) {
        p.add_option(OPT_CLASS_ID, b"PXEClient".to_vec());
        p.add_option(OPT_CLIENT_SYSTEM_ARCH, vec![0, 0]);
        p.add_option(OPT_CLIENT_NETWORK_DEVICE_INTERFACE, vec![1, 2, 1]);
        p.add_option(OPT_UUID_GUID, pxe_uuid_option());
    }

    #[test]
    fn s1_non_pxe_discover_bound_mac() {
        let id = identity();
        let mut tables = tables_with_binding();
        let req = base_request(MessageType::Discover);

        let resp = handle(&id, &mut tables, &req).expect("offer");
        assert_eq!(resp.yiaddr, "10.0.0.103".parse::<Ipv4Addr>().unwrap());
        let opts = resp.options();
        assert_eq!(opts.get(&OPT_DHCP_MESSAGE_TYPE).unwrap(), &[MessageType::Offer as u8]);
        assert_eq!(opts.get(&OPT_ADDRESS_TIME).unwrap(), &3600u32.to_be_bytes().to_vec());
        assert_eq!(opts.get(&OPT_SERVER_ID).unwrap().as_slice(), id.ip.octets());
        assert_eq!(opts.get(&OPT_SUBNET_MASK).unwrap().as_slice(), id.mask.octets());

        let machine_lease = tables.machines.get_lease_by_mac(MAC).unwrap();
        assert_eq!(machine_lease.status, LeaseStatus::Reserved); // unchanged by OFFER
    }

    #[test]
    fn s2_non_pxe_request_allocates() {
        let id = identity();
        let mut tables = tables_with_binding();
        let mut req = base_request(MessageType::Request);
        req.add_option(OPT_ADDRESS_REQUEST, "10.0.0.103".parse::<Ipv4Addr>().unwrap().octets().to_vec());

        let resp = handle(&id, &mut tables, &req).expect("ack");
        let opts = resp.options();
        assert_eq!(opts.get(&OPT_DHCP_MESSAGE_TYPE).unwrap(), &[MessageType::Ack as u8]);
        assert_eq!(resp.yiaddr, "10.0.0.103".parse::<Ipv4Addr>().unwrap());

        let lease = tables.machines.get_lease_by_mac(MAC).unwrap();
        assert_eq!(lease.status, LeaseStatus::Allocated);
        assert!(lease.expiry.unwrap() > Utc::now());
    }

    #[test]
    fn s3_request_mismatched_ip_naks() {
        let id = identity();
        let mut tables = tables_with_binding();
        let mut req = base_request(MessageType::Request);
        req.add_option(OPT_ADDRESS_REQUEST, "10.0.0.200".parse::<Ipv4Addr>().unwrap().octets().to_vec());

        let resp = handle(&id, &mut tables, &req).expect("nak");
        let opts = resp.options();
        assert_eq!(opts.get(&OPT_DHCP_MESSAGE_TYPE).unwrap(), &[MessageType::Nak as u8]);

        let lease = tables.machines.get_lease_by_mac(MAC).unwrap();
        assert_eq!(lease.status, LeaseStatus::Reserved);
    }

    #[test]
    fn s4_pxe_discover_offers_boot_file_and_root_path() {
        let id = identity();
        let mut tables = tables_with_binding();
        let mut req = base_request(MessageType::Discover);
        add_pxe_options(&mut req);

        let resp = handle(&id, &mut tables, &req).expect("offer");
        assert_eq!(std::str::from_utf8(&resp.file).unwrap().trim_end_matches('\0'), "pxelinux.0");
        let opts = resp.options();
        assert_eq!(std::str::from_utf8(opts.get(&OPT_ROOT_PATH).unwrap()).unwrap(), "/srv/a");
    }

    #[test]
    fn s5_discover_from_unknown_mac_registers_and_drops() {
        let id = identity();
        let mut tables = tables_with_binding();
        let mut req = base_request(MessageType::Discover);
        req.set_hardware_address("aa:bb:cc:dd:ee:99");
        add_pxe_options(&mut req);

        let resp = handle(&id, &mut tables, &req);
        assert!(resp.is_none());
        let mut expected = [0u8; 16];
        expected[0] = 0xAB;
        assert_eq!(tables.registry.get("aa:bb:cc:dd:ee:99"), Some(&expected));
    }

    #[test]
    fn s6_release_returns_lease_to_reserved() {
        let id = identity();
        let mut tables = tables_with_binding();
        tables.machines.set_status("10.0.0.103".parse().unwrap(), LeaseStatus::Allocated);
        tables
            .machines
            .set_expiry("10.0.0.103".parse().unwrap(), Some(Utc::now() + ChronoDuration::seconds(3600)));

        let mut req = base_request(MessageType::Release);
        req.ciaddr = "10.0.0.103".parse().unwrap();
        req.add_option(OPT_SERVER_ID, id.ip.octets().to_vec());

        let resp = handle(&id, &mut tables, &req);
        assert!(resp.is_none());
        let lease = tables.machines.get_lease_by_mac(MAC).unwrap();
        assert_eq!(lease.status, LeaseStatus::Reserved);
        assert_eq!(lease.mac, MAC);

        // Subsequent DISCOVER still offers the same IP.
        let discover = base_request(MessageType::Discover);
        let offer = handle(&id, &mut tables, &discover).unwrap();
        assert_eq!(offer.yiaddr, "10.0.0.103".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn yiaddr_is_stable_across_offer_and_ack() {
        let id = identity();
        let mut tables = tables_with_binding();

        let discover = base_request(MessageType::Discover);
        let offer = handle(&id, &mut tables, &discover).unwrap();

        let mut req = base_request(MessageType::Request);
        req.add_option(OPT_ADDRESS_REQUEST, offer.yiaddr.octets().to_vec());
        let ack = handle(&id, &mut tables, &req).unwrap();

        assert_eq!(offer.yiaddr, ack.yiaddr);
        assert_eq!(offer.yiaddr, "10.0.0.103".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn decline_marks_notavailable_and_rebinds_mac_to_fresh_ip() {
        let id = identity();
        let mut tables = tables_with_binding();

        let mut req = base_request(MessageType::Decline);
        req.add_option(OPT_SERVER_ID, id.ip.octets().to_vec());

        let resp = handle(&id, &mut tables, &req);
        assert!(resp.is_none());

        let old = tables.machines.get_lease("10.0.0.103".parse().unwrap()).unwrap();
        assert_eq!(old.status, LeaseStatus::NotAvailable);
        assert!(old.mac.is_empty());

        let rebound = tables.machines.get_lease_by_mac(MAC).unwrap();
        assert_ne!(rebound.ip, "10.0.0.103".parse::<Ipv4Addr>().unwrap());
        assert_eq!(rebound.status, LeaseStatus::Reserved);
    }

    #[test]
    fn malformed_message_type_is_dropped() {
        let id = identity();
        let mut tables = tables_with_binding();
        let mut req = base_request(MessageType::Discover);
        // overwrite with an out-of-range message type by rebuilding options
        let mut raw = req.to_bytes();
        // find and corrupt option 53's value byte (option bytes start right after cookie)
        let opt_value_idx = 240 + 2; // code(53) + len(1) -> value at +2
        raw[opt_value_idx] = 9;
        req = Packet::parse(&raw).unwrap();

        assert!(handle(&id, &mut tables, &req).is_none());
    }
}
