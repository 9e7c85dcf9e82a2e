//! RFC 2131/2132 DHCP wire codec, augmented with the PXE options this
//! service reads and writes. A [`Packet`] is a typed view over the fixed
//! BOOTP header plus an ordered list of options; [`Packet::parse`] and
//! [`Packet::to_bytes`] are the decode/encode halves of the codec.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// `{99, 130, 83, 99}` — separates the BOOTP header from DHCP options.
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const ETHERNET: u8 = 1;

pub const PAD: u8 = 0;
pub const END: u8 = 255;

/// Option codes this service reads or writes.
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DOMAIN_SERVER: u8 = 6;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_ROOT_PATH: u8 = 17;
pub const OPT_ADDRESS_REQUEST: u8 = 50;
pub const OPT_ADDRESS_TIME: u8 = 51;
pub const OPT_DHCP_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_CLASS_ID: u8 = 60;
pub const OPT_CLIENT_SYSTEM_ARCH: u8 = 93;
pub const OPT_CLIENT_NETWORK_DEVICE_INTERFACE: u8 = 94;
pub const OPT_UUID_GUID: u8 = 97;

/// DHCP message types carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawOption {
    code: u8,
    value: Vec<u8>,
}

/// A parsed DHCP packet: the fixed 236-byte BOOTP header plus an
/// order-preserving list of options (the magic cookie and PAD/END framing
/// are handled entirely by [`parse`](Packet::parse)/[`to_bytes`](Packet::to_bytes)).
#[derive(Debug, Clone)]
pub struct Packet {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    options: Vec<RawOption>,
    min_size: usize,
}

impl Packet {
    /// Parse a raw datagram. Returns `None` for anything undersized or
    /// missing the magic cookie — malformed packets are dropped upstream,
    /// never surfaced as an error.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 240 {
            return None;
        }
        if data[236..240] != MAGIC_COOKIE {
            return None;
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = parse_options(&data[240..]);

        Some(Packet {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options,
            min_size: data.len(),
        })
    }

    /// Encode back to wire bytes: fixed header, magic cookie, options in
    /// the order they were added, `END`, then `PAD` out to `min_size`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 236];
        buf[0] = self.op;
        buf[1] = self.htype;
        buf[2] = self.hlen;
        buf[3] = self.hops;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[8..10].copy_from_slice(&self.secs.to_be_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        buf[24..28].copy_from_slice(&self.giaddr.octets());
        buf[28..44].copy_from_slice(&self.chaddr);
        buf[44..108].copy_from_slice(&self.sname);
        buf[108..236].copy_from_slice(&self.file);

        buf.extend_from_slice(&MAGIC_COOKIE);
        for opt in &self.options {
            buf.push(opt.code);
            buf.push(opt.value.len() as u8);
            buf.extend_from_slice(&opt.value);
        }
        buf.push(END);

        while buf.len() < self.min_size {
            buf.push(PAD);
        }
        buf
    }

    /// `true` iff the high bit of the first flags byte is set.
    pub fn broadcast(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    /// Parse the options list into a code → value map. A code repeated in
    /// the wire data keeps its last occurrence, matching the original
    /// single-pass map build.
    pub fn options(&self) -> HashMap<u8, Vec<u8>> {
        self.options
            .iter()
            .map(|o| (o.code, o.value.clone()))
            .collect()
    }

    /// Append a TLV option (logically before the terminating `END`, which
    /// `to_bytes` always re-appends last).
    pub fn add_option(&mut self, code: u8, value: Vec<u8>) {
        self.options.push(RawOption { code, value });
    }

    /// Grow the encoded packet with `PAD` until it reaches `size` bytes.
    pub fn pad(&mut self, size: usize) {
        if size > self.min_size {
            self.min_size = size;
        }
    }

    /// Build a `BOOTREPLY` carrying `xid`, `flags`, `chaddr`, `giaddr` from
    /// `req`, per Table 3 of the original `NewReplyPacket`.
    pub fn new_reply(req: &Packet) -> Self {
        Packet {
            op: BOOTREPLY,
            htype: ETHERNET,
            hlen: req.hlen,
            hops: 0,
            xid: req.xid,
            secs: 0,
            flags: req.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: req.giaddr,
            chaddr: req.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: Vec::new(),
            min_size: 240,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options()
            .get(&OPT_DHCP_MESSAGE_TYPE)
            .filter(|v| v.len() == 1)
            .and_then(|v| MessageType::from_u8(v[0]))
    }

    /// Client hardware address as a colon-separated lowercase hex string,
    /// truncated to `hlen` (capped at 6 bytes — Ethernet).
    pub fn mac_address(&self) -> String {
        let len = (self.hlen as usize).min(6);
        self.chaddr[..len]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn set_hardware_address(&mut self, mac: &str) {
        let bytes = parse_mac(mac);
        self.hlen = bytes.len() as u8;
        self.chaddr = [0u8; 16];
        self.chaddr[..bytes.len()].copy_from_slice(&bytes);
    }

    pub fn set_server_name(&mut self, name: &str) {
        self.sname = [0u8; 64];
        let bytes = name.as_bytes();
        let len = bytes.len().min(63);
        self.sname[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn set_boot_file(&mut self, file: &str) {
        self.file = [0u8; 128];
        let bytes = file.as_bytes();
        let len = bytes.len().min(127);
        self.file[..len].copy_from_slice(&bytes[..len]);
    }
}

fn parse_mac(mac: &str) -> Vec<u8> {
    mac.split(':')
        .filter_map(|b| u8::from_str_radix(b, 16).ok())
        .collect()
}

fn parse_options(data: &[u8]) -> Vec<RawOption> {
    let mut options = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let code = data[i];
        if code == END {
            break;
        }
        if code == PAD {
            i += 1;
            continue;
        }
        if i + 1 >= data.len() {
            break;
        }
        let len = data[i + 1] as usize;
        if i + 2 + len > data.len() {
            break;
        }
        options.push(RawOption {
            code,
            value: data[i + 2..i + 2 + len].to_vec(),
        });
        i += 2 + len;
    }
    options
}

/// Build a u32 big-endian option value (lease time, e.g.).
pub fn u32_option(val: u32) -> Vec<u8> {
    val.to_be_bytes().to_vec()
}
