//! Netlink socket operations for network configuration.
//!
//! A minimal rtnetlink client: enough to create bridges and veth pairs,
//! enslave and move links, assign addresses, and install routes. A
//! [`NetlinkHandle`] is bound to the network namespace that was current on
//! the creating thread, so in-container configuration opens a fresh handle
//! after switching namespaces.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use ipnetwork::Ipv4Network;

const NETLINK_ROUTE: i32 = 0;

// Message types
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;
const NLMSG_ERROR: u16 = 2;

// Flags
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

const IFF_UP: u32 = 0x1;

// Link attributes
const IFLA_ADDRESS: u16 = 1;
const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;
const NLA_F_NESTED: u16 = 1 << 15;

// Address attributes
const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

// Route attributes
const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

const NLMSG_HDR_LEN: usize = 16;
const IFINFOMSG_LEN: usize = 16;
const NLA_HDR_LEN: usize = 4;

const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// A route to install in the main table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Destination; `0.0.0.0/0` for the default route.
    pub destination: Ipv4Network,
    /// Next hop.
    pub gateway: Option<Ipv4Addr>,
    /// Outgoing interface index.
    pub ifindex: u32,
}

/// Builder for one rtnetlink request.
struct Request {
    buf: Vec<u8>,
}

impl Request {
    fn new(msg_type: u16, flags: u16) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&msg_type.to_ne_bytes());
        buf.extend_from_slice(&(flags | NLM_F_REQUEST | NLM_F_ACK).to_ne_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        Self { buf }
    }

    /// Appends a `struct ifinfomsg`.
    fn ifinfo(mut self, index: i32, flags: u32, change: u32) -> Self {
        push_ifinfo(&mut self.buf, index, flags, change);
        self
    }

    /// Appends a `struct ifaddrmsg` for IPv4.
    fn ifaddr(mut self, prefix_len: u8, index: u32) -> Self {
        self.buf.push(libc::AF_INET as u8);
        self.buf.push(prefix_len);
        self.buf.push(0);
        self.buf.push(RT_SCOPE_UNIVERSE);
        self.buf.extend_from_slice(&index.to_ne_bytes());
        self
    }

    /// Appends a `struct rtmsg` for an IPv4 unicast route.
    fn rtmsg(mut self, dst_len: u8) -> Self {
        self.buf.extend_from_slice(&[
            libc::AF_INET as u8,
            dst_len,
            0,
            0,
            RT_TABLE_MAIN,
            RTPROT_BOOT,
            RT_SCOPE_UNIVERSE,
            RTN_UNICAST,
        ]);
        self.buf.extend_from_slice(&0u32.to_ne_bytes());
        self
    }

    fn attr(&mut self, attr_type: u16, value: &[u8]) {
        push_attr(&mut self.buf, attr_type, value);
    }

    fn attr_str(&mut self, attr_type: u16, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.attr(attr_type, &bytes);
    }

    fn attr_u32(&mut self, attr_type: u16, value: u32) {
        self.attr(attr_type, &value.to_ne_bytes());
    }

    /// Opens a nested attribute and returns its offset for [`Request::end_nested`].
    fn begin_nested(&mut self, attr_type: u16) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 2]);
        self.buf.extend_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        start
    }

    fn end_nested(&mut self, start: usize) {
        patch_len_u16(&mut self.buf, start);
    }

    fn finish(mut self, seq: u32) -> Vec<u8> {
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf
    }
}

fn push_ifinfo(buf: &mut Vec<u8>, index: i32, flags: u32, change: u32) {
    buf.push(libc::AF_UNSPEC as u8);
    buf.push(0);
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&index.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&change.to_ne_bytes());
}

fn push_attr(buf: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    let len = NLA_HDR_LEN + value.len();
    buf.extend_from_slice(&u16::try_from(len).unwrap_or(u16::MAX).to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf.extend_from_slice(value);
    buf.resize(buf.len() + align4(len) - len, 0);
}

fn patch_len_u16(buf: &mut [u8], start: usize) {
    let len = u16::try_from(buf.len() - start).unwrap_or(u16::MAX);
    buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
}

/// A bound `NETLINK_ROUTE` socket.
#[derive(Debug)]
pub struct NetlinkHandle {
    fd: OwnedFd,
    seq: u32,
}

impl NetlinkHandle {
    /// Opens a netlink socket in the calling thread's network namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: raw is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: addr points to a valid sockaddr_nl of the advertised size.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, seq: 0 })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Sends one request and waits for its acknowledgement.
    fn execute(&mut self, request: Request) -> io::Result<()> {
        let seq = self.next_seq();
        let msg = request.finish(seq);

        // SAFETY: msg is a live buffer of msg.len() bytes.
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr().cast::<libc::c_void>(),
                msg.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut buf = [0u8; 4096];
        loop {
            // SAFETY: buf is a writable buffer of buf.len() bytes.
            let received = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            let Ok(len) = usize::try_from(received) else {
                return Err(io::Error::last_os_error());
            };
            if let Some(result) = parse_ack(&buf[..len], seq) {
                return result;
            }
        }
    }

    /// Creates a bridge device.
    ///
    /// # Errors
    ///
    /// Returns the kernel error, e.g. `EEXIST` if the name is taken.
    pub fn create_bridge(&mut self, name: &str) -> io::Result<()> {
        let mut req =
            Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL).ifinfo(0, 0, 0);
        req.attr_str(IFLA_IFNAME, name);
        let info = req.begin_nested(IFLA_LINKINFO);
        req.attr_str(IFLA_INFO_KIND, "bridge");
        req.end_nested(info);
        self.execute(req)
    }

    /// Creates a veth pair whose host end is enslaved to `master`.
    ///
    /// # Errors
    ///
    /// Returns the kernel error if either name is taken or `master` is gone.
    pub fn create_veth(
        &mut self,
        host_name: &str,
        peer_name: &str,
        peer_mac: Option<[u8; 6]>,
        master: u32,
    ) -> io::Result<()> {
        let mut req =
            Request::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL).ifinfo(0, 0, 0);
        req.attr_str(IFLA_IFNAME, host_name);
        req.attr_u32(IFLA_MASTER, master);

        let info = req.begin_nested(IFLA_LINKINFO);
        req.attr_str(IFLA_INFO_KIND, "veth");
        let data = req.begin_nested(IFLA_INFO_DATA);
        let peer = req.begin_nested(VETH_INFO_PEER);
        push_ifinfo(&mut req.buf, 0, 0, 0);
        req.attr_str(IFLA_IFNAME, peer_name);
        if let Some(mac) = peer_mac {
            req.attr(IFLA_ADDRESS, &mac);
        }
        req.end_nested(peer);
        req.end_nested(data);
        req.end_nested(info);

        self.execute(req)
    }

    /// Deletes a link.
    ///
    /// # Errors
    ///
    /// Returns the kernel error if the link does not exist.
    pub fn delete_link(&mut self, ifindex: u32) -> io::Result<()> {
        let req = Request::new(RTM_DELLINK, 0).ifinfo(as_index(ifindex), 0, 0);
        self.execute(req)
    }

    /// Brings a link up or down.
    ///
    /// # Errors
    ///
    /// Returns the kernel error if the link does not exist.
    pub fn set_link_up(&mut self, ifindex: u32, up: bool) -> io::Result<()> {
        let flags = if up { IFF_UP } else { 0 };
        let req = Request::new(RTM_NEWLINK, 0).ifinfo(as_index(ifindex), flags, IFF_UP);
        self.execute(req)
    }

    /// Moves a link into the network namespace behind `ns_fd`.
    ///
    /// # Errors
    ///
    /// Returns the kernel error if the move is refused.
    pub fn set_link_netns(&mut self, ifindex: u32, ns_fd: RawFd) -> io::Result<()> {
        let mut req = Request::new(RTM_NEWLINK, 0).ifinfo(as_index(ifindex), 0, 0);
        req.attr_u32(IFLA_NET_NS_FD, ns_fd.unsigned_abs());
        self.execute(req)
    }

    /// Assigns an IPv4 address with its prefix to a link.
    ///
    /// # Errors
    ///
    /// Returns the kernel error, e.g. `EEXIST` if already assigned.
    pub fn add_address(&mut self, ifindex: u32, address: Ipv4Network) -> io::Result<()> {
        let mut req = Request::new(RTM_NEWADDR, NLM_F_CREATE | NLM_F_EXCL)
            .ifaddr(address.prefix(), ifindex);
        let octets = address.ip().octets();
        req.attr(IFA_LOCAL, &octets);
        req.attr(IFA_ADDRESS, &octets);
        self.execute(req)
    }

    /// Installs a route in the main table.
    ///
    /// # Errors
    ///
    /// Returns the kernel error, e.g. `ENETUNREACH` for an unreachable gateway.
    pub fn add_route(&mut self, route: &Route) -> io::Result<()> {
        let mut req = Request::new(RTM_NEWROUTE, NLM_F_CREATE | NLM_F_EXCL)
            .rtmsg(route.destination.prefix());
        if route.destination.prefix() > 0 {
            req.attr(RTA_DST, &route.destination.network().octets());
        }
        if let Some(gateway) = route.gateway {
            req.attr(RTA_GATEWAY, &gateway.octets());
        }
        req.attr_u32(RTA_OIF, route.ifindex);
        self.execute(req)
    }

    /// Looks up an interface index by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no interface has that name.
    pub fn ifindex(&self, name: &str) -> io::Result<u32> {
        link_index(name)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("interface not found: {name}"))
        })
    }
}

/// Returns the index of interface `name` in the calling thread's namespace.
///
/// # Errors
///
/// Returns an error if `name` is not a valid interface name.
pub fn link_index(name: &str) -> io::Result<Option<u32>> {
    let c_name =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_name is a valid NUL-terminated string for the call's duration.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    Ok((index != 0).then_some(index))
}

/// Interface indexes are positive `c_int`s in the kernel ABI.
fn as_index(ifindex: u32) -> i32 {
    i32::try_from(ifindex).unwrap_or(i32::MAX)
}

/// Scans a receive buffer for the acknowledgement of `seq`.
///
/// Returns `None` when the buffer holds no message for `seq`.
fn parse_ack(buf: &[u8], seq: u32) -> Option<io::Result<()>> {
    let mut offset = 0;
    while offset + NLMSG_HDR_LEN <= buf.len() {
        let header = &buf[offset..];
        let len = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let msg_type = u16::from_ne_bytes([header[4], header[5]]);
        let msg_seq = u32::from_ne_bytes([header[8], header[9], header[10], header[11]]);
        if len < NLMSG_HDR_LEN || offset + len > buf.len() {
            return Some(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated netlink message",
            )));
        }
        if msg_type == NLMSG_ERROR && msg_seq == seq && len >= NLMSG_HDR_LEN + 4 {
            let code = i32::from_ne_bytes([header[16], header[17], header[18], header[19]]);
            return Some(if code == 0 {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(-code))
            });
        }
        offset += align4(len);
    }
    None
}
