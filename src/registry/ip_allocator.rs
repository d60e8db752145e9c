//! Client IP allocator
//!
//! A free-list allocator over the assignable host range `[2, 254]` of the
//! region's `/24` subnet (`.1` is reserved for the server side of the
//! interface). This supersedes the source behavior described in spec §9
//! ("IP allocator race") of merely incrementing-and-wrapping a cursor,
//! which permits double-assignment under churn: here, occupancy is
//! tracked explicitly so two concurrently active tunnels can never share
//! an address.

use crate::error::{BrokerError, Result};
use std::net::Ipv4Addr;

const FIRST_HOST: u8 = 2;
const LAST_HOST: u8 = 254;

/// Allocates and releases the last octet of client addresses within a
/// single `/24` subnet.
pub struct IpAllocator {
    base: [u8; 3],
    free: Vec<u8>,
    next_scan: u8,
}

impl IpAllocator {
    /// Build an allocator over `subnet_cidr` (e.g. `10.100.0.0/24`).
    /// Only the `/24` case is supported, matching spec §3's default and
    /// the "no IPv6" non-goal.
    pub fn new(subnet_cidr: &str) -> Result<Self> {
        let (addr_part, prefix_part) = subnet_cidr
            .split_once('/')
            .ok_or_else(|| BrokerError::Config(format!("invalid subnet CIDR: {subnet_cidr}")))?;

        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| BrokerError::Config(format!("invalid subnet prefix: {prefix_part}")))?;
        if prefix != 24 {
            return Err(BrokerError::Config(format!(
                "only /24 subnets are supported, got /{prefix}"
            )));
        }

        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| BrokerError::Config(format!("invalid subnet address: {addr_part}")))?;
        let octets = addr.octets();

        Ok(Self {
            base: [octets[0], octets[1], octets[2]],
            free: Vec::new(),
            next_scan: FIRST_HOST,
        })
    }

    /// Allocate the next free address. Returns `ResourceExhausted` once
    /// all 253 assignable addresses are held.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        if let Some(last) = self.free.pop() {
            return Ok(self.addr_for(last));
        }

        if self.next_scan > LAST_HOST {
            return Err(BrokerError::ResourceExhausted(
                "tunnel subnet exhausted: no addresses available in [2, 254]".to_string(),
            ));
        }

        let host = self.next_scan;
        self.next_scan += 1;
        Ok(self.addr_for(host))
    }

    /// Release a previously allocated address for reuse.
    pub fn release(&mut self, addr: Ipv4Addr) {
        let octets = addr.octets();
        if octets[0] == self.base[0] && octets[1] == self.base[1] && octets[2] == self.base[2] {
            let host = octets[3];
            if (FIRST_HOST..=LAST_HOST).contains(&host) {
                self.free.push(host);
            }
        }
    }

    fn addr_for(&self, host: u8) -> Ipv4Addr {
        Ipv4Addr::new(self.base[0], self.base[1], self.base[2], host)
    }
}
