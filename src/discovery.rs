//! UDP broadcast discovery of a simulator peer (spec.md §4.2).

use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::DISCOVERY_PORT;
use crate::error::Error;

/// Shape of the broadcast datagram's JSON body.
#[derive(Debug, Deserialize)]
struct Broadcast {
    #[serde(rename = "Addresses")]
    addresses: Vec<String>,
}

/// Bind the discovery port and wait for a broadcast datagram naming a
/// simulator. Returns the first entry under `Addresses` that parses as
/// an IPv4 dotted-quad. Closes the socket on return (it's dropped).
pub fn discover(deadline: Duration) -> Result<Ipv4Addr, Error> {
    let socket = UdpSocket::bind(("0.0.0.0", DISCOVERY_PORT))?;
    socket.set_read_timeout(Some(deadline))?;

    let start = Instant::now();
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.checked_sub(start.elapsed()).unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Err(Error::DiscoveryTimeout);
        }
        // Tighten the timeout on every retry so repeated malformed
        // datagrams can't extend the deadline past what the caller asked
        // for.
        let _ = socket.set_read_timeout(Some(remaining));

        let (n, _from) = match socket.recv_from(&mut buf) {
            Ok(result) => result,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(Error::DiscoveryTimeout);
            }
            Err(e) => return Err(Error::TransportError(e)),
        };

        let text = match std::str::from_utf8(&buf[..n]) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("discovery: ignoring non-UTF8 broadcast datagram");
                continue;
            }
        };
        let broadcast: Broadcast = match serde_json::from_str(text) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("discovery: ignoring unparseable broadcast datagram: {e}");
                continue;
            }
        };
        if let Some(addr) = broadcast
            .addresses
            .iter()
            .find_map(|s| s.parse::<Ipv4Addr>().ok())
        {
            return Ok(addr);
        }
        log::warn!("discovery: broadcast carried no IPv4 address, waiting for another");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_ipv4_address() {
        let json = r#"{"Addresses": ["not-an-ip", "192.168.1.42", "10.0.0.1"]}"#;
        let broadcast: Broadcast = serde_json::from_str(json).unwrap();
        let found = broadcast
            .addresses
            .iter()
            .find_map(|s| s.parse::<Ipv4Addr>().ok());
        assert_eq!(found, Some(Ipv4Addr::new(192, 168, 1, 42)));
    }
}
