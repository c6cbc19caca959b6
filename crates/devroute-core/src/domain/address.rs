//! Stream addresses for the host ↔ guest control channel.
//!
//! In production the two sides talk over **vsock**, the hypervisor's
//! host-to-VM socket family, addressed by a context id (CID) and a port.
//! For development and tests the same protocol runs over plain TCP.
//!
//! Textual form (used on the command line and in config files):
//!
//! ```text
//! vsock:101:7000      connect to CID 101, port 7000
//! vsock:any:7000      listen on port 7000 for any CID
//! tcp:127.0.0.1:7000  TCP socket address
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

/// Wildcard CID used when listening (`VMADDR_CID_ANY`).
pub const VSOCK_CID_ANY: u32 = u32::MAX;

/// Default vsock port the guest listens on.
pub const DEFAULT_VSOCK_PORT: u32 = 7000;

/// Where a stream endpoint binds or connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAddress {
    /// A vsock `(cid, port)` pair.
    Vsock { cid: u32, port: u32 },
    /// A TCP socket address.
    Tcp(SocketAddr),
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid stream address '{input}': {reason}")]
pub struct AddressParseError {
    input: String,
    reason: &'static str,
}

impl StreamAddress {
    /// Vsock address that listens on `port` for any peer CID.
    pub const fn vsock_any(port: u32) -> Self {
        Self::Vsock {
            cid: VSOCK_CID_ANY,
            port,
        }
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vsock { cid, port } if *cid == VSOCK_CID_ANY => write!(f, "vsock:any:{port}"),
            Self::Vsock { cid, port } => write!(f, "vsock:{cid}:{port}"),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

impl FromStr for StreamAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| AddressParseError {
            input: s.to_string(),
            reason,
        };

        if let Some(rest) = s.strip_prefix("tcp:") {
            return rest
                .parse()
                .map(Self::Tcp)
                .map_err(|_| fail("expected tcp:<ip>:<port>"));
        }

        if let Some(rest) = s.strip_prefix("vsock:") {
            let (cid, port) = rest
                .split_once(':')
                .ok_or_else(|| fail("expected vsock:<cid>:<port>"))?;
            let cid = if cid.eq_ignore_ascii_case("any") {
                VSOCK_CID_ANY
            } else {
                cid.parse().map_err(|_| fail("cid must be a number or 'any'"))?
            };
            let port = port.parse().map_err(|_| fail("port must be a number"))?;
            return Ok(Self::Vsock { cid, port });
        }

        Err(fail("expected a 'vsock:' or 'tcp:' prefix"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vsock_with_numeric_cid() {
        let addr: StreamAddress = "vsock:101:7000".parse().unwrap();
        assert_eq!(addr, StreamAddress::Vsock { cid: 101, port: 7000 });
    }

    #[test]
    fn test_parse_vsock_any() {
        let addr: StreamAddress = "vsock:any:7000".parse().unwrap();
        assert_eq!(addr, StreamAddress::vsock_any(7000));
    }

    #[test]
    fn test_parse_tcp() {
        let addr: StreamAddress = "tcp:127.0.0.1:7000".parse().unwrap();
        assert_eq!(addr, StreamAddress::Tcp("127.0.0.1:7000".parse().unwrap()));
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        assert!("127.0.0.1:7000".parse::<StreamAddress>().is_err());
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!("vsock:3:seven".parse::<StreamAddress>().is_err());
    }

    #[test]
    fn test_display_matches_parse_input() {
        for text in ["vsock:any:7000", "vsock:3:1234", "tcp:10.0.0.5:9000"] {
            let addr: StreamAddress = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }
}
