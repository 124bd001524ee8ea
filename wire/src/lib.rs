//! Fixed-width binary framing for the onion-routing connect protocol.
//!
//! Every message here has a known size up front, so none of them carry a
//! length prefix: the reader always knows exactly how many bytes to pull off
//! the wire next. This mirrors the `ActOne`/`ActTwo`/`ActThree` framing style
//! used by handshake codecs elsewhere in this stack, just applied to the
//! connect-request / crypto-record / target-header messages instead of a
//! Noise handshake.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("hotness {hotness} exceeds level {level}")]
    HotnessExceedsLevel { hotness: u8, level: u8 },
    #[error("target address length {0} is not 4 or 16")]
    BadAddrLen(u8),
    #[error("status byte {0:#04x} is neither 0x00 nor 0xff")]
    BadStatus(u8),
}

/// Width in bytes of a single group element in the chosen ECDH group
/// (X25519, see DESIGN.md Open Question i).
pub const GROUP_ELEMENT_SIZE: usize = 32;

/// `u8 hotness || u8 level`. `hotness` is the 1-indexed position of the relay
/// processing this request; `level` is the chain length fixed by the
/// originator. The invariant `hotness <= level` is checked in `read`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConnectRequest {
    pub hotness: u8,
    pub level: u8,
}

impl ConnectRequest {
    pub const SIZE: usize = 2;

    pub fn originate(level: u8) -> Self {
        ConnectRequest { hotness: 1, level }
    }

    /// `true` once this request has reached the last hop and must be
    /// terminated with a real TCP connect rather than forwarded.
    pub fn is_exit(&self) -> bool {
        self.hotness == self.level
    }

    /// Returns the header as it should be forwarded to the next hop, with
    /// `hotness` incremented by exactly one.
    pub fn advance(&self) -> Self {
        ConnectRequest { hotness: self.hotness + 1, level: self.level }
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let hotness = r.read_u8()?;
        let level = r.read_u8()?;
        if hotness > level {
            return Err(WireError::HotnessExceedsLevel { hotness, level });
        }
        Ok(ConnectRequest { hotness, level })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        w.write_u8(self.hotness)?;
        w.write_u8(self.level)?;
        Ok(())
    }
}

/// Three parallel group elements exchanged during one pass of the scrambling
/// handshake. Slot 0 carries the client-facing DH, slot 1 the server-facing
/// DH, slot 2 an end-to-end share that intermediates only re-blind.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct CryptoRecord {
    pub slots: [[u8; GROUP_ELEMENT_SIZE]; 3],
}

impl std::fmt::Debug for CryptoRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoRecord")
            .field("slots", &self.slots.map(hex::encode))
            .finish()
    }
}

impl CryptoRecord {
    pub const SIZE: usize = GROUP_ELEMENT_SIZE * 3;

    pub fn zero() -> Self {
        CryptoRecord { slots: [[0u8; GROUP_ELEMENT_SIZE]; 3] }
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let mut rec = Self::zero();
        for slot in rec.slots.iter_mut() {
            r.read_exact(slot)?;
        }
        Ok(rec)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        for slot in &self.slots {
            w.write_all(slot)?;
        }
        Ok(())
    }
}

/// `u16 port || u8 addr_len || [16]u8 addr`, sent by the originator through
/// the fully established encrypted channel to name the exit's TCP target.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TargetHeader {
    pub port: u16,
    pub addr_len: u8,
    pub addr: [u8; 16],
}

impl TargetHeader {
    pub const SIZE: usize = 2 + 1 + 16;

    pub fn from_socket_addr(addr: std::net::SocketAddr) -> Self {
        let mut buf = [0u8; 16];
        let addr_len = match addr.ip() {
            std::net::IpAddr::V4(v4) => {
                buf[..4].copy_from_slice(&v4.octets());
                4
            }
            std::net::IpAddr::V6(v6) => {
                buf.copy_from_slice(&v6.octets());
                16
            }
        };
        TargetHeader { port: addr.port(), addr_len, addr: buf }
    }

    pub fn ip(&self) -> Result<std::net::IpAddr, WireError> {
        match self.addr_len {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                Ok(std::net::IpAddr::from(octets))
            }
            16 => Ok(std::net::IpAddr::from(self.addr)),
            other => Err(WireError::BadAddrLen(other)),
        }
    }

    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, WireError> {
        Ok(std::net::SocketAddr::new(self.ip()?, self.port))
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let port = r.read_u16::<BigEndian>()?;
        let addr_len = r.read_u8()?;
        let mut addr = [0u8; 16];
        r.read_exact(&mut addr)?;
        Ok(TargetHeader { port, addr_len, addr })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        w.write_u16::<BigEndian>(self.port)?;
        w.write_u8(self.addr_len)?;
        w.write_all(&self.addr)?;
        Ok(())
    }
}

/// Exit-to-originator single byte after receiving a `TargetHeader`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusByte {
    Ok,
    Fail,
}

impl StatusByte {
    const OK: u8 = 0x00;
    const FAIL: u8 = 0xff;

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        match r.read_u8()? {
            Self::OK => Ok(StatusByte::Ok),
            Self::FAIL => Ok(StatusByte::Fail),
            other => Err(WireError::BadStatus(other)),
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        let byte = match self {
            StatusByte::Ok => Self::OK,
            StatusByte::Fail => Self::FAIL,
        };
        w.write_u8(byte)?;
        Ok(())
    }
}

/// `u8 len || [16]u8 ip` response to the overlay-resolve request.
/// `len == 0` is NXDOMAIN, `len == 200` is a network error, `len in {4,16}`
/// carries the resolved address in the following bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResolveResponse {
    NotFound,
    NetworkError,
    Found(std::net::IpAddr),
}

impl ResolveResponse {
    const NXDOMAIN: u8 = 0;
    const NETWORK_ERROR: u8 = 200;

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let len = r.read_u8()?;
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf)?;
        match len {
            Self::NXDOMAIN => Ok(ResolveResponse::NotFound),
            Self::NETWORK_ERROR => Ok(ResolveResponse::NetworkError),
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&buf[..4]);
                Ok(ResolveResponse::Found(std::net::IpAddr::from(octets)))
            }
            16 => Ok(ResolveResponse::Found(std::net::IpAddr::from(buf))),
            other => Err(WireError::BadAddrLen(other)),
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        let mut buf = [0u8; 16];
        let len: u8 = match self {
            ResolveResponse::NotFound => Self::NXDOMAIN,
            ResolveResponse::NetworkError => Self::NETWORK_ERROR,
            ResolveResponse::Found(std::net::IpAddr::V4(v4)) => {
                buf[..4].copy_from_slice(&v4.octets());
                4
            }
            ResolveResponse::Found(std::net::IpAddr::V6(v6)) => {
                buf.copy_from_slice(&v6.octets());
                16
            }
        };
        w.write_u8(len)?;
        w.write_all(&buf)?;
        Ok(())
    }
}

/// `u8 len || [u8; len]` hostname, sent by the originator over the already
/// established encrypted duplex on a resolve circuit, symmetric to how
/// `TargetHeader` is sent on a connect circuit. The distilled protocol only
/// specifies the exit's `ResolveResponse`; this is the matching request the
/// exit must read before it can produce one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HostnameQuery {
    pub name: String,
}

impl HostnameQuery {
    pub const MAX_LEN: usize = 255;

    pub fn read<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let len = r.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        let name = String::from_utf8(buf).map_err(|e| WireError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        Ok(HostnameQuery { name })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(Self::MAX_LEN) as u8;
        w.write_u8(len)?;
        w.write_all(&bytes[..len as usize])?;
        Ok(())
    }
}

/// Minimal hex encoding so `CryptoRecord`'s `Debug` impl doesn't pull in a
/// dependency for sixteen lines of logging convenience.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        for b in bytes.as_ref() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_round_trip() {
        let req = ConnectRequest { hotness: 2, level: 3 };
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();
        assert_eq!(buf.len(), ConnectRequest::SIZE);
        let back = ConnectRequest::read(&mut &buf[..]).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn connect_request_rejects_hotness_above_level() {
        let mut buf = Vec::new();
        buf.push(4u8); // hotness
        buf.push(3u8); // level
        let err = ConnectRequest::read(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, WireError::HotnessExceedsLevel { hotness: 4, level: 3 }));
    }

    #[test]
    fn connect_request_advance_increments_by_one() {
        let req = ConnectRequest::originate(3);
        assert_eq!(req.hotness, 1);
        let next = req.advance();
        assert_eq!(next.hotness, 2);
        assert_eq!(next.level, 3);
        assert!(!next.is_exit());
        assert!(next.advance().is_exit());
    }

    #[test]
    fn crypto_record_round_trip() {
        let mut rec = CryptoRecord::zero();
        for (i, slot) in rec.slots.iter_mut().enumerate() {
            slot[0] = i as u8 + 1;
        }
        let mut buf = Vec::new();
        rec.write(&mut buf).unwrap();
        assert_eq!(buf.len(), CryptoRecord::SIZE);
        let back = CryptoRecord::read(&mut &buf[..]).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn target_header_v4_round_trip() {
        let addr: std::net::SocketAddr = "127.0.0.1:7".parse().unwrap();
        let hdr = TargetHeader::from_socket_addr(addr);
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(buf.len(), TargetHeader::SIZE);
        let back = TargetHeader::read(&mut &buf[..]).unwrap();
        assert_eq!(hdr, back);
        assert_eq!(back.socket_addr().unwrap(), addr);
    }

    #[test]
    fn target_header_rejects_bad_addr_len() {
        let hdr = TargetHeader { port: 80, addr_len: 7, addr: [0; 16] };
        assert!(matches!(hdr.ip(), Err(WireError::BadAddrLen(7))));
    }

    #[test]
    fn status_byte_round_trip() {
        for status in [StatusByte::Ok, StatusByte::Fail] {
            let mut buf = Vec::new();
            status.write(&mut buf).unwrap();
            assert_eq!(StatusByte::read(&mut &buf[..]).unwrap(), status);
        }
    }

    #[test]
    fn status_byte_rejects_unknown_value() {
        let mut buf = vec![0x42u8];
        assert!(matches!(StatusByte::read(&mut &buf[..]), Err(WireError::BadStatus(0x42))));
        buf.clear();
    }

    #[test]
    fn hostname_query_round_trip() {
        let query = HostnameQuery { name: "localhost".to_string() };
        let mut buf = Vec::new();
        query.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 1 + "localhost".len());
        assert_eq!(HostnameQuery::read(&mut &buf[..]).unwrap(), query);
    }

    #[test]
    fn resolve_response_round_trip() {
        let cases = [
            ResolveResponse::NotFound,
            ResolveResponse::NetworkError,
            ResolveResponse::Found("127.0.0.1".parse().unwrap()),
            ResolveResponse::Found("::1".parse().unwrap()),
        ];
        for case in cases {
            let mut buf = Vec::new();
            case.write(&mut buf).unwrap();
            assert_eq!(buf.len(), 1 + 16);
            assert_eq!(ResolveResponse::read(&mut &buf[..]).unwrap(), case);
        }
    }
}
