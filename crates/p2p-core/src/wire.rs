//! On-wire message format — the UDP datagram layout used by every peer.
//!
//! Every datagram is `id (4, BE) | type (1) | body_length (2, BE) | body | [signature (64)]`.
//! Changing this layout breaks interoperability with any peer still running
//! the previous version; there is no version negotiation.

// ── Message types ────────────────────────────────────────────────────────────

/// The fixed, closed set of message type codes. Unknown codes on the wire
/// decode to `None` from [`MessageType::from_code`] rather than an error —
/// the receive loop turns that into an `Error` reply, not a dropped datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0,
    Hello = 1,
    RootRequest = 2,
    DatumRequest = 3,
    NatTraversalRequest = 4,
    NatTraversalRelay = 5,
    KeyExchange = 20,
    Ok = 128,
    Error = 129,
    HelloReply = 130,
    RootReply = 131,
    Datum = 132,
    NoDatum = 133,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        use MessageType::*;
        Some(match code {
            0 => Ping,
            1 => Hello,
            2 => RootRequest,
            3 => DatumRequest,
            4 => NatTraversalRequest,
            5 => NatTraversalRelay,
            20 => KeyExchange,
            128 => Ok,
            129 => Error,
            130 => HelloReply,
            131 => RootReply,
            132 => Datum,
            133 => NoDatum,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether this message type must carry a trailing 64-byte signature.
    /// Verifying fails closed: an unsigned datagram of a type listed here
    /// is never accepted as valid.
    pub fn is_signed(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            Hello | NatTraversalRequest | NatTraversalRelay | KeyExchange | HelloReply
                | RootReply | NoDatum
        )
    }
}

/// Bit positions within the 4-byte extension bitmap carried by Hello/HelloReply.
pub mod extension {
    pub const NAT: u32 = 0x1;
    pub const ENCRYPTION: u32 = 0x2;
}

const HEADER_LEN: usize = 7;
const SIGNATURE_LEN: usize = 64;

/// A decoded wire message. `signature` is `None` when the datagram carried
/// fewer than `SIGNATURE_LEN` trailing bytes after the declared body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub ty: MessageType,
    pub body: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
}

impl Message {
    pub fn new(id: u32, ty: MessageType, body: Vec<u8>) -> Self {
        Message {
            id,
            ty,
            body,
            signature: None,
        }
    }

    /// The exact byte range a signature covers: `id | type | length | body`.
    /// Must be computed before a signature is attached.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.push(self.ty.code());
        buf.extend_from_slice(&(self.body.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Encode to the full datagram, including the signature suffix if present.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.signable_bytes();
        if let Some(sig) = &self.signature {
            buf.extend_from_slice(sig);
        }
        buf
    }

    /// Decode a datagram. Fewer than 7 header bytes, or a body that would
    /// overrun the buffer, is an error. Bytes beyond the declared signature
    /// (or beyond the body, if no 64-byte suffix is present) are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                have: data.len(),
                need: HEADER_LEN,
            });
        }

        let id = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let code = data[4];
        let body_len = u16::from_be_bytes(data[5..7].try_into().unwrap()) as usize;

        if data.len() < HEADER_LEN + body_len {
            return Err(WireError::Truncated {
                have: data.len(),
                need: HEADER_LEN + body_len,
            });
        }

        let ty = MessageType::from_code(code).ok_or(WireError::UnknownType(code))?;
        let body = data[HEADER_LEN..HEADER_LEN + body_len].to_vec();

        let sig_start = HEADER_LEN + body_len;
        let signature = if data.len() >= sig_start + SIGNATURE_LEN {
            let mut sig = [0u8; SIGNATURE_LEN];
            sig.copy_from_slice(&data[sig_start..sig_start + SIGNATURE_LEN]);
            Some(sig)
        } else {
            None
        };

        Ok(Message {
            id,
            ty,
            body,
            signature,
        })
    }
}

// ── Endpoint encoding (NAT traversal bodies) ─────────────────────────────────

/// A socket endpoint as carried in NatTraversalRequest/Relay bodies:
/// 6 bytes for IPv4 (4-byte address + 2-byte BE port), 18 for IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    V4 {
        addr: [u8; 4],
        port: u16,
    },
    V6 {
        addr: [u8; 16],
        port: u16,
    },
}

impl Endpoint {
    pub fn encode(self) -> Vec<u8> {
        match self {
            Endpoint::V4 { addr, port } => {
                let mut buf = Vec::with_capacity(6);
                buf.extend_from_slice(&addr);
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
            Endpoint::V6 { addr, port } => {
                let mut buf = Vec::with_capacity(18);
                buf.extend_from_slice(&addr);
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        match data.len() {
            6 => {
                let mut addr = [0u8; 4];
                addr.copy_from_slice(&data[0..4]);
                let port = u16::from_be_bytes(data[4..6].try_into().unwrap());
                Ok(Endpoint::V4 { addr, port })
            }
            18 => {
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&data[0..16]);
                let port = u16::from_be_bytes(data[16..18].try_into().unwrap());
                Ok(Endpoint::V6 { addr, port })
            }
            other => Err(WireError::BadEndpointLength(other)),
        }
    }

    pub fn to_socket_addr(self) -> std::net::SocketAddr {
        match self {
            Endpoint::V4 { addr, port } => {
                std::net::SocketAddr::from((std::net::Ipv4Addr::from(addr), port))
            }
            Endpoint::V6 { addr, port } => {
                std::net::SocketAddr::from((std::net::Ipv6Addr::from(addr), port))
            }
        }
    }

    pub fn from_socket_addr(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(a) => Endpoint::V4 {
                addr: a.ip().octets(),
                port: a.port(),
            },
            std::net::SocketAddr::V6(a) => Endpoint::V6 {
                addr: a.ip().octets(),
                port: a.port(),
            },
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram truncated: have {have} bytes, need at least {need}")]
    Truncated { have: usize, need: usize },

    #[error("unknown message type code: {0}")]
    UnknownType(u8),

    #[error("invalid endpoint encoding: {0} bytes (expected 6 or 18)")]
    BadEndpointLength(usize),

    #[error("message of type {0:?} requires a signature but none was present")]
    MissingSignature(MessageType),
}
