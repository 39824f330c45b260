use std::fmt;

/// Minimum acceptable length for a client hello, enforced before a REJ is
/// produced so tiny packets cannot be amplified into large responses.
pub const CLIENT_HELLO_MINIMUM_SIZE: usize = 1024;

/// Packet number as carried in the public packet header.
pub type PacketNumber = u64;

/// Connection identifier negotiated for the lifetime of a connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({:#x})", self.0)
    }
}

/// Identifies which end of the connection a component is operating as.
/// Key schedules are directional, so every derivation takes a perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

/// Encryption levels in ladder order. The ordering is meaningful: a
/// connection only ever moves upward through these levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncryptionLevel {
    Unspecified,
    Unencrypted,
    Secure,
    ForwardSecure,
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionLevel::Unspecified => "unspecified",
            EncryptionLevel::Unencrypted => "unencrypted",
            EncryptionLevel::Secure => "secure",
            EncryptionLevel::ForwardSecure => "forward-secure",
        };
        f.write_str(name)
    }
}
