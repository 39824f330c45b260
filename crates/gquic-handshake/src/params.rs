//! Negotiation of non-crypto connection parameters carried in the hellos.

use gquic_core::{Perspective, QuicError, Tag, TagMap, Version};
use parking_lot::Mutex;
use std::time::Duration;

const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_INCOMING_STREAMS: u32 = 100;
const CONNECTION_FLOW_CONTROL_WINDOW: u32 = 1_572_864;
const STREAM_FLOW_CONTROL_WINDOW: u32 = 32_768;

#[derive(Debug, Clone)]
struct NegotiatedParams {
    idle_timeout: Duration,
    peer_max_incoming_streams: u32,
    peer_connection_window: u32,
    peer_stream_window: u32,
    truncate_connection_id: bool,
}

impl Default for NegotiatedParams {
    fn default() -> Self {
        Self {
            idle_timeout: MAX_IDLE_TIMEOUT,
            peer_max_incoming_streams: MAX_INCOMING_STREAMS,
            peer_connection_window: CONNECTION_FLOW_CONTROL_WINDOW,
            peer_stream_window: STREAM_FLOW_CONTROL_WINDOW,
            truncate_connection_id: false,
        }
    }
}

/// Consumes the parameter tags of a peer hello and produces our own.
///
/// The crypto handshake treats this as a collaborator: it hands over the
/// parsed CHLO tag map and splices `hello_map` into the SHLO.
pub struct ConnectionParametersManager {
    perspective: Perspective,
    version: Version,
    params: Mutex<NegotiatedParams>,
}

impl ConnectionParametersManager {
    pub fn new(perspective: Perspective, version: Version) -> Self {
        Self {
            perspective,
            version,
            params: Mutex::new(NegotiatedParams::default()),
        }
    }

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Absorb the parameter tags of a peer hello. Unknown tags are ignored;
    /// known tags with malformed values are an error.
    pub fn set_from_map(&self, tags: &TagMap) -> Result<(), QuicError> {
        let mut params = self.params.lock();
        if let Some(value) = tags.get(&Tag::ICSL) {
            let requested = Duration::from_secs(read_u32(value)? as u64);
            params.idle_timeout = requested.min(MAX_IDLE_TIMEOUT);
        }
        if let Some(value) = tags.get(&Tag::MIDS) {
            params.peer_max_incoming_streams = read_u32(value)?;
        }
        if let Some(value) = tags.get(&Tag::CFCW) {
            params.peer_connection_window = read_u32(value)?;
        }
        if let Some(value) = tags.get(&Tag::SFCW) {
            params.peer_stream_window = read_u32(value)?;
        }
        if let Some(value) = tags.get(&Tag::TCID) {
            params.truncate_connection_id = read_u32(value)? == 0;
        }
        Ok(())
    }

    /// The parameter tags our own hello carries.
    pub fn hello_map(&self) -> TagMap {
        let mut tags = TagMap::new();
        tags.insert(
            Tag::ICSL,
            (MAX_IDLE_TIMEOUT.as_secs() as u32).to_le_bytes().to_vec(),
        );
        tags.insert(Tag::MIDS, MAX_INCOMING_STREAMS.to_le_bytes().to_vec());
        tags.insert(
            Tag::CFCW,
            CONNECTION_FLOW_CONTROL_WINDOW.to_le_bytes().to_vec(),
        );
        tags.insert(Tag::SFCW, STREAM_FLOW_CONTROL_WINDOW.to_le_bytes().to_vec());
        tags
    }

    pub fn idle_timeout(&self) -> Duration {
        self.params.lock().idle_timeout
    }

    pub fn peer_max_incoming_streams(&self) -> u32 {
        self.params.lock().peer_max_incoming_streams
    }

    pub fn peer_connection_window(&self) -> u32 {
        self.params.lock().peer_connection_window
    }

    pub fn peer_stream_window(&self) -> u32 {
        self.params.lock().peer_stream_window
    }

    pub fn truncate_connection_id(&self) -> bool {
        self.params.lock().truncate_connection_id
    }
}

fn read_u32(value: &[u8]) -> Result<u32, QuicError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| QuicError::InvalidCryptoMessageParameter("malformed Tag value"))?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::SUPPORTED_VERSIONS;

    fn manager() -> ConnectionParametersManager {
        ConnectionParametersManager::new(Perspective::Server, SUPPORTED_VERSIONS[0])
    }

    #[test]
    fn starts_from_defaults() {
        let manager = manager();
        assert_eq!(manager.idle_timeout(), Duration::from_secs(30));
        assert_eq!(manager.peer_max_incoming_streams(), 100);
        assert!(!manager.truncate_connection_id());
    }

    #[test]
    fn clamps_the_requested_idle_timeout() {
        let manager = manager();
        let mut tags = TagMap::new();
        tags.insert(Tag::ICSL, 300u32.to_le_bytes().to_vec());
        manager.set_from_map(&tags).expect("set");
        assert_eq!(manager.idle_timeout(), Duration::from_secs(30));

        tags.insert(Tag::ICSL, 10u32.to_le_bytes().to_vec());
        manager.set_from_map(&tags).expect("set");
        assert_eq!(manager.idle_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn records_peer_windows_and_streams() {
        let manager = manager();
        let mut tags = TagMap::new();
        tags.insert(Tag::MIDS, 7u32.to_le_bytes().to_vec());
        tags.insert(Tag::CFCW, 65_536u32.to_le_bytes().to_vec());
        tags.insert(Tag::SFCW, 16_384u32.to_le_bytes().to_vec());
        tags.insert(Tag::TCID, 0u32.to_le_bytes().to_vec());
        manager.set_from_map(&tags).expect("set");
        assert_eq!(manager.peer_max_incoming_streams(), 7);
        assert_eq!(manager.peer_connection_window(), 65_536);
        assert_eq!(manager.peer_stream_window(), 16_384);
        assert!(manager.truncate_connection_id());
    }

    #[test]
    fn rejects_malformed_fixed_width_values() {
        let manager = manager();
        let mut tags = TagMap::new();
        tags.insert(Tag::ICSL, vec![1, 2]);
        assert_eq!(
            manager.set_from_map(&tags),
            Err(QuicError::InvalidCryptoMessageParameter("malformed Tag value"))
        );
    }

    #[test]
    fn ignores_unknown_tags() {
        let manager = manager();
        let mut tags = TagMap::new();
        tags.insert(Tag::COPT, b"NSTP".to_vec());
        tags.insert(Tag::PAD, vec![0; 8]);
        manager.set_from_map(&tags).expect("set");
    }

    #[test]
    fn hello_map_carries_our_parameters() {
        let tags = manager().hello_map();
        assert_eq!(tags.get(&Tag::ICSL).expect("icsl"), &30u32.to_le_bytes());
        assert_eq!(tags.get(&Tag::MIDS).expect("mids"), &100u32.to_le_bytes());
        assert_eq!(
            tags.get(&Tag::CFCW).expect("cfcw"),
            &1_572_864u32.to_le_bytes()
        );
        assert_eq!(
            tags.get(&Tag::SFCW).expect("sfcw"),
            &32_768u32.to_le_bytes()
        );
    }
}
