//! Version numbers and their 4-byte wire tags.
//!
//! A version `N` is spelled `Q0NN` on the wire ('Q' plus three ASCII digits,
//! interpreted little-endian). The supported list is ordered with the highest
//! preference last; the SHLO advertises the whole list so a client can detect
//! a downgrade after the fact.

/// A gQUIC version number.
pub type Version = u32;

pub const VERSION_34: Version = 34;
pub const VERSION_35: Version = 35;
pub const VERSION_36: Version = 36;

/// Versions this implementation speaks, highest preference last.
pub const SUPPORTED_VERSIONS: &[Version] = &[VERSION_34, VERSION_35, VERSION_36];

pub fn is_supported_version(version: Version) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Encode a version number as its wire tag ('Q' followed by three digits).
pub fn version_number_to_tag(version: Version) -> u32 {
    let hundreds = (version / 100) % 10;
    let tens = (version / 10) % 10;
    let ones = version % 10;
    u32::from_le_bytes([
        b'Q',
        b'0' + hundreds as u8,
        b'0' + tens as u8,
        b'0' + ones as u8,
    ])
}

/// Decode a wire tag back into a version number. Tags that do not follow the
/// 'Q' + digits shape decode to an unsupported number, which callers treat as
/// an unknown version rather than an error.
pub fn version_tag_to_number(tag: u32) -> Version {
    let bytes = tag.to_le_bytes();
    let mut version: Version = 0;
    for digit in &bytes[1..4] {
        version = version * 10 + digit.wrapping_sub(b'0') as Version;
    }
    if bytes[0] != b'Q' {
        return 0;
    }
    version
}

/// The concatenated little-endian tags of every supported version, as carried
/// in the SHLO `VER` value.
pub fn supported_versions_as_tags() -> Vec<u8> {
    let mut out = Vec::with_capacity(SUPPORTED_VERSIONS.len() * 4);
    for &version in SUPPORTED_VERSIONS {
        out.extend_from_slice(&version_number_to_tag(version).to_le_bytes());
    }
    out
}
