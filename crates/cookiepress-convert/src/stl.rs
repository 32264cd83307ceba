pub const BINARY_STL_HEADER_LEN: usize = 80;
pub const EMPTY_BINARY_STL_LEN: usize = BINARY_STL_HEADER_LEN + 4;

/// Builds a structurally valid binary STL with zero triangles: an 80-byte
/// header carrying `header_text` (truncated, zero-padded) followed by a
/// little-endian u32 triangle count of zero. Always exactly 84 bytes.
pub fn empty_binary_stl(header_text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(EMPTY_BINARY_STL_LEN);

    let mut header = [0u8; BINARY_STL_HEADER_LEN];
    let text = header_text.as_bytes();
    let len = text.len().min(BINARY_STL_HEADER_LEN);
    header[..len].copy_from_slice(&text[..len]);
    bytes.extend_from_slice(&header);

    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes
}
