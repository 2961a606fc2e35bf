/// Errors from encoding or decoding SysEx traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Output buffer cannot hold the encoded data.
    BufferTooSmall,
    /// Payload exceeds the maximum message length.
    PayloadTooLarge,
    /// Missing start/end marker, wrong prefix, or truncated frame.
    Framing,
    /// A data byte that should carry a single nibble is above 0x0F.
    Nibble,
    /// Chunk header is inconsistent (zero total, index out of range, total changed).
    Header,
    /// Reassembled payload does not match its checksum.
    Checksum,
    /// Every chunk index is marked but the final chunk length is unknown.
    Incomplete,
    /// Frame layout cannot hold any payload.
    Layout,
}
