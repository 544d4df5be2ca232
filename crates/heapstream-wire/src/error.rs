/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The packet header does not start with the SPEAD magic byte.
    #[error("invalid packet magic 0x{0:02x} (expected 0x53)")]
    InvalidMagic(u8),

    /// The packet declares a protocol version other than 4.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The packet uses pointer/address widths other than 64-40.
    #[error(
        "unsupported flavour (item pointer width {item_pointer_width}, \
         heap address width {heap_address_width})"
    )]
    UnsupportedFlavour {
        item_pointer_width: u8,
        heap_address_width: u8,
    },

    /// The buffer ends before the packet does.
    #[error("truncated packet ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// A mandatory packet field is absent.
    #[error("packet is missing {0}")]
    MissingField(&'static str),

    /// A packet-level field was sent in addressed mode.
    #[error("{0} must be an immediate item")]
    NotImmediate(&'static str),

    /// A value does not fit the 40-bit immediate/address field.
    #[error("{field} value {value} exceeds the 40-bit address space")]
    ValueOutOfRange { field: &'static str, value: u64 },

    /// The packet exceeds the configured maximum size.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// More item pointers than the 16-bit item count can describe.
    #[error("too many item pointers ({0}, max 65535)")]
    TooManyPointers(usize),

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, WireError>;
