use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not a KHM file: bad signature {found:02x?}")]
    BadSignature { found: [u8; 4] },

    #[error("unsupported KHM version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("unexpected EOF while reading {context} at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof {
        context: &'static str,
        offset: usize,
        needed: usize,
    },

    #[error("animation starts at {start_time}s; only animations starting at 0 are supported")]
    NonZeroAnimationStart { start_time: f32 },

    #[error("invalid name at offset {offset}: {message}")]
    InvalidName { offset: usize, message: String },

    #[error("name '{name}' is {len} bytes; at most {max} bytes fit a name field")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("invalid {context} count {value}")]
    InvalidCount { context: &'static str, value: i64 },

    #[error("{context} count {count} exceeds the format limit of {max}")]
    CountOverflow {
        context: &'static str,
        count: usize,
        max: usize,
    },

    #[error("unknown collision type {kind}")]
    UnknownCollisionType { kind: u32 },

    #[error("collision type {kind} has no defined payload")]
    UnsupportedCollisionType { kind: u32 },

    #[error("mesh has {count} unique vertices; 16-bit indices address at most 65536")]
    TooManyVertices { count: usize },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "json")]
    #[error("failed to (de)serialize KHM JSON dump: {message}")]
    Json { message: String },
}
