//! KHM format constants.

/// File signature, including the trailing NUL.
pub const KHM_SIGNATURE: [u8; 4] = *b"KHM\0";

/// Format version written by this crate. Files with any other version are rejected.
pub const KHM_VERSION: u32 = 101;

/// Width of every fixed-length name field, in bytes.
pub const KHM_MAX_OBJECT_NAME: usize = 48;

/// Skin influences stored per vertex.
pub const KHM_MAX_BONE_INFLUENCES: usize = 4;

/// Bone budget of the game's skinning shader. Informational; not enforced by the codec.
pub const KHM_MAX_BONES: usize = 64;
