#![forbid(unsafe_code)]
//! Error types for the XFS reader.
//!
//! # Error Taxonomy
//!
//! Two layers:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `xfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `XfsError` | `xfs-error` (this crate) | Errors surfaced to the facade's callers |
//!
//! `xfs-error` does not depend on `xfs-types`; the `ParseError` → `XfsError`
//! conversion lives in `xfs-core`, which knows whether the failure happened
//! during mount (→ `CorruptSuperblock`) or while reading live metadata
//! (→ `Corruption` with a block, or `Format` with inode context).
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `CorruptSuperblock` | `EUCLEAN` |
//! | `Corruption` | `EIO` |
//! | `InvalidInodeNumber` | `EINVAL` |
//! | `Format` | `EINVAL` |
//! | `UnsupportedFeature` | `EOPNOTSUPP` |
//! | `NotFound` | `ENOENT` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `IsDirectory` | `EISDIR` |
//! | `NameTooLong` | `ENAMETOOLONG` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XfsError {
    /// Short read or device failure, surfaced verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic or invalid geometry in the superblock. Fatal to mount.
    #[error("corrupt superblock: {0}")]
    CorruptSuperblock(String),

    /// Inode number decodes to an address outside the declared AG range.
    #[error("invalid inode number {ino}: {detail}")]
    InvalidInodeNumber { ino: u64, detail: String },

    /// Unrecognised fork or directory-encoding tag, or structurally invalid
    /// metadata that is not tied to a specific block.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Live metadata at a known device block failed to decode.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The image uses an incompatible feature this reader does not decode.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Name lookup miss. Not an error in the corruption sense.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("name too long")]
    NameTooLong,
}

impl XfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// Exhaustive on purpose: a new variant does not compile until it has an errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::CorruptSuperblock(_) => libc::EUCLEAN,
            Self::Corruption { .. } => libc::EIO,
            Self::InvalidInodeNumber { .. } | Self::Format(_) => libc::EINVAL,
            Self::UnsupportedFeature(_) => libc::EOPNOTSUPP,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NameTooLong => libc::ENAMETOOLONG,
        }
    }

    /// Whether this is an ordinary lookup miss rather than a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias using `XfsError`.
pub type Result<T> = std::result::Result<T, XfsError>;
