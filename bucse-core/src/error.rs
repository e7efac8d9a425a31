use std::path::PathBuf;

/// The core error taxonomy (spec §7). Operations convert these into
/// POSIX-style negative error codes at the FUSE boundary; everything below
/// that boundary deals in `BucseError`.
#[derive(Debug, thiserror::Error)]
pub enum BucseError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("is a directory: {0}")]
    IsDir(PathBuf),

    #[error("not a directory: {0}")]
    NotDir(PathBuf),

    #[error("already exists: {0}")]
    Exists(PathBuf),

    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),

    #[error("repository is mounted read-only")]
    ReadOnly,

    #[error("operation not permitted on {0}")]
    AccessDenied(PathBuf),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("block {name} has length {actual}, expected at least {expected}")]
    BlockTooShort {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed action record: {0}")]
    MalformedAction(String),

    #[error("storage object missing: {0}")]
    MissingBlock(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Store(String),

    #[error("control blob too large: {0} bytes")]
    ControlBlobTooLarge(usize),

    #[error("action file too large: {0} bytes")]
    ActionFileTooLarge(usize),

    #[error("storage name exceeds {max} bytes")]
    StorageNameTooLong { max: usize },

    #[error("out of memory")]
    OutOfMemory,

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, BucseError>;

impl BucseError {
    /// Maps a core error onto the POSIX-style negative errno the kernel
    /// bridge (fuser) expects (spec §7: "Operations layer converts to
    /// POSIX-style negative error codes").
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            BucseError::NotFound(_) => libc::ENOENT,
            BucseError::IsDir(_) => libc::EISDIR,
            BucseError::NotDir(_) => libc::ENOTDIR,
            BucseError::Exists(_) => libc::EEXIST,
            BucseError::NotEmpty(_) => libc::ENOTEMPTY,
            BucseError::ReadOnly => libc::EROFS,
            BucseError::AccessDenied(_) => libc::EACCES,
            BucseError::DecryptionFailed
            | BucseError::BlockTooShort { .. }
            | BucseError::MalformedAction(_)
            | BucseError::MissingBlock(_) => libc::EIO,
            BucseError::Io(_) | BucseError::Store(_) => libc::EIO,
            BucseError::ControlBlobTooLarge(_)
            | BucseError::ActionFileTooLarge(_)
            | BucseError::StorageNameTooLong { .. } => libc::EFBIG,
            BucseError::OutOfMemory => libc::ENOMEM,
            BucseError::Unsupported(_) => libc::ENOSYS,
        }
    }
}
