use thiserror::Error;

#[derive(Error, Debug)]
pub enum YfsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no such file, directory, inode or block")]
    NotFound,
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("path or component name too long")]
    NameTooLong,
    #[error("{0:?} already exists")]
    AlreadyExists(String),
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a regular file")]
    NotAFile,
    #[error("not a symbolic link")]
    NotASymlink,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("offset {0} is outside of the file")]
    InvalidOffset(i64),
    #[error("too many levels of symbolic links")]
    SymlinkLoop,
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("corrupted file system: {0}")]
    Corrupted(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, YfsError>;

/// The error half of a reply. Unlike [`YfsError`] it is `Copy` and carries no
/// payload so it can cross the transport as a single integer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not found")]
    NotFound,
    #[error("invalid name")]
    InvalidName,
    #[error("name too long")]
    NameTooLong,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a regular file")]
    NotAFile,
    #[error("not a symbolic link")]
    NotASymlink,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("no space")]
    NoSpace,
    #[error("invalid offset")]
    InvalidOffset,
    #[error("symlink loop")]
    SymlinkLoop,
    #[error("transport failure")]
    TransportFailure,
    #[error("corrupted file system")]
    Corrupted,
    #[error("i/o error")]
    Io,
}

impl ErrorCode {
    /// Wire value of the error. Always negative so it can share the result field
    /// with non-negative counts and inode numbers.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InvalidArgument => -1,
            ErrorCode::NotFound => -2,
            ErrorCode::InvalidName => -3,
            ErrorCode::NameTooLong => -4,
            ErrorCode::AlreadyExists => -5,
            ErrorCode::NotADirectory => -6,
            ErrorCode::IsADirectory => -7,
            ErrorCode::NotAFile => -8,
            ErrorCode::NotASymlink => -9,
            ErrorCode::DirectoryNotEmpty => -10,
            ErrorCode::NoSpace => -11,
            ErrorCode::InvalidOffset => -12,
            ErrorCode::SymlinkLoop => -13,
            ErrorCode::TransportFailure => -14,
            ErrorCode::Corrupted => -15,
            ErrorCode::Io => -16,
        }
    }
}

impl From<&YfsError> for ErrorCode {
    fn from(err: &YfsError) -> Self {
        match err {
            YfsError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            YfsError::NotFound => ErrorCode::NotFound,
            YfsError::InvalidName(_) => ErrorCode::InvalidName,
            YfsError::NameTooLong => ErrorCode::NameTooLong,
            YfsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            YfsError::NotADirectory => ErrorCode::NotADirectory,
            YfsError::IsADirectory => ErrorCode::IsADirectory,
            YfsError::NotAFile => ErrorCode::NotAFile,
            YfsError::NotASymlink => ErrorCode::NotASymlink,
            YfsError::DirectoryNotEmpty => ErrorCode::DirectoryNotEmpty,
            YfsError::NoSpace => ErrorCode::NoSpace,
            YfsError::InvalidOffset(_) => ErrorCode::InvalidOffset,
            YfsError::SymlinkLoop => ErrorCode::SymlinkLoop,
            YfsError::TransportFailure(_) => ErrorCode::TransportFailure,
            YfsError::Corrupted(_) => ErrorCode::Corrupted,
            YfsError::Io(_) => ErrorCode::Io,
        }
    }
}
