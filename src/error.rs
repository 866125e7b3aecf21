//! Error handling for the sort utility

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Custom error type for sort operations
#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Permission denied: {file}")]
    PermissionDenied { file: String },

    #[error("No such file or directory: {file}")]
    FileNotFound { file: String },

    #[error("Is a directory: {file}")]
    IsDirectory { file: String },

    #[error("Invalid key specification: {spec}")]
    InvalidKeySpec { spec: String },

    #[error("Invalid field separator: {sep}")]
    InvalidFieldSeparator { sep: String },

    #[error("Invalid buffer size: {size}")]
    InvalidBufferSize { size: String },

    #[error("Conflicting sort options: {message}")]
    ConflictingOptions { message: String },

    #[error("{option}: {message}")]
    InvalidOption { option: String, message: String },

    #[error("Unsupported encoding: {label}")]
    UnsupportedEncoding { label: String },

    #[error("Cannot read random source {}: {source}", path.display())]
    RandomSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{file}:{line}: invalid {encoding} byte sequence")]
    Decode {
        file: String,
        line: u64,
        encoding: &'static str,
    },

    #[error("UTF-8 encoding error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("Cannot represent output line in {encoding}")]
    Encode { encoding: &'static str },

    #[error("Corrupt temporary chunk: {message}")]
    Serialization { message: String },

    #[error("Compress program {program} failed: {message}")]
    Compression { program: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SortError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        crate::SORT_FAILURE
    }

    /// True for errors raised while the configuration was being built
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SortError::InvalidKeySpec { .. }
                | SortError::InvalidFieldSeparator { .. }
                | SortError::InvalidBufferSize { .. }
                | SortError::ConflictingOptions { .. }
                | SortError::InvalidOption { .. }
                | SortError::UnsupportedEncoding { .. }
        )
    }

    /// Create a permission denied error
    pub fn permission_denied(file: &str) -> Self {
        SortError::PermissionDenied {
            file: file.to_string(),
        }
    }

    /// Create a file not found error
    pub fn file_not_found(file: &str) -> Self {
        SortError::FileNotFound {
            file: file.to_string(),
        }
    }

    /// Create an is directory error
    pub fn is_directory(file: &str) -> Self {
        SortError::IsDirectory {
            file: file.to_string(),
        }
    }

    /// Create an invalid key spec error
    pub fn invalid_key_spec(spec: &str) -> Self {
        SortError::InvalidKeySpec {
            spec: spec.to_string(),
        }
    }

    /// Create an invalid field separator error
    pub fn invalid_field_separator(sep: &str) -> Self {
        SortError::InvalidFieldSeparator {
            sep: sep.to_string(),
        }
    }

    /// Create an invalid buffer size error
    pub fn invalid_buffer_size(size: &str) -> Self {
        SortError::InvalidBufferSize {
            size: size.to_string(),
        }
    }

    /// Create a conflicting options error
    pub fn conflicting_options(message: &str) -> Self {
        SortError::ConflictingOptions {
            message: message.to_string(),
        }
    }

    pub fn invalid_option(option: &str, message: &str) -> Self {
        SortError::InvalidOption {
            option: option.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a chunk corruption error
    pub fn serialization(message: &str) -> Self {
        SortError::Serialization {
            message: message.to_string(),
        }
    }

    pub fn compression(program: &str, message: &str) -> Self {
        SortError::Compression {
            program: program.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: &str) -> Self {
        SortError::Internal {
            message: message.to_string(),
        }
    }
}

/// Result type for sort operations
pub type SortResult<T> = Result<T, SortError>;

/// Context trait for adding context to errors
pub trait SortContext<T> {
    fn with_file_context(self, filename: &str) -> SortResult<T>;
}

fn io_with_file(io_err: io::Error, filename: &str) -> SortError {
    match io_err.kind() {
        io::ErrorKind::PermissionDenied => SortError::permission_denied(filename),
        io::ErrorKind::NotFound => SortError::file_not_found(filename),
        _ if std::path::Path::new(filename).is_dir() => SortError::is_directory(filename),
        _ => SortError::Io(io::Error::new(
            io_err.kind(),
            format!("{}: {}", filename, io_err),
        )),
    }
}

impl<T> SortContext<T> for SortResult<T> {
    fn with_file_context(self, filename: &str) -> SortResult<T> {
        self.map_err(|err| match err {
            SortError::Io(io_err) => io_with_file(io_err, filename),
            other => other,
        })
    }
}

impl<T> SortContext<T> for Result<T, io::Error> {
    fn with_file_context(self, filename: &str) -> SortResult<T> {
        self.map_err(|io_err| io_with_file(io_err, filename))
    }
}
