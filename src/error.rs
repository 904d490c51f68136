//! Error types produced while configuring the middleware and while parsing uploads.

use std::{io, path::PathBuf};

use actix_multipart::MultipartError;
use actix_web::{http::StatusCode, ResponseError};
use derive_more::{Display, Error, From};

/// A set of errors that can occur while parsing an upload.
///
/// These never abort the middleware. They are delivered to the response callback inside
/// [`UploadResult`](crate::UploadResult), which decides what the client sees.
#[derive(Debug, Display, Error, From)]
#[non_exhaustive]
pub enum UploadError {
    /// The payload is not a well-formed `multipart/form-data` stream.
    #[display("{_0}")]
    #[from]
    Multipart(MultipartError),

    /// More text fields than `maxFields` were submitted.
    #[display("maxFields ({limit}) exceeded")]
    MaxFields {
        /// Configured `maxFields`.
        limit: usize,
    },

    /// The text field values add up to more than `maxFieldsSize` bytes.
    #[display("maxFieldsSize ({limit} bytes) exceeded")]
    MaxFieldsSize {
        /// Configured `maxFieldsSize`.
        limit: u64,
    },

    /// A single file is larger than `maxFileSize` bytes.
    #[display("maxFileSize ({limit} bytes) exceeded by file in field `{field}`")]
    MaxFileSize {
        /// Name of the offending field.
        field: String,
        /// Configured `maxFileSize`.
        limit: u64,
    },

    /// All files of the request add up to more than `maxTotalFileSize` bytes.
    #[display("maxTotalFileSize ({limit} bytes) exceeded")]
    MaxTotalFileSize {
        /// Effective `maxTotalFileSize`.
        limit: u64,
    },

    /// An empty file was submitted while `allowEmptyFiles` is off.
    #[display("empty file in field `{field}` is not allowed")]
    EmptyFile {
        /// Name of the offending field.
        field: String,
    },

    /// A non-empty file is smaller than `minFileSize` bytes.
    #[display("file in field `{field}` is smaller than minFileSize ({limit} bytes)")]
    MinFileSize {
        /// Name of the offending field.
        field: String,
        /// Configured `minFileSize`.
        limit: u64,
    },

    /// Writing a file to the upload directory failed.
    #[display("file I/O error: {_0}")]
    #[from]
    FileIo(io::Error),
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Multipart(err) => err.status_code(),
            UploadError::MaxFields { .. }
            | UploadError::MaxFieldsSize { .. }
            | UploadError::MaxFileSize { .. }
            | UploadError::MaxTotalFileSize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::EmptyFile { .. } | UploadError::MinFileSize { .. } => {
                StatusCode::BAD_REQUEST
            }
            UploadError::FileIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised while building the middleware or its parser.
#[derive(Debug, Display, Error, From)]
#[non_exhaustive]
pub enum ConfigError {
    /// The `encoding` option is not a known encoding label.
    #[display("unknown encoding label `{_0}`")]
    Encoding(#[error(not(source))] String),

    /// The `hash` option names an unsupported digest.
    #[display("unsupported hash algorithm `{_0}`, expected `sha1` or `sha256`")]
    HashAlgorithm(#[error(not(source))] String),

    /// The upload directory cannot be inspected.
    #[display("upload directory `{}` is not accessible: {source}", path.display())]
    UploadDir {
        /// Configured directory.
        path: PathBuf,
        /// Error returned when reading its metadata.
        source: io::Error,
    },

    /// The upload directory path exists but is not a directory.
    #[display("upload directory `{}` is not a directory", _0.display())]
    NotADirectory(#[error(not(source))] PathBuf),

    /// `minFileSize` is larger than `maxFileSize`.
    #[display("minFileSize ({min}) is larger than maxFileSize ({max})")]
    FileSizeRange {
        /// Configured `minFileSize`.
        min: u64,
        /// Configured `maxFileSize`.
        max: u64,
    },

    /// `maxFileSize` is larger than `maxTotalFileSize`.
    #[display("maxFileSize ({max_file_size}) is larger than maxTotalFileSize ({max_total})")]
    TotalFileSize {
        /// Configured `maxFileSize`.
        max_file_size: u64,
        /// Configured `maxTotalFileSize`.
        max_total: u64,
    },

    /// The configuration could not be deserialized.
    #[display("invalid upload configuration: {_0}")]
    #[from]
    Deserialize(serde_json::Error),
}
