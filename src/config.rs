//! Middleware and parser configuration.

use std::{
    env, fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use serde::{
    de::{self, IgnoredAny},
    Deserialize, Deserializer,
};
use serde_json::{Map, Value};
use tokio::io::AsyncWrite;

use crate::error::ConfigError;

/// Route intercepted when no `uri` is configured.
pub const DEFAULT_URI: &str = "/api/upload";

const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024; // 200 MiB
const DEFAULT_MAX_FIELDS: usize = 1000;
const DEFAULT_MAX_FIELDS_SIZE: u64 = 20 * 1024 * 1024; // 20 MiB

/// Full configuration of an [`Upload`](crate::Upload) middleware.
///
/// `uri` is consumed by the middleware, everything else is handed to the parser. The struct
/// deserializes from camelCase keys, so it can be loaded from JSON or any other serde format:
///
/// ```
/// use actix_upload::UploadConfig;
///
/// let config = UploadConfig::from_json(r#"{
///     "uri": "/v1/upload",
///     "keepExtensions": true,
///     "maxFileSize": 1048576
/// }"#).unwrap();
///
/// assert_eq!(config.uri(), "/v1/upload");
/// assert!(config.parser_options().keep_extensions_enabled());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    #[serde(default = "default_uri")]
    uri: String,

    // callbacks cannot be expressed in a config file; the keys are swallowed so they never reach
    // the parser's extra options
    #[serde(default, rename = "validator")]
    _validator: Option<IgnoredAny>,
    #[serde(default, rename = "response")]
    _response: Option<IgnoredAny>,

    #[serde(flatten)]
    parser: ParserOptions,
}

fn default_uri() -> String {
    DEFAULT_URI.to_owned()
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            uri: default_uri(),
            _validator: None,
            _response: None,
            parser: ParserOptions::default(),
        }
    }
}

impl UploadConfig {
    /// Constructs a configuration intercepting `uri` with default parser options.
    pub fn new(uri: impl Into<String>) -> Self {
        UploadConfig {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Deserializes a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns the intercepted route path.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Replaces the parser options.
    pub fn parser(mut self, options: ParserOptions) -> Self {
        self.parser = options;
        self
    }

    /// Returns the options forwarded to the parser.
    pub fn parser_options(&self) -> &ParserOptions {
        &self.parser
    }

    pub(crate) fn into_parts(self) -> (String, ParserOptions) {
        (self.uri, self.parser)
    }
}

/// Digest computed over every stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1, 40 hex characters.
    Sha1,
    /// SHA-256, 64 hex characters.
    Sha256,
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            _ => Err(ConfigError::HashAlgorithm(s.to_owned())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha1 => f.write_str("sha1"),
            HashAlgorithm::Sha256 => f.write_str("sha256"),
        }
    }
}

/// `hash` is either `false` or an algorithm name.
fn deserialize_hash<'de, D>(deserializer: D) -> Result<Option<HashAlgorithm>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flag(bool),
        Name(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        None | Some(Repr::Flag(false)) => Ok(None),
        Some(Repr::Flag(true)) => Err(de::Error::custom(
            "`hash` must be `false` or an algorithm name",
        )),
        Some(Repr::Name(name)) => name.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Sink receiving the bytes of one uploaded file.
pub type FileWriter = Box<dyn AsyncWrite + Unpin>;

/// Describes the file about to be written, passed to a [`WriteStreamHandler`].
#[derive(Debug, Clone, Copy)]
pub struct FileTarget<'a> {
    /// Form field name of the part.
    pub field: &'a str,

    /// The `filename` value of the part's content-disposition header.
    pub original_file_name: &'a str,

    /// Path the file would be stored at in the upload directory.
    pub path: &'a Path,
}

/// Factory of custom file sinks, replacing the default write to the upload directory.
#[derive(Clone)]
pub struct WriteStreamHandler(
    Arc<dyn Fn(FileTarget<'_>) -> io::Result<FileWriter> + Send + Sync>,
);

impl WriteStreamHandler {
    pub(crate) fn open(&self, target: FileTarget<'_>) -> io::Result<FileWriter> {
        (self.0)(target)
    }
}

impl fmt::Debug for WriteStreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStreamHandler").finish_non_exhaustive()
    }
}

/// Options forwarded verbatim to the multipart parser.
///
/// Known keys are typed; any other key is kept in an opaque map available through
/// [`extra`](Self::extra), so custom [`Parser`](crate::Parser) implementations can read options
/// the default parser does not know about.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParserOptions {
    pub(crate) encoding: String,
    pub(crate) upload_dir: PathBuf,
    pub(crate) keep_extensions: bool,
    pub(crate) allow_empty_files: bool,
    pub(crate) min_file_size: u64,
    pub(crate) max_file_size: u64,
    pub(crate) max_total_file_size: Option<u64>,
    pub(crate) max_fields: usize,
    pub(crate) max_fields_size: u64,
    #[serde(deserialize_with = "deserialize_hash")]
    pub(crate) hash: Option<HashAlgorithm>,
    pub(crate) multiples: bool,
    #[serde(skip)]
    pub(crate) file_write_stream_handler: Option<WriteStreamHandler>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            encoding: "utf-8".to_owned(),
            upload_dir: env::temp_dir(),
            keep_extensions: false,
            allow_empty_files: true,
            min_file_size: 1,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_file_size: None,
            max_fields: DEFAULT_MAX_FIELDS,
            max_fields_size: DEFAULT_MAX_FIELDS_SIZE,
            hash: None,
            multiples: false,
            file_write_stream_handler: None,
            extra: Map::new(),
        }
    }
}

impl ParserOptions {
    /// Sets the encoding label used to decode text fields. Defaults to `utf-8`.
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    /// Sets the directory stored files are written to. Defaults to the OS temp directory.
    pub fn upload_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.upload_dir = dir.as_ref().to_owned();
        self
    }

    /// Keeps the original file extension on stored file names.
    pub fn keep_extensions(mut self, keep: bool) -> Self {
        self.keep_extensions = keep;
        self
    }

    /// Accepts zero-byte files. On by default.
    pub fn allow_empty_files(mut self, allow: bool) -> Self {
        self.allow_empty_files = allow;
        self
    }

    /// Sets the minimum size of a non-empty file. Defaults to 1 byte.
    pub fn min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = bytes;
        self
    }

    /// Sets the maximum size of a single file. Defaults to 200 MiB.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the maximum combined size of all files of one request.
    ///
    /// Defaults to the value of `max_file_size`.
    pub fn max_total_file_size(mut self, bytes: u64) -> Self {
        self.max_total_file_size = Some(bytes);
        self
    }

    /// Sets the maximum number of text fields. `0` disables the limit. Defaults to 1000.
    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = count;
        self
    }

    /// Sets the maximum combined size of all text field values. Defaults to 20 MiB.
    pub fn max_fields_size(mut self, bytes: u64) -> Self {
        self.max_fields_size = bytes;
        self
    }

    /// Computes a hex encoded digest of each stored file.
    pub fn hash(mut self, algorithm: Option<HashAlgorithm>) -> Self {
        self.hash = algorithm;
        self
    }

    /// Collects repeated field names into lists instead of keeping the last value.
    pub fn multiples(mut self, multiples: bool) -> Self {
        self.multiples = multiples;
        self
    }

    /// Routes file bytes into sinks produced by `handler` instead of the upload directory.
    ///
    /// Stored file descriptors still report the path the file would have had.
    pub fn file_write_stream_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(FileTarget<'_>) -> io::Result<FileWriter> + Send + Sync + 'static,
    {
        self.file_write_stream_handler = Some(WriteStreamHandler(Arc::new(handler)));
        self
    }

    /// Adds an option the typed fields do not cover.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns an option the typed fields do not cover.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Returns all options the typed fields do not cover.
    pub fn extras(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Returns the directory stored files are written to.
    pub fn upload_dir_path(&self) -> &Path {
        &self.upload_dir
    }

    /// Returns whether stored file names keep the original extension.
    pub fn keep_extensions_enabled(&self) -> bool {
        self.keep_extensions
    }

    /// Returns the digest computed over stored files, if any.
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        self.hash
    }

    /// Effective limit on the combined size of all files of one request.
    pub(crate) fn total_file_limit(&self) -> u64 {
        self.max_total_file_size.unwrap_or(self.max_file_size)
    }
}
