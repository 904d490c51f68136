//! Collects a `multipart/form-data` stream into text fields and stored files.

use std::{io, path::Path, rc::Rc};

use actix_multipart::{Field, Multipart};
use actix_web::{dev::Payload, http::header::HeaderMap, web::BytesMut};
use encoding_rs::Encoding;
use futures_core::future::LocalBoxFuture;
use futures_util::TryStreamExt as _;
use rand::distr::{Alphanumeric, SampleString as _};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWriteExt as _;

use crate::{
    config::{FileTarget, FileWriter, HashAlgorithm, ParserOptions},
    error::{ConfigError, UploadError},
    form::{insert_value, Fields, Files, FormValue, UploadedFile},
};

const FILE_NAME_LEN: usize = 32;

/// Output of a [`Parser`] run over one request body.
///
/// `fields` and `files` hold whatever was collected before `error` occurred, if any.
#[derive(Debug, Default)]
pub struct ParsedForm {
    /// First error that stopped parsing.
    pub error: Option<UploadError>,
    /// Text fields collected.
    pub fields: Fields,
    /// Files stored.
    pub files: Files,
}

/// A multipart form parser driven by the [`Upload`](crate::Upload) middleware.
///
/// One parser is built per middleware and shared by every intercepted request, so
/// implementations should only hold configuration.
pub trait Parser {
    /// Options this parser was constructed with.
    fn options(&self) -> &ParserOptions;

    /// Consumes a request body.
    ///
    /// Failures are reported through [`ParsedForm::error`], never by panicking or dropping the
    /// fields collected so far.
    fn parse(&self, headers: &HeaderMap, payload: Payload) -> LocalBoxFuture<'static, ParsedForm>;
}

/// Default parser: decodes the stream with `actix-multipart` and writes each file part into the
/// upload directory.
#[derive(Debug, Clone)]
pub struct FormParser {
    inner: Rc<Inner>,
}

#[derive(Debug)]
struct Inner {
    options: ParserOptions,
    encoding: &'static Encoding,
}

impl FormParser {
    /// Validates `options` and constructs a parser.
    pub fn new(options: ParserOptions) -> Result<Self, ConfigError> {
        let encoding = Encoding::for_label(options.encoding.as_bytes())
            .ok_or_else(|| ConfigError::Encoding(options.encoding.clone()))?;

        let meta = std::fs::metadata(&options.upload_dir).map_err(|source| {
            ConfigError::UploadDir {
                path: options.upload_dir.clone(),
                source,
            }
        })?;

        if !meta.is_dir() {
            return Err(ConfigError::NotADirectory(options.upload_dir.clone()));
        }

        if options.min_file_size > options.max_file_size {
            return Err(ConfigError::FileSizeRange {
                min: options.min_file_size,
                max: options.max_file_size,
            });
        }

        if options.max_file_size > options.total_file_limit() {
            return Err(ConfigError::TotalFileSize {
                max_file_size: options.max_file_size,
                max_total: options.total_file_limit(),
            });
        }

        for key in options.extra.keys() {
            log::debug!("option `{}` is not used by the default form parser", key);
        }

        Ok(FormParser {
            inner: Rc::new(Inner { options, encoding }),
        })
    }
}

impl Parser for FormParser {
    fn options(&self) -> &ParserOptions {
        &self.inner.options
    }

    fn parse(&self, headers: &HeaderMap, payload: Payload) -> LocalBoxFuture<'static, ParsedForm> {
        let inner = Rc::clone(&self.inner);
        let multipart = Multipart::new(headers, payload);

        Box::pin(async move {
            let mut collector = Collector::new(&inner);
            let error = collector.consume(multipart).await.err();

            log::debug!(
                "parsed upload: {} field(s), {} file field(s), error: {:?}",
                collector.fields.len(),
                collector.files.len(),
                error
            );

            ParsedForm {
                error,
                fields: collector.fields,
                files: collector.files,
            }
        })
    }
}

/// Per-request parse state.
struct Collector<'a> {
    options: &'a ParserOptions,
    encoding: &'static Encoding,
    fields: Fields,
    files: Files,
    field_count: usize,
    fields_size: u64,
    total_file_size: u64,
}

impl<'a> Collector<'a> {
    fn new(inner: &'a Inner) -> Self {
        Collector {
            options: &inner.options,
            encoding: inner.encoding,
            fields: Fields::new(),
            files: Files::new(),
            field_count: 0,
            fields_size: 0,
            total_file_size: 0,
        }
    }

    async fn consume(&mut self, mut multipart: Multipart) -> Result<(), UploadError> {
        while let Some(mut field) = multipart.try_next().await? {
            let name = field.name().unwrap_or_default().to_owned();
            let file_name = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(ToOwned::to_owned);

            match file_name {
                None => self.read_text(name, &mut field).await?,

                // browsers send an empty filename for file inputs left blank
                Some(file_name) if file_name.is_empty() => {
                    log::trace!("skipping file field `{}` without filename", name);
                    while field.try_next().await?.is_some() {}
                }

                Some(file_name) => self.read_file(name, file_name, &mut field).await?,
            }
        }

        Ok(())
    }

    async fn read_text(&mut self, name: String, field: &mut Field) -> Result<(), UploadError> {
        let max_fields = self.options.max_fields;
        if max_fields != 0 && self.field_count >= max_fields {
            return Err(UploadError::MaxFields { limit: max_fields });
        }
        self.field_count += 1;

        let mut buf = BytesMut::new();

        while let Some(chunk) = field.try_next().await? {
            self.fields_size += chunk.len() as u64;

            if self.fields_size > self.options.max_fields_size {
                return Err(UploadError::MaxFieldsSize {
                    limit: self.options.max_fields_size,
                });
            }

            buf.extend_from_slice(&chunk);
        }

        let (value, _) = self.encoding.decode_without_bom_handling(&buf);
        log::trace!("field `{}`: {} byte(s)", name, buf.len());

        insert_value(
            &mut self.fields,
            name,
            value.into_owned(),
            self.options.multiples,
        );

        Ok(())
    }

    async fn read_file(
        &mut self,
        name: String,
        original_file_name: String,
        field: &mut Field,
    ) -> Result<(), UploadError> {
        let new_file_name = self.new_file_name(&original_file_name);
        let path = self.options.upload_dir.join(&new_file_name);

        let target = FileTarget {
            field: &name,
            original_file_name: &original_file_name,
            path: &path,
        };

        let mut sink: FileWriter = match self.options.file_write_stream_handler {
            Some(ref handler) => handler.open(target)?,
            None => Box::new(tokio::fs::File::create(&path).await?),
        };

        let mut hasher = self.options.hash.map(FileHasher::new);

        let written = self
            .write_file(&name, field, &mut sink, hasher.as_mut())
            .await;

        // close the file before it is inspected or removed
        drop(sink);

        let size = match written.and_then(|size| self.check_file_size(&name, size)) {
            Ok(size) => size,
            Err(err) => {
                if self.options.file_write_stream_handler.is_none() {
                    remove_stored(&path, "partially written").await;
                }
                return Err(err);
            }
        };

        log::trace!(
            "file field `{}`: stored {} byte(s) at {}",
            name,
            size,
            path.display()
        );

        let file = UploadedFile {
            path,
            new_file_name,
            original_file_name: Some(original_file_name),
            content_type: field.content_type().cloned(),
            size,
            hash: hasher.map(FileHasher::finish),
        };

        // last value wins, drop the file it replaces
        if !self.options.multiples && self.options.file_write_stream_handler.is_none() {
            if let Some(replaced) = self.files.get(&name).and_then(FormValue::first) {
                remove_stored(&replaced.path, "replaced").await;
            }
        }

        insert_value(&mut self.files, name, file, self.options.multiples);

        Ok(())
    }

    async fn write_file(
        &mut self,
        name: &str,
        field: &mut Field,
        sink: &mut FileWriter,
        mut hasher: Option<&mut FileHasher>,
    ) -> Result<u64, UploadError> {
        let mut size = 0;

        while let Some(chunk) = field.try_next().await? {
            size += chunk.len() as u64;
            self.total_file_size += chunk.len() as u64;

            if size > self.options.max_file_size {
                return Err(UploadError::MaxFileSize {
                    field: name.to_owned(),
                    limit: self.options.max_file_size,
                });
            }

            if self.total_file_size > self.options.total_file_limit() {
                return Err(UploadError::MaxTotalFileSize {
                    limit: self.options.total_file_limit(),
                });
            }

            if let Some(hasher) = hasher.as_deref_mut() {
                hasher.update(&chunk);
            }

            sink.write_all(&chunk).await?;
        }

        sink.flush().await?;
        sink.shutdown().await?;

        Ok(size)
    }

    fn check_file_size(&self, name: &str, size: u64) -> Result<u64, UploadError> {
        if size == 0 {
            if !self.options.allow_empty_files {
                return Err(UploadError::EmptyFile {
                    field: name.to_owned(),
                });
            }
        } else if size < self.options.min_file_size {
            return Err(UploadError::MinFileSize {
                field: name.to_owned(),
                limit: self.options.min_file_size,
            });
        }

        Ok(size)
    }

    fn new_file_name(&self, original_file_name: &str) -> String {
        let mut name = Alphanumeric.sample_string(&mut rand::rng(), FILE_NAME_LEN);

        if self.options.keep_extensions {
            if let Some(ext) = extension(original_file_name) {
                name.push('.');
                name.push_str(&ext);
            }
        }

        name
    }
}

/// Extension of a client supplied file name, truncated at the first non-alphanumeric character.
fn extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    let ext = ext
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>();

    (!ext.is_empty()).then_some(ext)
}

async fn remove_stored(path: &Path, kind: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("removed {} upload {}", kind, path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!(
            "failed to remove {} upload {}: {}",
            kind,
            path.display(),
            err
        ),
    }
}

enum FileHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl FileHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => FileHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => FileHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            FileHasher::Sha1(hasher) => hasher.update(data),
            FileHasher::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            FileHasher::Sha1(hasher) => hex::encode(hasher.finalize()),
            FileHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}
