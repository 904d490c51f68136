//! Route-scoped multipart upload middleware for Actix Web.
//!
//! [`Upload`] intercepts requests to one configured path, parses their `multipart/form-data` body
//! into text fields and files stored in an upload directory, optionally runs a validator, and hands
//! the result to a response callback. Every other request passes through untouched.
//!
//! ```no_run
//! use actix_upload::{ParserOptions, Upload, UploadConfig, UploadedForm};
//! use actix_web::{web, App, HttpResponse, HttpServer};
//!
//! # #[actix_rt::main]
//! # async fn main() -> std::io::Result<()> {
//! HttpServer::new(|| {
//!     let config = UploadConfig::new("/v1/upload")
//!         .parser(ParserOptions::default().keep_extensions(true).max_file_size(10 << 20));
//!
//!     App::new()
//!         .wrap(Upload::new(config).expect("invalid upload configuration"))
//!         // without a response callback, uploads continue to the route handler
//!         .route(
//!             "/v1/upload",
//!             web::post().to(|form: UploadedForm| async move {
//!                 HttpResponse::Ok().body(format!("{} file field(s)", form.files.len()))
//!             }),
//!         )
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await
//! # }
//! ```
//!
//! # Configuration
//! [`UploadConfig`] holds the intercepted `uri` (default `/api/upload`) and the [`ParserOptions`]
//! handed to the parser. Both deserialize from camelCase keys; keys the default parser does not
//! know are kept and forwarded as [extra options](ParserOptions::extra).
//!
//! # Validation
//! When a [validator](Upload::validator) resolves to `false`, every stored file of the request is
//! deleted before the request continues to the next service. Deletion failures are logged with
//! the `log` crate and never fail the request.

#![deny(rust_2018_idioms, nonstandard_style)]
#![warn(future_incompatible, missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod config;
mod error;
mod form;
mod middleware;
mod parser;
pub mod test;

pub use self::{
    config::{
        FileTarget, FileWriter, HashAlgorithm, ParserOptions, UploadConfig, WriteStreamHandler,
        DEFAULT_URI,
    },
    error::{ConfigError, UploadError},
    form::{Fields, Files, FormValue, UploadResult, UploadedFile, UploadedForm},
    middleware::{Upload, UploadMiddleware},
    parser::{FormParser, ParsedForm, Parser},
};
