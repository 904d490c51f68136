//! For middleware documentation, see [`Upload`].

use std::{fmt, future::Future, io, rc::Rc};

use actix_service::{Service, Transform};
use actix_utils::future::{ready, Ready};
use actix_web::{
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    Error, HttpMessage as _, HttpRequest, HttpResponse, Responder,
};
use futures_core::future::LocalBoxFuture;
use futures_util::future::FutureExt as _;

use crate::{
    config::UploadConfig,
    error::ConfigError,
    form::{iter_files, Files, UploadResult, UploadedForm},
    parser::{FormParser, Parser},
};

type ValidatorFn = dyn Fn(HttpRequest) -> LocalBoxFuture<'static, Result<bool, Error>>;

type ResponseFn =
    dyn Fn(HttpRequest, UploadResult) -> LocalBoxFuture<'static, Result<HttpResponse, Error>>;

/// Middleware intercepting multipart uploads on a single route.
///
/// Requests whose path differs from the configured `uri` go straight to the next service. For the
/// intercepted route the body is parsed, the fields and files are attached to the request as
/// [`UploadedForm`], and then:
///
/// - when a validator is set and resolves to `false`, the stored files are deleted and the request
///   continues to the next service without calling the response callback;
/// - when a response callback is set, its output becomes the response;
/// - otherwise the request continues to the next service.
///
/// Parse errors do not fail the request. They are handed to the response callback in
/// [`UploadResult::error`].
///
/// # Examples
/// ```
/// use actix_upload::{ParserOptions, Upload, UploadConfig};
/// use actix_web::{App, HttpResponse};
///
/// let config = UploadConfig::new("/v1/upload")
///     .parser(ParserOptions::default().keep_extensions(true));
///
/// let upload = Upload::new(config)
///     .unwrap()
///     .validator(|req| async move { Ok(req.headers().contains_key("x-upload-token")) })
///     .response(|_req, result| async move {
///         Ok(match result.error {
///             Some(err) => HttpResponse::BadRequest().body(err.to_string()),
///             None => HttpResponse::Ok().body(format!("{} file(s)", result.files.len())),
///         })
///     });
///
/// let app = App::new().wrap(upload);
/// ```
pub struct Upload<P = FormParser> {
    uri: Rc<str>,
    parser: Rc<P>,
    validator: Option<Rc<ValidatorFn>>,
    response: Option<Rc<ResponseFn>>,
}

impl<P: fmt::Debug> fmt::Debug for Upload<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("uri", &self.uri)
            .field("parser", &self.parser)
            .field("validator", &self.validator.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

impl Upload {
    /// Constructs the middleware and its parser.
    ///
    /// Invalid parser options are reported here rather than on the first request.
    pub fn new(config: UploadConfig) -> Result<Self, ConfigError> {
        let (uri, options) = config.into_parts();
        Ok(Upload::with_parser(uri, FormParser::new(options)?))
    }
}

impl<P: Parser> Upload<P> {
    /// Constructs the middleware around a custom parser.
    pub fn with_parser(uri: impl Into<String>, parser: P) -> Self {
        Upload {
            uri: Rc::from(uri.into()),
            parser: Rc::new(parser),
            validator: None,
            response: None,
        }
    }

    /// Sets the gate run after parsing.
    ///
    /// The validator receives the request, with the parsed [`UploadedForm`] already attached to
    /// its extensions. The request must not be retained past the returned future since it is
    /// routed afterwards. Errors returned by the validator fail the request.
    pub fn validator<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + 'static,
        Fut: Future<Output = Result<bool, Error>> + 'static,
    {
        let validator: Rc<ValidatorFn> = Rc::new(move |req| validator(req).boxed_local());
        self.validator = Some(validator);
        self
    }

    /// Sets the callback producing the response of an accepted upload.
    pub fn response<F, Fut, R>(mut self, response: F) -> Self
    where
        F: Fn(HttpRequest, UploadResult) -> Fut + 'static,
        Fut: Future<Output = Result<R, Error>> + 'static,
        R: Responder + 'static,
    {
        let response: Rc<ResponseFn> = Rc::new(move |req: HttpRequest, result| {
            let fut = response(req.clone(), result);

            async move {
                let res = fut.await?;
                Ok::<_, Error>(res.respond_to(&req).map_into_boxed_body())
            }
            .boxed_local()
        });

        self.response = Some(response);
        self
    }

    /// Returns the intercepted route path.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the parser shared by all intercepted requests.
    pub fn parser(&self) -> &P {
        &self.parser
    }
}

impl<S, B, P> Transform<S, ServiceRequest> for Upload<P>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
    P: Parser + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = UploadMiddleware<S, P>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(UploadMiddleware {
            service: Rc::new(service),
            inner: Rc::new(Inner {
                uri: Rc::clone(&self.uri),
                parser: Rc::clone(&self.parser),
                validator: self.validator.clone(),
                response: self.response.clone(),
            }),
        }))
    }
}

struct Inner<P> {
    uri: Rc<str>,
    parser: Rc<P>,
    validator: Option<Rc<ValidatorFn>>,
    response: Option<Rc<ResponseFn>>,
}

/// Whether an intercepted request made it past validation.
enum Outcome {
    Rejected,
    Accepted(UploadResult),
}

#[doc(hidden)]
pub struct UploadMiddleware<S, P> {
    service: Rc<S>,
    inner: Rc<Inner<P>>,
}

impl<S, P> fmt::Debug for UploadMiddleware<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadMiddleware")
            .field("uri", &self.inner.uri)
            .finish_non_exhaustive()
    }
}

impl<S, B, P> Service<ServiceRequest> for UploadMiddleware<S, P>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
    P: Parser + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        if req.path() != &*self.inner.uri {
            let fut = self.service.call(req);
            return async move { fut.await.map(ServiceResponse::map_into_left_body) }.boxed_local();
        }

        let service = Rc::clone(&self.service);
        let inner = Rc::clone(&self.inner);

        async move {
            let payload = req.take_payload();
            let parsed = inner.parser.parse(req.headers(), payload).await;

            req.extensions_mut().insert(UploadedForm {
                fields: parsed.fields.clone(),
                files: parsed.files.clone(),
            });

            let result = UploadResult {
                error: parsed.error,
                fields: parsed.fields,
                files: parsed.files,
            };

            let accepted = match inner.validator {
                Some(ref validator) => validator(req.request().clone()).await?,
                None => true,
            };

            let outcome = if accepted {
                Outcome::Accepted(result)
            } else {
                remove_files(&result.files).await;
                Outcome::Rejected
            };

            match (outcome, &inner.response) {
                (Outcome::Accepted(result), Some(response)) => {
                    let res = response(req.request().clone(), result).await?;
                    Ok(req.into_response(res).map_into_right_body())
                }

                (Outcome::Rejected, _) => {
                    log::debug!("upload to {} rejected by validator", req.path());
                    service.call(req).await.map(ServiceResponse::map_into_left_body)
                }

                (Outcome::Accepted(_), None) => {
                    service.call(req).await.map(ServiceResponse::map_into_left_body)
                }
            }
        }
        .boxed_local()
    }
}

/// Deletes the stored files of a rejected upload.
///
/// Failures are logged and otherwise ignored; a file that is already gone is not a failure.
async fn remove_files(files: &Files) {
    for file in iter_files(files) {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => log::debug!("removed rejected upload {}", file.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("rejected upload {} was already removed", file.path.display())
            }
            Err(err) => log::warn!(
                "failed to remove rejected upload {}: {}",
                file.path.display(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, fs};

    use actix_service::IntoService;
    use actix_utils::future::ok;
    use actix_web::{
        http::StatusCode,
        test::{self, TestRequest},
        HttpMessage as _,
    };

    use super::*;
    use crate::{config::ParserOptions, test::FormBody};

    fn upload_in(dir: &std::path::Path) -> Upload {
        Upload::new(UploadConfig::new("/upload").parser(ParserOptions::default().upload_dir(dir)))
            .unwrap()
    }

    fn upload_request(dir_file: &str) -> ServiceRequest {
        FormBody::new()
            .text("name", "value")
            .file("avatar", dir_file, mime::IMAGE_PNG, "png")
            .into_request(TestRequest::post().uri("/upload"))
            .to_srv_request()
    }

    #[actix_rt::test]
    async fn default_uri() {
        let upload = Upload::new(UploadConfig::default()).unwrap();
        assert_eq!(upload.uri(), "/api/upload");
        assert!(upload.parser().options().extras().is_empty());
    }

    #[actix_rt::test]
    async fn debug_output() {
        let dir = tempfile::tempdir().unwrap();
        let upload = upload_in(dir.path()).validator(|_req| async { Ok(true) });

        let dbg = format!("{:?}", upload);
        assert!(dbg.contains("uri: \"/upload\""));
        assert!(dbg.contains("validator: true"));
        assert!(dbg.contains("response: false"));

        let mw = upload.new_transform(test::ok_service()).await.unwrap();
        assert!(format!("{:?}", mw).starts_with("UploadMiddleware { uri: \"/upload\""));
    }

    #[actix_rt::test]
    async fn other_paths_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let mw = upload_in(dir.path())
            .response(|_req, _result| async { Ok(HttpResponse::Created()) })
            .new_transform(test::ok_service())
            .await
            .unwrap();

        let req = TestRequest::post().uri("/upload/other").to_srv_request();
        let res = mw.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_rt::test]
    async fn rejected_upload_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let next_calls = Rc::new(Cell::new(0));

        let srv = {
            let next_calls = Rc::clone(&next_calls);
            move |req: ServiceRequest| {
                next_calls.set(next_calls.get() + 1);
                let form = req.extensions().get::<UploadedForm>().cloned().unwrap();
                assert_eq!(form.files.len(), 1);
                ok(req.into_response(HttpResponse::Forbidden().finish()))
            }
        };

        let mw = upload_in(dir.path())
            .validator(|_req| async { Ok(false) })
            .response(|_req, _result| async { Ok(HttpResponse::Ok()) })
            .new_transform(srv.into_service())
            .await
            .unwrap();

        let res = mw.call(upload_request("a.png")).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(next_calls.get(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_rt::test]
    async fn validator_sees_attached_form() {
        let dir = tempfile::tempdir().unwrap();

        let mw = upload_in(dir.path())
            .validator(|req| async move {
                let ext = req.extensions();
                let form = ext.get::<UploadedForm>().unwrap();
                let valid = form.fields["name"].first().map(String::as_str) == Some("value");
                Ok(valid)
            })
            .response(|_req, result| async move {
                Ok(format!("{} file(s)", result.files.len()))
            })
            .new_transform(test::ok_service())
            .await
            .unwrap();

        let res = mw.call(upload_request("a.png")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = test::read_body(res).await;
        assert_eq!(body, "1 file(s)");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[actix_rt::test]
    async fn validator_error_propagates() {
        let dir = tempfile::tempdir().unwrap();

        let mw = upload_in(dir.path())
            .validator(|_req| async {
                Err(actix_web::error::ErrorUnauthorized("missing token"))
            })
            .new_transform(test::ok_service())
            .await
            .unwrap();

        let err = mw.call(upload_request("a.png")).await.err().unwrap();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::UNAUTHORIZED
        );

        // files are only removed on a `false` verdict
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
