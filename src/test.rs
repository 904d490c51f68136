//! Upload testing utilities.

use actix_web::{
    http::header::{self, HeaderMap},
    test::TestRequest,
    web::{BufMut as _, Bytes, BytesMut},
};
use mime::Mime;
use rand::distr::{Alphanumeric, SampleString as _};

const CRLF: &[u8] = b"\r\n";
const HYPHENS: &[u8] = b"--";
const BOUNDARY_PREFIX: &str = "------------------------";

/// Builder of `multipart/form-data` request bodies with any number of parts.
///
/// # Examples
/// ```
/// use actix_upload::test::FormBody;
/// use actix_web::test::TestRequest;
///
/// let req = FormBody::new()
///     .text("title", "holiday")
///     .file("photo", "beach.jpg", mime::IMAGE_JPEG, &b"\xff\xd8\xff"[..])
///     .into_request(TestRequest::post().uri("/api/upload"))
///     .to_srv_request();
///
/// assert!(req
///     .headers()
///     .get("content-type")
///     .unwrap()
///     .to_str()
///     .unwrap()
///     .starts_with("multipart/form-data; boundary=\""));
/// ```
#[derive(Debug, Clone)]
pub struct FormBody {
    boundary: String,
    buf: BytesMut,
}

impl Default for FormBody {
    fn default() -> Self {
        Self::new()
    }
}

impl FormBody {
    /// Starts an empty body with a random alphanumeric boundary.
    pub fn new() -> Self {
        Self::with_boundary(&Alphanumeric.sample_string(&mut rand::rng(), 32))
    }

    /// Starts an empty body with a fixed boundary.
    pub fn with_boundary(boundary: &str) -> Self {
        FormBody {
            boundary: [BOUNDARY_PREFIX, boundary].concat(),
            buf: BytesMut::with_capacity(512),
        }
    }

    /// Appends a text field.
    pub fn text(self, name: &str, value: impl Into<Bytes>) -> Self {
        self.part(name, None, None, value.into())
    }

    /// Appends a file field.
    pub fn file(
        self,
        name: &str,
        file_name: &str,
        content_type: Mime,
        data: impl Into<Bytes>,
    ) -> Self {
        self.part(name, Some(file_name), Some(content_type), data.into())
    }

    fn part(
        mut self,
        name: &str,
        file_name: Option<&str>,
        content_type: Option<Mime>,
        data: Bytes,
    ) -> Self {
        let buf = &mut self.buf;

        buf.put(HYPHENS);
        buf.put(self.boundary.as_bytes());
        buf.put(CRLF);

        buf.put(format!("Content-Disposition: form-data; name=\"{name}\"").as_bytes());
        if let Some(file_name) = file_name {
            buf.put(format!("; filename=\"{file_name}\"").as_bytes());
        }
        buf.put(CRLF);

        if let Some(ct) = content_type {
            buf.put(format!("Content-Type: {ct}").as_bytes());
            buf.put(CRLF);
        }

        buf.put(CRLF);
        buf.put(data);
        buf.put(CRLF);

        self
    }

    /// Closes the body and returns it with a matching `Content-Type` header.
    pub fn into_parts(mut self) -> (Bytes, HeaderMap) {
        self.buf.put(HYPHENS);
        self.buf.put(self.boundary.as_bytes());
        self.buf.put(HYPHENS);
        self.buf.put(CRLF);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary=\"{}\"", self.boundary)
                .parse()
                .unwrap(),
        );

        (self.buf.freeze(), headers)
    }

    /// Sets the body and its headers on a test request.
    pub fn into_request(self, req: TestRequest) -> TestRequest {
        let (body, headers) = self.into_parts();

        headers
            .into_iter()
            .fold(req, |req, hdr| req.insert_header(hdr))
            .set_payload(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let (body, headers) = FormBody::with_boundary("qWeRtYuIoP")
            .text("foo", "bar")
            .file("doc", "a.txt", mime::TEXT_PLAIN, "hi")
            .into_parts();

        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "multipart/form-data; boundary=\"------------------------qWeRtYuIoP\""
        );

        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "--------------------------qWeRtYuIoP\r\n\
            Content-Disposition: form-data; name=\"foo\"\r\n\
            \r\n\
            bar\r\n\
            --------------------------qWeRtYuIoP\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            hi\r\n\
            --------------------------qWeRtYuIoP--\r\n",
        );
    }
}
