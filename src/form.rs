//! Parsed form data: text fields, stored files and the request extension exposing them.

use std::{
    collections::{hash_map::Entry, HashMap},
    path::PathBuf,
    slice,
};

use actix_utils::future::{ready, Ready};
use actix_web::{dev::Payload, error, Error, FromRequest, HttpMessage, HttpRequest};
use mime::Mime;

use crate::error::UploadError;

/// Value(s) submitted under one form field name.
///
/// Without the `multiples` option a repeated name keeps only its last value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue<T> {
    /// One value, or the last one of a repeated name when `multiples` is off.
    Single(T),
    /// Every value submitted under the name, in submission order.
    Multiple(Vec<T>),
}

impl<T> FormValue<T> {
    /// Returns the first submitted value.
    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Iterates over all submitted values.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        match self {
            FormValue::Single(value) => slice::from_ref(value).iter(),
            FormValue::Multiple(values) => values.iter(),
        }
    }

    /// Returns the number of submitted values.
    pub fn len(&self) -> usize {
        match self {
            FormValue::Single(_) => 1,
            FormValue::Multiple(values) => values.len(),
        }
    }

    /// Returns `true` for an empty `Multiple`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts into a list of values.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            FormValue::Single(value) => vec![value],
            FormValue::Multiple(values) => values,
        }
    }

    fn push(&mut self, value: T) {
        let mut values = std::mem::replace(self, FormValue::Multiple(Vec::new())).into_vec();
        values.push(value);
        *self = FormValue::Multiple(values);
    }
}

impl<'a, T> IntoIterator for &'a FormValue<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Text fields keyed by field name.
pub type Fields = HashMap<String, FormValue<String>>;

/// Stored files keyed by field name.
pub type Files = HashMap<String, FormValue<UploadedFile>>;

/// Records `value` under `name`, collecting repeats when `multiples` is set.
pub(crate) fn insert_value<T>(
    map: &mut HashMap<String, FormValue<T>>,
    name: String,
    value: T,
    multiples: bool,
) {
    if !multiples {
        map.insert(name, FormValue::Single(value));
        return;
    }

    match map.entry(name) {
        Entry::Occupied(mut entry) => entry.get_mut().push(value),
        Entry::Vacant(entry) => {
            entry.insert(FormValue::Multiple(vec![value]));
        }
    }
}

/// Iterates over every stored file regardless of field name.
pub(crate) fn iter_files(files: &Files) -> impl Iterator<Item = &UploadedFile> {
    files.values().flat_map(FormValue::iter)
}

/// Descriptor of a file written by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Location of the stored file.
    pub path: PathBuf,

    /// Generated name of the stored file inside the upload directory.
    pub new_file_name: String,

    /// The `filename` value in the part's content-disposition header.
    pub original_file_name: Option<String>,

    /// The value of the part's `content-type` header.
    pub content_type: Option<Mime>,

    /// Size in bytes.
    pub size: u64,

    /// Hex encoded digest, when a hash algorithm is configured.
    pub hash: Option<String>,
}

/// Outcome of parsing one upload request, as delivered to the response callback.
#[derive(Debug)]
pub struct UploadResult {
    /// Set when parsing failed. Fields and files parsed before the failure are still present.
    pub error: Option<UploadError>,

    /// Text fields.
    pub fields: Fields,

    /// Stored files.
    pub files: Files,
}

/// Fields and files attached to an intercepted request.
///
/// The middleware inserts this into the request extensions right after parsing, before any
/// validation, so services further down the chain can read it, either from the extensions or as
/// an extractor:
///
/// ```
/// use actix_upload::UploadedForm;
/// use actix_web::HttpResponse;
///
/// async fn after_upload(form: UploadedForm) -> HttpResponse {
///     HttpResponse::Ok().body(format!("{} file field(s)", form.files.len()))
/// }
/// ```
///
/// When a validator rejects the request its files are deleted, but this attachment stays in
/// place, so descriptors may point at files that no longer exist.
#[derive(Debug, Clone, Default)]
pub struct UploadedForm {
    /// Text fields.
    pub fields: Fields,

    /// Stored files. Removed from disk if the upload was rejected.
    pub files: Files,
}

impl FromRequest for UploadedForm {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<UploadedForm>()
                .cloned()
                .ok_or_else(|| {
                    log::debug!(
                        "no uploaded form attached to request for {}; is the Upload middleware \
                         configured for this path?",
                        req.path()
                    );
                    error::ErrorInternalServerError("no uploaded form attached to request")
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test::TestRequest};

    use super::*;

    #[test]
    fn last_value_wins_without_multiples() {
        let mut fields = Fields::new();
        insert_value(&mut fields, "name".to_owned(), "a".to_owned(), false);
        insert_value(&mut fields, "name".to_owned(), "b".to_owned(), false);
        assert_eq!(fields["name"], FormValue::Single("b".to_owned()));
    }

    #[test]
    fn multiples_collect_values() {
        let mut fields = Fields::new();
        insert_value(&mut fields, "tag".to_owned(), "a".to_owned(), true);
        assert_eq!(fields["tag"], FormValue::Multiple(vec!["a".to_owned()]));

        insert_value(&mut fields, "tag".to_owned(), "b".to_owned(), true);
        let tags = &fields["tag"];
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.first().map(String::as_str), Some("a"));
        assert_eq!(tags.iter().cloned().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn single_promotes_to_multiple() {
        let mut value = FormValue::Single(1);
        value.push(2);
        assert_eq!(value, FormValue::Multiple(vec![1, 2]));
        assert_eq!(value.into_vec(), [1, 2]);
    }

    #[actix_rt::test]
    async fn extractor_requires_attached_form() {
        let (req, mut payload) = TestRequest::default().to_http_parts();
        let err = UploadedForm::from_request(&req, &mut payload)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let mut fields = Fields::new();
        insert_value(&mut fields, "name".to_owned(), "value".to_owned(), false);
        req.extensions_mut().insert(UploadedForm {
            fields,
            files: Files::new(),
        });

        let form = UploadedForm::from_request(&req, &mut payload).await.unwrap();
        assert_eq!(form.fields["name"].first().unwrap(), "value");
    }
}
