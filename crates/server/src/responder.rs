//! Converts upload outcomes into HTTP responses.
//!
//! The browser agent only sees the status code: 200 once the server finished with
//! (or deliberately abandoned) the bytes, 422 with the error text otherwise.

use bytes::Bytes;
use http::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use upload_bridge::UploadError;

pub type ResponseBody = Full<Bytes>;

/// A type that can be turned into a response.
pub trait Responder {
    fn into_response(self) -> Response<ResponseBody>;
}

/// The upload was consumed by its reader.
#[derive(Debug, Clone, Copy)]
pub struct Uploaded;

/// The upload route only accepts `POST`.
#[derive(Debug, Clone, Copy)]
pub struct MethodNotAllowed;

#[derive(Debug, Clone, Copy)]
pub struct NotFound;

fn text_response(status: StatusCode, text: impl Into<Bytes>) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(text.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

impl<T: Responder, E: Responder> Responder for Result<T, E> {
    fn into_response(self) -> Response<ResponseBody> {
        match self {
            Ok(t) => t.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

impl Responder for Uploaded {
    fn into_response(self) -> Response<ResponseBody> {
        text_response(StatusCode::OK, "Uploaded")
    }
}

impl Responder for UploadError {
    fn into_response(self) -> Response<ResponseBody> {
        text_response(StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
    }
}

impl Responder for MethodNotAllowed {
    fn into_response(self) -> Response<ResponseBody> {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response.headers_mut().insert(ALLOW, HeaderValue::from_static("POST"));
        response
    }
}

impl Responder for NotFound {
    fn into_response(self) -> Response<ResponseBody> {
        text_response(StatusCode::NOT_FOUND, "Not Found")
    }
}
