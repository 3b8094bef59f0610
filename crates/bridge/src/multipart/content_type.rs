use http::HeaderMap;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use mime::Mime;

use crate::config::MultipartLimits;
use crate::error::MultipartError;
use crate::utils::ensure;

/// Extracts the boundary from a `multipart/form-data` content type.
///
/// `Content-Type: multipart/form-data; boundary="----WebKitFormBoundarymx2fSWqWSd0OxQqq"`
pub fn parse_boundary(headers: &HeaderMap, limits: &MultipartLimits) -> Result<String, MultipartError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .ok_or_else(|| MultipartError::unsupported_content_type("<missing>"))?
        .to_str()
        .map_err(|_e| MultipartError::unsupported_content_type("<not visible ascii>"))?;

    let mime: Mime = content_type.parse().map_err(|_e| MultipartError::unsupported_content_type(content_type))?;
    ensure!(
        mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA,
        MultipartError::unsupported_content_type(content_type)
    );

    let boundary = mime.get_param(mime::BOUNDARY).map(|b| b.as_str().trim_matches('"')).unwrap_or_default();
    ensure!(!boundary.is_empty(), MultipartError::MissingBoundary);
    ensure!(
        boundary.len() <= limits.max_boundary_length,
        MultipartError::boundary_too_long(boundary.len(), limits.max_boundary_length)
    );

    Ok(boundary.to_owned())
}

/// Returns true when the request declares an empty body.
pub fn declares_empty_body(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_some_and(|length| length == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn parses_plain_and_quoted_boundary() {
        let limits = MultipartLimits::default();
        let boundary = parse_boundary(&headers("multipart/form-data; boundary=abc123"), &limits).unwrap();
        assert_eq!(boundary, "abc123");

        let boundary =
            parse_boundary(&headers("multipart/form-data; boundary=\"----WebKitFormBoundarymx2f\""), &limits).unwrap();
        assert_eq!(boundary, "----WebKitFormBoundarymx2f");
    }

    #[test]
    fn rejects_other_content_types() {
        let limits = MultipartLimits::default();
        let result = parse_boundary(&headers("application/json"), &limits);
        assert!(matches!(result, Err(MultipartError::UnsupportedContentType { .. })));

        let result = parse_boundary(&HeaderMap::new(), &limits);
        assert!(matches!(result, Err(MultipartError::UnsupportedContentType { .. })));
    }

    #[test]
    fn rejects_missing_or_long_boundary() {
        let limits = MultipartLimits { max_boundary_length: 4, ..MultipartLimits::default() };
        let result = parse_boundary(&headers("multipart/form-data"), &limits);
        assert!(matches!(result, Err(MultipartError::MissingBoundary)));

        let result = parse_boundary(&headers("multipart/form-data; boundary=abcdef"), &limits);
        assert!(matches!(result, Err(MultipartError::BoundaryTooLong { current_len: 6, max_len: 4 })));
    }

    #[test]
    fn detects_declared_empty_body() {
        let mut headers = HeaderMap::new();
        assert!(!declares_empty_body(&headers));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(declares_empty_body(&headers));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(!declares_empty_body(&headers));
    }
}
