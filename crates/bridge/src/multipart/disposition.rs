//! `Content-Disposition` parsing for multipart sections.
//!
//! Only the parts the upload path cares about are kept: the disposition type, the
//! field name and the file name (plain or RFC 5987 extended).

use percent_encoding::percent_decode_str;

use crate::error::MultipartError;
use crate::utils::ensure;

/// How the upload path treats a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `form-data` carrying a file name.
    File,
    /// Anything else, e.g. a plain form field.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    disposition_type: String,
    name: Option<String>,
    file_name: Option<String>,
    file_name_star: Option<String>,
}

impl ContentDisposition {
    /// Parses a header value such as `form-data; name="file"; filename="a.txt"`.
    pub fn parse(value: &str) -> Result<Self, MultipartError> {
        let mut rest = value.trim();
        let type_end = rest.find(';').unwrap_or(rest.len());
        let disposition_type = rest[..type_end].trim();
        ensure!(is_token(disposition_type), MultipartError::invalid_disposition(value));
        rest = &rest[type_end..];

        let mut disposition = ContentDisposition {
            disposition_type: disposition_type.to_ascii_lowercase(),
            name: None,
            file_name: None,
            file_name_star: None,
        };

        while let Some(stripped) = rest.strip_prefix(';') {
            let stripped = stripped.trim_start();
            if stripped.is_empty() {
                break;
            }

            let eq = stripped.find('=').ok_or_else(|| MultipartError::invalid_disposition(value))?;
            let key = stripped[..eq].trim();
            ensure!(is_token(key), MultipartError::invalid_disposition(value));

            let (param_value, remaining) = parse_param_value(stripped[eq + 1..].trim_start())
                .ok_or_else(|| MultipartError::invalid_disposition(value))?;
            rest = remaining.trim_start();

            match key.to_ascii_lowercase().as_str() {
                "name" => disposition.name = Some(param_value),
                "filename" => disposition.file_name = Some(param_value),
                "filename*" => disposition.file_name_star = Some(decode_ext_value(&param_value)),
                _ => {}
            }
        }

        ensure!(rest.is_empty(), MultipartError::invalid_disposition(value));
        Ok(disposition)
    }

    pub fn disposition_type(&self) -> &str {
        &self.disposition_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The file name, preferring the extended `filename*` form when present.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name_star.as_deref().filter(|s| !s.is_empty()).or(self.file_name.as_deref())
    }

    /// A file section is `form-data` with a non-empty file name.
    pub fn is_file(&self) -> bool {
        self.disposition_type == "form-data" && self.file_name().is_some_and(|name| !name.is_empty())
    }

    pub fn kind(&self) -> SectionKind {
        if self.is_file() { SectionKind::File } else { SectionKind::Other }
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Reads a token or quoted-string, returning the value and the unparsed rest.
fn parse_param_value(input: &str) -> Option<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => value.push(chars.next()?.1),
                '"' => return Some((value, &quoted[i + 1..])),
                c => value.push(c),
            }
        }
        // unterminated quoted string
        None
    } else {
        let end = input.find(';').unwrap_or(input.len());
        let token = input[..end].trim_end();
        if token.is_empty() { None } else { Some((token.to_owned(), &input[end..])) }
    }
}

/// Decodes an RFC 5987 `charset'language'percent-encoded` value. Non UTF-8 charsets
/// are decoded lossily.
fn decode_ext_value(value: &str) -> String {
    let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}
