//! Small helpers shared by the multipart codec and the upload handshake.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(boundary.len() <= limits.max_boundary_length, MultipartError::boundary_too_long(..));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Finds the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
