use tracing::trace;
use upload_bridge::config::CORRELATION_ID_PARAM;

/// Matches request paths against the one-time upload route.
#[derive(Debug)]
pub struct UploadRouter {
    inner_router: matchit::Router<()>,
}

impl UploadRouter {
    /// Builds a router for `route`, e.g. `/app/_upload/{correlation_id}`.
    pub fn new(route: &str) -> Result<Self, matchit::InsertError> {
        let mut inner_router = matchit::Router::new();
        inner_router.insert(route, ())?;
        Ok(Self { inner_router })
    }

    /// Returns the correlation id carried by `path`, `None` when the path is not an
    /// upload url.
    pub fn at<'req>(&self, path: &'req str) -> Option<&'req str> {
        match self.inner_router.at(path) {
            Ok(matched) => matched.params.get(CORRELATION_ID_PARAM),
            Err(e) => {
                trace!(path, cause = %e, "no upload route matched");
                None
            }
        }
    }
}
