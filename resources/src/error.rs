use miette::Diagnostic;
use thiserror::Error;
use url::Url;

/// A resource that could not be made available. Reported for the first failing
/// resource in declaration order.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to load resource `{url}`: {reason}")]
    #[diagnostic(code(resources::load_error))]
    ResourceLoadError { url: String, reason: String },
}

impl Error {
    /// The resource that failed, as it was declared.
    pub fn resource_url(&self) -> &str {
        match self {
            Error::ResourceLoadError { url, .. } => url,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum FetchError {
    #[error("unsupported URL scheme `{scheme}`")]
    #[diagnostic(code(resources::unsupported_scheme))]
    UnsupportedScheme { scheme: String },
    #[error("invalid resource URL `{url}`: {message}")]
    #[diagnostic(code(resources::invalid_url))]
    InvalidUrl { url: String, message: String },
    #[error("resource `{url}` not found")]
    #[diagnostic(code(resources::not_found))]
    NotFound { url: Url },
    #[error("response body from `{url}` exceeds max size {max_bytes} bytes")]
    #[diagnostic(code(resources::response_too_large))]
    ResponseTooLarge { url: Url, max_bytes: usize },
    #[error("http error: {0}")]
    #[diagnostic(code(resources::http_error))]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    #[diagnostic(code(resources::io_error))]
    Io(#[from] std::io::Error),
}
