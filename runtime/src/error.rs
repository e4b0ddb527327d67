use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Why a widget could not be placed, or the runtime could not be assembled.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Descriptor(#[from] vitrine_resolver::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resources(#[from] vitrine_resources::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidConfig(#[from] vitrine_descriptor::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Telemetry(#[from] vitrine_subscription::FetchError),

    #[error("invalid runtime option at `{path}`: {message}")]
    #[diagnostic(
        code(runtime::options),
        help("options are camelCase JSON; environment overrides use VITRINE_<OPTION_PATH>")
    )]
    Options { path: String, message: String },

    #[error("failed to read `{}`", path.display())]
    #[diagnostic(code(runtime::io_error))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no widget type source configured")]
    #[diagnostic(
        code(runtime::no_backend),
        help("set `backendUrl` or `descriptorDir`")
    )]
    NoBackend,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_keep_their_diagnostics() {
        let err = Error::from(vitrine_resources::Error::ResourceLoadError {
            url: "lib.js".to_string(),
            reason: "not found".to_string(),
        });
        assert_eq!(err.code().unwrap().to_string(), "resources::load_error");
        assert!(err.url().is_none());
        assert_eq!(err.to_string(), "failed to load resource `lib.js`: not found");
    }
}
