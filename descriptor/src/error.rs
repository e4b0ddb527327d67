use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid {kind} name `{name}`: {reason}")]
    #[diagnostic(code(descriptor::invalid_name))]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    #[error("invalid widget document at `{path}`: {message}")]
    #[diagnostic(code(descriptor::parse_error))]
    Parse { path: String, message: String },

    #[error("invalid default configuration for `{fqn}`: {message}")]
    #[diagnostic(
        code(descriptor::invalid_default_config),
        help("`defaultConfig` must be a JSON object encoded as a string")
    )]
    InvalidDefaultConfig { fqn: String, message: String },
}
