use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("unclosed `{opener}` in `{input}`")]
    #[diagnostic(code(template::unclosed))]
    Unclosed { opener: &'static str, input: String },

    #[error("empty expression in `{0}`")]
    #[diagnostic(code(template::empty_expression))]
    EmptyExpression(String),
}
