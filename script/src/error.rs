use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    interp::{Exception, Fatal, Interpreter},
    value::Value,
};

#[allow(unused_assignments)]
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("syntax error in controller of `{fqn}` at {line}:{column}: {message}")]
    #[diagnostic(code(script::syntax))]
    Syntax {
        fqn: String,
        message: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("{message}")]
        span: SourceSpan,
    },

    /// An error object (`TypeError`, `new Error(...)`, ...) escaped the script.
    #[error("controller of `{fqn}` failed: {message}")]
    #[diagnostic(code(script::runtime))]
    Runtime { fqn: String, message: String },

    /// Any other thrown value.
    #[error("controller of `{fqn}` threw: {message}")]
    #[diagnostic(code(script::throw))]
    Throw { fqn: String, message: String },

    #[error("controller exceeded its budget of {budget} steps")]
    #[diagnostic(
        code(script::fuel_exhausted),
        help("look for unbounded loops in the controller or in one of its hooks")
    )]
    FuelExhausted { budget: u64 },

    #[error("controller exceeded the maximum call depth of {limit}")]
    #[diagnostic(code(script::call_depth_exceeded))]
    CallDepthExceeded { limit: usize },

    #[error("controller nested statements and expressions more than {limit} deep")]
    #[diagnostic(code(script::nesting_exceeded))]
    NestingExceeded { limit: usize },

    #[error("module `{alias}` could not be loaded: {message}")]
    #[diagnostic(code(script::module))]
    Module { alias: String, message: String },
}

impl Error {
    pub(crate) fn from_exception(fqn: &str, exception: Exception) -> Self {
        match exception {
            Exception::Thrown(value) if is_error_object(&value) => Error::Runtime {
                fqn: fqn.to_string(),
                message: Interpreter::describe_thrown(&value),
            },
            Exception::Thrown(value) => Error::Throw {
                fqn: fqn.to_string(),
                message: Interpreter::describe_thrown(&value),
            },
            Exception::Fatal(fatal) => fatal.into(),
        }
    }
}

fn is_error_object(value: &Value) -> bool {
    match value {
        Value::Object(obj) => {
            let obj = obj.borrow();
            obj.get("name").is_some() && obj.get("message").is_some()
        }
        _ => false,
    }
}

impl From<Fatal> for Error {
    fn from(fatal: Fatal) -> Self {
        match fatal {
            Fatal::FuelExhausted { budget } => Error::FuelExhausted { budget },
            Fatal::CallDepthExceeded { limit } => Error::CallDepthExceeded { limit },
            Fatal::NestingExceeded { limit } => Error::NestingExceeded { limit },
        }
    }
}
