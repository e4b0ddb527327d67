//! Controller compilation and the sandbox it runs in.
//!
//! A controller script is evaluated by an embedded interpreter for a JavaScript
//! subset. The interpreter's global scope holds only its own builtins, so a script
//! reaches the host exclusively through the `ctx` object it is given. Execution is
//! bounded by a fuel budget per entry and by a call depth limit.

pub mod ast;
mod builtins;
pub mod controller;
mod error;
pub mod interp;
pub mod lexer;
pub mod libraries;
pub mod parser;
pub mod scope;
pub mod value;

use std::{collections::BTreeMap, rc::Rc, sync::Arc};

pub use controller::{ActionSource, Controller, InertController, ScriptController};
pub use error::Error;
pub use interp::{Exception, Fatal, Interpreter, Limits};
pub use libraries::Libraries;
use miette::{NamedSource, SourceSpan};
use parser::ParseError;
use scope::{Env, Scope};
use serde::{Deserialize, Serialize};
pub use value::Value;
use vitrine_descriptor::Fqn;

const PRELUDE: &str = "var self = this; self.ctx = ctx || {};";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    #[serde(skip)]
    pub limits: Limits,
    pub libraries: Libraries,
}

/// Compile a controller, falling back to an [`InertController`] on any failure.
///
/// `modules` maps each alias the script imports to the module's source text.
pub fn compile(
    source: &str,
    fqn: &Fqn,
    modules: &BTreeMap<String, Arc<str>>,
    options: &CompileOptions,
) -> Box<dyn Controller> {
    match try_compile(source, fqn, modules, options) {
        Ok(controller) => Box::new(controller),
        Err(err) => {
            tracing::error!(widget = %fqn, error = %err, "controller failed to compile; widget runs without one");
            Box::new(InertController)
        }
    }
}

/// Compile a controller and run its top level once against a placeholder context.
pub fn try_compile(
    source: &str,
    fqn: &Fqn,
    modules: &BTreeMap<String, Arc<str>>,
    options: &CompileOptions,
) -> Result<ScriptController, Error> {
    let entry_name = format!("_{}", fqn.identifier());
    let program = parser::parse_program(source)
        .map_err(|err| syntax_error(fqn, &entry_name, source, err))?;
    let prelude = parser::parse_program(PRELUDE)
        .map_err(|err| syntax_error(fqn, &entry_name, PRELUDE, err))?;

    let mut interp = Interpreter::new(fqn.as_str(), options.limits);
    let module_scope = Scope::child(interp.globals(), true);
    let mut scopes = vec![Rc::clone(&module_scope)];

    for (alias, module_source) in modules {
        let exports = load_module(&mut interp, &module_scope, alias, module_source, &mut scopes)?;
        module_scope.declare(alias, exports, true);
    }

    // The script body runs as the entry function `_<fqn>`: `this` is the receiver
    // and the only parameter is `ctx`.
    let entry = Scope::child(&module_scope, true);
    scopes.push(Rc::clone(&entry));
    let receiver = Value::new_object();
    entry.declare("this", receiver.clone(), false);
    entry.declare("arguments", Value::array(vec![placeholder_context()]), true);
    entry.declare("ctx", placeholder_context(), true);

    tracing::debug!(widget = %fqn, entry = %entry_name, "running controller top level");
    interp.refuel();
    let mut body = prelude;
    body.extend(program);
    let result = interp.run_program(&body, &entry);

    let controller = ScriptController::new(
        interp,
        receiver,
        scopes,
        fqn.clone(),
        options.libraries.clone(),
    );
    result.map_err(|exception| Error::from_exception(fqn.as_str(), exception))?;
    Ok(controller)
}

fn load_module(
    interp: &mut Interpreter,
    parent: &Env,
    alias: &str,
    source: &str,
    scopes: &mut Vec<Env>,
) -> Result<Value, Error> {
    let program = parser::parse_program(source).map_err(|err| {
        let (line, column) = lexer::line_col(source, err.offset);
        Error::Module {
            alias: alias.to_string(),
            message: format!("{} at {line}:{column}", err.message),
        }
    })?;
    let scope = Scope::child(parent, true);
    scopes.push(Rc::clone(&scope));
    let exports = Value::new_object();
    let mut module = value::PropertyMap::new();
    module.insert("exports".into(), exports.clone());
    let module = Value::object(module);
    scope.declare("exports", exports, true);
    scope.declare("module", module.clone(), true);

    interp.refuel();
    interp.run_program(&program, &scope).map_err(|exception| {
        let message = match exception {
            Exception::Thrown(value) => Interpreter::describe_thrown(&value),
            Exception::Fatal(fatal) => Error::from(fatal).to_string(),
        };
        Error::Module {
            alias: alias.to_string(),
            message,
        }
    })?;
    Ok(module.get_own("exports").unwrap_or_default())
}

/// Shape of the context the top level sees before the real one is attached.
fn placeholder_context() -> Value {
    let mut ctx = value::PropertyMap::new();
    ctx.insert("settings".into(), Value::new_object());
    ctx.insert("data".into(), Value::array(Vec::new()));
    ctx.insert("latestData".into(), Value::array(Vec::new()));
    ctx.insert("actionsApi".into(), Value::new_object());
    ctx.insert("utils".into(), Value::new_object());
    ctx.insert("datasources".into(), Value::array(Vec::new()));
    Value::object(ctx)
}

fn syntax_error(fqn: &Fqn, entry_name: &str, source: &str, err: ParseError) -> Error {
    let (line, column) = lexer::line_col(source, err.offset);
    let offset = err.offset.min(source.len());
    let len = usize::from(offset < source.len());
    Error::Syntax {
        fqn: fqn.to_string(),
        message: err.message,
        line,
        column,
        src: NamedSource::new(entry_name, source.to_string()),
        span: SourceSpan::from((offset, len)),
    }
}
