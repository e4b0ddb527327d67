use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::value::Value;

pub type Env = Rc<Scope>;

/// One lexical scope. `var` declarations land in the nearest function scope;
/// `let`/`const` in the innermost one.
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Env>,
    function_scope: bool,
}

struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    Done,
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> Env {
        Rc::new(Scope {
            vars: RefCell::default(),
            parent: None,
            function_scope: true,
        })
    }

    pub fn child(parent: &Env, function_scope: bool) -> Env {
        Rc::new(Scope {
            vars: RefCell::default(),
            parent: Some(Rc::clone(parent)),
            function_scope,
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        let mut scope = self.parent.clone();
        while let Some(current) = scope {
            if let Some(binding) = current.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = current.parent.clone();
        }
        None
    }

    pub fn assign(&self, name: &str, value: Value) -> Assign {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Assign::Constant;
            }
            binding.value = value;
            return Assign::Done;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Assign::Undeclared,
        }
    }

    pub fn function_scope(self: &Rc<Self>) -> Env {
        let mut scope = Rc::clone(self);
        while !scope.function_scope {
            match &scope.parent {
                Some(parent) => scope = Rc::clone(parent),
                None => break,
            }
        }
        scope
    }

    /// Drop every binding. Closures stored in a scope keep that scope alive through
    /// their captured environment; clearing breaks the cycle.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}
