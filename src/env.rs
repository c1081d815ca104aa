// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    error::{Error, Result},
    ir::Lambda,
    prim::{Prim, Registry},
    symbol::{GenSym, Namespace, Relation, Symbol},
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// What a top-level symbol resolves to.
#[derive(Clone, Debug)]
pub enum Global {
    Func(Arc<Lambda>),
    Prim(Prim),
}

/// The process-scoped environment shared by the Grad transform, the gradient
/// factories and the meta-graph generators. Registered Lambdas live until the
/// pipeline ends; overwriting an entry is a programming error.
pub struct Env {
    globals: IndexMap<Symbol, Arc<Lambda>>,
    gensym: GenSym,
    /// Gradient factory cache for compiled functions, per `nargs_closure`.
    grad_cache: HashMap<(Symbol, usize), Symbol>,
    /// The primitive registry.
    pub prims: Registry,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Env {
            globals: IndexMap::new(),
            gensym: GenSym::new(),
            grad_cache: HashMap::new(),
            prims: Registry::standard(),
        }
    }

    /// Produce a fresh global symbol deriving `relation` from `label`.
    pub fn gen(&mut self, label: &str, relation: Relation) -> Symbol {
        let base = Symbol::global(label);
        let mut sym = self.gensym.fresh(&base, relation);
        sym.namespace = Namespace::Global;
        sym
    }

    /// Register `lambda` under `sym`. Registration is always the final step
    /// of a transform, so failures upstream leave the environment untouched.
    pub fn define(&mut self, sym: Symbol, mut lambda: Lambda) -> Result<Arc<Lambda>> {
        if self.globals.contains_key(&sym) {
            return Err(Error::duplicate_global(&sym));
        }
        lambda.ref_sym = Some(sym.clone());
        self.gensym.record(&sym);
        let lambda = Arc::new(lambda);
        self.globals.insert(sym, lambda.clone());
        Ok(lambda)
    }

    /// Resolve a top-level symbol to a function or primitive. Builtin
    /// symbols name primitives unless a generated function (a primitive
    /// backpropagator) was registered under them.
    pub fn resolve(&self, sym: &Symbol) -> Result<Global> {
        match sym.namespace {
            Namespace::Builtin => {
                if let Some(f) = self.globals.get(sym) {
                    return Ok(Global::Func(f.clone()));
                }
                match Prim::from_name(&sym.label) {
                    Some(p) if sym.relation == Relation::None => Ok(Global::Prim(p)),
                    _ => Err(Error::missing_global(func_name!(), sym)),
                }
            }
            Namespace::Global => match self.globals.get(sym) {
                Some(f) => Ok(Global::Func(f.clone())),
                None => Err(Error::missing_global(func_name!(), sym)),
            },
            _ => Err(Error::missing_global(func_name!(), sym)),
        }
    }

    /// Resolve a symbol that must name a compiled function.
    pub fn resolve_func(&self, sym: &Symbol) -> Result<Arc<Lambda>> {
        match self.resolve(sym)? {
            Global::Func(f) => Ok(f),
            Global::Prim(_) => Err(Error::type_mismatch(
                func_name!(),
                format!("{} is a primitive, not a compiled function", sym),
            )),
        }
    }

    pub fn contains(&self, sym: &Symbol) -> bool {
        self.globals.contains_key(sym)
    }

    /// Registered symbols, in registration order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.globals.keys()
    }

    pub(crate) fn cached_grad(&self, sym: &Symbol, nargs_closure: usize) -> Option<Symbol> {
        self.grad_cache.get(&(sym.clone(), nargs_closure)).cloned()
    }

    pub(crate) fn cache_grad(&mut self, sym: Symbol, nargs_closure: usize, grad: Symbol) {
        self.grad_cache.insert((sym, nargs_closure), grad);
    }
}
