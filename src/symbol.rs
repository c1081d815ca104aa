// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ir::{Lambda, Leaf, Lhs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a symbol lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// A user function or a generated function registered in the global environment.
    Global,
    /// A primitive operator.
    Builtin,
    /// A parameter or let-bound variable of one Lambda.
    Local,
    /// The discard sink used for accumulation into literals.
    Null,
}

/// Relation of a generated symbol to the symbol it derives from.
/// These tags are preserved on generated code for debugging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    None,
    /// ↑x — the tagged (forward-lifted) version of x.
    Jtag,
    /// ∇x — the sensitivity accumulator for x.
    Sens,
    /// ♦f — the closure-converted backpropagator of f.
    Bprop,
    /// ♢x — the backpropagator closure bound at a call site.
    BpropClos,
    /// Temporary introduced to keep bindings in administrative-normal form.
    TmpLet,
    /// Temporary naming the single backpropagator of a deconstructing assignment.
    TmpBprop,
    /// Temporary holding an extra contribution for a duplicated variable.
    TmpSens,
    /// The discard sink.
    Null,
}

impl Relation {
    fn prefix(self) -> &'static str {
        use Relation::*;
        match self {
            None => "",
            Jtag => "\u{2191}",
            Sens => "\u{2207}",
            Bprop => "\u{2666}",
            BpropClos => "\u{2662}",
            TmpLet => "~",
            TmpBprop => "~b:",
            TmpSens => "~s:",
            Null => "_",
        }
    }
}

/// A versioned, tagged name. Equality is structural; within one Lambda every
/// binding's left-hand side symbol is unique.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub label: String,
    pub namespace: Namespace,
    pub version: u32,
    pub relation: Relation,
}

impl Symbol {
    pub fn new(label: &str, namespace: Namespace, version: u32, relation: Relation) -> Self {
        Symbol {
            label: label.to_string(),
            namespace,
            version,
            relation,
        }
    }

    /// A plain local variable.
    pub fn local(label: &str) -> Self {
        Self::new(label, Namespace::Local, 1, Relation::None)
    }

    /// A top-level function name.
    pub fn global(label: &str) -> Self {
        Self::new(label, Namespace::Global, 1, Relation::None)
    }

    /// A primitive operator name.
    pub fn builtin(label: &str) -> Self {
        Self::new(label, Namespace::Builtin, 1, Relation::None)
    }

    /// The discard sink for gradient contributions of literals.
    pub fn null_sink() -> Self {
        Self::new("_", Namespace::Null, 1, Relation::Null)
    }

    /// Whether the symbol resolves through the global environment.
    pub fn is_toplevel(&self) -> bool {
        matches!(self.namespace, Namespace::Global | Namespace::Builtin)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.relation.prefix(), self.label)?;
        if self.version > 1 {
            write!(f, "#{}", self.version)?;
        }
        Ok(())
    }
}

/// Alpha-freshness service: produces unique variants of a symbol, keyed by
/// `(label, relation)`. `fresh` never returns a symbol already seen by the
/// generator, so a generator seeded from a Lambda never collides with that
/// Lambda's parameters or bindings.
#[derive(Clone, Debug, Default)]
pub struct GenSym {
    versions: HashMap<(String, Relation), u32>,
}

impl GenSym {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a generator with every symbol occurring in `lambda`.
    pub fn scan(lambda: &Lambda) -> Self {
        let mut gen = Self::new();
        for p in &lambda.params {
            gen.record(p);
        }
        for binding in &lambda.body.bindings {
            match &binding.lhs {
                Lhs::Sym(s) => gen.record(s),
                Lhs::Tuple(syms) => {
                    for s in syms {
                        gen.record(s);
                    }
                }
            }
            for leaf in binding.rhs.leaves() {
                if let Leaf::Sym(s) = leaf {
                    gen.record(s);
                }
            }
        }
        gen.record(&lambda.body.body);
        gen
    }

    /// Make the generator aware of an existing symbol.
    pub fn record(&mut self, sym: &Symbol) {
        let key = (sym.label.clone(), sym.relation);
        let entry = self.versions.entry(key).or_insert(0);
        if *entry < sym.version {
            *entry = sym.version;
        }
    }

    /// Return a fresh local symbol deriving `relation` from `base`.
    pub fn fresh(&mut self, base: &Symbol, relation: Relation) -> Symbol {
        let key = (base.label.clone(), relation);
        let entry = self.versions.entry(key).or_insert(0);
        *entry += 1;
        Symbol::new(&base.label, Namespace::Local, *entry, relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_versions() {
        let mut gen = GenSym::new();
        let x = Symbol::local("x");
        let s1 = gen.fresh(&x, Relation::Sens);
        let s2 = gen.fresh(&x, Relation::Sens);
        assert_eq!(s1.version, 1);
        assert_eq!(s2.version, 2);
        assert_ne!(s1, s2);
        // A different relation has its own counter.
        let t1 = gen.fresh(&x, Relation::Jtag);
        assert_eq!(t1.version, 1);
    }

    #[test]
    fn test_record_guards_collisions() {
        let mut gen = GenSym::new();
        let x = Symbol::new("x", Namespace::Local, 3, Relation::Sens);
        gen.record(&x);
        let fresh = gen.fresh(&Symbol::local("x"), Relation::Sens);
        assert_eq!(fresh.version, 4);
    }
}
