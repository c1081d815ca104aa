// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};

/// A boxed literal. Values never bind a name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A statically known shape, used as the second operand of `distribute`.
    Shape(Vec<usize>),
    /// The additive identity sentinel. Permitted only as the first operand
    /// of `mapadd`; never persisted into a returned gradient.
    Zero,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Shape(a), Shape(b)) => a == b,
            (Zero, Zero) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Int(a) => a.hash(state),
            Float(a) => a.to_bits().hash(state),
            Bool(a) => a.hash(state),
            Str(a) => a.hash(state),
            Shape(a) => a.hash(state),
            Zero => {}
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Value::*;
        match self {
            Int(a) => write!(f, "{}", a),
            Float(a) => write!(f, "{}", a),
            Bool(a) => write!(f, "{}", a),
            Str(a) => write!(f, "{:?}", a),
            Shape(a) => write!(f, "shape{:?}", a),
            Zero => write!(f, "ZERO"),
        }
    }
}

/// The only node kinds allowed in RHS sub-positions of administrative-normal
/// form: names and literals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leaf {
    Sym(Symbol),
    Val(Value),
}

impl Leaf {
    pub fn sym(s: &Symbol) -> Self {
        Leaf::Sym(s.clone())
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Leaf::Sym(s) => Some(s),
            Leaf::Val(_) => None,
        }
    }
}

impl From<Symbol> for Leaf {
    fn from(s: Symbol) -> Self {
        Leaf::Sym(s)
    }
}

impl From<Value> for Leaf {
    fn from(v: Value) -> Self {
        Leaf::Val(v)
    }
}

impl std::fmt::Display for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leaf::Sym(s) => write!(f, "{}", s),
            Leaf::Val(v) => write!(f, "{}", v),
        }
    }
}

/// The right-hand side of a binding. ANF is enforced structurally: every
/// sub-position is a [`Leaf`], so nested applications cannot be represented.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Leaf(Leaf),
    Apply { func: Leaf, args: Vec<Leaf> },
    Tuple(Vec<Leaf>),
    /// Partial application of a top-level function or primitive to its
    /// leading arguments.
    Closure { func: Symbol, args: Vec<Leaf> },
}

impl Expr {
    pub fn apply(func: Leaf, args: Vec<Leaf>) -> Self {
        Expr::Apply { func, args }
    }

    pub fn closure(func: Symbol, args: Vec<Leaf>) -> Self {
        Expr::Closure { func, args }
    }

    /// Every leaf occurring in the expression, function position included.
    pub fn leaves(&self) -> Vec<&Leaf> {
        match self {
            Expr::Leaf(l) => vec![l],
            Expr::Apply { func, args } => {
                let mut out = vec![func];
                out.extend(args.iter());
                out
            }
            Expr::Tuple(elems) => elems.iter().collect(),
            Expr::Closure { args, .. } => args.iter().collect(),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Leaf(l) => write!(f, "{}", l),
            Expr::Apply { func, args } => {
                write!(f, "{}(", func)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Expr::Closure { func, args } => {
                write!(f, "closure[{}](", func)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The left-hand side of a binding: a single name or a flat deconstructing
/// assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lhs {
    Sym(Symbol),
    Tuple(Vec<Symbol>),
}

impl Lhs {
    /// The symbols bound by this left-hand side.
    pub fn symbols(&self) -> Vec<&Symbol> {
        match self {
            Lhs::Sym(s) => vec![s],
            Lhs::Tuple(syms) => syms.iter().collect(),
        }
    }
}

impl From<Symbol> for Lhs {
    fn from(s: Symbol) -> Self {
        Lhs::Sym(s)
    }
}

impl std::fmt::Display for Lhs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lhs::Sym(s) => write!(f, "{}", s),
            Lhs::Tuple(syms) => {
                write!(f, "(")?;
                for (i, s) in syms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One `lhs = rhs` step of a Let.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub lhs: Lhs,
    pub rhs: Expr,
}

impl Binding {
    pub fn new<L: Into<Lhs>>(lhs: L, rhs: Expr) -> Self {
        Binding {
            lhs: lhs.into(),
            rhs,
        }
    }
}

/// An ordered sequence of bindings followed by the returned symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Let {
    pub bindings: Vec<Binding>,
    pub body: Symbol,
}

/// A top-level function. Once registered in the global environment a Lambda
/// is immutable and shared; all links out of it are symbol lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lambda {
    /// Debug name.
    pub name: String,
    pub params: Vec<Symbol>,
    pub body: Let,
    /// The symbol this Lambda is published under, set at registration.
    pub ref_sym: Option<Symbol>,
    /// The untransformed function this Lambda was derived from, if any.
    pub primal: Option<Symbol>,
    /// Marks generated support graphs (inlining hint for the pipeline).
    pub core: bool,
}

impl Lambda {
    pub fn new(name: &str, params: Vec<Symbol>, body: Let) -> Self {
        Lambda {
            name: name.to_string(),
            params,
            body,
            ref_sym: None,
            primal: None,
            core: false,
        }
    }

    /// Every symbol bound on a left-hand side of the body.
    pub fn bound_symbols(&self) -> Vec<&Symbol> {
        self.body
            .bindings
            .iter()
            .flat_map(|b| b.lhs.symbols())
            .collect()
    }
}

impl std::fmt::Display for Lambda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\u{3bb} {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        writeln!(f, "):")?;
        for b in &self.body.bindings {
            writeln!(f, "  {} = {}", b.lhs, b.rhs)?;
        }
        write!(f, "  in {}", self.body.body)
    }
}
