// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Gradient IR transforms (gradir)
//!
//! This library is the transformation core of a differentiable-programming
//! compiler. Its input is a program already lowered to a small functional
//! intermediate representation of pure graphs with first-class closures; its
//! output is IR that additionally provides, for every function, a tagged
//! variant computing both the original output and a backpropagator closure
//! yielding input gradients. The transform follows [automatic
//! differentiation in reverse
//! mode](https://en.wikipedia.org/wiki/Automatic_differentiation#Reverse_accumulation)
//! as formulated by Pearlmutter and Siskind ("Lambda the Ultimate
//! Backpropagator").
//!
//! ## Gradient functions
//!
//! For each function `f` passed through [`Grad`], two auxiliary functions
//! are registered in the global environment:
//!
//! * `^f` (the *tagged* version of `f`) returns the tagged version of `f`'s
//!   normal output together with the backpropagator closure `<>f`.
//! * `<|>f` is the closure-converted backpropagator: a top-level function
//!   with no free variables. `<>f` is a closure over it, created in `^f`'s
//!   body. Applied to an output sensitivity it returns the tuple
//!   `(closure_grads, *argument_grads)`.
//!
//! For an ANF assignment `x = f(y, z)` the forward pass emits
//! `(^x, <>x) = ^f(^y, ^z)` and the backward pass, walking bindings in
//! reverse order, accumulates `(grad_f, grad_y, grad_z) += <>x(grad_x)`.
//! Accumulation preserves single assignment: each `+=` binds a fresh
//! versioned sensitivity variable through `mapadd`, whose left operand may
//! be the `ZERO` sentinel when no contribution exists yet.
//!
//! ## Partial application
//!
//! Closures are partial applications of top-level functions. The
//! backpropagator of a function with `nargs_closure = k` groups the leading
//! k input gradients into a sub-tuple, so consumers of a partial
//! application receive `(closure_grads, *arg_grads)`. Primitives
//! participate through the same convention: their gradient factories are
//! parameterized by `nargs_closure` and cached per integer.
//!
//! ## Quick start
//!
//! ```
//! use gradir::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut env = Env::new();
//!
//!     // f(x, y) = x * y, already in administrative-normal form.
//!     let x = Symbol::local("x");
//!     let y = Symbol::local("y");
//!     let t = Symbol::local("t");
//!     let body = Let {
//!         bindings: vec![Binding::new(
//!             t.clone(),
//!             Expr::apply(
//!                 Leaf::Sym(Prim::ScalarMul.sym()),
//!                 vec![Leaf::sym(&x), Leaf::sym(&y)],
//!             ),
//!         )],
//!         body: t,
//!     };
//!     let fsym = env.gen("f", Relation::None);
//!     env.define(fsym.clone(), Lambda::new("f", vec![x, y], body))?;
//!
//!     // Transform, then drive the generated IR with the reference
//!     // evaluator.
//!     let jf = Grad::new(&mut env, fsym, 0)?.transform()?;
//!     let mut vm = Interpreter::new(&mut env);
//!     let result = vm.call_symbol(&jf, vec![Data::Float(3.0), Data::Float(4.0)])?;
//!     let parts = result.as_tuple()?.to_vec();
//!     assert_eq!(parts[0], Data::Float(12.0));
//!     let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
//!     assert_eq!(
//!         grads,
//!         Data::Tuple(vec![Data::unit(), Data::Float(4.0), Data::Float(3.0)])
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Meta-graphs
//!
//! Polymorphic operators synthesize their IR bodies per abstract argument
//! signature through the [`MetaGraph`] trait: [`Elemwise`] lifts scalar
//! operations over broadcast arrays, [`MultitypeGraph`] dispatches on
//! ordered type patterns, [`HyperMap`] folds over algebraic structures,
//! [`Tail`] projects tuple tails, [`ListMap`] walks parallel lists as a
//! tail-recursive iterator loop, and [`GradOperation`] builds the user-facing
//! `grad(f)` operator. Generated graphs are memoized by normalized
//! signature and shared by reference.
//!
//! ## Scope
//!
//! The core neither infers types nor optimizes: it consumes
//! [`AbstractValue`] descriptors produced by inference and emits IR for
//! downstream stages to re-infer. Numeric array kernels are referenced
//! symbolically; the core never allocates buffers.

/// Error and result types.
#[macro_use]
pub mod error;

/// Symbols, relation tags and the alpha-freshness service.
pub mod symbol;

/// The immutable IR node kinds.
pub mod ir;

/// The global environment of registered functions.
pub mod env;

/// Host-level runtime values.
pub mod value;

/// Structural zeros and element-wise additive combination.
pub mod arith;

/// The J / Jinv lifting operators.
pub mod lift;

/// The primitive registry and gradient factories.
pub mod prim;

/// The reverse-mode AD program transform.
pub mod grad;

/// The mutable graph builder behind the meta-graph engine.
pub mod builder;

/// Abstract type and shape descriptors.
pub mod types;

/// The meta-graph engine and type-dispatched graphs.
pub mod metagraph;

/// Elementwise lifting over broadcast arrays.
pub mod elemwise;

/// Structural folds over algebraic structures.
pub mod hypermap;

/// Tuple tails, list mapping and the `grad` operation.
pub mod composite;

/// The reference evaluator.
pub mod interp;

/// Convenient prelude.
/// For testing and external use only.
pub mod prelude {
    pub use crate::{
        arith::{fill, mapadd, ones_like, zeros_like},
        builder::{Graph, GraphBuilder, NodeRef},
        composite::{GradOperation, ListMap, Tail},
        elemwise::Elemwise,
        env::{Env, Global},
        error::{Error, Result},
        func_name,
        grad::Grad,
        hypermap::{hyper_add, HyperMap},
        interp::Interpreter,
        ir::{Binding, Expr, Lambda, Leaf, Let, Lhs, Value},
        lift::{j, jinv, jx},
        metagraph::{MetaGraph, MultitypeGraph, TypePattern},
        prim::{GradGroup, Prim, Registry},
        symbol::{GenSym, Namespace, Relation, Symbol},
        types::{broadcast_shape, AbstractValue, Dim, FunctionRef, ScalarType, Shape},
        value::Data,
    };
    pub use thiserror::Error as _;
}

#[cfg(doc)]
use crate::prelude::*;
