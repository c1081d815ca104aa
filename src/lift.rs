// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The J / Jinv lifting operators: turn values and functions into their
//! backprop-enabled counterparts and back.

use crate::{
    env::{Env, Global},
    error::{Error, Result},
    grad::Grad,
    prim,
    symbol::Symbol,
    value::Data,
};

/// Forward-lift a value.
///
/// * Scalars are untouched.
/// * Tuples are lifted componentwise.
/// * A primitive or top-level function becomes its gradient wrapper for
///   `nargs_closure = 0`.
/// * A closure with k stored arguments becomes a closure over the wrapper
///   for `nargs_closure = k`, with each stored argument lifted.
/// * `Null` and `ZERO` pass through.
pub fn j(env: &mut Env, x: &Data) -> Result<Data> {
    match x {
        Data::Int(_) | Data::Float(_) | Data::Bool(_) => Ok(x.clone()),
        Data::Tuple(elems) => Ok(Data::Tuple(
            elems.iter().map(|e| j(env, e)).collect::<Result<_>>()?,
        )),
        Data::Prim(p) => Ok(Data::Func(prim::grad(env, *p, 0)?)),
        Data::Func(sym) => Ok(Data::Func(jx(env, sym, 0)?)),
        Data::Closure { func, args } => {
            let jfunc = jx(env, func, args.len())?;
            let jargs = args.iter().map(|a| j(env, a)).collect::<Result<_>>()?;
            Ok(Data::Closure {
                func: jfunc,
                args: jargs,
            })
        }
        Data::Null | Data::Zero => Ok(x.clone()),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("invalid argument for J: {:?}", other),
        )),
    }
}

/// Undo the effect of [`j`]. Must never be applied to a function that was
/// not forward-lifted; on a primitive it is fatal (primitives have no
/// primal).
pub fn jinv(env: &mut Env, x: &Data) -> Result<Data> {
    match x {
        Data::Int(_) | Data::Float(_) | Data::Bool(_) => Ok(x.clone()),
        Data::Tuple(elems) => Ok(Data::Tuple(
            elems.iter().map(|e| jinv(env, e)).collect::<Result<_>>()?,
        )),
        Data::Prim(p) => Err(Error::unliftable_primal(func_name!(), p.name())),
        Data::Func(sym) => {
            let primal = primal_symbol(env, sym)?;
            match env.resolve(&primal)? {
                Global::Prim(p) => Ok(Data::Prim(p)),
                Global::Func(_) => Ok(Data::Func(primal)),
            }
        }
        Data::Closure { func, args } => {
            let primal = primal_symbol(env, func)?;
            let pargs = args.iter().map(|a| jinv(env, a)).collect::<Result<_>>()?;
            Ok(Data::Closure {
                func: primal,
                args: pargs,
            })
        }
        Data::Null | Data::Zero => Ok(x.clone()),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("invalid argument for Jinv: {:?}", other),
        )),
    }
}

/// The gradient factory dispatch: the backward-enabled wrapper of a
/// primitive or compiled function, for a given number of closed-over
/// arguments. Compiled-function results are cached in the environment.
pub fn jx(env: &mut Env, sym: &Symbol, nargs_closure: usize) -> Result<Symbol> {
    match env.resolve(sym)? {
        Global::Prim(p) => prim::grad(env, p, nargs_closure),
        Global::Func(_) => {
            if let Some(cached) = env.cached_grad(sym, nargs_closure) {
                return Ok(cached);
            }
            let gsym = Grad::new(env, sym.clone(), nargs_closure)?.transform()?;
            env.cache_grad(sym.clone(), nargs_closure, gsym.clone());
            Ok(gsym)
        }
    }
}

fn primal_symbol(env: &Env, sym: &Symbol) -> Result<Symbol> {
    match env.resolve(sym)? {
        Global::Prim(p) => Err(Error::unliftable_primal(func_name!(), p.name())),
        Global::Func(lambda) => lambda.primal.clone().ok_or_else(|| {
            Error::unliftable_primal(
                func_name!(),
                format!("{} was never forward-lifted", sym),
            )
        }),
    }
}
