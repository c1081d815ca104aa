// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A reference evaluator over [`Data`]. The production virtual machine is a
//! downstream collaborator; this walk is what the compile-time reductions
//! and the test-suite drive generated IR with.

use crate::{
    env::{Env, Global},
    error::{Error, Result},
    ir::{Expr, Lambda, Leaf, Lhs},
    symbol::Symbol,
    value::Data,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Interpreter<'e> {
    env: &'e mut Env,
}

impl<'e> Interpreter<'e> {
    pub fn new(env: &'e mut Env) -> Self {
        Interpreter { env }
    }

    /// Call the function registered under `sym`.
    pub fn call_symbol(&mut self, sym: &Symbol, args: Vec<Data>) -> Result<Data> {
        let f = self.resolve_data(sym)?;
        self.call(f, args)
    }

    /// Call a function value: a primitive, a compiled function, or a
    /// closure (whose stored arguments are prepended).
    pub fn call(&mut self, f: Data, args: Vec<Data>) -> Result<Data> {
        match f {
            Data::Prim(p) => {
                let forward = self.env.prims.forward(p)?;
                forward(self.env, &args)
            }
            Data::Func(sym) => {
                let lambda = self.env.resolve_func(&sym)?;
                self.run(&lambda, args)
            }
            Data::Closure {
                func,
                args: stored,
            } => {
                let mut all = stored;
                all.extend(args);
                self.call_symbol(&func, all)
            }
            other => Err(Error::type_mismatch(
                func_name!(),
                format!("{:?} is not callable", other),
            )),
        }
    }

    fn run(&mut self, lambda: &Arc<Lambda>, args: Vec<Data>) -> Result<Data> {
        if args.len() != lambda.params.len() {
            return Err(Error::arity(func_name!(), lambda.params.len(), args.len()));
        }
        let mut frame: HashMap<Symbol, Data> = HashMap::new();
        for (p, a) in lambda.params.iter().zip(args.into_iter()) {
            frame.insert(p.clone(), a);
        }
        for binding in &lambda.body.bindings {
            let value = match &binding.rhs {
                Expr::Leaf(l) => self.leaf(&frame, l)?,
                Expr::Apply { func, args } => {
                    let f = self.leaf(&frame, func)?;
                    let a = args
                        .iter()
                        .map(|x| self.leaf(&frame, x))
                        .collect::<Result<Vec<_>>>()?;
                    self.call(f, a)?
                }
                Expr::Tuple(elems) => Data::Tuple(
                    elems
                        .iter()
                        .map(|x| self.leaf(&frame, x))
                        .collect::<Result<_>>()?,
                ),
                Expr::Closure { func, args } => Data::Closure {
                    func: func.clone(),
                    args: args
                        .iter()
                        .map(|x| self.leaf(&frame, x))
                        .collect::<Result<_>>()?,
                },
            };
            match &binding.lhs {
                Lhs::Sym(s) => {
                    frame.insert(s.clone(), value);
                }
                Lhs::Tuple(syms) => match value {
                    Data::Tuple(elems) if elems.len() == syms.len() => {
                        for (s, v) in syms.iter().zip(elems.into_iter()) {
                            frame.insert(s.clone(), v);
                        }
                    }
                    other => {
                        return Err(Error::type_mismatch(
                            func_name!(),
                            format!(
                                "cannot deconstruct {:?} into {} names in {}",
                                other,
                                syms.len(),
                                lambda.name
                            ),
                        ))
                    }
                },
            }
        }
        frame
            .get(&lambda.body.body)
            .cloned()
            .ok_or_else(|| Error::missing_global(func_name!(), &lambda.body.body))
    }

    fn resolve_data(&self, sym: &Symbol) -> Result<Data> {
        match self.env.resolve(sym)? {
            Global::Func(_) => Ok(Data::Func(sym.clone())),
            Global::Prim(p) => Ok(Data::Prim(p)),
        }
    }

    fn leaf(&self, frame: &HashMap<Symbol, Data>, leaf: &Leaf) -> Result<Data> {
        match leaf {
            Leaf::Val(v) => Ok(Data::from_value(v)),
            Leaf::Sym(s) if s.is_toplevel() => self.resolve_data(s),
            Leaf::Sym(s) => frame
                .get(s)
                .cloned()
                .ok_or_else(|| Error::missing_global(func_name!(), s)),
        }
    }
}
