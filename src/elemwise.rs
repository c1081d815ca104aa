// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    builder::{Graph, GraphBuilder, NodeRef},
    env::Env,
    error::{Error, Result},
    metagraph::MetaGraph,
    prim::Prim,
    types::{broadcast_shape, AbstractValue, Shape},
};
use indexmap::IndexMap;

/// Generate a graph for an elemwise operation.
///
/// * If any argument is an array, scalar arguments are converted with
///   `to_array`, every operand is broadcast to the common shape, and
///   `array_map` is applied.
/// * Otherwise the body dispatches to the first operand's method of the
///   given name.
pub struct Elemwise {
    mname: String,
    scalar_op: Option<Prim>,
    infer_value: bool,
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl Elemwise {
    pub fn new(mname: &str, scalar_op: Option<Prim>) -> Self {
        Elemwise {
            mname: mname.to_string(),
            scalar_op,
            infer_value: false,
            cache: IndexMap::new(),
        }
    }

    /// Keep literal argument values in the signature (used by the
    /// comparison family).
    pub fn with_infer_value(mname: &str, scalar_op: Option<Prim>) -> Self {
        Elemwise {
            mname: mname.to_string(),
            scalar_op,
            infer_value: true,
            cache: IndexMap::new(),
        }
    }

    pub fn add() -> Self {
        Self::new("__add__", Some(Prim::ScalarAdd))
    }

    pub fn sub() -> Self {
        Self::new("__sub__", Some(Prim::ScalarSub))
    }

    pub fn mul() -> Self {
        Self::new("__mul__", Some(Prim::ScalarMul))
    }

    pub fn truediv() -> Self {
        Self::new("__truediv__", None)
    }

    pub fn floordiv() -> Self {
        Self::new("__floordiv__", None)
    }

    pub fn eq() -> Self {
        Self::with_infer_value("__eq__", Some(Prim::ScalarEq))
    }

    pub fn lt() -> Self {
        Self::with_infer_value("__lt__", Some(Prim::ScalarLt))
    }

    pub fn gt() -> Self {
        Self::with_infer_value("__gt__", Some(Prim::ScalarGt))
    }

    /// The function mapped over array elements: the scalar primitive when
    /// one was supplied, otherwise this operation's own graph specialized
    /// for the element scalars.
    fn mapped_function(
        &mut self,
        env: &mut Env,
        args: &[AbstractValue],
    ) -> Result<NodeRef> {
        if let Some(op) = self.scalar_op {
            return Ok(NodeRef::Global(op.sym()));
        }
        let mut scalar_args = Vec::with_capacity(args.len());
        for a in args {
            match a.element_type() {
                Some(ty) => scalar_args.push(AbstractValue::scalar(ty)),
                None => {
                    return Err(Error::type_mismatch(
                        func_name!(),
                        format!("{} is not applicable to {:?}", self.mname, a),
                    ))
                }
            }
        }
        let g = self.generate(env, &scalar_args)?;
        Ok(NodeRef::Global(g.sym))
    }
}

impl MetaGraph for Elemwise {
    fn name(&self) -> &str {
        &self.mname
    }

    fn normalize_args(&self, args: &[AbstractValue]) -> Vec<AbstractValue> {
        if self.infer_value {
            args.to_vec()
        } else {
            args.iter().map(crate::types::broaden).collect()
        }
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        if args.is_empty() {
            return Err(Error::empty(func_name!()));
        }
        let shapes: Vec<Shape> = args
            .iter()
            .filter_map(|a| match a {
                AbstractValue::Array { shape, .. } => Some(shape.clone()),
                _ => None,
            })
            .collect();
        let is_array_op = !shapes.is_empty();

        let mapped = if is_array_op {
            Some(self.mapped_function(env, args)?)
        } else {
            None
        };

        let mut b = GraphBuilder::new(&self.mname);
        let mut params = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let p = b.param(&format!("x{}", i + 1));
            let p = if is_array_op && !arg.is_array() {
                b.apply_prim(Prim::ToArray, vec![p])
            } else {
                p
            };
            params.push(p);
        }

        let output = if is_array_op {
            let mut final_shape = shapes[0].clone();
            for s in &shapes[1..] {
                final_shape = broadcast_shape(&final_shape, s)?;
            }
            let transformed = if final_shape.has_wildcard() {
                // The shapes must be recomputed dynamically at runtime.
                let argshapes: Vec<NodeRef> = params
                    .iter()
                    .map(|p| b.apply_prim(Prim::Shape, vec![p.clone()]))
                    .collect();
                let mut acc = argshapes[0].clone();
                for s in &argshapes[1..] {
                    acc = b.apply_prim(Prim::BroadcastShape, vec![acc, s.clone()]);
                }
                params
                    .iter()
                    .map(|p| b.apply_prim(Prim::Distribute, vec![p.clone(), acc.clone()]))
                    .collect::<Vec<_>>()
            } else {
                let shape_val = final_shape.to_value()?;
                let mut out = Vec::with_capacity(params.len());
                for (arg, p) in args.iter().zip(params.into_iter()) {
                    let arg_shape = match arg {
                        AbstractValue::Array { shape, .. } => shape.clone(),
                        _ => Shape::known(&[]),
                    };
                    if arg_shape == final_shape {
                        out.push(p);
                    } else {
                        out.push(b.apply_prim(
                            Prim::Distribute,
                            vec![p, NodeRef::Const(shape_val.clone())],
                        ));
                    }
                }
                out
            };
            let mut map_args = vec![mapped.expect("array op has a mapped function")];
            map_args.extend(transformed);
            b.apply_prim(Prim::ArrayMap, map_args)
        } else {
            let mut params = params.into_iter();
            let first = params.next().ok_or_else(|| Error::empty(func_name!()))?;
            let method = b.apply_prim(Prim::GetAttr, vec![first, NodeRef::str(&self.mname)]);
            b.apply(method, params.collect())
        };
        b.set_output(output);
        b.finish(env)
    }
}
