// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    builder::{Graph, GraphBuilder, NodeRef},
    composite::ListMap,
    env::Env,
    error::{Error, Result},
    metagraph::{MetaGraph, MultitypeGraph, TypePattern},
    prim::Prim,
    types::{AbstractValue, FunctionRef},
};
use indexmap::IndexMap;

/// Structural recursion over values: the configured nonleaf kinds are
/// traversed elementwise through recursively generated sub-graphs; at leaves
/// a [`MultitypeGraph`] is applied.
pub struct HyperMap {
    name: String,
    nonleaf: Vec<TypePattern>,
    fn_leaf: MultitypeGraph,
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl HyperMap {
    pub fn new(name: &str, nonleaf: Vec<TypePattern>, fn_leaf: MultitypeGraph) -> Self {
        HyperMap {
            name: name.to_string(),
            nonleaf,
            fn_leaf,
            cache: IndexMap::new(),
        }
    }

    fn is_nonleaf(&self, arg: &AbstractValue) -> bool {
        self.nonleaf.iter().any(|p| p.matches(arg))
    }

    fn componentwise(
        &mut self,
        env: &mut Env,
        args: &[AbstractValue],
        components: Vec<Vec<AbstractValue>>,
    ) -> Result<Graph> {
        // Sub-graphs first, then the traversal graph referencing them by
        // symbol.
        let mut subs = Vec::with_capacity(components.len());
        for elems in &components {
            subs.push(self.generate(env, elems)?);
        }
        let mut b = GraphBuilder::new(&self.name);
        let params: Vec<NodeRef> = (0..args.len())
            .map(|i| b.param(&format!("x{}", i + 1)))
            .collect();
        let mut results = Vec::with_capacity(subs.len());
        for (i, sub) in subs.iter().enumerate() {
            let elems: Vec<NodeRef> = params
                .iter()
                .map(|p| b.apply_prim(Prim::TupleGetitem, vec![p.clone(), NodeRef::int(i as i64)]))
                .collect();
            results.push(b.apply(NodeRef::Global(sub.sym.clone()), elems));
        }
        let out = b.apply_prim(Prim::MakeTuple, results);
        b.set_output(out);
        b.finish(env)
    }
}

impl MetaGraph for HyperMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        let first = args.first().ok_or_else(|| Error::empty(func_name!()))?;
        if !self.is_nonleaf(first) {
            return self.fn_leaf.generate(env, args);
        }
        match first {
            AbstractValue::Tuple(elems0) => {
                let mut components = vec![Vec::with_capacity(args.len()); elems0.len()];
                for arg in args {
                    match arg {
                        AbstractValue::Tuple(elems) if elems.len() == elems0.len() => {
                            for (i, e) in elems.iter().enumerate() {
                                components[i].push(e.clone());
                            }
                        }
                        other => {
                            return Err(Error::type_mismatch(
                                func_name!(),
                                format!("mismatched structures: {:?} and {:?}", first, other),
                            ))
                        }
                    }
                }
                self.componentwise(env, args, components)
            }
            AbstractValue::Class { attrs: attrs0, .. } => {
                let mut components = vec![Vec::with_capacity(args.len()); attrs0.len()];
                for arg in args {
                    match arg {
                        AbstractValue::Class { attrs, .. } if attrs.len() == attrs0.len() => {
                            for (i, (_, e)) in attrs.iter().enumerate() {
                                components[i].push(e.clone());
                            }
                        }
                        other => {
                            return Err(Error::type_mismatch(
                                func_name!(),
                                format!("mismatched structures: {:?} and {:?}", first, other),
                            ))
                        }
                    }
                }
                self.componentwise(env, args, components)
            }
            AbstractValue::List(_) => {
                let mut elem_types = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        AbstractValue::List(e) => elem_types.push((**e).clone()),
                        other => {
                            return Err(Error::type_mismatch(
                                func_name!(),
                                format!("mismatched structures: {:?} and {:?}", first, other),
                            ))
                        }
                    }
                }
                let sub = self.generate(env, &elem_types)?;
                let mut lm_args = vec![AbstractValue::Function(FunctionRef::Graph {
                    sym: sub.sym.clone(),
                    nparams: args.len(),
                })];
                lm_args.extend(args.iter().cloned());
                let mut lm = ListMap::new();
                let lm_graph = lm.generate(env, &lm_args)?;
                let mut b = GraphBuilder::new(&self.name);
                let params: Vec<NodeRef> = (0..args.len())
                    .map(|i| b.param(&format!("x{}", i + 1)))
                    .collect();
                let mut call_args = vec![NodeRef::Global(sub.sym.clone())];
                call_args.extend(params);
                let out = b.apply(NodeRef::Global(lm_graph.sym.clone()), call_args);
                b.set_output(out);
                b.finish(env)
            }
            _ => self.fn_leaf.generate(env, args),
        }
    }
}

/// Element-wise addition over algebraic structures: recurses into tuples,
/// lists and records, adds scalars at the leaves.
pub fn hyper_add() -> HyperMap {
    let mut leaf = MultitypeGraph::new("hyper_add");
    leaf.register(
        vec![TypePattern::Number, TypePattern::Number],
        |env, _args| {
            let mut b = GraphBuilder::new("hyper_add.scalar");
            let x = b.param("x");
            let y = b.param("y");
            let out = b.apply_prim(Prim::ScalarAdd, vec![x, y]);
            b.set_output(out);
            b.finish(env)
        },
    );
    HyperMap::new(
        "hyper_add",
        vec![TypePattern::Tuple, TypePattern::List, TypePattern::Class],
        leaf,
    )
}

/// The structural zeros generator: a graph producing a zeroed structure
/// congruent to its argument.
pub fn zeros_like() -> HyperMap {
    let mut leaf = MultitypeGraph::new("zeros_like");
    leaf.register(vec![TypePattern::Function], |env, _args| {
        let mut b = GraphBuilder::new("zeros_like.function");
        let _f = b.param("f");
        let out = b.tuple(Vec::new());
        b.set_output(out);
        b.finish(env)
    });
    leaf.register(vec![TypePattern::Bool], |env, _args| {
        let mut b = GraphBuilder::new("zeros_like.bool");
        let _x = b.param("x");
        b.set_output(NodeRef::bool(false));
        b.finish(env)
    });
    leaf.register(vec![TypePattern::Number], |env, _args| {
        let mut b = GraphBuilder::new("zeros_like.scalar");
        let x = b.param("x");
        let out = b.apply_prim(Prim::CastLike, vec![NodeRef::int(0), x]);
        b.set_output(out);
        b.finish(env)
    });
    leaf.register(vec![TypePattern::Array], |env, _args| {
        let mut b = GraphBuilder::new("zeros_like.array");
        let xs = b.param("xs");
        let sh = b.apply_prim(Prim::Shape, vec![xs]);
        let zero = b.apply_prim(Prim::ToArray, vec![NodeRef::int(0)]);
        let out = b.apply_prim(Prim::Distribute, vec![zero, sh]);
        b.set_output(out);
        b.finish(env)
    });
    HyperMap::new(
        "zeros_like",
        vec![TypePattern::Tuple, TypePattern::List, TypePattern::Class],
        leaf,
    )
}
