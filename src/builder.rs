// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    env::Env,
    error::{Error, Result},
    ir::{Binding, Expr, Lambda, Leaf, Let, Value},
    prim::Prim,
    symbol::{GenSym, Relation, Symbol},
};
use id_arena::{Arena, Id};
use std::collections::HashMap;
use std::sync::Arc;

/// A node under construction in a [`GraphBuilder`].
#[derive(Clone, Debug)]
pub enum GNode {
    Param(Symbol),
    Apply { func: NodeRef, args: Vec<NodeRef> },
    Tuple(Vec<NodeRef>),
}

/// Reference to an operand of a node: another node, a top-level symbol, or a
/// literal.
#[derive(Clone, Debug)]
pub enum NodeRef {
    Node(Id<GNode>),
    Global(Symbol),
    Const(Value),
}

impl NodeRef {
    pub fn int(i: i64) -> Self {
        NodeRef::Const(Value::Int(i))
    }

    pub fn bool(b: bool) -> Self {
        NodeRef::Const(Value::Bool(b))
    }

    pub fn str(s: &str) -> Self {
        NodeRef::Const(Value::Str(s.to_string()))
    }
}

/// The finished product of a meta-graph generator: a Lambda registered in
/// the global environment, addressed by its symbol. Cache hits hand the same
/// `Arc` back, so determinism is observable as pointer identity.
#[derive(Clone, Debug)]
pub struct Graph {
    pub sym: Symbol,
    pub lambda: Arc<Lambda>,
}

impl Graph {
    /// Whether two handles designate the very same generated graph.
    pub fn same(a: &Graph, b: &Graph) -> bool {
        Arc::ptr_eq(&a.lambda, &b.lambda)
    }
}

/// Mutable builder producing fresh nodes, recording parameters, and
/// finalizing into an ANF [`Lambda`] once the output is set.
pub struct GraphBuilder {
    name: String,
    nodes: Arena<GNode>,
    params: Vec<Id<GNode>>,
    output: Option<NodeRef>,
    core: bool,
    gensym: GenSym,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        GraphBuilder {
            name: name.to_string(),
            nodes: Arena::new(),
            params: Vec::new(),
            output: None,
            core: false,
            gensym: GenSym::new(),
        }
    }

    /// Flag the generated graph as a core support function.
    pub fn mark_core(&mut self) {
        self.core = true;
    }

    /// Add a parameter with the given debug label.
    pub fn param(&mut self, label: &str) -> NodeRef {
        let sym = self.gensym.fresh(&Symbol::local(label), Relation::None);
        let id = self.nodes.alloc(GNode::Param(sym));
        self.params.push(id);
        NodeRef::Node(id)
    }

    /// Apply a computed or named function to operands.
    pub fn apply(&mut self, func: NodeRef, args: Vec<NodeRef>) -> NodeRef {
        NodeRef::Node(self.nodes.alloc(GNode::Apply { func, args }))
    }

    /// Apply a primitive operator.
    pub fn apply_prim(&mut self, prim: Prim, args: Vec<NodeRef>) -> NodeRef {
        self.apply(NodeRef::Global(prim.sym()), args)
    }

    /// Construct a tuple.
    pub fn tuple(&mut self, elems: Vec<NodeRef>) -> NodeRef {
        NodeRef::Node(self.nodes.alloc(GNode::Tuple(elems)))
    }

    pub fn set_output(&mut self, output: NodeRef) {
        self.output = Some(output);
    }

    /// Finalize into a Lambda registered under a fresh global symbol derived
    /// from the builder's name.
    pub fn finish(self, env: &mut Env) -> Result<Graph> {
        let name = self.name.clone();
        let sym = env.gen(&name, Relation::None);
        self.finish_at(env, sym)
    }

    /// Finalize into a Lambda registered under `sym`.
    pub fn finish_at(mut self, env: &mut Env, sym: Symbol) -> Result<Graph> {
        let output = self
            .output
            .take()
            .ok_or_else(|| Error::generation_failure(func_name!(), "graph has no output"))?;
        let mut syms: HashMap<Id<GNode>, Symbol> = HashMap::new();
        let mut params = Vec::with_capacity(self.params.len());
        let mut bindings = Vec::new();
        let base = Symbol::local("t");
        for (id, node) in self.nodes.iter() {
            match node {
                GNode::Param(s) => {
                    syms.insert(id, s.clone());
                    params.push(s.clone());
                }
                GNode::Apply { func, args } => {
                    let func = Self::leaf(func, &syms)?;
                    let args = args
                        .iter()
                        .map(|a| Self::leaf(a, &syms))
                        .collect::<Result<Vec<_>>>()?;
                    let s = self.gensym.fresh(&base, Relation::None);
                    bindings.push(Binding::new(s.clone(), Expr::Apply { func, args }));
                    syms.insert(id, s);
                }
                GNode::Tuple(elems) => {
                    let elems = elems
                        .iter()
                        .map(|e| Self::leaf(e, &syms))
                        .collect::<Result<Vec<_>>>()?;
                    let s = self.gensym.fresh(&base, Relation::None);
                    bindings.push(Binding::new(s.clone(), Expr::Tuple(elems)));
                    syms.insert(id, s);
                }
            }
        }
        let body = match &output {
            NodeRef::Node(id) => syms
                .get(id)
                .cloned()
                .ok_or_else(|| Error::generation_failure(func_name!(), "unbound output node"))?,
            other => {
                let leaf = Self::leaf(other, &syms)?;
                let s = self.gensym.fresh(&base, Relation::None);
                bindings.push(Binding::new(s.clone(), Expr::Leaf(leaf)));
                s
            }
        };
        let mut lambda = Lambda::new(&self.name, params, Let { bindings, body });
        lambda.core = self.core;
        let lambda = env.define(sym.clone(), lambda)?;
        Ok(Graph { sym, lambda })
    }

    fn leaf(r: &NodeRef, syms: &HashMap<Id<GNode>, Symbol>) -> Result<Leaf> {
        match r {
            NodeRef::Node(id) => syms
                .get(id)
                .map(Leaf::sym)
                .ok_or_else(|| Error::generation_failure(func_name!(), "operand precedes its definition")),
            NodeRef::Global(s) => Ok(Leaf::Sym(s.clone())),
            NodeRef::Const(v) => Ok(Leaf::Val(v.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expr;

    #[test]
    fn test_builder_emits_anf() -> Result<()> {
        let mut env = Env::new();
        let mut b = GraphBuilder::new("double");
        let x = b.param("x");
        let y = b.apply_prim(Prim::ScalarAdd, vec![x.clone(), x]);
        b.set_output(y);
        let g = b.finish(&mut env)?;
        assert_eq!(g.lambda.params.len(), 1);
        assert_eq!(g.lambda.body.bindings.len(), 1);
        match &g.lambda.body.bindings[0].rhs {
            Expr::Apply { args, .. } => assert_eq!(args.len(), 2),
            other => panic!("unexpected rhs: {:?}", other),
        }
        assert!(env.contains(&g.sym));
        Ok(())
    }
}
