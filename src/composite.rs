// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Meta-graphs implemented on top of the graph builder: tuple tails, list
//! mapping as a tail-recursive loop, and the `grad` operation.

use crate::{
    builder::{Graph, GraphBuilder, NodeRef},
    env::Env,
    error::{Error, Result},
    metagraph::MetaGraph,
    prim::Prim,
    symbol::{Relation, Symbol},
    types::{AbstractValue, FunctionRef},
};
use indexmap::IndexMap;

/// `tail(x)` generates `make_tuple(x[1], .., x[k-1])` for a k-length tuple.
pub struct Tail {
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl Tail {
    pub fn new() -> Self {
        Tail {
            cache: IndexMap::new(),
        }
    }
}

impl Default for Tail {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaGraph for Tail {
    fn name(&self) -> &str {
        "tail"
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        if args.len() != 1 {
            return Err(Error::type_mismatch(func_name!(), "tail takes one argument"));
        }
        let elems = match &args[0] {
            AbstractValue::Tuple(elems) => elems,
            other => {
                return Err(Error::type_mismatch(
                    func_name!(),
                    format!("tail requires a tuple, got {:?}", other),
                ))
            }
        };
        if elems.is_empty() {
            return Err(Error::type_mismatch(
                func_name!(),
                "tail requires a non-empty tuple",
            ));
        }
        let mut b = GraphBuilder::new("tail");
        b.mark_core();
        let tup = b.param("tup");
        let rest: Vec<NodeRef> = (1..elems.len())
            .map(|i| b.apply_prim(Prim::TupleGetitem, vec![tup.clone(), NodeRef::int(i as i64)]))
            .collect();
        let out = b.apply_prim(Prim::MakeTuple, rest);
        b.set_output(out);
        b.finish(env)
    }
}

/// `list_map(f, xs, ..)` walks parallel lists through the sequence-iterator
/// state machine: the condition graph checks `iter_hasnext` on every
/// iterator and selects between the body graph and a halt graph with
/// `switch`; the body computes `iter_next` on each iterator, appends the
/// mapped element, and tail-calls the condition graph.
pub struct ListMap {
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl ListMap {
    pub fn new() -> Self {
        ListMap {
            cache: IndexMap::new(),
        }
    }
}

impl Default for ListMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaGraph for ListMap {
    fn name(&self) -> &str {
        "list_map"
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        if args.len() < 2 {
            return Err(Error::type_mismatch(
                func_name!(),
                "list_map takes at least two arguments",
            ));
        }
        for t in &args[1..] {
            if !matches!(t, AbstractValue::List(_)) {
                return Err(Error::type_mismatch(
                    func_name!(),
                    format!("list_map requires lists, not {:?}", t),
                ));
            }
        }
        let nlists = args.len() - 1;
        let cond_sym = env.gen("list_map.cond", Relation::None);
        let body_sym = env.gen("list_map.body", Relation::None);
        let halt_sym = env.gen("list_map.halt", Relation::None);

        // halt: the loop state collapses to the accumulated list.
        {
            let mut b = GraphBuilder::new("list_map.halt");
            let _fn = b.param("fn");
            let resl = b.param("resl");
            for i in 0..nlists {
                b.param(&format!("it{}", i + 1));
            }
            b.set_output(resl);
            b.finish_at(env, halt_sym.clone())?;
        }

        // body: consume one element from every iterator.
        {
            let mut b = GraphBuilder::new("list_map.body");
            b.mark_core();
            let f = b.param("fn");
            let resl = b.param("resl");
            let iters: Vec<NodeRef> = (0..nlists).map(|i| b.param(&format!("it{}", i + 1))).collect();
            let nexts: Vec<NodeRef> = iters
                .iter()
                .map(|it| b.apply_prim(Prim::IterNext, vec![it.clone()]))
                .collect();
            let values: Vec<NodeRef> = nexts
                .iter()
                .map(|n| b.apply_prim(Prim::TupleGetitem, vec![n.clone(), NodeRef::int(0)]))
                .collect();
            let iters2: Vec<NodeRef> = nexts
                .iter()
                .map(|n| b.apply_prim(Prim::TupleGetitem, vec![n.clone(), NodeRef::int(1)]))
                .collect();
            let mapped = b.apply(f.clone(), values);
            let resl2 = b.apply_prim(Prim::ListAppend, vec![resl, mapped]);
            let mut loop_args = vec![f, resl2];
            loop_args.extend(iters2);
            let out = b.apply(NodeRef::Global(cond_sym.clone()), loop_args);
            b.set_output(out);
            b.finish_at(env, body_sym.clone())?;
        }

        // cond: keep looping while every iterator has a next element.
        {
            let mut b = GraphBuilder::new("list_map.cond");
            b.mark_core();
            let f = b.param("fn");
            let resl = b.param("resl");
            let iters: Vec<NodeRef> = (0..nlists).map(|i| b.param(&format!("it{}", i + 1))).collect();
            let hasnexts: Vec<NodeRef> = iters
                .iter()
                .map(|it| b.apply_prim(Prim::IterHasnext, vec![it.clone()]))
                .collect();
            let mut cond = hasnexts[0].clone();
            for h in &hasnexts[1..] {
                cond = b.apply_prim(Prim::BoolAnd, vec![cond, h.clone()]);
            }
            let sel = b.apply_prim(
                Prim::Switch,
                vec![
                    cond,
                    NodeRef::Global(body_sym.clone()),
                    NodeRef::Global(halt_sym.clone()),
                ],
            );
            let mut loop_args = vec![f, resl];
            loop_args.extend(iters);
            let out = b.apply(sel, loop_args);
            b.set_output(out);
            b.finish_at(env, cond_sym.clone())?;
        }

        // The entry graph consumes the first element before the loop.
        let mut b = GraphBuilder::new("list_map");
        b.mark_core();
        let f = b.param("fn");
        let lists: Vec<NodeRef> = (0..nlists).map(|i| b.param(&format!("l{}", i + 1))).collect();
        let iters: Vec<NodeRef> = lists
            .iter()
            .map(|l| b.apply_prim(Prim::ListIter, vec![l.clone()]))
            .collect();
        let nexts: Vec<NodeRef> = iters
            .iter()
            .map(|it| b.apply_prim(Prim::IterNext, vec![it.clone()]))
            .collect();
        let values: Vec<NodeRef> = nexts
            .iter()
            .map(|n| b.apply_prim(Prim::TupleGetitem, vec![n.clone(), NodeRef::int(0)]))
            .collect();
        let iters2: Vec<NodeRef> = nexts
            .iter()
            .map(|n| b.apply_prim(Prim::TupleGetitem, vec![n.clone(), NodeRef::int(1)]))
            .collect();
        let mapped = b.apply(f.clone(), values);
        let resl = b.apply_prim(Prim::MakeList, vec![mapped]);
        let mut loop_args = vec![f, resl];
        loop_args.extend(iters2);
        let out = b.apply(NodeRef::Global(cond_sym), loop_args);
        b.set_output(out);
        b.finish(env)
    }
}

/// Implements the `grad(f)` operation: `grad(f)(x, ..)` returns
/// `df(x, ..)/dx`.
///
/// The generated `df` applies `J(f)` to J-lifted inputs, extracts the
/// backpropagator from the lifted result, and calls it with a sensitivity:
/// an explicit parameter when `sens_param` is set, otherwise a one cast to
/// the output's type. With `get_all` the gradients of all inputs are
/// returned; otherwise only the first argument's gradient.
pub struct GradOperation {
    sens_param: bool,
    get_all: bool,
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl GradOperation {
    pub fn new() -> Self {
        Self::with_options(false, false)
    }

    pub fn with_options(sens_param: bool, get_all: bool) -> Self {
        GradOperation {
            sens_param,
            get_all,
            cache: IndexMap::new(),
        }
    }

    fn make_df(&self, env: &mut Env, fsym: &Symbol, nparams: usize) -> Result<Graph> {
        let mut b = GraphBuilder::new(&format!("{}.df", fsym.label));
        let params: Vec<NodeRef> = (0..nparams).map(|i| b.param(&format!("x{}", i + 1))).collect();
        let jf = b.apply_prim(Prim::J, vec![NodeRef::Global(fsym.clone())]);
        let jparams: Vec<NodeRef> = params
            .iter()
            .map(|p| b.apply_prim(Prim::J, vec![p.clone()]))
            .collect();
        let app = b.apply(jf, jparams);
        let raw_out = b.apply_prim(Prim::TupleGetitem, vec![app.clone(), NodeRef::int(0)]);
        let out = b.apply_prim(Prim::Jinv, vec![raw_out]);
        let bprop = b.apply_prim(Prim::TupleGetitem, vec![app, NodeRef::int(1)]);
        let sens = if self.sens_param {
            b.param("dout")
        } else {
            b.apply_prim(Prim::CastLike, vec![NodeRef::int(1), out])
        };
        let bapp = b.apply(bprop, vec![sens]);
        let output = if self.get_all {
            // Drop the closure-gradient slot.
            let elems: Vec<NodeRef> = (1..=nparams)
                .map(|i| b.apply_prim(Prim::TupleGetitem, vec![bapp.clone(), NodeRef::int(i as i64)]))
                .collect();
            b.apply_prim(Prim::MakeTuple, elems)
        } else {
            b.apply_prim(Prim::TupleGetitem, vec![bapp, NodeRef::int(1)])
        };
        b.set_output(output);
        b.finish(env)
    }
}

impl Default for GradOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaGraph for GradOperation {
    fn name(&self) -> &str {
        "grad"
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        let (fsym, nparams) = match args {
            [AbstractValue::Function(FunctionRef::Graph { sym, nparams })] => (sym.clone(), *nparams),
            other => {
                return Err(Error::type_mismatch(
                    func_name!(),
                    format!("grad requires a unique graph function, got {:?}", other),
                ))
            }
        };
        let df = self.make_df(env, &fsym, nparams)?;
        let mut b = GraphBuilder::new(&format!("grad{}", nparams));
        let _fn = b.param("fn");
        b.set_output(NodeRef::Global(df.sym));
        b.finish(env)
    }
}
