// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    arith,
    builder::{GraphBuilder, NodeRef},
    env::Env,
    error::{Error, Result},
    ir::{Binding, Expr, Lambda, Leaf, Let},
    lift,
    symbol::{GenSym, Namespace, Relation, Symbol},
    value::{self, Data},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of primitive operators. Their bodies live in the runtime;
/// the core only needs their compile-time reductions and gradient rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prim {
    ScalarAdd,
    ScalarSub,
    ScalarMul,
    ScalarDiv,
    ScalarUsub,
    ScalarEq,
    ScalarLt,
    ScalarGt,
    Switch,
    Identity,
    Fill,
    ZerosLike,
    OnesLike,
    Mapadd,
    J,
    Jinv,
    Len,
    Range,
    TupleGetitem,
    MakeTuple,
    MakeList,
    ListAppend,
    ListIter,
    IterNext,
    IterHasnext,
    BoolAnd,
    GetAttr,
    CastLike,
    // Array kernels, referenced symbolically only.
    ArrayMap,
    ToArray,
    Distribute,
    Shape,
    BroadcastShape,
}

impl Prim {
    pub fn name(self) -> &'static str {
        use Prim::*;
        match self {
            ScalarAdd => "scalar_add",
            ScalarSub => "scalar_sub",
            ScalarMul => "scalar_mul",
            ScalarDiv => "scalar_div",
            ScalarUsub => "scalar_usub",
            ScalarEq => "scalar_eq",
            ScalarLt => "scalar_lt",
            ScalarGt => "scalar_gt",
            Switch => "switch",
            Identity => "identity",
            Fill => "fill",
            ZerosLike => "zeros_like",
            OnesLike => "ones_like",
            Mapadd => "mapadd",
            J => "J",
            Jinv => "Jinv",
            Len => "len",
            Range => "range",
            TupleGetitem => "tuple_getitem",
            MakeTuple => "make_tuple",
            MakeList => "make_list",
            ListAppend => "list_append",
            ListIter => "list_iter",
            IterNext => "iter_next",
            IterHasnext => "iter_hasnext",
            BoolAnd => "bool_and",
            GetAttr => "getattr",
            CastLike => "cast_like",
            ArrayMap => "array_map",
            ToArray => "to_array",
            Distribute => "distribute",
            Shape => "shape",
            BroadcastShape => "broadcast_shape",
        }
    }

    pub fn from_name(name: &str) -> Option<Prim> {
        use Prim::*;
        let p = match name {
            "scalar_add" => ScalarAdd,
            "scalar_sub" => ScalarSub,
            "scalar_mul" => ScalarMul,
            "scalar_div" => ScalarDiv,
            "scalar_usub" => ScalarUsub,
            "scalar_eq" => ScalarEq,
            "scalar_lt" => ScalarLt,
            "scalar_gt" => ScalarGt,
            "switch" => Switch,
            "identity" => Identity,
            "fill" => Fill,
            "zeros_like" => ZerosLike,
            "ones_like" => OnesLike,
            "mapadd" => Mapadd,
            "J" => J,
            "Jinv" => Jinv,
            "len" => Len,
            "range" => Range,
            "tuple_getitem" => TupleGetitem,
            "make_tuple" => MakeTuple,
            "make_list" => MakeList,
            "list_append" => ListAppend,
            "list_iter" => ListIter,
            "iter_next" => IterNext,
            "iter_hasnext" => IterHasnext,
            "bool_and" => BoolAnd,
            "getattr" => GetAttr,
            "cast_like" => CastLike,
            "array_map" => ArrayMap,
            "to_array" => ToArray,
            "distribute" => Distribute,
            "shape" => Shape,
            "broadcast_shape" => BroadcastShape,
            _ => return None,
        };
        Some(p)
    }

    /// The symbol this primitive is referenced by in generated IR.
    pub fn sym(self) -> Symbol {
        Symbol::builtin(self.name())
    }

    /// Parameter labels of the primitive's backward function, when it has
    /// one. The final sensitivity parameter is not listed.
    fn argnames(self) -> &'static [&'static str] {
        use Prim::*;
        match self {
            ScalarAdd | ScalarSub | ScalarMul | ScalarDiv | ScalarEq | ScalarLt | ScalarGt
            | Mapadd => &["x", "y"],
            ScalarUsub | J | Jinv | ZerosLike => &["x"],
            Identity => &["v"],
            Switch => &["c", "t", "f"],
            Len => &["xs"],
            Range => &["n"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Prim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The compile-time reduction of a primitive.
pub type ForwardFn = fn(&mut Env, &[Data]) -> Result<Data>;

/// Builds the body of a primitive's backpropagator. Receives the tagged
/// arguments, the output sensitivity, and the grouping convention; produces
/// the grouped gradient tuple.
pub type BackwardRule =
    fn(&mut GraphBuilder, &[NodeRef], NodeRef, &GradGroup) -> Result<NodeRef>;

/// The GRAD grouping convention: argument gradients `(g1, .., gn)` become
/// `((g1, .., gk), g_{k+1}, .., gn)` where `k` is the number of leading
/// arguments captured by a partial application.
pub struct GradGroup {
    pub nargs_closure: usize,
}

impl GradGroup {
    pub fn group(&self, b: &mut GraphBuilder, grads: Vec<NodeRef>) -> Result<NodeRef> {
        if self.nargs_closure > grads.len() {
            return Err(Error::arity(func_name!(), self.nargs_closure, grads.len()));
        }
        let mut grads = grads;
        let rest = grads.split_off(self.nargs_closure);
        let closed = b.tuple(grads);
        let mut out = vec![closed];
        out.extend(rest);
        Ok(b.tuple(out))
    }
}

struct PrimRecord {
    forward: ForwardFn,
    backward: Option<BackwardRule>,
    grad_cache: HashMap<usize, Symbol>,
}

/// Maps primitives to their forward implementations and gradient factories.
pub struct Registry {
    records: HashMap<Prim, PrimRecord>,
}

impl Registry {
    /// The standard table: every primitive's reduction, and a backward rule
    /// for each primitive with a known gradient. `array_map` and friends
    /// deliberately have none.
    pub fn standard() -> Self {
        use Prim::*;
        let mut records = HashMap::new();
        let mut add = |p: Prim, forward: ForwardFn, backward: Option<BackwardRule>| {
            records.insert(
                p,
                PrimRecord {
                    forward,
                    backward,
                    grad_cache: HashMap::new(),
                },
            );
        };
        add(ScalarAdd, fwd_scalar_add, Some(bprop_scalar_add));
        add(ScalarSub, fwd_scalar_sub, Some(bprop_scalar_sub));
        add(ScalarMul, fwd_scalar_mul, Some(bprop_scalar_mul));
        add(ScalarDiv, fwd_scalar_div, Some(bprop_scalar_div));
        add(ScalarUsub, fwd_scalar_usub, Some(bprop_scalar_usub));
        add(ScalarEq, fwd_scalar_eq, Some(bprop_comparison));
        add(ScalarLt, fwd_scalar_lt, Some(bprop_comparison));
        add(ScalarGt, fwd_scalar_gt, Some(bprop_comparison));
        add(Switch, fwd_switch, Some(bprop_switch));
        add(Identity, fwd_identity, Some(bprop_identity));
        add(Fill, fwd_fill, None);
        add(ZerosLike, fwd_zeros_like, Some(bprop_zeros_like));
        add(OnesLike, fwd_ones_like, None);
        add(Mapadd, fwd_mapadd, Some(bprop_mapadd));
        add(J, fwd_j, Some(bprop_j));
        add(Jinv, fwd_jinv, Some(bprop_jinv));
        add(Len, fwd_len, Some(bprop_len));
        add(Range, fwd_range, Some(bprop_range));
        add(TupleGetitem, fwd_tuple_getitem, None);
        add(MakeTuple, fwd_make_tuple, None);
        add(MakeList, fwd_make_list, None);
        add(ListAppend, fwd_list_append, None);
        add(ListIter, fwd_list_iter, None);
        add(IterNext, fwd_iter_next, None);
        add(IterHasnext, fwd_iter_hasnext, None);
        add(BoolAnd, fwd_bool_and, None);
        add(GetAttr, fwd_symbolic_only, None);
        add(CastLike, fwd_cast_like, None);
        add(ArrayMap, fwd_symbolic_only, None);
        add(ToArray, fwd_symbolic_only, None);
        add(Distribute, fwd_symbolic_only, None);
        add(Shape, fwd_symbolic_only, None);
        add(BroadcastShape, fwd_symbolic_only, None);
        Registry { records }
    }

    pub fn forward(&self, prim: Prim) -> Result<ForwardFn> {
        self.records
            .get(&prim)
            .map(|r| r.forward)
            .ok_or_else(|| Error::missing_global(func_name!(), prim))
    }

    pub(crate) fn backward_rule(&self, prim: Prim) -> Option<BackwardRule> {
        self.records.get(&prim).and_then(|r| r.backward)
    }

    pub(crate) fn cached_grad(&self, prim: Prim, nargs_closure: usize) -> Option<Symbol> {
        self.records
            .get(&prim)
            .and_then(|r| r.grad_cache.get(&nargs_closure))
            .cloned()
    }

    pub(crate) fn cache_grad(&mut self, prim: Prim, nargs_closure: usize, sym: Symbol) {
        if let Some(r) = self.records.get_mut(&prim) {
            r.grad_cache.insert(nargs_closure, sym);
        }
    }
}

/// The gradient factory for primitives: lazily construct and cache, per
/// `nargs_closure`, the backward-enabled wrapper
///
/// ```text
/// ^prim = lambda(a1, .., an).
///     let u1 = Jinv(a1) .. un = Jinv(an)
///         r = prim(u1, .., un)
///         fwd = J(r)
///         bp = Closure(<>prim, a1, .., an)
///     in (fwd, bp)
/// ```
///
/// where `<>prim` is the backpropagator built from the primitive's backward
/// rule, its return value grouped by the GRAD convention.
pub fn grad(env: &mut Env, prim: Prim, nargs_closure: usize) -> Result<Symbol> {
    if let Some(sym) = env.prims.cached_grad(prim, nargs_closure) {
        return Ok(sym);
    }
    let rule = env
        .prims
        .backward_rule(prim)
        .ok_or_else(|| Error::no_gradient(func_name!(), prim))?;

    // The backpropagator lambda.
    let mut b = GraphBuilder::new(&format!("{}.bprop", prim.name()));
    let params: Vec<NodeRef> = prim.argnames().iter().map(|l| b.param(l)).collect();
    let sens = b.param("dz");
    let grouper = GradGroup { nargs_closure };
    let out = rule(&mut b, &params, sens, &grouper)?;
    b.set_output(out);
    let rsym = Symbol::new(
        prim.name(),
        Namespace::Builtin,
        (nargs_closure + 1) as u32,
        Relation::Bprop,
    );
    b.finish_at(env, rsym.clone())?;

    // The combined wrapper returning the forward result and a closure over
    // the backpropagator.
    let jsym = env.gen(prim.name(), Relation::Jtag);
    let wrapper = make_wrapper(prim, &rsym);
    env.define(jsym.clone(), wrapper)?;
    env.prims.cache_grad(prim, nargs_closure, jsym.clone());
    Ok(jsym)
}

fn make_wrapper(prim: Prim, rsym: &Symbol) -> Lambda {
    let mut gensym = GenSym::new();
    let params: Vec<Symbol> = prim
        .argnames()
        .iter()
        .map(|l| gensym.fresh(&Symbol::local(l), Relation::None))
        .collect();
    let mut bindings = Vec::new();
    let mut unlifted = Vec::new();
    for p in &params {
        let u = gensym.fresh(p, Relation::TmpLet);
        bindings.push(Binding::new(
            u.clone(),
            Expr::apply(Leaf::Sym(Prim::Jinv.sym()), vec![Leaf::sym(p)]),
        ));
        unlifted.push(Leaf::Sym(u));
    }
    let r = gensym.fresh(&Symbol::local("r"), Relation::None);
    bindings.push(Binding::new(
        r.clone(),
        Expr::apply(Leaf::Sym(prim.sym()), unlifted),
    ));
    let fwd = gensym.fresh(&r, Relation::Jtag);
    bindings.push(Binding::new(
        fwd.clone(),
        Expr::apply(Leaf::Sym(Prim::J.sym()), vec![Leaf::sym(&r)]),
    ));
    let bp = gensym.fresh(&Symbol::local(prim.name()), Relation::BpropClos);
    bindings.push(Binding::new(
        bp.clone(),
        Expr::closure(rsym.clone(), params.iter().map(Leaf::sym).collect()),
    ));
    let out = gensym.fresh(&Symbol::local("out"), Relation::TmpLet);
    bindings.push(Binding::new(
        out.clone(),
        Expr::Tuple(vec![Leaf::Sym(fwd), Leaf::Sym(bp)]),
    ));
    let mut lambda = Lambda::new(
        &format!("\u{2191}{}", prim.name()),
        params,
        Let {
            bindings,
            body: out,
        },
    );
    lambda.primal = Some(prim.sym());
    lambda
}

//
// Backward rules. Each rule ends with the GRAD grouping.
//

fn bprop_scalar_add(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    g.group(b, vec![dz.clone(), dz])
}

fn bprop_scalar_sub(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let ndz = b.apply_prim(Prim::ScalarUsub, vec![dz.clone()]);
    g.group(b, vec![dz, ndz])
}

fn bprop_scalar_mul(
    b: &mut GraphBuilder,
    args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let gx = b.apply_prim(Prim::ScalarMul, vec![dz.clone(), args[1].clone()]);
    let gy = b.apply_prim(Prim::ScalarMul, vec![dz, args[0].clone()]);
    g.group(b, vec![gx, gy])
}

fn bprop_scalar_div(
    b: &mut GraphBuilder,
    args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let (x, y) = (args[0].clone(), args[1].clone());
    let gx = b.apply_prim(Prim::ScalarDiv, vec![dz.clone(), y.clone()]);
    let dzx = b.apply_prim(Prim::ScalarMul, vec![dz, x]);
    let ndzx = b.apply_prim(Prim::ScalarUsub, vec![dzx]);
    let yy = b.apply_prim(Prim::ScalarMul, vec![y.clone(), y]);
    let gy = b.apply_prim(Prim::ScalarDiv, vec![ndzx, yy]);
    g.group(b, vec![gx, gy])
}

fn bprop_scalar_usub(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let ndz = b.apply_prim(Prim::ScalarUsub, vec![dz]);
    g.group(b, vec![ndz])
}

fn bprop_comparison(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    _dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    g.group(b, vec![NodeRef::bool(false), NodeRef::bool(false)])
}

fn bprop_identity(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    g.group(b, vec![dz])
}

// Every branch must receive a gradient conformant with its input, so the
// untaken branch gets zeros_like of its unlifted value.
fn bprop_switch(
    b: &mut GraphBuilder,
    args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let (c, t, f) = (args[0].clone(), args[1].clone(), args[2].clone());
    let jc = b.apply_prim(Prim::Jinv, vec![c.clone()]);
    let zc = b.apply_prim(Prim::ZerosLike, vec![jc]);
    let jt = b.apply_prim(Prim::Jinv, vec![t]);
    let zt = b.apply_prim(Prim::ZerosLike, vec![jt]);
    let jf = b.apply_prim(Prim::Jinv, vec![f]);
    let zf = b.apply_prim(Prim::ZerosLike, vec![jf]);
    let taken = g.group(b, vec![zc.clone(), dz.clone(), zf])?;
    let untaken = g.group(b, vec![zc, zt, dz])?;
    Ok(b.apply_prim(Prim::Switch, vec![c, taken, untaken]))
}

fn bprop_zeros_like(
    b: &mut GraphBuilder,
    args: &[NodeRef],
    _dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let z = b.apply_prim(Prim::ZerosLike, vec![args[0].clone()]);
    g.group(b, vec![z])
}

fn bprop_mapadd(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    g.group(b, vec![dz.clone(), dz])
}

fn bprop_j(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let gx = b.apply_prim(Prim::Jinv, vec![dz]);
    g.group(b, vec![gx])
}

fn bprop_jinv(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let gx = b.apply_prim(Prim::J, vec![dz]);
    g.group(b, vec![gx])
}

fn bprop_len(
    b: &mut GraphBuilder,
    args: &[NodeRef],
    _dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    let jx = b.apply_prim(Prim::Jinv, vec![args[0].clone()]);
    let z = b.apply_prim(Prim::ZerosLike, vec![jx]);
    g.group(b, vec![z])
}

fn bprop_range(
    b: &mut GraphBuilder,
    _args: &[NodeRef],
    _dz: NodeRef,
    g: &GradGroup,
) -> Result<NodeRef> {
    g.group(b, vec![NodeRef::int(0)])
}

//
// Forward implementations (compile-time reductions).
//

fn expect_args(name: &str, args: &[Data], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(Error::arity(name, n, args.len()));
    }
    Ok(())
}

fn fwd_scalar_add(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    value::scalar_add(&args[0], &args[1])
}

fn fwd_scalar_sub(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    value::scalar_sub(&args[0], &args[1])
}

fn fwd_scalar_mul(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    value::scalar_mul(&args[0], &args[1])
}

fn fwd_scalar_div(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    value::scalar_div(&args[0], &args[1])
}

fn fwd_scalar_usub(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    value::scalar_neg(&args[0])
}

fn compare(name: &str, args: &[Data], op: fn(f64, f64) -> bool) -> Result<Data> {
    expect_args(name, args, 2)?;
    match (args[0].as_f64(), args[1].as_f64()) {
        (Some(a), Some(b)) => Ok(Data::Bool(op(a, b))),
        _ => Err(Error::type_mismatch(
            name,
            format!("expected scalars, got {:?} and {:?}", args[0], args[1]),
        )),
    }
}

fn fwd_scalar_eq(_env: &mut Env, args: &[Data]) -> Result<Data> {
    compare(func_name!(), args, |a, b| (a - b).abs() == 0.0)
}

fn fwd_scalar_lt(_env: &mut Env, args: &[Data]) -> Result<Data> {
    compare(func_name!(), args, |a, b| a < b)
}

fn fwd_scalar_gt(_env: &mut Env, args: &[Data]) -> Result<Data> {
    compare(func_name!(), args, |a, b| a > b)
}

fn fwd_switch(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 3)?;
    if args[0].as_bool()? {
        Ok(args[1].clone())
    } else {
        Ok(args[2].clone())
    }
}

fn fwd_identity(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    Ok(args[0].clone())
}

fn fwd_fill(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    match &args[1] {
        Data::Int(v) => arith::fill(&args[0], *v),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("fill value must be an integer, got {:?}", other),
        )),
    }
}

fn fwd_zeros_like(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    arith::zeros_like(&args[0])
}

fn fwd_ones_like(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    arith::ones_like(&args[0])
}

fn fwd_mapadd(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    arith::mapadd(&args[0], &args[1])
}

fn fwd_j(env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    lift::j(env, &args[0])
}

fn fwd_jinv(env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    lift::jinv(env, &args[0])
}

fn fwd_len(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    match &args[0] {
        Data::Tuple(elems) => Ok(Data::Int(elems.len() as i64)),
        Data::List(elems) => Ok(Data::Int(elems.len() as i64)),
        Data::Str(s) => Ok(Data::Int(s.len() as i64)),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("len of {:?}", other),
        )),
    }
}

fn fwd_range(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    match &args[0] {
        Data::Int(n) => Ok(Data::List((0..*n).map(Data::Int).collect())),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("range of {:?}", other),
        )),
    }
}

fn fwd_tuple_getitem(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    let elems = args[0].as_tuple()?;
    match &args[1] {
        Data::Int(i) if (*i as usize) < elems.len() && *i >= 0 => Ok(elems[*i as usize].clone()),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("index {:?} out of bounds for {:?}", other, args[0]),
        )),
    }
}

fn fwd_make_tuple(_env: &mut Env, args: &[Data]) -> Result<Data> {
    Ok(Data::Tuple(args.to_vec()))
}

fn fwd_make_list(_env: &mut Env, args: &[Data]) -> Result<Data> {
    Ok(Data::List(args.to_vec()))
}

fn fwd_list_append(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    match &args[0] {
        Data::List(elems) => {
            let mut elems = elems.clone();
            elems.push(args[1].clone());
            Ok(Data::List(elems))
        }
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("list_append to {:?}", other),
        )),
    }
}

// The sequence iterator is the pair (index, sequence).
fn fwd_list_iter(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    match &args[0] {
        Data::List(_) => Ok(Data::Tuple(vec![Data::Int(0), args[0].clone()])),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("list_iter of {:?}", other),
        )),
    }
}

fn iter_parts(name: &str, it: &Data) -> Result<(i64, Vec<Data>)> {
    if let Data::Tuple(parts) = it {
        if let [Data::Int(idx), Data::List(elems)] = parts.as_slice() {
            return Ok((*idx, elems.clone()));
        }
    }
    Err(Error::type_mismatch(
        name,
        format!("expected an iterator pair, got {:?}", it),
    ))
}

fn fwd_iter_hasnext(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    let (idx, elems) = iter_parts(func_name!(), &args[0])?;
    Ok(Data::Bool((idx as usize) < elems.len()))
}

fn fwd_iter_next(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 1)?;
    let (idx, elems) = iter_parts(func_name!(), &args[0])?;
    if idx < 0 || (idx as usize) >= elems.len() {
        return Err(Error::type_mismatch(
            func_name!(),
            format!("iterator exhausted at {}", idx),
        ));
    }
    let value = elems[idx as usize].clone();
    let next = Data::Tuple(vec![Data::Int(idx + 1), Data::List(elems)]);
    Ok(Data::Tuple(vec![value, next]))
}

fn fwd_bool_and(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    Ok(Data::Bool(args[0].as_bool()? && args[1].as_bool()?))
}

// Cast a scalar to the type of a model value, used to seed an output
// sensitivity of one.
fn fwd_cast_like(_env: &mut Env, args: &[Data]) -> Result<Data> {
    expect_args(func_name!(), args, 2)?;
    match (&args[0], &args[1]) {
        (x, Data::Float(_)) => match x.as_f64() {
            Some(v) => Ok(Data::Float(v)),
            None => Err(Error::type_mismatch(
                func_name!(),
                format!("cannot cast {:?}", x),
            )),
        },
        (Data::Int(v), Data::Int(_)) => Ok(Data::Int(*v)),
        (x, model) => Err(Error::type_mismatch(
            func_name!(),
            format!("cannot cast {:?} like {:?}", x, model),
        )),
    }
}

// The array kernels belong to the runtime; the core only emits them.
fn fwd_symbolic_only(_env: &mut Env, _args: &[Data]) -> Result<Data> {
    Err(Error::generation_failure(
        func_name!(),
        "array kernels are referenced symbolically and have no host implementation",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prim_names_round_trip() {
        for p in &[
            Prim::ScalarAdd,
            Prim::Switch,
            Prim::J,
            Prim::Jinv,
            Prim::IterNext,
            Prim::BroadcastShape,
        ] {
            assert_eq!(Prim::from_name(p.name()), Some(*p));
        }
        assert_eq!(Prim::from_name("no_such_prim"), None);
    }

    #[test]
    fn test_no_gradient_for_array_kernels() {
        let mut env = Env::new();
        match grad(&mut env, Prim::ArrayMap, 0) {
            Err(Error::NoGradient { .. }) => {}
            other => panic!("expected NoGradient, got {:?}", other.map(|s| s.to_string())),
        }
    }
}
