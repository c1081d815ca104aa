// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reverse-mode AD program transform.
//!
//! `Grad` rewrites a Lambda in administrative-normal form into an augmented
//! function and a closure-converted backpropagator:
//!
//! * `^f` returns the tagged version of `f`'s output together with the
//!   backpropagator closure `<>f`.
//! * `<>f` is a closure over the top-level `<|>f`; applied to an output
//!   sensitivity it yields `(closure_grads, *argument_grads)`.
//! * `<|>f` has no free variables: every backpropagator and tagged value it
//!   needs is passed in explicitly, captured by the `<>f` closure.
//!
//! For an assignment `x = f(y, z)` the forward phase emits
//! `(^x, <>x) = ^f(^y, ^z)` and the backward phase, walking bindings in
//! reverse, accumulates `(grad_f, grad_y, grad_z) += <>x(grad_x)`. The
//! leading `nargs_closure` input gradients are grouped into a sub-tuple so
//! that consumers of a partial application receive
//! `(closure_grads, *arg_grads)`.

use crate::{
    env::{Env, Global},
    error::{Error, Result},
    ir::{Binding, Expr, Lambda, Leaf, Let, Lhs, Value},
    lift,
    symbol::{GenSym, Relation, Symbol},
};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;

/// One transform: a builder with private mutable maps, exposing
/// [`Grad::transform`]. Registration into the environment is the final
/// step, so a failed transform registers nothing.
pub struct Grad<'e> {
    env: &'e mut Env,
    /// The symbol of the function being transformed.
    name: Symbol,
    primal: Arc<Lambda>,
    nargs_closure: usize,
    gensym: GenSym,
    /// v -> ^v
    tagged: HashMap<Symbol, Symbol>,
    /// v -> latest grad_v (updated on every accumulation to preserve
    /// single assignment)
    sens: HashMap<Symbol, Symbol>,
    /// call-site LHS -> <>v
    bprop: HashMap<Lhs, Symbol>,
    /// Lazily demanded `grad_v = zeros_like(Jinv(^v))` bindings.
    zeros: Vec<Binding>,
    /// Variables captured into the backpropagator, in capture order.
    bprop_vars: IndexSet<Symbol>,
}

impl<'e> Grad<'e> {
    pub fn new(env: &'e mut Env, name: Symbol, nargs_closure: usize) -> Result<Self> {
        let primal = match env.resolve(&name)? {
            Global::Func(f) => f,
            Global::Prim(p) => {
                return Err(Error::invariant(
                    func_name!(),
                    format!("Grad expects a compiled function, got primitive {}", p),
                ))
            }
        };
        if nargs_closure > primal.params.len() {
            return Err(Error::invariant(
                func_name!(),
                format!(
                    "nargs_closure {} exceeds the {} parameters of {}",
                    nargs_closure,
                    primal.params.len(),
                    name
                ),
            ));
        }
        let gensym = GenSym::scan(&primal);
        Ok(Grad {
            env,
            name,
            primal,
            nargs_closure,
            gensym,
            tagged: HashMap::new(),
            sens: HashMap::new(),
            bprop: HashMap::new(),
            zeros: Vec::new(),
            bprop_vars: IndexSet::new(),
        })
    }

    /// Run the transform. Returns the fresh symbol `^f` was registered
    /// under; the backpropagator `<|>f` is registered alongside it.
    pub fn transform(mut self) -> Result<Symbol> {
        let args = self.primal.params.clone();
        let let_ = self.primal.body.clone();

        // The input to the backpropagator.
        let out_sen = self.new_sensitivity_var(&let_.body);

        let mut forward = Vec::new();
        for b in &let_.bindings {
            self.phi(&b.lhs, &b.rhs, &mut forward)?;
        }

        let mut backward = Vec::new();
        for b in let_.bindings.iter().rev() {
            self.rho(&b.lhs, &b.rhs, &mut backward)?;
        }

        // Sensitivities for all of the inputs, conformant by construction.
        let mut input_grads = Vec::with_capacity(args.len());
        for a in &args {
            input_grads.push(self.conformant_sym(a)?);
        }

        // <|>f: zero inits, then the reverse-order accumulation, then the
        // grouped return tuple.
        let mut bbody = std::mem::take(&mut self.zeros);
        bbody.extend(backward);
        let closed: Vec<Leaf> = input_grads[..self.nargs_closure]
            .iter()
            .map(Leaf::sym)
            .collect();
        let closed_sym = self.gensym.fresh(&self.name, Relation::TmpLet);
        bbody.push(Binding::new(closed_sym.clone(), Expr::Tuple(closed)));
        let mut ret_elems = vec![Leaf::Sym(closed_sym)];
        ret_elems.extend(input_grads[self.nargs_closure..].iter().map(Leaf::sym));
        let ret_sym = self.gensym.fresh(&self.name, Relation::TmpLet);
        bbody.push(Binding::new(ret_sym.clone(), Expr::Tuple(ret_elems)));
        let mut bparams: Vec<Symbol> = self.bprop_vars.iter().cloned().collect();
        bparams.push(out_sen);
        let bsym = self.env.gen(&self.name.label, Relation::Bprop);
        let bfn = Lambda::new(
            &format!("\u{2666}{}", self.primal.name),
            bparams,
            Let {
                bindings: bbody,
                body: ret_sym,
            },
        );
        self.env.define(bsym.clone(), bfn)?;

        // <>f, a closure over <|>f and the captured variables.
        let clos_sym = self.gensym.fresh(&self.name, Relation::BpropClos);
        forward.push(Binding::new(
            clos_sym.clone(),
            Expr::closure(bsym, self.bprop_vars.iter().map(Leaf::sym).collect()),
        ));

        // ^f returns (^out, <>f).
        let tagged_out = self.tagged_leaf(&Leaf::Sym(let_.body.clone()), &mut forward)?;
        let aret = self.gensym.fresh(&self.name, Relation::TmpLet);
        forward.push(Binding::new(
            aret.clone(),
            Expr::Tuple(vec![tagged_out, Leaf::Sym(clos_sym)]),
        ));
        let mut aparams = Vec::with_capacity(args.len());
        for a in &args {
            aparams.push(self.tagged_var(a)?);
        }
        let asym = self.env.gen(&self.name.label, Relation::Jtag);
        let mut afn = Lambda::new(
            &format!("\u{2191}{}", self.primal.name),
            aparams,
            Let {
                bindings: forward,
                body: aret,
            },
        );
        afn.primal = Some(self.name.clone());
        self.env.define(asym.clone(), afn)?;
        Ok(asym)
    }

    /// Forward phase: bindings to append for one original binding.
    fn phi(&mut self, lhs: &Lhs, rhs: &Expr, out: &mut Vec<Binding>) -> Result<()> {
        match rhs {
            // x = y  ==>  ^x = ^y
            Expr::Leaf(leaf) => {
                let tagged = self.tagged_leaf_expr(leaf, out)?;
                let tlhs = self.tag_lhs(lhs)?;
                out.push(Binding {
                    lhs: tlhs,
                    rhs: tagged,
                });
                Ok(())
            }
            // x = (y, z)  ==>  ^x = (^y, ^z)
            Expr::Tuple(elems) => {
                let mut tagged = Vec::with_capacity(elems.len());
                for e in elems {
                    tagged.push(self.tagged_leaf(e, out)?);
                }
                let tlhs = self.tag_lhs(lhs)?;
                out.push(Binding {
                    lhs: tlhs,
                    rhs: Expr::Tuple(tagged),
                });
                Ok(())
            }
            // x = f(y)  ==>  (^x, <>x) = ^f(^y)
            Expr::Apply { func, args } => {
                let tfunc = self.tagged_leaf(func, out)?;
                let mut targs = Vec::with_capacity(args.len());
                for a in args {
                    targs.push(self.tagged_leaf(a, out)?);
                }
                let bp = self.backpropagator_var(lhs);
                let app = Expr::Apply {
                    func: tfunc,
                    args: targs,
                };
                match self.tag_lhs(lhs)? {
                    Lhs::Sym(tv) => out.push(Binding {
                        lhs: Lhs::Tuple(vec![tv, bp]),
                        rhs: app,
                    }),
                    Lhs::Tuple(tsyms) => {
                        // A deconstructing call still has a single
                        // backpropagator; route the results through a
                        // temporary.
                        let tmp = self.gensym.fresh(&Symbol::local("tmp"), Relation::TmpLet);
                        out.push(Binding {
                            lhs: Lhs::Tuple(vec![tmp.clone(), bp]),
                            rhs: app,
                        });
                        out.push(Binding {
                            lhs: Lhs::Tuple(tsyms),
                            rhs: Expr::Leaf(Leaf::Sym(tmp)),
                        });
                    }
                }
                Ok(())
            }
            // x = Closure(f, y, z)  ==>  ^x = Closure(^f, ^y, ^z)
            // with ^f = grad(f, 2) computed eagerly.
            Expr::Closure { func, args } => {
                if !func.is_toplevel() {
                    return Err(Error::invariant(
                        func_name!(),
                        format!(
                            "the function of a Closure must be a global or builtin, got {}",
                            func
                        ),
                    ));
                }
                let jfunc = lift::jx(self.env, func, args.len())?;
                let mut targs = Vec::with_capacity(args.len());
                for a in args {
                    targs.push(self.tagged_leaf(a, out)?);
                }
                let tlhs = self.tag_lhs(lhs)?;
                out.push(Binding {
                    lhs: tlhs,
                    rhs: Expr::Closure {
                        func: jfunc,
                        args: targs,
                    },
                });
                Ok(())
            }
        }
    }

    /// Backward phase: bindings to prepend (built in reverse source order)
    /// for one original binding.
    fn rho(&mut self, lhs: &Lhs, rhs: &Expr, out: &mut Vec<Binding>) -> Result<()> {
        // A current value of ZERO cannot contribute to anything.
        if let Expr::Leaf(Leaf::Val(Value::Zero)) = self.sensitivity_value(lhs) {
            return Ok(());
        }
        // Some components of a tuple LHS might still be ZERO, which is not
        // conformant; backtrack to something that is.
        let sen = self.conformant(lhs)?;
        match rhs {
            // x = y  ==>  grad_y += grad_x
            Expr::Leaf(Leaf::Sym(w)) => self.accum_single(w, sen, out),
            // Literals absorb no gradient.
            Expr::Leaf(Leaf::Val(_)) => Ok(()),
            // x = (y, z)  ==>  (grad_y, grad_z) += grad_x
            Expr::Tuple(elems) => self.accum_multi(elems, sen, out),
            // x = f(y)  ==>  (grad_f, grad_y) += <>x(grad_x)
            Expr::Apply { func, args } => {
                let mut vars = vec![func.clone()];
                vars.extend(args.iter().cloned());
                let bp = self.backpropagator_var(lhs);
                self.bprop_vars.insert(bp.clone());
                let sen_leaf = self.expr_as_leaf(sen, out);
                let increment = Expr::Apply {
                    func: Leaf::Sym(bp),
                    args: vec![sen_leaf],
                };
                self.accum_multi(&vars, increment, out)
            }
            // x = Closure(f, y, z)  ==>  (grad_y, grad_z) += grad_x
            Expr::Closure { args, .. } => self.accum_multi(args, sen, out),
        }
    }

    /// Accumulate the gradients produced by `value` into the sensitivity
    /// variables of `vars`:
    ///
    /// * a literal accumulates into the discard sink;
    /// * a repeated variable goes through a temporary merged with an extra
    ///   `mapadd`, so no contribution is lost (`x = y * y`);
    /// * when every previous value is ZERO, the `mapadd` wrapper is elided
    ///   and `value` is bound directly.
    fn accum_multi(&mut self, vars: &[Leaf], value: Expr, out: &mut Vec<Binding>) -> Result<()> {
        let mut seen: std::collections::HashSet<Symbol> = std::collections::HashSet::new();
        let mut lhs_vars = Vec::with_capacity(vars.len());
        let mut prev_vals = Vec::with_capacity(vars.len());
        let mut merges = Vec::new();
        for var in vars {
            match var {
                Leaf::Val(_) => {
                    lhs_vars.push(Symbol::null_sink());
                    prev_vals.push(Leaf::Val(Value::Zero));
                }
                Leaf::Sym(s) => {
                    if seen.contains(s) {
                        let tmp = self.gensym.fresh(s, Relation::TmpSens);
                        lhs_vars.push(tmp.clone());
                        prev_vals.push(Leaf::Val(Value::Zero));
                        let prev = self.conformant_sym(s)?;
                        let merged = self.new_sensitivity_var(s);
                        merges.push(Binding::new(
                            merged,
                            Expr::apply(
                                Leaf::Sym(mapadd_sym()),
                                vec![Leaf::Sym(tmp), Leaf::Sym(prev)],
                            ),
                        ));
                    } else {
                        let prev = self.sensitivity_value_sym(s);
                        lhs_vars.push(self.new_sensitivity_var(s));
                        seen.insert(s.clone());
                        prev_vals.push(prev);
                    }
                }
            }
        }
        let all_zero = prev_vals
            .iter()
            .all(|l| matches!(l, Leaf::Val(Value::Zero)));
        let rhs = if all_zero {
            value
        } else {
            let prev_sym = self.gensym.fresh(&Symbol::local("tmp"), Relation::TmpLet);
            out.push(Binding::new(prev_sym.clone(), Expr::Tuple(prev_vals)));
            let value_leaf = self.expr_as_leaf(value, out);
            Expr::apply(
                Leaf::Sym(mapadd_sym()),
                vec![Leaf::Sym(prev_sym), value_leaf],
            )
        };
        out.push(Binding {
            lhs: Lhs::Tuple(lhs_vars),
            rhs,
        });
        out.extend(merges);
        Ok(())
    }

    fn accum_single(&mut self, var: &Symbol, value: Expr, out: &mut Vec<Binding>) -> Result<()> {
        let prev = self.sensitivity_value_sym(var);
        let new_sen = self.new_sensitivity_var(var);
        match prev {
            Leaf::Val(Value::Zero) => out.push(Binding::new(new_sen, value)),
            prev => {
                let value_leaf = self.expr_as_leaf(value, out);
                out.push(Binding::new(
                    new_sen,
                    Expr::apply(Leaf::Sym(mapadd_sym()), vec![prev, value_leaf]),
                ));
            }
        }
        Ok(())
    }

    /// `^v` for a bound variable; created on first demand.
    fn tagged_var(&mut self, v: &Symbol) -> Result<Symbol> {
        if v.is_toplevel() {
            return Err(Error::invariant(
                func_name!(),
                format!("cannot tag the top-level symbol {}", v),
            ));
        }
        if let Some(t) = self.tagged.get(v) {
            return Ok(t.clone());
        }
        let t = self.gensym.fresh(v, Relation::Jtag);
        self.tagged.insert(v.clone(), t.clone());
        Ok(t)
    }

    fn tag_lhs(&mut self, lhs: &Lhs) -> Result<Lhs> {
        match lhs {
            Lhs::Sym(s) => Ok(Lhs::Sym(self.tagged_var(s)?)),
            Lhs::Tuple(syms) => {
                let mut tagged = Vec::with_capacity(syms.len());
                for s in syms {
                    tagged.push(self.tagged_var(s)?);
                }
                Ok(Lhs::Tuple(tagged))
            }
        }
    }

    /// The tagged form of a leaf in argument position. A literal is left
    /// unchanged; a local reads its tag; a reference to a global `g`
    /// becomes a fresh binding `t = J(g)`.
    fn tagged_leaf(&mut self, leaf: &Leaf, out: &mut Vec<Binding>) -> Result<Leaf> {
        match leaf {
            Leaf::Val(v) => Ok(Leaf::Val(v.clone())),
            Leaf::Sym(s) if s.is_toplevel() => {
                let t = self.gensym.fresh(s, Relation::Jtag);
                out.push(Binding::new(
                    t.clone(),
                    Expr::apply(Leaf::Sym(j_sym()), vec![Leaf::sym(s)]),
                ));
                Ok(Leaf::Sym(t))
            }
            Leaf::Sym(s) => Ok(Leaf::Sym(self.tagged_var(s)?)),
        }
    }

    /// Like [`Grad::tagged_leaf`] but in RHS position, where an apply can
    /// stand directly.
    fn tagged_leaf_expr(&mut self, leaf: &Leaf, _out: &mut Vec<Binding>) -> Result<Expr> {
        match leaf {
            Leaf::Val(v) => Ok(Expr::Leaf(Leaf::Val(v.clone()))),
            Leaf::Sym(s) if s.is_toplevel() => Ok(Expr::apply(
                Leaf::Sym(j_sym()),
                vec![Leaf::sym(s)],
            )),
            Leaf::Sym(s) => Ok(Expr::Leaf(Leaf::Sym(self.tagged_var(s)?))),
        }
    }

    /// The current sensitivity of `v`, or ZERO if it has none yet. ZERO is
    /// not conformant; callers may only put it in the first operand of
    /// `mapadd`.
    fn sensitivity_value_sym(&self, v: &Symbol) -> Leaf {
        match self.sens.get(v) {
            Some(s) => Leaf::Sym(s.clone()),
            None => Leaf::Val(Value::Zero),
        }
    }

    fn sensitivity_value(&self, lhs: &Lhs) -> Expr {
        match lhs {
            Lhs::Sym(s) => Expr::Leaf(self.sensitivity_value_sym(s)),
            Lhs::Tuple(syms) => {
                let elems: Vec<Leaf> =
                    syms.iter().map(|s| self.sensitivity_value_sym(s)).collect();
                if elems.iter().all(|l| matches!(l, Leaf::Val(Value::Zero))) {
                    Expr::Leaf(Leaf::Val(Value::Zero))
                } else {
                    Expr::Tuple(elems)
                }
            }
        }
    }

    /// A fresh `grad_v`, preserving single assignment: instead of
    /// `grad_v = grad_v + x` we bind `grad_v_2 = mapadd(grad_v, x)` and
    /// remember the latest version.
    fn new_sensitivity_var(&mut self, v: &Symbol) -> Symbol {
        let s = self.gensym.fresh(v, Relation::Sens);
        self.sens.insert(v.clone(), s.clone());
        s
    }

    /// Emit `grad_v = zeros_like(Jinv(^v))` into the zero inits and return
    /// `grad_v`. `Jinv(^v)` recovers the untagged value: the transformed
    /// function only ever receives `^v`.
    fn zero_init(&mut self, v: &Symbol) -> Result<Symbol> {
        let new_var = self.new_sensitivity_var(v);
        let tagged = self.tagged_var(v)?;
        let unlifted = self.gensym.fresh(&tagged, Relation::TmpLet);
        self.zeros.push(Binding::new(
            unlifted.clone(),
            Expr::apply(Leaf::Sym(jinv_sym()), vec![Leaf::sym(&tagged)]),
        ));
        self.zeros.push(Binding::new(
            new_var.clone(),
            Expr::apply(Leaf::Sym(zeros_like_sym()), vec![Leaf::Sym(unlifted)]),
        ));
        self.bprop_vars.insert(tagged);
        Ok(new_var)
    }

    /// The current sensitivity of `v`, zero-initialized on first demand so
    /// the result is always shape-conformant.
    fn conformant_sym(&mut self, v: &Symbol) -> Result<Symbol> {
        match self.sens.get(v) {
            Some(s) => Ok(s.clone()),
            None => self.zero_init(v),
        }
    }

    fn conformant(&mut self, lhs: &Lhs) -> Result<Expr> {
        match lhs {
            Lhs::Sym(s) => Ok(Expr::Leaf(Leaf::Sym(self.conformant_sym(s)?))),
            Lhs::Tuple(syms) => {
                let mut elems = Vec::with_capacity(syms.len());
                for s in syms {
                    elems.push(Leaf::Sym(self.conformant_sym(s)?));
                }
                Ok(Expr::Tuple(elems))
            }
        }
    }

    /// `<>v` for a call-site LHS; created on first demand. A deconstructing
    /// assignment still has a single backpropagator, named through a
    /// temporary.
    fn backpropagator_var(&mut self, lhs: &Lhs) -> Symbol {
        if let Some(s) = self.bprop.get(lhs) {
            return s.clone();
        }
        let sym = match lhs {
            Lhs::Sym(s) => self.gensym.fresh(s, Relation::BpropClos),
            Lhs::Tuple(_) => {
                let tmp = self.gensym.fresh(&Symbol::local("tmp"), Relation::TmpBprop);
                self.gensym.fresh(&tmp, Relation::BpropClos)
            }
        };
        self.bprop.insert(lhs.clone(), sym.clone());
        sym
    }

    /// Bind a compound expression to a temporary so it can sit in a leaf
    /// position.
    fn expr_as_leaf(&mut self, e: Expr, out: &mut Vec<Binding>) -> Leaf {
        match e {
            Expr::Leaf(l) => l,
            other => {
                let tmp = self.gensym.fresh(&Symbol::local("tmp"), Relation::TmpLet);
                out.push(Binding::new(tmp.clone(), other));
                Leaf::Sym(tmp)
            }
        }
    }
}

fn mapadd_sym() -> Symbol {
    crate::prim::Prim::Mapadd.sym()
}

fn j_sym() -> Symbol {
    crate::prim::Prim::J.sym()
}

fn jinv_sym() -> Symbol {
    crate::prim::Prim::Jinv.sym()
}

fn zeros_like_sym() -> Symbol {
    crate::prim::Prim::ZerosLike.sym()
}
