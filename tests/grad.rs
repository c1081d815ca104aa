// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::many_single_char_names)]

use gradir::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn apply_prim(p: Prim, args: Vec<Leaf>) -> Expr {
    Expr::apply(Leaf::Sym(p.sym()), args)
}

fn define(
    env: &mut Env,
    name: &str,
    params: Vec<Symbol>,
    bindings: Vec<Binding>,
    body: Symbol,
) -> Result<Symbol> {
    let sym = env.gen(name, Relation::None);
    env.define(sym.clone(), Lambda::new(name, params, Let { bindings, body }))?;
    Ok(sym)
}

/// The backpropagator lambda reachable from an augmented function: `^f`
/// binds a closure over it.
fn backprop_of(env: &Env, jf: &Symbol) -> Result<Arc<Lambda>> {
    let lambda = env.resolve_func(jf)?;
    for b in &lambda.body.bindings {
        if let Expr::Closure { func, .. } = &b.rhs {
            return env.resolve_func(func);
        }
    }
    panic!("no backpropagator closure in {}", lambda.name);
}

/// Scope and single-assignment checks for a generated Lambda.
fn check_lambda(lambda: &Lambda) {
    let mut bound: HashSet<&Symbol> = lambda.params.iter().collect();
    for b in &lambda.body.bindings {
        for leaf in b.rhs.leaves() {
            if let Leaf::Sym(s) = leaf {
                if s.namespace == Namespace::Local {
                    assert!(
                        bound.contains(s),
                        "unbound local {} in {}",
                        s,
                        lambda.name
                    );
                }
            }
        }
        for s in b.lhs.symbols() {
            if s.namespace == Namespace::Null {
                continue;
            }
            assert!(
                !lambda.params.contains(s),
                "parameter {} rebound in {}",
                s,
                lambda.name
            );
            assert!(
                bound.insert(s),
                "symbol {} assigned twice in {}",
                s,
                lambda.name
            );
        }
    }
    assert!(
        bound.contains(&lambda.body.body),
        "unbound body {} in {}",
        lambda.body.body,
        lambda.name
    );
}

// S1: f(x) = x.
#[test]
fn test_identity() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let f = define(&mut env, "f", vec![x.clone()], vec![], x)?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(3.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(grads, Data::Tuple(vec![Data::unit(), Data::Float(1.0)]));
    Ok(())
}

// S2: f(x, y) = x * y.
#[test]
fn test_multiplication() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let t = Symbol::local("t");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), y.clone()],
        vec![Binding::new(
            t.clone(),
            apply_prim(Prim::ScalarMul, vec![Leaf::sym(&x), Leaf::sym(&y)]),
        )],
        t,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0), Data::Float(4.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(12.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(
        grads,
        Data::Tuple(vec![Data::unit(), Data::Float(4.0), Data::Float(3.0)])
    );
    Ok(())
}

// S3: f(y) = y * y. The duplicate use must contribute twice.
#[test]
fn test_duplicate_use() -> Result<()> {
    let mut env = Env::new();
    let y = Symbol::local("y");
    let t = Symbol::local("t");
    let f = define(
        &mut env,
        "f",
        vec![y.clone()],
        vec![Binding::new(
            t.clone(),
            apply_prim(Prim::ScalarMul, vec![Leaf::sym(&y), Leaf::sym(&y)]),
        )],
        t,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;

    // Structural check: the merge allocates a second sensitivity version
    // for y.
    let bprop = backprop_of(&env, &jf)?;
    let y_sens: Vec<&Symbol> = bprop
        .bound_symbols()
        .into_iter()
        .filter(|s| s.relation == Relation::Sens && s.label == "y")
        .collect();
    assert_eq!(y_sens.len(), 2, "expected two sensitivity versions for y");
    let merges = bprop
        .body
        .bindings
        .iter()
        .filter(|b| match &b.rhs {
            Expr::Apply { func, .. } => *func == Leaf::Sym(Prim::Mapadd.sym()),
            _ => false,
        })
        .count();
    assert_eq!(merges, 1, "expected one mapadd merge for the duplicate");

    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(9.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(grads, Data::Tuple(vec![Data::unit(), Data::Float(6.0)]));
    Ok(())
}

// S4: h(x, y, z) = x * y + z with x captured by a partial application.
#[test]
fn test_partial_application() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let z = Symbol::local("z");
    let t1 = Symbol::local("t1");
    let t2 = Symbol::local("t2");
    let h = define(
        &mut env,
        "h",
        vec![x.clone(), y.clone(), z.clone()],
        vec![
            Binding::new(
                t1.clone(),
                apply_prim(Prim::ScalarMul, vec![Leaf::sym(&x), Leaf::sym(&y)]),
            ),
            Binding::new(
                t2.clone(),
                apply_prim(Prim::ScalarAdd, vec![Leaf::sym(&t1), Leaf::sym(&z)]),
            ),
        ],
        t2,
    )?;

    let closure = Data::Closure {
        func: h,
        args: vec![Data::Float(2.0)],
    };
    let lifted = j(&mut env, &closure)?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call(lifted, vec![Data::Float(3.0), Data::Float(4.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(10.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    // The captured variable's gradient is grouped into the leading tuple.
    assert_eq!(
        grads,
        Data::Tuple(vec![
            Data::Tuple(vec![Data::Float(3.0)]),
            Data::Float(2.0),
            Data::Float(1.0),
        ])
    );
    Ok(())
}

// Properties 1-3: generated lambdas are alpha-fresh, single-assignment, and
// scope-correct.
#[test]
fn test_generated_lambdas_well_formed() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let t1 = Symbol::local("t1");
    let t2 = Symbol::local("t2");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), y.clone()],
        vec![
            Binding::new(
                t1.clone(),
                apply_prim(Prim::ScalarMul, vec![Leaf::sym(&x), Leaf::sym(&x)]),
            ),
            Binding::new(
                t2.clone(),
                apply_prim(Prim::ScalarAdd, vec![Leaf::sym(&t1), Leaf::sym(&y)]),
            ),
        ],
        t2,
    )?;
    let jf = Grad::new(&mut env, f.clone(), 0)?.transform()?;
    let symbols: Vec<Symbol> = env.symbols().cloned().collect();
    for sym in &symbols {
        if let Global::Func(lambda) = env.resolve(sym)? {
            check_lambda(&lambda);
        }
    }
    // The augmented function's parameters are the tagged originals, and it
    // points back at its primal.
    let augmented = env.resolve_func(&jf)?;
    assert!(augmented
        .params
        .iter()
        .all(|p| p.relation == Relation::Jtag));
    assert_eq!(augmented.primal, Some(f));
    Ok(())
}

// Property 4: the grouped gradient tuple has the right shape for every
// nargs_closure.
#[test]
fn test_gradient_tuple_shape() -> Result<()> {
    for k in 0..=3usize {
        let mut env = Env::new();
        let params: Vec<Symbol> =
            (0..3).map(|i| Symbol::local(&format!("a{}", i))).collect();
        let t = Symbol::local("t");
        let mut bindings = vec![Binding::new(
            t.clone(),
            apply_prim(
                Prim::ScalarAdd,
                vec![Leaf::sym(&params[0]), Leaf::sym(&params[1])],
            ),
        )];
        let u = Symbol::local("u");
        bindings.push(Binding::new(
            u.clone(),
            apply_prim(Prim::ScalarAdd, vec![Leaf::sym(&t), Leaf::sym(&params[2])]),
        ));
        let f = define(&mut env, "f", params, bindings, u)?;
        let jf = Grad::new(&mut env, f, k)?.transform()?;
        let mut vm = Interpreter::new(&mut env);
        let parts = vm
            .call_symbol(
                &jf,
                vec![Data::Float(1.0), Data::Float(2.0), Data::Float(3.0)],
            )?
            .as_tuple()?
            .to_vec();
        let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
        let grads = grads.as_tuple()?.to_vec();
        assert_eq!(grads.len(), 1 + 3 - k);
        assert_eq!(grads[0].as_tuple()?.len(), k);
    }
    Ok(())
}

// A value binding absorbs no gradient and routes through the discard sink.
#[test]
fn test_literal_operand() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let t = Symbol::local("t");
    let f = define(
        &mut env,
        "f",
        vec![x.clone()],
        vec![Binding::new(
            t.clone(),
            apply_prim(
                Prim::ScalarMul,
                vec![Leaf::sym(&x), Leaf::Val(Value::Float(2.0))],
            ),
        )],
        t,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(5.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(10.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(grads, Data::Tuple(vec![Data::unit(), Data::Float(2.0)]));
    Ok(())
}

// An unused parameter still gets a conformant zero gradient.
#[test]
fn test_unused_parameter() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let t = Symbol::local("t");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), y.clone()],
        vec![Binding::new(
            t.clone(),
            apply_prim(Prim::Identity, vec![Leaf::sym(&x)]),
        )],
        t,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0), Data::Float(7.0)])?
        .as_tuple()?
        .to_vec();
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(
        grads,
        Data::Tuple(vec![Data::unit(), Data::Float(1.0), Data::Float(0.0)])
    );
    Ok(())
}

// Tuple construction and deconstruction propagate componentwise.
#[test]
fn test_tuple_flow() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let p = Symbol::local("p");
    let a = Symbol::local("a");
    let b = Symbol::local("b");
    let t = Symbol::local("t");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), y.clone()],
        vec![
            Binding::new(p.clone(), Expr::Tuple(vec![Leaf::sym(&x), Leaf::sym(&y)])),
            Binding {
                lhs: Lhs::Tuple(vec![a.clone(), b.clone()]),
                rhs: Expr::Leaf(Leaf::sym(&p)),
            },
            Binding::new(
                t.clone(),
                apply_prim(Prim::ScalarMul, vec![Leaf::sym(&a), Leaf::sym(&b)]),
            ),
        ],
        t,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0), Data::Float(4.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(12.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(
        grads,
        Data::Tuple(vec![Data::unit(), Data::Float(4.0), Data::Float(3.0)])
    );
    Ok(())
}

// A Closure binding inside a function routes gradients to its stored
// arguments.
#[test]
fn test_closure_binding() -> Result<()> {
    let mut env = Env::new();

    // g(a, b) = a * b
    let a = Symbol::local("a");
    let b = Symbol::local("b");
    let t = Symbol::local("t");
    let g = define(
        &mut env,
        "g",
        vec![a.clone(), b.clone()],
        vec![Binding::new(
            t.clone(),
            apply_prim(Prim::ScalarMul, vec![Leaf::sym(&a), Leaf::sym(&b)]),
        )],
        t,
    )?;

    // f(x, y) = (partial g x)(y)
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let c = Symbol::local("c");
    let r = Symbol::local("r");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), y.clone()],
        vec![
            Binding::new(c.clone(), Expr::closure(g, vec![Leaf::sym(&x)])),
            Binding::new(
                r.clone(),
                Expr::apply(Leaf::sym(&c), vec![Leaf::sym(&y)]),
            ),
        ],
        r,
    )?;
    let jf = Grad::new(&mut env, f, 0)?.transform()?;
    let mut vm = Interpreter::new(&mut env);
    let parts = vm
        .call_symbol(&jf, vec![Data::Float(3.0), Data::Float(4.0)])?
        .as_tuple()?
        .to_vec();
    assert_eq!(parts[0], Data::Float(12.0));
    let grads = vm.call(parts[1].clone(), vec![Data::Float(1.0)])?;
    assert_eq!(
        grads,
        Data::Tuple(vec![Data::unit(), Data::Float(4.0), Data::Float(3.0)])
    );
    Ok(())
}

// A Closure over a non-global function is an invariant violation, and the
// failed transform registers nothing.
#[test]
fn test_nonlocal_closure_rejected() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let g = Symbol::local("g");
    let c = Symbol::local("c");
    let f = define(
        &mut env,
        "f",
        vec![x.clone(), g.clone()],
        vec![Binding::new(
            c.clone(),
            Expr::closure(g.clone(), vec![Leaf::sym(&x)]),
        )],
        c,
    )?;
    let before = env.symbols().count();
    match Grad::new(&mut env, f, 0)?.transform() {
        Err(Error::InvariantViolation { .. }) => {}
        other => panic!("expected InvariantViolation, got {:?}", other.map(|s| s.to_string())),
    }
    assert_eq!(env.symbols().count(), before);
    Ok(())
}

#[test]
fn test_nargs_closure_out_of_range() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let f = define(&mut env, "f", vec![x.clone()], vec![], x)?;
    match Grad::new(&mut env, f, 2) {
        Err(Error::InvariantViolation { .. }) => Ok(()),
        other => panic!("expected InvariantViolation, got {:?}", other.is_ok()),
    }
}

// The gradient factory is cached per nargs_closure.
#[test]
fn test_grad_factory_cached() -> Result<()> {
    let mut env = Env::new();
    let x = Symbol::local("x");
    let f = define(&mut env, "f", vec![x.clone()], vec![], x)?;
    let g1 = jx(&mut env, &f, 0)?;
    let g2 = jx(&mut env, &f, 0)?;
    assert_eq!(g1, g2);
    let g3 = jx(&mut env, &f, 1)?;
    assert_ne!(g1, g3);
    Ok(())
}
