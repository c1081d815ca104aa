// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use gradir::prelude::*;

fn define_identity(env: &mut Env, name: &str, nparams: usize) -> Result<Symbol> {
    let params: Vec<Symbol> = (0..nparams)
        .map(|i| Symbol::local(&format!("x{}", i)))
        .collect();
    let body = params[0].clone();
    let sym = env.gen(name, Relation::None);
    env.define(
        sym.clone(),
        Lambda::new(
            name,
            params,
            Let {
                bindings: vec![],
                body,
            },
        ),
    )?;
    Ok(sym)
}

// Property 5: Jinv(J(x)) == x on scalars, tuples, closures over top-level
// functions, and the sentinels.
#[test]
fn test_round_trip_scalars_and_tuples() -> Result<()> {
    let mut env = Env::new();
    for x in [
        Data::Int(3),
        Data::Float(2.5),
        Data::Bool(true),
        Data::Tuple(vec![Data::Int(1), Data::Tuple(vec![Data::Float(0.5)])]),
        Data::Null,
        Data::Zero,
    ]
    .iter()
    {
        let lifted = j(&mut env, x)?;
        assert_eq!(&jinv(&mut env, &lifted)?, x);
    }
    Ok(())
}

#[test]
fn test_round_trip_function() -> Result<()> {
    let mut env = Env::new();
    let f = define_identity(&mut env, "f", 1)?;
    let lifted = j(&mut env, &Data::Func(f.clone()))?;
    match &lifted {
        Data::Func(sym) => assert_eq!(sym.relation, Relation::Jtag),
        other => panic!("expected a function, got {:?}", other),
    }
    assert_eq!(jinv(&mut env, &lifted)?, Data::Func(f));
    Ok(())
}

#[test]
fn test_round_trip_closure() -> Result<()> {
    let mut env = Env::new();
    let f = define_identity(&mut env, "f", 2)?;
    let c = Data::Closure {
        func: f,
        args: vec![Data::Float(2.0)],
    };
    let lifted = j(&mut env, &c)?;
    assert_eq!(jinv(&mut env, &lifted)?, c);
    Ok(())
}

#[test]
fn test_round_trip_primitive() -> Result<()> {
    let mut env = Env::new();
    let lifted = j(&mut env, &Data::Prim(Prim::ScalarAdd))?;
    assert_eq!(jinv(&mut env, &lifted)?, Data::Prim(Prim::ScalarAdd));
    Ok(())
}

// Jinv applied to a primitive is fatal: primitives have no primal.
#[test]
fn test_jinv_primitive_fatal() {
    let mut env = Env::new();
    match jinv(&mut env, &Data::Prim(Prim::ScalarMul)) {
        Err(Error::UnliftablePrimal { .. }) => {}
        other => panic!("expected UnliftablePrimal, got {:?}", other),
    }
}

// Jinv applied to a function that was never forward-lifted is fatal.
#[test]
fn test_jinv_unlifted_function_fatal() -> Result<()> {
    let mut env = Env::new();
    let f = define_identity(&mut env, "f", 1)?;
    match jinv(&mut env, &Data::Func(f)) {
        Err(Error::UnliftablePrimal { .. }) => Ok(()),
        other => panic!("expected UnliftablePrimal, got {:?}", other),
    }
}

// Property 7: mapadd identities.
#[test]
fn test_mapadd_identities() -> Result<()> {
    let y = Data::Tuple(vec![Data::Int(1), Data::Float(2.0)]);
    assert_eq!(mapadd(&Data::Zero, &y)?, y);
    let x = Data::Float(1.5);
    assert_eq!(mapadd(&x, &zeros_like(&x)?)?, x);
    let t = Data::Tuple(vec![Data::Int(3), Data::Int(4)]);
    assert_eq!(mapadd(&t, &zeros_like(&t)?)?, t);
    Ok(())
}

#[test]
fn test_mapadd_zero_second_fatal() {
    match mapadd(&Data::Int(1), &Data::Zero) {
        Err(Error::TypeMismatch { .. }) => {}
        other => panic!("expected TypeMismatch, got {:?}", other),
    }
}

#[test]
fn test_mapadd_mismatched_kinds_fatal() {
    let x = Data::Tuple(vec![Data::Int(1)]);
    assert!(mapadd(&x, &Data::Int(1)).is_err());
    let short = Data::Tuple(vec![Data::Int(1), Data::Int(2)]);
    assert!(mapadd(&x, &short).is_err());
}

#[test]
fn test_mapadd_componentwise() -> Result<()> {
    let x = Data::Tuple(vec![Data::Int(1), Data::Tuple(vec![Data::Float(3.0)])]);
    let y = Data::Tuple(vec![Data::Int(4), Data::Tuple(vec![Data::Float(2.0)])]);
    assert_eq!(
        mapadd(&x, &y)?,
        Data::Tuple(vec![Data::Int(5), Data::Tuple(vec![Data::Float(5.0)])])
    );
    // Integer and float promote.
    assert_eq!(mapadd(&Data::Int(1), &Data::Float(0.5))?, Data::Float(1.5));
    Ok(())
}

// zeros_like / ones_like over functions and closures.
#[test]
fn test_fill_functions_and_closures() -> Result<()> {
    let mut env = Env::new();
    let f = define_identity(&mut env, "f", 2)?;
    assert_eq!(zeros_like(&Data::Func(f.clone()))?, Data::unit());
    assert_eq!(zeros_like(&Data::Prim(Prim::ScalarAdd))?, Data::unit());
    let c = Data::Closure {
        func: f,
        args: vec![Data::Float(2.0), Data::Int(7)],
    };
    assert_eq!(
        zeros_like(&c)?,
        Data::Tuple(vec![Data::Float(0.0), Data::Int(0)])
    );
    assert_eq!(
        ones_like(&Data::Tuple(vec![Data::Int(5), Data::Bool(false)]))?,
        Data::Tuple(vec![Data::Int(1), Data::Bool(true)])
    );
    assert_eq!(zeros_like(&Data::Null)?, Data::Null);
    Ok(())
}

// The forward table reduces primitives at compile time.
#[test]
fn test_forward_reductions() -> Result<()> {
    let mut env = Env::new();
    let mut vm = Interpreter::new(&mut env);
    assert_eq!(
        vm.call(Data::Prim(Prim::ScalarAdd), vec![Data::Int(2), Data::Int(3)])?,
        Data::Int(5)
    );
    assert_eq!(
        vm.call(
            Data::Prim(Prim::Switch),
            vec![Data::Bool(false), Data::Int(1), Data::Int(2)],
        )?,
        Data::Int(2)
    );
    assert_eq!(
        vm.call(Data::Prim(Prim::Range), vec![Data::Int(3)])?,
        Data::List(vec![Data::Int(0), Data::Int(1), Data::Int(2)])
    );
    assert_eq!(
        vm.call(
            Data::Prim(Prim::Len),
            vec![Data::Tuple(vec![Data::Int(1), Data::Int(2)])],
        )?,
        Data::Int(2)
    );
    // Array kernels have no host implementation.
    match vm.call(Data::Prim(Prim::ArrayMap), vec![]) {
        Err(Error::GenerationFailure { .. }) => {}
        other => panic!("expected GenerationFailure, got {:?}", other),
    }
    Ok(())
}
