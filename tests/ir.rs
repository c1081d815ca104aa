// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use gradir::prelude::*;

fn sample_lambda() -> Lambda {
    let x = Symbol::local("x");
    let y = Symbol::local("y");
    let t = Symbol::local("t");
    let u = Symbol::local("u");
    Lambda::new(
        "sample",
        vec![x.clone(), y.clone()],
        Let {
            bindings: vec![
                Binding::new(
                    t.clone(),
                    Expr::apply(
                        Leaf::Sym(Prim::ScalarMul.sym()),
                        vec![Leaf::sym(&x), Leaf::Val(Value::Float(2.0))],
                    ),
                ),
                Binding::new(
                    u.clone(),
                    Expr::Tuple(vec![Leaf::sym(&t), Leaf::sym(&y)]),
                ),
            ],
            body: u,
        },
    )
}

// IR snapshots survive a serde round trip byte-for-byte.
#[test]
fn test_bincode_round_trip() -> anyhow::Result<()> {
    let lambda = sample_lambda();
    let bytes = bincode::serialize(&lambda)?;
    let back: Lambda = bincode::deserialize(&bytes)?;
    assert_eq!(lambda, back);
    assert_eq!(bincode::serialize(&back)?, bytes);

    let sym = Symbol::new("x", Namespace::Local, 3, Relation::Sens);
    let bytes = bincode::serialize(&sym)?;
    let back: Symbol = bincode::deserialize(&bytes)?;
    assert_eq!(sym, back);
    Ok(())
}

#[test]
fn test_symbol_display() {
    let x = Symbol::local("x");
    assert_eq!(format!("{}", x), "x");
    let sens = Symbol::new("x", Namespace::Local, 2, Relation::Sens);
    assert_eq!(format!("{}", sens), "\u{2207}x#2");
    let tag = Symbol::new("f", Namespace::Global, 1, Relation::Jtag);
    assert_eq!(format!("{}", tag), "\u{2191}f");
}

#[test]
fn test_value_equality_is_bitwise_on_floats() {
    assert_eq!(Value::Float(1.5), Value::Float(1.5));
    assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_eq!(Value::Zero, Value::Zero);
}

// The freshness service never collides with symbols it has scanned.
#[test]
fn test_gensym_scan_freshness() {
    let lambda = sample_lambda();
    let mut gen = GenSym::scan(&lambda);
    let existing: Vec<Symbol> = lambda
        .params
        .iter()
        .chain(lambda.bound_symbols().into_iter())
        .cloned()
        .collect();
    for base in &existing {
        let fresh = gen.fresh(base, base.relation);
        assert!(
            !existing.contains(&fresh),
            "fresh symbol {} collides",
            fresh
        );
    }
}

#[test]
fn test_duplicate_registration_rejected() -> Result<()> {
    let mut env = Env::new();
    let sym = env.gen("f", Relation::None);
    env.define(sym.clone(), sample_lambda())?;
    match env.define(sym, sample_lambda()) {
        Err(Error::DuplicateGlobal { .. }) => Ok(()),
        other => panic!("expected DuplicateGlobal, got {:?}", other.is_ok()),
    }
}

#[test]
fn test_registration_sets_ref() -> Result<()> {
    let mut env = Env::new();
    let sym = env.gen("f", Relation::None);
    let registered = env.define(sym.clone(), sample_lambda())?;
    assert_eq!(registered.ref_sym, Some(sym.clone()));
    assert!(env.contains(&sym));
    Ok(())
}

#[test]
fn test_lambda_display_mentions_bindings() {
    let text = format!("{}", sample_lambda());
    assert!(text.contains("scalar_mul"));
    assert!(text.contains("in u"));
}
