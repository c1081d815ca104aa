// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    error::{Error, Result},
    ir::Value,
    prim::Prim,
    symbol::Symbol,
};
use num::ToPrimitive;

/// A host-level runtime value, consumed by the primitive `forward`
/// implementations and the reference evaluator. Functions are carried as
/// symbols into the global environment, never as references.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Data>),
    List(Vec<Data>),
    /// A compiled top-level function, by its registered symbol.
    Func(Symbol),
    /// A primitive operator value.
    Prim(Prim),
    /// Partial application of a top-level function or primitive.
    Closure { func: Symbol, args: Vec<Data> },
    /// The additive identity sentinel.
    Zero,
    /// No value, for host-side structural operations only.
    Null,
}

impl Data {
    pub fn unit() -> Data {
        Data::Tuple(Vec::new())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Data::Int(_) | Data::Float(_))
    }

    /// Numeric view of a scalar, promoting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Int(i) => i.to_f64(),
            Data::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Data::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch(
                func_name!(),
                format!("expected a boolean, got {:?}", other),
            )),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Data]> {
        match self {
            Data::Tuple(elems) => Ok(elems),
            other => Err(Error::type_mismatch(
                func_name!(),
                format!("expected a tuple, got {:?}", other),
            )),
        }
    }

    /// Lower a literal into a runtime value.
    pub fn from_value(value: &Value) -> Data {
        match value {
            Value::Int(i) => Data::Int(*i),
            Value::Float(f) => Data::Float(*f),
            Value::Bool(b) => Data::Bool(*b),
            Value::Str(s) => Data::Str(s.clone()),
            Value::Shape(dims) => Data::Tuple(dims.iter().map(|d| Data::Int(*d as i64)).collect()),
            Value::Zero => Data::Zero,
        }
    }
}

/// Sum of two scalars, promoting to float when the kinds differ.
pub fn scalar_add(x: &Data, y: &Data) -> Result<Data> {
    scalar_op(func_name!(), x, y, |a, b| a + b, |a, b| a + b)
}

pub fn scalar_sub(x: &Data, y: &Data) -> Result<Data> {
    scalar_op(func_name!(), x, y, |a, b| a - b, |a, b| a - b)
}

pub fn scalar_mul(x: &Data, y: &Data) -> Result<Data> {
    scalar_op(func_name!(), x, y, |a, b| a * b, |a, b| a * b)
}

pub fn scalar_div(x: &Data, y: &Data) -> Result<Data> {
    match (x, y) {
        (Data::Int(a), Data::Int(b)) if *b != 0 => Ok(Data::Int(a / b)),
        _ => {
            let (a, b) = both_f64(func_name!(), x, y)?;
            Ok(Data::Float(a / b))
        }
    }
}

pub fn scalar_neg(x: &Data) -> Result<Data> {
    match x {
        Data::Int(a) => Ok(Data::Int(-a)),
        Data::Float(a) => Ok(Data::Float(-a)),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("expected a scalar, got {:?}", other),
        )),
    }
}

fn scalar_op(
    name: &str,
    x: &Data,
    y: &Data,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Data> {
    match (x, y) {
        (Data::Int(a), Data::Int(b)) => Ok(Data::Int(int_op(*a, *b))),
        _ => {
            let (a, b) = both_f64(name, x, y)?;
            Ok(Data::Float(float_op(a, b)))
        }
    }
}

fn both_f64(name: &str, x: &Data, y: &Data) -> Result<(f64, f64)> {
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Error::type_mismatch(
            name,
            format!("expected scalars, got {:?} and {:?}", x, y),
        )),
    }
}
