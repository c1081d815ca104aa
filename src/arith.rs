// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    error::{Error, Result},
    value::{scalar_add, Data},
};

/// Produce a structure congruent to `x` whose scalar leaves are `value`.
/// Top-level functions and primitives map to the empty tuple; a closure maps
/// to one filled slot per stored argument.
pub fn fill(x: &Data, value: i64) -> Result<Data> {
    match x {
        Data::Int(_) => Ok(Data::Int(value)),
        Data::Float(_) => Ok(Data::Float(value as f64)),
        Data::Bool(_) => Ok(Data::Bool(value != 0)),
        Data::Tuple(elems) => Ok(Data::Tuple(
            elems.iter().map(|e| fill(e, value)).collect::<Result<_>>()?,
        )),
        Data::List(elems) => Ok(Data::List(
            elems.iter().map(|e| fill(e, value)).collect::<Result<_>>()?,
        )),
        Data::Func(_) | Data::Prim(_) => Ok(Data::unit()),
        Data::Closure { args, .. } => Ok(Data::Tuple(
            args.iter().map(|a| fill(a, value)).collect::<Result<_>>()?,
        )),
        Data::Null => Ok(Data::Null),
        other => Err(Error::type_mismatch(
            func_name!(),
            format!("cannot create a {} conformant with {:?}", value, other),
        )),
    }
}

/// The "0" operator: a zeroed-out structure congruent to `x`.
pub fn zeros_like(x: &Data) -> Result<Data> {
    fill(x, 0)
}

/// A structure congruent to `x` with unit leaves.
pub fn ones_like(x: &Data) -> Result<Data> {
    fill(x, 1)
}

/// Element-wise addition across congruent structures, with ZERO as a left
/// identity: `mapadd(ZERO, y) == y` whatever the shape of `y`. ZERO must
/// never reach the second operand; the gradient accumulator guarantees the
/// second operand is conformant.
pub fn mapadd(x: &Data, y: &Data) -> Result<Data> {
    if let Data::Zero = y {
        return Err(Error::type_mismatch(
            func_name!(),
            "ZERO should never be found as the second argument to mapadd",
        ));
    }
    match (x, y) {
        (Data::Zero, _) => Ok(y.clone()),
        _ if x.is_scalar() && y.is_scalar() => scalar_add(x, y),
        (Data::Tuple(a), Data::Tuple(b)) => {
            if a.len() != b.len() {
                return Err(Error::type_mismatch(
                    func_name!(),
                    format!("tuple lengths differ: {} and {}", a.len(), b.len()),
                ));
            }
            Ok(Data::Tuple(
                a.iter()
                    .zip(b.iter())
                    .map(|(l, r)| mapadd(l, r))
                    .collect::<Result<_>>()?,
            ))
        }
        (Data::Null, Data::Null) => Ok(Data::Null),
        _ => Err(Error::type_mismatch(
            func_name!(),
            format!("cannot mapadd {:?} and {:?}", x, y),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_shapes() -> Result<()> {
        let x = Data::Tuple(vec![
            Data::Int(1),
            Data::Tuple(vec![Data::Float(2.5), Data::Int(3)]),
        ]);
        assert_eq!(
            zeros_like(&x)?,
            Data::Tuple(vec![
                Data::Int(0),
                Data::Tuple(vec![Data::Float(0.0), Data::Int(0)]),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_mapadd_zero_left_identity() -> Result<()> {
        let y = Data::Tuple(vec![Data::Int(1), Data::Float(2.0)]);
        assert_eq!(mapadd(&Data::Zero, &y)?, y);
        assert!(mapadd(&y, &Data::Zero).is_err());
        Ok(())
    }
}
