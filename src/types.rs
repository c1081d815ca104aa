// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Abstract type and shape descriptors. These are produced by the inference
//! stage and consumed here for meta-graph dispatch; only their externally
//! observable aspects are modeled.

use crate::{
    error::{Error, Result},
    ir::Value,
    prim::Prim,
    symbol::Symbol,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
}

/// One array dimension; `Any` is the wildcard of unknown extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Known(usize),
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    pub fn known(dims: &[usize]) -> Self {
        Shape(dims.iter().map(|d| Dim::Known(*d)).collect())
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|d| matches!(d, Dim::Any))
    }

    /// Lower a fully known shape into a literal.
    pub fn to_value(&self) -> Result<Value> {
        let mut dims = Vec::with_capacity(self.0.len());
        for d in &self.0 {
            match d {
                Dim::Known(n) => dims.push(*n),
                Dim::Any => {
                    return Err(Error::shape_mismatch(func_name!(), self));
                }
            }
        }
        Ok(Value::Shape(dims))
    }
}

/// The function designated by an abstract function value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionRef {
    /// A compiled graph function and its parameter count.
    Graph { sym: Symbol, nparams: usize },
    Prim(Prim),
}

/// Abstract value descriptor: kind tag, element types, and shapes whose
/// dimensions may be wildcards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbstractValue {
    Scalar {
        ty: ScalarType,
        /// A known literal value, when inference tracked one.
        value: Option<Value>,
    },
    Array {
        element: ScalarType,
        shape: Shape,
    },
    Tuple(Vec<AbstractValue>),
    List(Box<AbstractValue>),
    Class {
        tag: String,
        attrs: Vec<(String, AbstractValue)>,
    },
    Function(FunctionRef),
}

impl AbstractValue {
    pub fn scalar(ty: ScalarType) -> Self {
        AbstractValue::Scalar { ty, value: None }
    }

    pub fn array(element: ScalarType, dims: &[usize]) -> Self {
        AbstractValue::Array {
            element,
            shape: Shape::known(dims),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, AbstractValue::Array { .. })
    }

    /// The element type of a scalar or array.
    pub fn element_type(&self) -> Option<ScalarType> {
        match self {
            AbstractValue::Scalar { ty, .. } => Some(*ty),
            AbstractValue::Array { element, .. } => Some(*element),
            _ => None,
        }
    }
}

/// Erase the literal values a generator is insensitive to.
pub fn broaden(a: &AbstractValue) -> AbstractValue {
    match a {
        AbstractValue::Scalar { ty, .. } => AbstractValue::Scalar {
            ty: *ty,
            value: None,
        },
        AbstractValue::Array { .. } | AbstractValue::Function(_) => a.clone(),
        AbstractValue::Tuple(elems) => AbstractValue::Tuple(elems.iter().map(broaden).collect()),
        AbstractValue::List(elem) => AbstractValue::List(Box::new(broaden(elem))),
        AbstractValue::Class { tag, attrs } => AbstractValue::Class {
            tag: tag.clone(),
            attrs: attrs
                .iter()
                .map(|(n, v)| (n.clone(), broaden(v)))
                .collect(),
        },
    }
}

/// Broadcast two shapes, aligning on the right and padding with ones. A
/// dimension of one stretches; the wildcard defers to the other side.
pub fn broadcast_shape(x: &Shape, y: &Shape) -> Result<Shape> {
    let n = x.0.len().max(y.0.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let a = if i + x.0.len() >= n {
            x.0[i + x.0.len() - n]
        } else {
            Dim::Known(1)
        };
        let b = if i + y.0.len() >= n {
            y.0[i + y.0.len() - n]
        } else {
            Dim::Known(1)
        };
        let dim = match (a, b) {
            (Dim::Known(1), d) => d,
            (d, Dim::Known(1)) => d,
            (Dim::Any, d) => d,
            (d, Dim::Any) => d,
            (Dim::Known(p), Dim::Known(q)) if p == q => Dim::Known(p),
            _ => return Err(Error::shape_mismatch(func_name!(), (x, y))),
        };
        out.push(dim);
    }
    Ok(Shape(out))
}
