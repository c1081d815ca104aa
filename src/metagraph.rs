// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph generation from abstract argument signatures.

use crate::{
    builder::Graph,
    env::Env,
    error::{Error, Result},
    types::{broaden, AbstractValue},
};
use indexmap::IndexMap;
use std::sync::Arc;

/// A polymorphic operator whose concrete IR body depends on the abstract
/// types of its arguments. `generate` memoizes by the normalized signature;
/// cache hits return the previously built [`Graph`] by reference, and
/// failures are not memoized.
pub trait MetaGraph {
    fn name(&self) -> &str;

    /// Erase the argument aspects the generator is insensitive to. The
    /// default broadens literal values away.
    fn normalize_args(&self, args: &[AbstractValue]) -> Vec<AbstractValue> {
        args.iter().map(broaden).collect()
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph>;

    /// Synthesize a graph for a normalized signature.
    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph>;

    fn generate(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        let key = self.normalize_args(args);
        if let Some(g) = self.cache().get(&key) {
            return Ok(g.clone());
        }
        let g = self.generate_graph(env, &key)?;
        self.cache().insert(key, g.clone());
        Ok(g)
    }
}

/// A type pattern for [`MultitypeGraph`] dispatch. `Number` accepts both
/// integer and floating-point scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypePattern {
    Number,
    Int,
    Float,
    Bool,
    Array,
    Tuple,
    List,
    Class,
    Function,
    Any,
}

impl TypePattern {
    pub fn matches(self, arg: &AbstractValue) -> bool {
        use crate::types::ScalarType;
        match self {
            TypePattern::Number => matches!(
                arg,
                AbstractValue::Scalar {
                    ty: ScalarType::Int,
                    ..
                } | AbstractValue::Scalar {
                    ty: ScalarType::Float,
                    ..
                }
            ),
            TypePattern::Int => matches!(
                arg,
                AbstractValue::Scalar {
                    ty: ScalarType::Int,
                    ..
                }
            ),
            TypePattern::Float => matches!(
                arg,
                AbstractValue::Scalar {
                    ty: ScalarType::Float,
                    ..
                }
            ),
            TypePattern::Bool => matches!(
                arg,
                AbstractValue::Scalar {
                    ty: ScalarType::Bool,
                    ..
                }
            ),
            TypePattern::Array => matches!(arg, AbstractValue::Array { .. }),
            TypePattern::Tuple => matches!(arg, AbstractValue::Tuple(_)),
            TypePattern::List => matches!(arg, AbstractValue::List(_)),
            TypePattern::Class => matches!(arg, AbstractValue::Class { .. }),
            TypePattern::Function => matches!(arg, AbstractValue::Function(_)),
            TypePattern::Any => true,
        }
    }
}

/// How a dispatch entry builds its graph once its pattern matched.
pub type EntryBuilder = Arc<dyn Fn(&mut Env, &[AbstractValue]) -> Result<Graph> + Send + Sync>;

/// Associates type signatures to graph builders. Dispatch is first-match in
/// registration order.
pub struct MultitypeGraph {
    name: String,
    entries: Vec<(Vec<TypePattern>, EntryBuilder)>,
    cache: IndexMap<Vec<AbstractValue>, Graph>,
}

impl MultitypeGraph {
    pub fn new(name: &str) -> Self {
        MultitypeGraph {
            name: name.to_string(),
            entries: Vec::new(),
            cache: IndexMap::new(),
        }
    }

    /// Register a builder for the given type signature.
    pub fn register<F>(&mut self, patterns: Vec<TypePattern>, builder: F)
    where
        F: Fn(&mut Env, &[AbstractValue]) -> Result<Graph> + Send + Sync + 'static,
    {
        self.entries.push((patterns, Arc::new(builder)));
    }

    fn find(&self, args: &[AbstractValue]) -> Result<EntryBuilder> {
        for (patterns, builder) in &self.entries {
            if patterns.len() != args.len() {
                continue;
            }
            if patterns.iter().zip(args.iter()).all(|(p, a)| p.matches(a)) {
                return Ok(builder.clone());
            }
        }
        Err(Error::no_signature(&self.name, args))
    }
}

impl MetaGraph for MultitypeGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache(&mut self) -> &mut IndexMap<Vec<AbstractValue>, Graph> {
        &mut self.cache
    }

    fn generate_graph(&mut self, env: &mut Env, args: &[AbstractValue]) -> Result<Graph> {
        let builder = self.find(args)?;
        builder(env, args)
    }
}
