// Copyright (c) Facebook, Inc. and its affiliates
// SPDX-License-Identifier: MIT OR Apache-2.0

use backtrace::Backtrace;
use std::fmt::Debug;
use thiserror::Error;

/// Default error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Type mismatch in {name}: {message}\n{trace}")]
    TypeMismatch {
        name: String,
        message: String,
        trace: String,
    },
    #[error("Incompatible shapes for {name}: {shapes}\n{trace}")]
    ShapeMismatch {
        name: String,
        shapes: String,
        trace: String,
    },
    #[error("No matching signature for {name}: {types}\n{trace}")]
    NoSignature {
        name: String,
        types: String,
        trace: String,
    },
    #[error("No gradient registered for primitive {prim}\n{trace}")]
    NoGradient {
        name: String,
        prim: String,
        trace: String,
    },
    #[error("Primitives have no primal ({name}: {message})\n{trace}")]
    UnliftablePrimal {
        name: String,
        message: String,
        trace: String,
    },
    #[error("Could not generate a graph in {name}: {message}\n{trace}")]
    GenerationFailure {
        name: String,
        message: String,
        trace: String,
    },
    #[error("IR invariant violated in {name}: {message}\n{trace}")]
    InvariantViolation {
        name: String,
        message: String,
        trace: String,
    },
    #[error("Unbound symbol in {name}: {symbol}\n{trace}")]
    MissingGlobal {
        name: String,
        symbol: String,
        trace: String,
    },
    #[error("Symbol registered twice: {symbol}\n{trace}")]
    DuplicateGlobal { symbol: String, trace: String },
    #[error("Wrong number of arguments for {name}: expected {expected}, got {got}\n{trace}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
        trace: String,
    },
    #[error("Unexpected empty input for {name}\n{trace}")]
    Empty { name: String, trace: String },
}

/// Default result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Computes the name of the current function.
// https://stackoverflow.com/questions/38088067/equivalent-of-func-or-function-in-rust
#[macro_export]
macro_rules! func_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

impl Error {
    fn backtrace() -> String {
        if std::env::var("RUST_BACKTRACE").is_ok() {
            format!("{:?}", Backtrace::new())
        } else {
            String::new()
        }
    }

    /// Report a value of the wrong kind.
    pub fn type_mismatch<M>(name: &str, message: M) -> Self
    where
        M: ToString,
    {
        Error::TypeMismatch {
            name: name.to_string(),
            message: message.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report a failed broadcast.
    pub fn shape_mismatch<S>(name: &str, shapes: S) -> Self
    where
        S: Debug,
    {
        Error::ShapeMismatch {
            name: name.to_string(),
            shapes: format!("{:?}", shapes),
            trace: Self::backtrace(),
        }
    }

    /// Report that no dispatch entry accepted the argument types.
    pub fn no_signature<T>(name: &str, types: T) -> Self
    where
        T: Debug,
    {
        Error::NoSignature {
            name: name.to_string(),
            types: format!("{:?}", types),
            trace: Self::backtrace(),
        }
    }

    /// Report a primitive without a gradient factory.
    pub fn no_gradient<P>(name: &str, prim: P) -> Self
    where
        P: ToString,
    {
        Error::NoGradient {
            name: name.to_string(),
            prim: prim.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report an attempt to unlift a value with no primal.
    pub fn unliftable_primal<M>(name: &str, message: M) -> Self
    where
        M: ToString,
    {
        Error::UnliftablePrimal {
            name: name.to_string(),
            message: message.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report a meta-graph that could not synthesize a graph.
    pub fn generation_failure<M>(name: &str, message: M) -> Self
    where
        M: ToString,
    {
        Error::GenerationFailure {
            name: name.to_string(),
            message: message.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report broken IR invariants on a transform input.
    pub fn invariant<M>(name: &str, message: M) -> Self
    where
        M: ToString,
    {
        Error::InvariantViolation {
            name: name.to_string(),
            message: message.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report a symbol that resolves to nothing.
    pub fn missing_global<S>(name: &str, symbol: S) -> Self
    where
        S: ToString,
    {
        Error::MissingGlobal {
            name: name.to_string(),
            symbol: symbol.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report an overwritten registration.
    pub fn duplicate_global<S>(symbol: S) -> Self
    where
        S: ToString,
    {
        Error::DuplicateGlobal {
            symbol: symbol.to_string(),
            trace: Self::backtrace(),
        }
    }

    /// Report an arity mismatch.
    pub fn arity(name: &str, expected: usize, got: usize) -> Self {
        Error::Arity {
            name: name.to_string(),
            expected,
            got,
            trace: Self::backtrace(),
        }
    }

    /// Report an empty input.
    pub fn empty(name: &str) -> Self {
        Error::Empty {
            name: name.to_string(),
            trace: Self::backtrace(),
        }
    }
}
