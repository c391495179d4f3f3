//
// error.rs
//
// Static (lex/parse) and runtime errors
//

use thiserror::Error;

use crate::ast::LocationRange;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{loc} {message}")]
pub struct StaticError {
    pub message: String,
    pub loc: LocationRange,
}

impl StaticError {
    pub fn new(message: impl Into<String>, loc: LocationRange) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("STATIC ERROR: {0}")]
    Static(#[from] StaticError),

    #[error("RUNTIME ERROR: {message}")]
    Runtime {
        message: String,
        loc: Option<LocationRange>,
    },

    #[error("max stack frames exceeded")]
    StackOverflow { loc: Option<LocationRange> },
}

impl EvalError {
    pub fn runtime(message: impl Into<String>, loc: Option<&LocationRange>) -> Self {
        EvalError::Runtime {
            message: message.into(),
            loc: loc.filter(|l| l.is_set()).cloned(),
        }
    }

    /// Location the error points at, when one is known.
    pub fn location(&self) -> Option<&LocationRange> {
        match self {
            EvalError::Static(e) => Some(&e.loc),
            EvalError::Runtime { loc, .. } | EvalError::StackOverflow { loc } => loc.as_ref(),
        }
    }

    /// Message without the error-class prefix.
    pub fn message(&self) -> String {
        match self {
            EvalError::Static(e) => e.message.clone(),
            EvalError::Runtime { message, .. } => message.clone(),
            EvalError::StackOverflow { .. } => "max stack frames exceeded".to_string(),
        }
    }

    /// Attaches `loc` when the error has no location yet.
    pub fn at(self, loc: &LocationRange) -> Self {
        if !loc.is_set() {
            return self;
        }
        match self {
            EvalError::Runtime { message, loc: None } => EvalError::Runtime {
                message,
                loc: Some(loc.clone()),
            },
            EvalError::StackOverflow { loc: None } => EvalError::StackOverflow {
                loc: Some(loc.clone()),
            },
            other => other,
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
