//! Whitelisted functions
//!
//! Only the functions registered here can appear in a formula. The parser
//! rejects any other name before `(`, and checks argument counts.

pub mod logical;
pub mod math;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{FormulaError, FormulaResult};
use crate::evaluator::FormulaValue;

/// Function implementation signature
pub type FunctionImpl = fn(&[FormulaValue]) -> FormulaResult<FormulaValue>;

/// How a function's arguments are evaluated
#[derive(Clone, Copy)]
pub enum FunctionKind {
    /// Every argument is evaluated, then the implementation runs
    Eager(FunctionImpl),
    /// The evaluator decides which arguments to evaluate (`IF`, `CASE`)
    Conditional,
}

/// Function definition
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub kind: FunctionKind,
}

impl FunctionDef {
    /// Check an argument count against this definition
    pub fn check_arity(&self, actual: usize) -> FormulaResult<()> {
        let too_few = actual < self.min_args;
        let too_many = self.max_args.map_or(false, |max| actual > max);
        if too_few || too_many {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => max.to_string(),
                Some(max) => format!("{}..{}", self.min_args, max),
                None => format!("at least {}", self.min_args),
            };
            return Err(FormulaError::ArgumentCount {
                function: self.name.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new registry with all whitelisted functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };

        registry.register_conditional_functions();
        registry.register_math_functions();
        registry.register_logical_functions();

        registry
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name.to_ascii_uppercase().as_str())
    }

    /// Names of all registered functions, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name, def);
    }

    fn register_conditional_functions(&mut self) {
        self.register(FunctionDef {
            name: "IF",
            min_args: 3,
            max_args: Some(3),
            kind: FunctionKind::Conditional,
        });

        // Pairs of WHEN/THEN, optionally followed by ELSE
        self.register(FunctionDef {
            name: "CASE",
            min_args: 2,
            max_args: None,
            kind: FunctionKind::Conditional,
        });
    }

    fn register_math_functions(&mut self) {
        self.register(FunctionDef {
            name: "ABS",
            min_args: 1,
            max_args: Some(1),
            kind: FunctionKind::Eager(math::fn_abs),
        });

        self.register(FunctionDef {
            name: "MIN",
            min_args: 1,
            max_args: None,
            kind: FunctionKind::Eager(math::fn_min),
        });

        self.register(FunctionDef {
            name: "MAX",
            min_args: 1,
            max_args: None,
            kind: FunctionKind::Eager(math::fn_max),
        });

        self.register(FunctionDef {
            name: "ROUND",
            min_args: 1,
            max_args: Some(2),
            kind: FunctionKind::Eager(math::fn_round),
        });
    }

    fn register_logical_functions(&mut self) {
        self.register(FunctionDef {
            name: "AND",
            min_args: 1,
            max_args: None,
            kind: FunctionKind::Eager(logical::fn_and),
        });

        self.register(FunctionDef {
            name: "OR",
            min_args: 1,
            max_args: None,
            kind: FunctionKind::Eager(logical::fn_or),
        });

        self.register(FunctionDef {
            name: "NOT",
            min_args: 1,
            max_args: Some(1),
            kind: FunctionKind::Eager(logical::fn_not),
        });
    }
}

/// Global function registry (lazily initialized)
static FUNCTION_REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

pub fn function_registry() -> &'static FunctionRegistry {
    FUNCTION_REGISTRY.get_or_init(FunctionRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist() {
        assert_eq!(
            function_registry().names(),
            vec!["ABS", "AND", "CASE", "IF", "MAX", "MIN", "NOT", "OR", "ROUND"]
        );
        assert!(function_registry().get("round").is_some());
        assert!(function_registry().get("EVAL").is_none());
    }

    #[test]
    fn test_check_arity() {
        let round = function_registry().get("ROUND").unwrap();
        assert!(round.check_arity(1).is_ok());
        assert!(round.check_arity(2).is_ok());
        match round.check_arity(3) {
            Err(FormulaError::ArgumentCount { expected, actual, .. }) => {
                assert_eq!(expected, "1..2");
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(function_registry().get("MAX").unwrap().check_arity(0).is_err());
    }
}
