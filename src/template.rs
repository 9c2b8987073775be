//! Condition evaluation and argument templating boundary.
//!
//! The engine only defines *when* expressions are evaluated and how the
//! verdict is interpreted; the evaluation itself sits behind the
//! [`Evaluator`] trait. The default implementation, [`JinjaEvaluator`],
//! is built on minijinja with the run-wide undefined-variable policy
//! mapped onto the engine's strict/lenient undefined behaviour.

use indexmap::IndexMap;
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::config::UndefinedBehaviour;

/// Errors from condition or template evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    /// An undefined variable was referenced under the fail-mode policy.
    #[error("undefined variable: {0}")]
    Undefined(String),

    /// The expression itself is malformed or failed structurally.
    #[error("invalid expression '{expr}': {message}")]
    Invalid {
        /// The offending expression
        expr: String,
        /// Underlying engine message
        message: String,
    },
}

impl EvalError {
    fn invalid(expr: &str, err: impl std::fmt::Display) -> Self {
        Self::Invalid {
            expr: expr.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<EvalError> for crate::error::Error {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Undefined(name) => Self::UndefinedVariable(name),
            invalid @ EvalError::Invalid { .. } => Self::Condition(invalid.to_string()),
        }
    }
}

/// The variable scope an expression is evaluated against: the fully
/// merged per-host view produced by the variable store.
pub type Scope = IndexMap<String, JsonValue>;

/// Expression evaluation boundary consumed by the dispatcher.
pub trait Evaluator: Send + Sync {
    /// Evaluate a condition expression to a boolean verdict.
    fn eval_bool(
        &self,
        expr: &str,
        scope: &Scope,
        policy: UndefinedBehaviour,
    ) -> Result<bool, EvalError>;

    /// Substitute `{{ var }}` expressions in a string.
    fn render(
        &self,
        template: &str,
        scope: &Scope,
        policy: UndefinedBehaviour,
    ) -> Result<String, EvalError>;
}

/// Default evaluator backed by minijinja.
#[derive(Debug, Default)]
pub struct JinjaEvaluator;

impl JinjaEvaluator {
    /// Create a new evaluator.
    pub fn new() -> Self {
        Self
    }

    fn environment(policy: UndefinedBehaviour) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(match policy {
            UndefinedBehaviour::Fail => UndefinedBehavior::Strict,
            UndefinedBehaviour::Continue => UndefinedBehavior::Lenient,
        });
        env
    }
}

impl Evaluator for JinjaEvaluator {
    fn eval_bool(
        &self,
        expr: &str,
        scope: &Scope,
        policy: UndefinedBehaviour,
    ) -> Result<bool, EvalError> {
        // Conditions are bare expressions; tolerate a mustache wrapper.
        let trimmed = expr.trim();
        let bare = trimmed
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(trimmed);

        if bare.is_empty() {
            return Ok(true);
        }

        let env = Self::environment(policy);
        let compiled = env
            .compile_expression(bare)
            .map_err(|e| EvalError::invalid(bare, e))?;

        match compiled.eval(Value::from_serialize(scope)) {
            Ok(value) => {
                // A bare reference to an unknown name evaluates to the
                // undefined value without raising inside the engine.
                if value.is_undefined() {
                    match policy {
                        UndefinedBehaviour::Fail => Err(EvalError::Undefined(bare.to_string())),
                        UndefinedBehaviour::Continue => Ok(false),
                    }
                } else {
                    Ok(value.is_true())
                }
            }
            Err(err) if err.kind() == ErrorKind::UndefinedError => {
                Err(EvalError::Undefined(err.to_string()))
            }
            Err(err) => Err(EvalError::invalid(bare, err)),
        }
    }

    fn render(
        &self,
        template: &str,
        scope: &Scope,
        policy: UndefinedBehaviour,
    ) -> Result<String, EvalError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }

        let env = Self::environment(policy);
        env.render_str(template, Value::from_serialize(scope))
            .map_err(|err| {
                if err.kind() == ErrorKind::UndefinedError {
                    EvalError::Undefined(err.to_string())
                } else {
                    EvalError::invalid(template, err)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, JsonValue)]) -> Scope {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn boolean_literals() {
        let eval = JinjaEvaluator::new();
        let empty = Scope::new();
        assert!(eval
            .eval_bool("true", &empty, UndefinedBehaviour::Continue)
            .unwrap());
        assert!(!eval
            .eval_bool("false", &empty, UndefinedBehaviour::Continue)
            .unwrap());
    }

    #[test]
    fn variable_truthiness() {
        let eval = JinjaEvaluator::new();
        let vars = scope(&[("enabled", json!(true)), ("count", json!(0))]);
        assert!(eval
            .eval_bool("enabled", &vars, UndefinedBehaviour::Continue)
            .unwrap());
        assert!(!eval
            .eval_bool("count", &vars, UndefinedBehaviour::Continue)
            .unwrap());
    }

    #[test]
    fn comparisons_against_registered_fields() {
        let eval = JinjaEvaluator::new();
        let vars = scope(&[("result", json!({"rc": 2, "changed": false}))]);
        assert!(eval
            .eval_bool("result.rc == 2", &vars, UndefinedBehaviour::Continue)
            .unwrap());
        assert!(!eval
            .eval_bool("result.changed", &vars, UndefinedBehaviour::Continue)
            .unwrap());
    }

    #[test]
    fn undefined_is_falsy_in_continue_mode() {
        let eval = JinjaEvaluator::new();
        let empty = Scope::new();
        assert!(!eval
            .eval_bool("missing_var", &empty, UndefinedBehaviour::Continue)
            .unwrap());
        assert!(eval
            .eval_bool("not missing_var", &empty, UndefinedBehaviour::Continue)
            .unwrap());
    }

    #[test]
    fn undefined_errors_in_fail_mode() {
        let eval = JinjaEvaluator::new();
        let empty = Scope::new();
        let err = eval
            .eval_bool("missing_var", &empty, UndefinedBehaviour::Fail)
            .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(_)));
    }

    #[test]
    fn mustache_wrapper_is_tolerated() {
        let eval = JinjaEvaluator::new();
        let vars = scope(&[("ready", json!(true))]);
        assert!(eval
            .eval_bool("{{ ready }}", &vars, UndefinedBehaviour::Continue)
            .unwrap());
    }

    #[test]
    fn render_substitutes_variables() {
        let eval = JinjaEvaluator::new();
        let vars = scope(&[("name", json!("web1"))]);
        let rendered = eval
            .render("host={{ name }}", &vars, UndefinedBehaviour::Continue)
            .unwrap();
        assert_eq!(rendered, "host=web1");
    }

    #[test]
    fn render_undefined_policy() {
        let eval = JinjaEvaluator::new();
        let empty = Scope::new();
        let lenient = eval
            .render("v={{ missing }}", &empty, UndefinedBehaviour::Continue)
            .unwrap();
        assert_eq!(lenient, "v=");

        let err = eval
            .render("v={{ missing }}", &empty, UndefinedBehaviour::Fail)
            .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(_)));
    }

    #[test]
    fn plain_strings_pass_through_untouched() {
        let eval = JinjaEvaluator::new();
        let empty = Scope::new();
        let rendered = eval
            .render("no templating here", &empty, UndefinedBehaviour::Fail)
            .unwrap();
        assert_eq!(rendered, "no templating here");
    }
}
