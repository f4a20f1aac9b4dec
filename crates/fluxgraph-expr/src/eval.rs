//! Compiled programs and their evaluation against a [`Scope`].

use crate::parser::{self, BinaryOp, CompileError, Expr, Stmt, UnaryOp};
use crate::Scope;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// An intermediate evaluation result. Numbers and booleans coerce into
/// each other at use sites: booleans read as 1/0, numbers are true when
/// non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn as_num(self) -> f64 {
        match self {
            Value::Num(n) => n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Value::Num(n) => n != 0.0,
            Value::Bool(b) => b,
        }
    }
}

// ---------------------------------------------------------------------------
// Statement-list evaluation
// ---------------------------------------------------------------------------

fn eval_expr(expr: &Expr, scope: &mut dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => scope
            .get(name)
            .map(Value::Num)
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Unary(op, inner) => {
            let value = eval_expr(inner, scope)?;
            Ok(match op {
                UnaryOp::Neg => Value::Num(-value.as_num()),
                UnaryOp::Not => Value::Bool(!value.as_bool()),
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            // Logical operators short-circuit; everything else is strict.
            match op {
                BinaryOp::And => {
                    let left = eval_expr(lhs, scope)?;
                    if !left.as_bool() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, scope)?.as_bool()));
                }
                BinaryOp::Or => {
                    let left = eval_expr(lhs, scope)?;
                    if left.as_bool() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, scope)?.as_bool()));
                }
                _ => {}
            }
            let left = eval_expr(lhs, scope)?;
            let right = eval_expr(rhs, scope)?;
            let (l, r) = (left.as_num(), right.as_num());
            Ok(match op {
                BinaryOp::Add => Value::Num(l + r),
                BinaryOp::Sub => Value::Num(l - r),
                BinaryOp::Mul => Value::Num(l * r),
                BinaryOp::Div => Value::Num(l / r),
                BinaryOp::Mod => Value::Num(l % r),
                BinaryOp::Lt => Value::Bool(l < r),
                BinaryOp::Lte => Value::Bool(l <= r),
                BinaryOp::Gt => Value::Bool(l > r),
                BinaryOp::Gte => Value::Bool(l >= r),
                BinaryOp::Eq => Value::Bool(l == r),
                BinaryOp::Neq => Value::Bool(l != r),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            })
        }
    }
}

fn eval_stmts(stmts: &[Stmt], scope: &mut dyn Scope) -> Result<Value, EvalError> {
    let mut last = Value::Num(0.0);
    for stmt in stmts {
        last = match stmt {
            Stmt::Expr(expr) => eval_expr(expr, scope)?,
            Stmt::Assign(name, expr) => {
                let value = eval_expr(expr, scope)?;
                scope.set(name, value.as_num());
                value
            }
        };
    }
    Ok(last)
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// A compiled statement list evaluated for its numeric result.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericProgram {
    source: String,
    stmts: Vec<Stmt>,
}

impl NumericProgram {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        Ok(Self {
            source: source.to_owned(),
            stmts: parser::parse(source)?,
        })
    }

    /// A program that always yields `value`.
    pub fn constant(value: f64) -> Self {
        Self {
            source: format!("{value}"),
            stmts: vec![Stmt::Expr(Expr::Num(value))],
        }
    }

    /// A program that reads a single variable.
    pub fn variable(name: &str) -> Self {
        Self {
            source: name.to_owned(),
            stmts: vec![Stmt::Expr(Expr::Var(name.to_owned()))],
        }
    }

    /// The source text the program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, scope: &mut dyn Scope) -> Result<f64, EvalError> {
        Ok(eval_stmts(&self.stmts, scope)?.as_num())
    }
}

/// A compiled statement list evaluated for its boolean result.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanProgram {
    source: String,
    stmts: Vec<Stmt>,
}

impl BooleanProgram {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        Ok(Self {
            source: source.to_owned(),
            stmts: parser::parse(source)?,
        })
    }

    /// A program that always yields `value`.
    pub fn always(value: bool) -> Self {
        Self {
            source: if value { "true" } else { "false" }.to_owned(),
            stmts: vec![Stmt::Expr(Expr::Bool(value))],
        }
    }

    /// The source text the program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, scope: &mut dyn Scope) -> Result<bool, EvalError> {
        Ok(eval_stmts(&self.stmts, scope)?.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapScope;
    use float_cmp::assert_approx_eq;

    fn num(source: &str, scope: &mut MapScope) -> f64 {
        NumericProgram::compile(source)
            .expect("compile")
            .eval(scope)
            .expect("eval")
    }

    fn boolean(source: &str, scope: &mut MapScope) -> bool {
        BooleanProgram::compile(source)
            .expect("compile")
            .eval(scope)
            .expect("eval")
    }

    #[test]
    fn arithmetic() {
        let mut scope = MapScope::new();
        assert_eq!(num("1 + 2 * 3", &mut scope), 7.0);
        assert_eq!(num("(1 + 2) * 3", &mut scope), 9.0);
        assert_eq!(num("10 % 3", &mut scope), 1.0);
        assert_approx_eq!(f64, num("1 / 3", &mut scope), 1.0 / 3.0);
    }

    #[test]
    fn unary_negation_and_not() {
        let mut scope = MapScope::new();
        assert_eq!(num("-4", &mut scope), -4.0);
        assert_eq!(num("--4", &mut scope), 4.0);
        assert!(boolean("!false", &mut scope));
        assert!(boolean("not (1 > 2)", &mut scope));
    }

    #[test]
    fn variables_read_from_scope() {
        let mut scope: MapScope = [("x".to_owned(), 10.0)].into_iter().collect();
        assert_eq!(num("x - 3", &mut scope), 7.0);
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let mut scope = MapScope::new();
        let program = NumericProgram::compile("missing + 1").unwrap();
        assert_eq!(
            program.eval(&mut scope),
            Err(EvalError::UndefinedVariable("missing".to_owned())),
        );
    }

    #[test]
    fn assignment_writes_scope_and_yields_value() {
        let mut scope = MapScope::new();
        assert_eq!(num("x = 5", &mut scope), 5.0);
        assert_eq!(scope.get("x"), Some(5.0));
    }

    #[test]
    fn last_statement_wins() {
        let mut scope = MapScope::new();
        assert_eq!(num("a = 1; b = 2; a + b", &mut scope), 3.0);
    }

    #[test]
    fn boolean_coercions() {
        let mut scope = MapScope::new();
        // Numbers are true when non-zero.
        assert!(boolean("3", &mut scope));
        assert!(!boolean("0", &mut scope));
        // Booleans read as 1/0 in numeric position.
        assert_eq!(num("true + true", &mut scope), 2.0);
        assert_eq!(num("(2 > 1) * 10", &mut scope), 10.0);
    }

    #[test]
    fn short_circuit_skips_rhs() {
        // The right side references an undefined variable; short-circuit
        // must avoid evaluating it.
        let mut scope = MapScope::new();
        assert!(!boolean("false && missing", &mut scope));
        assert!(boolean("true || missing", &mut scope));
    }

    #[test]
    fn division_by_zero_is_ieee() {
        let mut scope = MapScope::new();
        assert!(num("1 / 0", &mut scope).is_infinite());
        assert!(num("0 / 0", &mut scope).is_nan());
    }

    #[test]
    fn constant_and_variable_constructors() {
        let mut scope: MapScope = [("x".to_owned(), 2.5)].into_iter().collect();
        assert_eq!(NumericProgram::constant(7.0).eval(&mut scope).unwrap(), 7.0);
        assert_eq!(NumericProgram::constant(7.0).source(), "7");
        assert_eq!(
            NumericProgram::variable("x").eval(&mut scope).unwrap(),
            2.5
        );
        assert!(BooleanProgram::always(true).eval(&mut scope).unwrap());
        assert_eq!(BooleanProgram::always(false).source(), "false");
    }

    #[test]
    fn keyword_logic_operators() {
        let mut scope = MapScope::new();
        assert!(boolean("true and true", &mut scope));
        assert!(!boolean("true and false", &mut scope));
        assert!(boolean("false or true", &mut scope));
    }
}
