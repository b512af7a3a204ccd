//! Handler evaluation over the fixed primitive API.

use serde_json::{Map, Value};

use crate::ast::Expr;
use crate::ScriptError;

/// The world-facing primitives a running handler may call.
///
/// The runtime implements this against the live entity the handler is
/// bound to; tests use an in-memory mock.
pub trait Host {
    /// Speak as the handling entity.
    fn say(&mut self, message: &str) -> Result<(), ScriptError>;
    /// Write-through to the entity's data map.
    fn set_data(&mut self, key: &str, value: Value) -> Result<(), ScriptError>;
    /// Read from the entity's data map, falling back to `default`.
    fn get_data(&mut self, key: &str, default: Value) -> Result<Value, ScriptError>;
    /// Send an action back to whoever triggered this handler.
    fn tell_sender(&mut self, action: &str, args: Value) -> Result<(), ScriptError>;
}

struct Scope<'a> {
    host: &'a mut dyn Host,
    sender_name: &'a str,
    args: &'a Value,
}

/// Run a handler body to completion, returning the value of its last
/// expression. Handlers never suspend; any failure is a diagnostic.
pub fn run_handler(
    body: &[Expr],
    host: &mut dyn Host,
    sender_name: &str,
    args: &Value,
) -> Result<Value, ScriptError> {
    let mut scope = Scope {
        host,
        sender_name,
        args,
    };
    let mut result = Value::Null;
    for expr in body {
        result = eval(expr, &mut scope)?;
    }
    Ok(result)
}

fn eval(expr: &Expr, scope: &mut Scope<'_>) -> Result<Value, ScriptError> {
    match expr {
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Map(pairs) => {
            let mut map = Map::new();
            for (key, value) in pairs {
                map.insert(key.clone(), eval(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Sym(name) => match name.as_str() {
            "sender-name" => Ok(Value::String(scope.sender_name.to_string())),
            "args" => Ok(scope.args.clone()),
            _ => Err(ScriptError::Eval(format!("unbound symbol: {name}"))),
        },
        Expr::List(items) => {
            let (head, rest) = items
                .split_first()
                .ok_or_else(|| ScriptError::Eval("cannot call an empty form".to_string()))?;
            let op = head
                .as_sym()
                .ok_or_else(|| ScriptError::Eval(format!("cannot call {head:?}")))?;
            apply(op, rest, scope)
        }
    }
}

fn apply(op: &str, args: &[Expr], scope: &mut Scope<'_>) -> Result<Value, ScriptError> {
    match op {
        "+" | "-" | "*" | "/" | "%" => arith(op, args, scope),
        "=" => {
            let values = eval_all(args, scope)?;
            let [first, rest @ ..] = values.as_slice() else {
                return Err(ScriptError::Eval("= needs at least one argument".to_string()));
            };
            Ok(Value::Bool(rest.iter().all(|v| v == first)))
        }
        "<" | ">" => {
            let (a, b) = binary_ints(op, args, scope)?;
            Ok(Value::Bool(if op == "<" { a < b } else { a > b }))
        }
        "not" => {
            let [arg] = args else {
                return Err(ScriptError::Eval("not takes one argument".to_string()));
            };
            let value = eval(arg, scope)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        "if" => match args {
            [cond, then] => {
                if truthy(&eval(cond, scope)?) {
                    eval(then, scope)
                } else {
                    Ok(Value::Null)
                }
            }
            [cond, then, otherwise] => {
                if truthy(&eval(cond, scope)?) {
                    eval(then, scope)
                } else {
                    eval(otherwise, scope)
                }
            }
            _ => Err(ScriptError::Eval(
                "if takes a condition, a then, and an optional else".to_string(),
            )),
        },
        "do" => {
            let mut result = Value::Null;
            for arg in args {
                result = eval(arg, scope)?;
            }
            Ok(result)
        }
        "say" => {
            let [arg] = args else {
                return Err(ScriptError::Eval("say takes one argument".to_string()));
            };
            let message = display(&eval(arg, scope)?);
            scope.host.say(&message)?;
            Ok(Value::Null)
        }
        "set-data" => {
            let [key, value] = args else {
                return Err(ScriptError::Eval("set-data takes a key and a value".to_string()));
            };
            let key = eval_string(key, "set-data key", scope)?;
            let value = eval(value, scope)?;
            scope.host.set_data(&key, value)?;
            Ok(Value::Null)
        }
        "get-data" => {
            let (key, default) = match args {
                [key] => (key, Value::Null),
                [key, default] => (key, eval(default, scope)?),
                _ => {
                    return Err(ScriptError::Eval(
                        "get-data takes a key and an optional default".to_string(),
                    ))
                }
            };
            let key = eval_string(key, "get-data key", scope)?;
            scope.host.get_data(&key, default)
        }
        "tell-sender" => {
            let [action, args_expr] = args else {
                return Err(ScriptError::Eval(
                    "tell-sender takes an action and its args".to_string(),
                ));
            };
            let action = eval_string(action, "tell-sender action", scope)?;
            let args_value = eval(args_expr, scope)?;
            scope.host.tell_sender(&action, args_value)?;
            Ok(Value::Null)
        }
        _ => Err(ScriptError::Eval(format!("unknown operator: {op}"))),
    }
}

fn arith(op: &str, args: &[Expr], scope: &mut Scope<'_>) -> Result<Value, ScriptError> {
    let values = eval_all(args, scope)?;
    let mut ints = Vec::with_capacity(values.len());
    for value in &values {
        ints.push(value.as_i64().ok_or_else(|| {
            ScriptError::Eval(format!("{op} needs integers, got {value}"))
        })?);
    }
    let (first, rest) = ints
        .split_first()
        .ok_or_else(|| ScriptError::Eval(format!("{op} needs at least one argument")))?;
    let mut acc = *first;
    for n in rest {
        acc = match op {
            "+" => acc.wrapping_add(*n),
            "-" => acc.wrapping_sub(*n),
            "*" => acc.wrapping_mul(*n),
            "/" | "%" => {
                if *n == 0 {
                    return Err(ScriptError::Eval("division by zero".to_string()));
                }
                if op == "/" {
                    acc / n
                } else {
                    acc % n
                }
            }
            _ => unreachable!(),
        };
    }
    Ok(Value::from(acc))
}

fn binary_ints(
    op: &str,
    args: &[Expr],
    scope: &mut Scope<'_>,
) -> Result<(i64, i64), ScriptError> {
    let [a, b] = args else {
        return Err(ScriptError::Eval(format!("{op} takes two arguments")));
    };
    let a = eval(a, scope)?;
    let b = eval(b, scope)?;
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ScriptError::Eval(format!("{op} needs integers"))),
    }
}

fn eval_all(args: &[Expr], scope: &mut Scope<'_>) -> Result<Vec<Value>, ScriptError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, scope)?);
    }
    Ok(values)
}

fn eval_string(expr: &Expr, what: &str, scope: &mut Scope<'_>) -> Result<String, ScriptError> {
    match eval(expr, scope)? {
        Value::String(s) => Ok(s),
        other => Err(ScriptError::Eval(format!("{what} must be a string, got {other}"))),
    }
}

/// False and null are falsy; everything else is truthy.
fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

/// Strings render bare; everything else renders as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockHost {
        data: HashMap<String, Value>,
        said: Vec<String>,
        told: Vec<(String, Value)>,
    }

    impl Host for MockHost {
        fn say(&mut self, message: &str) -> Result<(), ScriptError> {
            self.said.push(message.to_string());
            Ok(())
        }

        fn set_data(&mut self, key: &str, value: Value) -> Result<(), ScriptError> {
            self.data.insert(key.to_string(), value);
            Ok(())
        }

        fn get_data(&mut self, key: &str, default: Value) -> Result<Value, ScriptError> {
            Ok(self.data.get(key).cloned().unwrap_or(default))
        }

        fn tell_sender(&mut self, action: &str, args: Value) -> Result<(), ScriptError> {
            self.told.push((action.to_string(), args));
            Ok(())
        }
    }

    fn run(source: &str, action: &str, host: &mut MockHost) -> Result<Value, ScriptError> {
        let charm = compile(source).unwrap();
        let body = charm.handler(action).expect("handler exists");
        run_handler(body, host, "vera", &Value::Null)
    }

    #[test]
    fn test_arithmetic() {
        let mut host = MockHost::default();
        let result = run(
            r#"(charm "calc" (on "go" (+ 1 (* 2 3) (- 10 4) (/ 9 3) (% 7 5))))"#,
            "go",
            &mut host,
        )
        .unwrap();
        assert_eq!(result, json!(1 + 6 + 6 + 3 + 2));
    }

    #[test]
    fn test_division_by_zero_is_diagnostic() {
        let mut host = MockHost::default();
        let err = run(r#"(charm "calc" (on "go" (/ 1 0)))"#, "go", &mut host).unwrap_err();
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn test_if_and_comparison() {
        let mut host = MockHost::default();
        let result = run(
            r#"(charm "c" (on "go" (if (< 1 2) "yes" "no")))"#,
            "go",
            &mut host,
        )
        .unwrap();
        assert_eq!(result, json!("yes"));

        let result = run(
            r#"(charm "c" (on "go" (if (= 1 2) "yes")))"#,
            "go",
            &mut host,
        )
        .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_handler_variables() {
        let mut host = MockHost::default();
        let charm = compile(r#"(charm "c" (on "greet" (say sender-name)))"#).unwrap();
        run_handler(
            charm.handler("greet").unwrap(),
            &mut host,
            "vera",
            &json!("hello"),
        )
        .unwrap();
        assert_eq!(host.said, vec!["vera".to_string()]);
    }

    #[test]
    fn test_tell_sender() {
        let mut host = MockHost::default();
        run(
            r#"(charm "door" (on "touch" (tell-sender "move" (get-data "target" "nowhere"))))"#,
            "touch",
            &mut host,
        )
        .unwrap();
        assert_eq!(host.told, vec![("move".to_string(), json!("nowhere"))]);
    }

    #[test]
    fn test_unbound_symbol_is_diagnostic() {
        let mut host = MockHost::default();
        let err = run(r#"(charm "c" (on "go" mystery))"#, "go", &mut host).unwrap_err();
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn test_pet_counter_speaks_on_fifth_pet() {
        let source = r#"
            (charm "snoozy"
              (defaults {"num-pets" 0})
              (on "pet"
                (set-data "num-pets" (+ 1 (get-data "num-pets" 0)))
                (if (= 0 (% (get-data "num-pets" 0) 5))
                  (say "neigh neigh neigh i am horse"))))
        "#;
        let charm = compile(source).unwrap();
        let mut host = MockHost::default();
        for (key, value) in &charm.defaults {
            host.data.insert(key.clone(), value.clone());
        }

        for _ in 0..4 {
            run_handler(charm.handler("pet").unwrap(), &mut host, "vera", &Value::Null).unwrap();
            assert!(host.said.is_empty());
        }
        run_handler(charm.handler("pet").unwrap(), &mut host, "vera", &Value::Null).unwrap();
        assert_eq!(host.said, vec!["neigh neigh neigh i am horse".to_string()]);
        assert_eq!(host.data.get("num-pets"), Some(&json!(5)));
    }
}
