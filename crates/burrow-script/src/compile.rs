//! Charm compilation: source text to an immutable handler table.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::ast::Expr;
use crate::parse::parse_all;
use crate::ScriptError;

/// A compiled charm: declared defaults plus a table of named event
/// handlers. Immutable once built; the runtime shares one compiled
/// unit between every entity on the same revision.
#[derive(Debug, Default)]
pub struct CompiledCharm {
    pub name: String,
    /// Default data declared by the `defaults` form.
    pub defaults: Map<String, Value>,
    handlers: HashMap<String, Vec<Expr>>,
}

impl CompiledCharm {
    pub fn handler(&self, action: &str) -> Option<&[Expr]> {
        self.handlers.get(action).map(Vec::as_slice)
    }

    pub fn handles(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

/// Compile charm source. Returns either a compiled unit or a
/// diagnostic; never panics and never partially applies.
pub fn compile(source: &str) -> Result<CompiledCharm, ScriptError> {
    let forms = parse_all(source)?;
    let mut forms = forms.into_iter();
    let top = forms
        .next()
        .ok_or_else(|| ScriptError::Form("empty script".to_string()))?;
    if forms.next().is_some() {
        return Err(ScriptError::Form(
            "expected a single (charm ...) form".to_string(),
        ));
    }

    let items = match top {
        Expr::List(items) if items.first().and_then(Expr::as_sym) == Some("charm") => items,
        _ => return Err(ScriptError::Form("expected a (charm ...) form".to_string())),
    };

    let mut items = items.into_iter().skip(1);
    let name = match items.next() {
        Some(Expr::Str(name)) => name,
        _ => return Err(ScriptError::Form("charm needs a string name".to_string())),
    };

    let mut charm = CompiledCharm {
        name,
        ..CompiledCharm::default()
    };
    let mut saw_defaults = false;

    for item in items {
        let Expr::List(mut parts) = item else {
            return Err(ScriptError::Form(format!("unexpected form: {item:?}")));
        };
        if parts.is_empty() {
            return Err(ScriptError::Form("empty form in charm body".to_string()));
        }
        let head = parts.remove(0);
        match head.as_sym() {
            Some("defaults") => {
                if saw_defaults {
                    return Err(ScriptError::Form(
                        "a charm may declare defaults only once".to_string(),
                    ));
                }
                saw_defaults = true;
                let [map] = parts.as_slice() else {
                    return Err(ScriptError::Form(
                        "defaults takes exactly one map literal".to_string(),
                    ));
                };
                charm.defaults = literal_map(map)?;
            }
            Some("on") => {
                if parts.is_empty() {
                    return Err(ScriptError::Form("on needs an action name".to_string()));
                }
                let action = match parts.remove(0) {
                    Expr::Str(action) => action,
                    other => {
                        return Err(ScriptError::Form(format!(
                            "handler action must be a string, got {other:?}"
                        )))
                    }
                };
                // a later handler for the same action shadows the earlier one
                charm.handlers.insert(action, parts);
            }
            _ => {
                return Err(ScriptError::Form(format!(
                    "unknown charm form: {head:?}"
                )))
            }
        }
    }

    Ok(charm)
}

/// Convert a literal expression (no operators, no symbols) to a JSON
/// value. Defaults must be plain data.
fn literal_value(expr: &Expr) -> Result<Value, ScriptError> {
    match expr {
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Map(pairs) => {
            let mut map = Map::new();
            for (key, value) in pairs {
                map.insert(key.clone(), literal_value(value)?);
            }
            Ok(Value::Object(map))
        }
        other => Err(ScriptError::Form(format!(
            "defaults must be literal data, got {other:?}"
        ))),
    }
}

fn literal_map(expr: &Expr) -> Result<Map<String, Value>, ScriptError> {
    match literal_value(expr)? {
        Value::Object(map) => Ok(map),
        _ => Err(ScriptError::Form(
            "defaults takes a map literal".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_minimal() {
        let charm = compile(r#"(charm "pebble")"#).unwrap();
        assert_eq!(charm.name, "pebble");
        assert!(charm.defaults.is_empty());
        assert!(!charm.handles("touch"));
    }

    #[test]
    fn test_compile_defaults_and_handlers() {
        let charm = compile(
            r#"
            (charm "snoozy"
              (defaults {"num-pets" 0 "name" "snoozy" "tame" true})
              (on "pet"
                (set-data "num-pets" (+ 1 (get-data "num-pets" 0)))))
            "#,
        )
        .unwrap();
        assert_eq!(charm.defaults.get("num-pets"), Some(&json!(0)));
        assert_eq!(charm.defaults.get("name"), Some(&json!("snoozy")));
        assert_eq!(charm.defaults.get("tame"), Some(&json!(true)));
        assert!(charm.handles("pet"));
        assert_eq!(charm.handler("pet").unwrap().len(), 1);
        assert!(charm.handler("kick").is_none());
    }

    #[test]
    fn test_later_handler_shadows_earlier() {
        let charm = compile(
            r#"
            (charm "echo"
              (on "poke" (say "first"))
              (on "poke" (say "second")))
            "#,
        )
        .unwrap();
        let body = charm.handler("poke").unwrap();
        assert_eq!(
            body,
            &[Expr::List(vec![
                Expr::Sym("say".to_string()),
                Expr::Str("second".to_string()),
            ])]
        );
    }

    #[test]
    fn test_compile_diagnostics() {
        assert!(matches!(compile(""), Err(ScriptError::Form(_))));
        assert!(matches!(compile("(lol)"), Err(ScriptError::Form(_))));
        assert!(matches!(compile("(charm)"), Err(ScriptError::Form(_))));
        assert!(matches!(
            compile(r#"(charm "x") (charm "y")"#),
            Err(ScriptError::Form(_))
        ));
        assert!(matches!(
            compile(r#"(charm "x" (defaults {"a" 1}) (defaults {"b" 2}))"#),
            Err(ScriptError::Form(_))
        ));
        assert!(matches!(
            compile(r#"(charm "x" (defaults {"a" (+ 1 2)}))"#),
            Err(ScriptError::Form(_))
        ));
        assert!(matches!(
            compile(r#"(charm "x" (on "pet" (say "hi")"#),
            Err(ScriptError::Parse(_))
        ));
    }
}
