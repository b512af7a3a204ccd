//! Hand-rolled lexer and reader for charm source.

use crate::ast::Expr;
use crate::ScriptError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Int(i64),
    Str(String),
    Sym(String),
}

fn lex(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                // comment to end of line
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some(other @ ('"' | '\\')) => s.push(other),
                            Some(other) => {
                                return Err(ScriptError::Parse(format!(
                                    "unknown escape \\{other}"
                                )))
                            }
                            None => {
                                return Err(ScriptError::Parse(
                                    "unterminated string".to_string(),
                                ))
                            }
                        },
                        Some(other) => s.push(other),
                        None => {
                            return Err(ScriptError::Parse("unterminated string".to_string()))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}' | '"' | ';') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(classify_word(word)?);
            }
        }
    }

    Ok(tokens)
}

fn classify_word(word: String) -> Result<Token, ScriptError> {
    let numeric = word
        .strip_prefix('-')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or_else(|| word.chars().all(|c| c.is_ascii_digit()));
    if numeric {
        return word
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|e| ScriptError::Parse(format!("bad integer {word}: {e}")));
    }
    Ok(Token::Sym(word))
}

struct Reader {
    tokens: Vec<Token>,
    pos: usize,
}

impl Reader {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn read_expr(&mut self) -> Result<Expr, ScriptError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Sym(s)) => Ok(match s.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                _ => Expr::Sym(s),
            }),
            Some(Token::LParen) => {
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::RParen) => {
                            self.next();
                            return Ok(Expr::List(items));
                        }
                        Some(_) => items.push(self.read_expr()?),
                        None => {
                            return Err(ScriptError::Parse("unclosed (".to_string()));
                        }
                    }
                }
            }
            Some(Token::LBrace) => {
                let mut pairs = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::RBrace) => {
                            self.next();
                            return Ok(Expr::Map(pairs));
                        }
                        Some(_) => {
                            let key = match self.read_expr()? {
                                Expr::Str(key) => key,
                                other => {
                                    return Err(ScriptError::Parse(format!(
                                        "map keys must be strings, got {other:?}"
                                    )))
                                }
                            };
                            if matches!(self.peek(), Some(Token::RBrace) | None) {
                                return Err(ScriptError::Parse(format!(
                                    "map key {key:?} has no value"
                                )));
                            }
                            let value = self.read_expr()?;
                            pairs.push((key, value));
                        }
                        None => {
                            return Err(ScriptError::Parse("unclosed {".to_string()));
                        }
                    }
                }
            }
            Some(Token::RParen) => Err(ScriptError::Parse("unexpected )".to_string())),
            Some(Token::RBrace) => Err(ScriptError::Parse("unexpected }".to_string())),
            None => Err(ScriptError::Parse("unexpected end of input".to_string())),
        }
    }
}

/// Read every top-level form in `source`.
pub fn parse_all(source: &str) -> Result<Vec<Expr>, ScriptError> {
    let mut reader = Reader {
        tokens: lex(source)?,
        pos: 0,
    };
    let mut forms = Vec::new();
    while reader.peek().is_some() {
        forms.push(reader.read_expr()?);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms() {
        assert_eq!(parse_all("42").unwrap(), vec![Expr::Int(42)]);
        assert_eq!(parse_all("-7").unwrap(), vec![Expr::Int(-7)]);
        assert_eq!(parse_all("true false").unwrap(), vec![Expr::Bool(true), Expr::Bool(false)]);
        assert_eq!(
            parse_all("\"hi there\"").unwrap(),
            vec![Expr::Str("hi there".to_string())]
        );
        assert_eq!(
            parse_all("set-data").unwrap(),
            vec![Expr::Sym("set-data".to_string())]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            parse_all(r#""a \"quote\" and \\ and \n""#).unwrap(),
            vec![Expr::Str("a \"quote\" and \\ and \n".to_string())]
        );
        assert!(parse_all(r#""bad \q escape""#).is_err());
        assert!(parse_all("\"runs off the end").is_err());
    }

    #[test]
    fn test_nested_lists() {
        let forms = parse_all("(+ 1 (+ 2 3))").unwrap();
        assert_eq!(
            forms,
            vec![Expr::List(vec![
                Expr::Sym("+".to_string()),
                Expr::Int(1),
                Expr::List(vec![
                    Expr::Sym("+".to_string()),
                    Expr::Int(2),
                    Expr::Int(3),
                ]),
            ])]
        );
    }

    #[test]
    fn test_map_literal() {
        let forms = parse_all(r#"{"name" "snoozy" "num-pets" 0}"#).unwrap();
        assert_eq!(
            forms,
            vec![Expr::Map(vec![
                ("name".to_string(), Expr::Str("snoozy".to_string())),
                ("num-pets".to_string(), Expr::Int(0)),
            ])]
        );
    }

    #[test]
    fn test_map_errors() {
        assert!(parse_all(r#"{1 "one"}"#).is_err());
        assert!(parse_all(r#"{"dangling"}"#).is_err());
        assert!(parse_all(r#"{"open" 1"#).is_err());
    }

    #[test]
    fn test_comments_ignored() {
        let forms = parse_all("; a comment\n(say \"hi\") ; trailing\n").unwrap();
        assert_eq!(forms.len(), 1);
    }

    #[test]
    fn test_unbalanced() {
        assert!(parse_all("(say \"hi\"").is_err());
        assert!(parse_all(")").is_err());
    }
}
