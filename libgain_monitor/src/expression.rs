//! A restricted arithmetic evaluator for calibration formulas.
//!
//! Calibration documents store the energy calibration as an expression string
//! (`a*cuspEmax_ctc**2+b*cuspEmax_ctc+c`) next to a table of named coefficients.
//! Those strings come from externally produced files, so only a small whitelist is
//! accepted: number literals, identifiers bound by the caller, `+ - * / **`, unary
//! signs and parentheses. Anything else is an [`ExpressionError`].
use std::collections::HashMap;

use super::error::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Pow => write!(f, "**"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Var(String),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, Box<Node>),
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
                continue;
            }
            '+' => tokens.push((Token::Plus, start)),
            '-' => tokens.push((Token::Minus, start)),
            '/' => tokens.push((Token::Slash, start)),
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            '*' => {
                if chars.get(pos + 1) == Some(&'*') {
                    pos += 1;
                    tokens.push((Token::Pow, start));
                } else {
                    tokens.push((Token::Star, start));
                }
            }
            c if c.is_ascii_digit() || c == '.' => {
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                // Exponent part, e.g. 1.5e-3
                if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                    let mut look = pos + 1;
                    if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                        look += 1;
                    }
                    if look < chars.len() && chars[look].is_ascii_digit() {
                        pos = look;
                        while pos < chars.len() && chars[pos].is_ascii_digit() {
                            pos += 1;
                        }
                    }
                }
                let literal: String = chars[start..pos].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::BadNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                tokens.push((Token::Ident(chars[start..pos].iter().collect()), start));
                continue;
            }
            _ => return Err(ExpressionError::UnexpectedCharacter(c, start)),
        }
        pos += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        tok
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.cursor += 1;
                    lhs = Node::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.cursor += 1;
                    lhs = Node::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.cursor += 1;
                    lhs = Node::Mul(Box::new(lhs), Box::new(self.unary()?));
                }
                Some(Token::Slash) => {
                    self.cursor += 1;
                    lhs = Node::Div(Box::new(lhs), Box::new(self.unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    // Power binds tighter than a leading sign: -x**2 == -(x**2)
    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.cursor += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.cursor += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.atom()?;
        if let Some(Token::Pow) = self.peek() {
            self.cursor += 1;
            // Right associative, and the exponent may carry its own sign
            let exponent = self.unary()?;
            return Ok(Node::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some((Token::Number(n), _)) => Ok(Node::Number(n)),
            Some((Token::Ident(name), _)) => Ok(Node::Var(name)),
            Some((Token::LParen, _)) => {
                let inner = self.expr()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((tok, pos)) => Err(ExpressionError::UnexpectedToken(tok.to_string(), pos)),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some((tok, pos)) => Err(ExpressionError::UnexpectedToken(tok.to_string(), pos)),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// A parsed calibration expression, reusable across bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parse an expression string. The whole input must be consumed.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            cursor: 0,
        };
        let root = parser.expr()?;
        if let Some((tok, pos)) = parser.next() {
            return Err(ExpressionError::UnexpectedToken(tok.to_string(), pos));
        }
        Ok(Self { root })
    }

    /// Evaluate with the given identifier bindings.
    pub fn eval(&self, bindings: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
        eval_node(&self.root, bindings)
    }

    /// Every identifier referenced by the expression, in order of appearance.
    pub fn identifiers(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_identifiers(&self.root, &mut names);
        names
    }
}

fn collect_identifiers(node: &Node, names: &mut Vec<String>) {
    match node {
        Node::Number(_) => (),
        Node::Var(name) => {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Node::Neg(inner) => collect_identifiers(inner, names),
        Node::Add(a, b) | Node::Sub(a, b) | Node::Mul(a, b) | Node::Div(a, b) | Node::Pow(a, b) => {
            collect_identifiers(a, names);
            collect_identifiers(b, names);
        }
    }
}

fn eval_node(node: &Node, bindings: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
    Ok(match node {
        Node::Number(n) => *n,
        Node::Var(name) => *bindings
            .get(name)
            .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone()))?,
        Node::Neg(inner) => -eval_node(inner, bindings)?,
        Node::Add(a, b) => eval_node(a, bindings)? + eval_node(b, bindings)?,
        Node::Sub(a, b) => eval_node(a, bindings)? - eval_node(b, bindings)?,
        Node::Mul(a, b) => eval_node(a, bindings)? * eval_node(b, bindings)?,
        Node::Div(a, b) => eval_node(a, bindings)? / eval_node(b, bindings)?,
        Node::Pow(a, b) => eval_node(a, bindings)?.powf(eval_node(b, bindings)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_quadratic_calibration() {
        let expr = Expression::parse("a*cuspEmax_ctc**2+b*cuspEmax_ctc+c").unwrap();
        let vars = bind(&[("a", 1e-6), ("b", 0.5), ("c", 2.0), ("cuspEmax_ctc", 1000.0)]);
        let value = expr.eval(&vars).unwrap();
        assert!((value - 503.0).abs() < 1e-9);
    }

    #[test]
    fn test_precedence() {
        let expr = Expression::parse("-2**2 + (1 - 3) * 4 / 2").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap(), -8.0);
        let expr = Expression::parse("2**3**2").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap(), 512.0);
        let expr = Expression::parse("2**-1").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap(), 0.5);
    }

    #[test]
    fn test_scientific_literal() {
        let expr = Expression::parse("1.5e-3*x + 2E2").unwrap();
        let value = expr.eval(&bind(&[("x", 1000.0)])).unwrap();
        assert!((value - 201.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_arithmetic() {
        assert!(matches!(
            Expression::parse("__import__('os')"),
            Err(ExpressionError::UnexpectedCharacter('\'', _))
        ));
        assert!(Expression::parse("a;b").is_err());
        assert!(Expression::parse("(a+b").is_err());
        assert!(Expression::parse("a b").is_err());
        assert_eq!(Expression::parse("a+"), Err(ExpressionError::UnexpectedEnd));
    }

    #[test]
    fn test_unknown_identifier() {
        let expr = Expression::parse("a*x").unwrap();
        assert_eq!(
            expr.eval(&bind(&[("a", 1.0)])),
            Err(ExpressionError::UnknownIdentifier(String::from("x")))
        );
        assert_eq!(expr.identifiers(), vec!["a".to_string(), "x".to_string()]);
    }
}
