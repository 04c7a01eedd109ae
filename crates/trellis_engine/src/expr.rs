//! Restricted expression language.
//!
//! Two deliberately small dialects, parsed with a shunting-yard pass:
//! arithmetic (`+ - * /` over column references and numeric literals, with
//! parentheses) for calculated columns, and AND-joined comparisons
//! (`col >= 0 AND col2 < 10`) for row rules. Any token that is not a column
//! name, number, operator, or recognized keyword is rejected.

use std::cmp::Ordering;
use thiserror::Error;
use trellis_frame::{Frame, Scalar};

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unbalanced parentheses")]
    UnbalancedParens,

    #[error("Malformed expression: {0}")]
    Malformed(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum RpnNode {
    Number(f64),
    Column(String),
    Op(char),
}

fn precedence(op: char) -> u8 {
    match op {
        '*' | '/' => 2,
        _ => 1,
    }
}

/// Shunting-yard: infix tokens to reverse polish order.
fn to_rpn(tokens: &[Token]) -> Result<Vec<RpnNode>, ExprError> {
    let mut output = Vec::new();
    let mut stack: Vec<Token> = Vec::new();
    for token in tokens {
        match token {
            Token::Number(v) => output.push(RpnNode::Number(*v)),
            Token::Ident(name) => output.push(RpnNode::Column(name.clone())),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = stack.last() {
                    if precedence(*top) >= precedence(*op) {
                        output.push(RpnNode::Op(*top));
                        stack.pop();
                    } else {
                        break;
                    }
                }
                stack.push(Token::Op(*op));
            }
            Token::LParen => stack.push(Token::LParen),
            Token::RParen => loop {
                match stack.pop() {
                    Some(Token::Op(op)) => output.push(RpnNode::Op(op)),
                    Some(Token::LParen) => break,
                    _ => return Err(ExprError::UnbalancedParens),
                }
            },
        }
    }
    while let Some(token) = stack.pop() {
        match token {
            Token::Op(op) => output.push(RpnNode::Op(op)),
            Token::LParen => return Err(ExprError::UnbalancedParens),
            _ => unreachable!(),
        }
    }
    Ok(output)
}

/// Evaluate an arithmetic expression row-wise over a frame. Rows where any
/// referenced column is null or non-numeric evaluate to null.
pub fn evaluate_arithmetic(frame: &Frame, expression: &str) -> Result<Vec<Scalar>, ExprError> {
    let tokens = tokenize(expression)?;
    let rpn = to_rpn(&tokens)?;
    if rpn.is_empty() {
        return Err(ExprError::Malformed(expression.to_string()));
    }
    for node in &rpn {
        if let RpnNode::Column(name) = node {
            if !frame.has_column(name) {
                return Err(ExprError::UnknownColumn(name.clone()));
            }
        }
    }

    let mut result = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let mut stack: Vec<Option<f64>> = Vec::new();
        for node in &rpn {
            match node {
                RpnNode::Number(v) => stack.push(Some(*v)),
                RpnNode::Column(name) => {
                    let value = frame
                        .column(name)
                        .and_then(|c| c.values[row].as_f64());
                    stack.push(value);
                }
                RpnNode::Op(op) => {
                    let rhs = stack
                        .pop()
                        .ok_or_else(|| ExprError::Malformed(expression.to_string()))?;
                    let lhs = stack
                        .pop()
                        .ok_or_else(|| ExprError::Malformed(expression.to_string()))?;
                    let value = match (lhs, rhs) {
                        (Some(a), Some(b)) => match op {
                            '+' => Some(a + b),
                            '-' => Some(a - b),
                            '*' => Some(a * b),
                            '/' => {
                                if b == 0.0 {
                                    None
                                } else {
                                    Some(a / b)
                                }
                            }
                            _ => None,
                        },
                        _ => None,
                    };
                    stack.push(value);
                }
            }
        }
        if stack.len() != 1 {
            return Err(ExprError::Malformed(expression.to_string()));
        }
        result.push(match stack.pop().unwrap() {
            Some(v) => Scalar::Float(v),
            None => Scalar::Null,
        });
    }
    Ok(result)
}

// ============================================================================
// Row-rule conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    fn holds(&self, ordering: Option<Ordering>, loose_equal: bool) -> bool {
        match self {
            Self::Eq => loose_equal,
            Self::Ne => !loose_equal,
            Self::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Self::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => matches!(ordering, Some(Ordering::Greater)),
            Self::Lt => matches!(ordering, Some(Ordering::Less)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub literal: Scalar,
}

/// Parse an AND-joined conjunction of comparisons.
pub fn parse_conditions(expression: &str) -> Result<Vec<Condition>, ExprError> {
    let mut conditions = Vec::new();
    for part in split_on_and(expression) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        // Two-char operators first so ">=" never parses as ">" + "=".
        let (op_text, idx) = [">=", "<=", "==", "!=", ">", "<"]
            .iter()
            .filter_map(|op| part.find(op).map(|idx| (*op, idx)))
            .min_by_key(|(_, idx)| *idx)
            .ok_or_else(|| ExprError::Malformed(part.to_string()))?;

        let column = part[..idx].trim().to_string();
        let raw = part[idx + op_text.len()..].trim();
        if column.is_empty() || raw.is_empty() {
            return Err(ExprError::Malformed(part.to_string()));
        }
        if !column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ExprError::UnexpectedToken(column));
        }

        let literal = if let Ok(num) = raw.parse::<f64>() {
            Scalar::Float(num)
        } else {
            let stripped = raw.trim_matches(|c| c == '\'' || c == '"');
            Scalar::Str(stripped.to_string())
        };

        conditions.push(Condition {
            column,
            op: CompareOp::parse(op_text).expect("operator matched above"),
            literal,
        });
    }
    if conditions.is_empty() {
        return Err(ExprError::Malformed(expression.to_string()));
    }
    Ok(conditions)
}

fn split_on_and(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = expression;
    loop {
        let upper = rest.to_uppercase();
        match upper.find(" AND ") {
            Some(idx) => {
                parts.push(&rest[..idx]);
                rest = &rest[idx + 5..];
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

/// Count rows violating the conjunction. Columns absent from the frame make
/// their condition vacuously true (mirrors tolerant rule evaluation); null
/// cells fail comparisons and count as violations.
pub fn count_violations(frame: &Frame, conditions: &[Condition]) -> usize {
    let mut violations = 0usize;
    for row in 0..frame.height() {
        let mut passes = true;
        for condition in conditions {
            let Some(column) = frame.column(&condition.column) else {
                continue;
            };
            let value = &column.values[row];
            let ordering = value.compare(&condition.literal);
            let loose_equal = value.loose_eq(&condition.literal);
            if !condition.op.holds(ordering, loose_equal) {
                passes = false;
                break;
            }
        }
        if !passes {
            violations += 1;
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_frame::Column;

    fn frame() -> Frame {
        Frame::from_columns(vec![
            Column::new(
                "cd",
                vec![Scalar::Int(10), Scalar::Int(20), Scalar::Null],
            ),
            Column::new(
                "depth",
                vec![Scalar::Int(2), Scalar::Int(4), Scalar::Int(6)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_arithmetic_columns_and_literals() {
        let result = evaluate_arithmetic(&frame(), "cd * 2 + depth").unwrap();
        assert_eq!(result[0], Scalar::Float(22.0));
        assert_eq!(result[1], Scalar::Float(44.0));
        assert_eq!(result[2], Scalar::Null);
    }

    #[test]
    fn test_arithmetic_precedence_and_parens() {
        let result = evaluate_arithmetic(&frame(), "(cd + depth) / 2").unwrap();
        assert_eq!(result[0], Scalar::Float(6.0));
        let result = evaluate_arithmetic(&frame(), "cd + depth / 2").unwrap();
        assert_eq!(result[0], Scalar::Float(11.0));
    }

    #[test]
    fn test_divide_by_zero_is_null() {
        let result = evaluate_arithmetic(&frame(), "cd / 0").unwrap();
        assert_eq!(result[0], Scalar::Null);
    }

    #[test]
    fn test_unknown_column_rejected() {
        assert!(matches!(
            evaluate_arithmetic(&frame(), "cd + nope"),
            Err(ExprError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_bad_token_rejected() {
        assert!(matches!(
            evaluate_arithmetic(&frame(), "cd ; drop"),
            Err(ExprError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_conditions_conjunction() {
        let conditions = parse_conditions("cd >= 10 AND depth < 5").unwrap();
        assert_eq!(conditions.len(), 2);
        // Row 0 passes, row 1 fails depth, row 2 fails cd (null).
        assert_eq!(count_violations(&frame(), &conditions), 2);
    }

    #[test]
    fn test_condition_string_literal() {
        let f = Frame::from_columns(vec![Column::new(
            "status",
            vec![Scalar::Str("ok".into()), Scalar::Str("bad".into())],
        )])
        .unwrap();
        let conditions = parse_conditions("status == 'ok'").unwrap();
        assert_eq!(count_violations(&f, &conditions), 1);
    }

    #[test]
    fn test_condition_missing_column_is_vacuous() {
        let conditions = parse_conditions("nope > 0").unwrap();
        assert_eq!(count_violations(&frame(), &conditions), 0);
    }
}
