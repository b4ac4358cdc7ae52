//! calculator capability - evaluate an arithmetic expression
//!
//! Supports + - * / %, parentheses, unary minus and decimals. `×` and `÷`
//! are accepted as aliases for `*` and `/`.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::definition::{Capability, CapabilityError, required_str};

pub struct Calculator;

#[async_trait]
impl Capability for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+, -, *, /, %, parentheses) and return the number."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. \"23*7+11\""
                }
            },
            "required": ["expression"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        let expression = required_str(args, "expression")?;
        let result = evaluate(expression).map_err(CapabilityError::Evaluation)?;
        Ok(number_value(result))
    }
}

/// Render whole numbers as JSON integers
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Parentheses and unary minus signs that may nest inside one another
const MAX_NESTING: usize = 256;

/// Evaluate an arithmetic expression
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens: Vec<char> = expr
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '×' => '*',
            '÷' => '/',
            other => other,
        })
        .collect();
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let result = parser.expr()?;
    if parser.pos < tokens.len() {
        return Err(format!(
            "unexpected character '{}' at position {}",
            tokens[parser.pos], parser.pos
        ));
    }
    if !result.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(result)
}

/// Recursive descent over the filtered characters
struct Parser<'a> {
    tokens: &'a [char],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut left = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let right = self.term()?;
            left = if op == '+' { left + right } else { left - right };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut left = self.factor()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let right = self.factor()?;
            left = match op {
                '*' => left * right,
                _ if right == 0.0 => return Err("division by zero".into()),
                '/' => left / right,
                _ => left % right,
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<f64, String> {
        match self.peek() {
            None => Err("unexpected end of expression".into()),
            Some('(') => {
                self.pos += 1;
                let result = self.nested(Self::expr)?;
                if self.peek() != Some(')') {
                    return Err("missing closing parenthesis".into());
                }
                self.pos += 1;
                Ok(result)
            }
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::factor)?)
            }
            Some(_) => self.number(),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        if self.depth >= MAX_NESTING {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(format!("expected number at position {}", start));
        }
        let num_str: String = self.tokens[start..self.pos].iter().collect();
        num_str.parse::<f64>().map_err(|e| format!("invalid number '{}': {}", num_str, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("23*7+11").unwrap(), 172.0);
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("(2+3)*4").unwrap(), 20.0);
    }

    #[test]
    fn test_unicode_operators() {
        assert_eq!(evaluate("23×7+11").unwrap(), 172.0);
        assert_eq!(evaluate("9÷3").unwrap(), 3.0);
    }

    #[test]
    fn test_unary_minus_and_decimals() {
        assert_eq!(evaluate("-4 + 1.5").unwrap(), -2.5);
        assert_eq!(evaluate("10 % 4").unwrap(), 2.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1/0").unwrap_err().contains("division by zero"));
        assert!(evaluate("(1+2").unwrap_err().contains("parenthesis"));
        assert!(evaluate("1+a").is_err());
        assert!(evaluate("1 2").is_err());
    }

    #[test]
    fn test_nesting_is_capped() {
        let within = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(evaluate(&within).unwrap(), 1.0);
        assert_eq!(evaluate(&format!("{}5", "-".repeat(MAX_NESTING))).unwrap(), 5.0);

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(evaluate(&deep).unwrap_err(), "expression nested too deeply");
        assert_eq!(
            evaluate(&"-".repeat(100_000)).unwrap_err(),
            "expression nested too deeply"
        );
    }

    #[tokio::test]
    async fn test_deep_expression_is_an_evaluation_error() {
        let expression = "(".repeat(50_000);
        let args = json!({"expression": expression}).as_object().cloned().unwrap();
        let err = Calculator.invoke(&args).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Evaluation(ref m) if m == "expression nested too deeply"));
    }

    #[tokio::test]
    async fn test_invoke_returns_integer() {
        let args = json!({"expression": "23*7+11"}).as_object().cloned().unwrap();
        let value = Calculator.invoke(&args).await.unwrap();
        assert_eq!(value, json!(172));
    }

    #[tokio::test]
    async fn test_invoke_returns_float() {
        let args = json!({"expression": "1/4"}).as_object().cloned().unwrap();
        assert_eq!(Calculator.invoke(&args).await.unwrap(), json!(0.25));
    }

    #[tokio::test]
    async fn test_invoke_missing_expression() {
        let args = Map::new();
        let err = Calculator.invoke(&args).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }
}
