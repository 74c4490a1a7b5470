//! Text-expression compiler.
//!
//! Compiles a single binary arithmetic expression ("2+3", "126*6") into
//! byte code. Numbers are built digit by digit on the stack: start from
//! zero, then for each digit multiply the accumulator by ten (via 2*5)
//! and add the digit. That keeps every operand a legal single-digit PUSH.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("expression is empty")]
    Empty,

    #[error("expression has no operator")]
    MissingOperator,
}

fn emit_push_number(code: &mut Vec<u8>, value: u64) {
    code.extend_from_slice(&[0x01, 0x00]);
    for digit in value.to_string().bytes().map(|b| b - b'0') {
        code.extend_from_slice(&[0x01, 0x02]); // PUSH 2
        code.extend_from_slice(&[0x01, 0x05]); // PUSH 5
        code.push(0x04); // MUL -> 10
        code.push(0x04); // MUL -> acc * 10
        code.extend_from_slice(&[0x01, digit]);
        code.push(0x02); // ADD
    }
}

/// Compile `expression` into byte code ending in HALT. Characters other
/// than digits and `+ - * /` are ignored.
pub fn compile_expression(expression: &str) -> Result<Vec<u8>, CompileError> {
    let filtered: String = expression
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/'))
        .collect();
    if filtered.is_empty() {
        return Err(CompileError::Empty);
    }

    let op_index = filtered
        .char_indices()
        .find(|(_, c)| matches!(c, '+' | '-' | '*' | '/'))
        .map(|(i, _)| i)
        .ok_or(CompileError::MissingOperator)?;
    let op = filtered.as_bytes()[op_index];
    let lhs = parse_number(&filtered[..op_index]);
    let rhs = parse_number(&filtered[op_index + 1..]);

    let mut code = Vec::new();
    emit_push_number(&mut code, lhs);
    emit_push_number(&mut code, rhs);
    code.push(match op {
        b'+' => 0x02,
        b'-' => 0x03,
        b'*' => 0x04,
        _ => 0x05,
    });
    code.push(0x12); // HALT
    Ok(code)
}

fn parse_number(digits: &str) -> u64 {
    digits
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, b| {
            acc.wrapping_mul(10).wrapping_add(u64::from(b - b'0'))
        })
}
