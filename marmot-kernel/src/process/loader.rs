//! The program-file loader.
//!
//! Program files are text, one instruction per line: an opcode number
//! followed by its arguments, `r<n>` for a register or `$<value>` for a
//! constant. `;` starts a comment; blank lines and extra whitespace are
//! ignored.
//!
//! ```text
//! ; add three to r1 and print it
//! 6 r1, $5
//! 2 r1, $3
//! 11 r1
//! 27
//! ```

use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use marmot_abi::{Instruction, NUM_REGISTERS, Opcode, encode_program};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read program file: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: `{token}` is not an opcode")]
    BadOpcode { line: usize, token: String },

    #[error("line {line}: opcode {value} is outside the instruction set")]
    UnknownOpcode { line: usize, value: u32 },

    #[error("line {line}: malformed operand `{token}`")]
    BadOperand { line: usize, token: String },

    #[error("line {line}: register r{index} does not exist")]
    BadRegister { line: usize, index: u32 },

    #[error("line {line}: {opcode} takes {expected} operand(s), found {found}")]
    BadArity {
        line: usize,
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
}

/// Read a program file and encode it as a process memory image.
pub fn load_program(path: &Path) -> Result<Vec<u8>, LoaderError> {
    let source = fs::read_to_string(path)?;
    let instructions = parse_source(&source)?;
    debug!(
        "loaded {} instructions from {}",
        instructions.len(),
        path.display()
    );
    Ok(encode_program(&instructions))
}

/// Parse program text into instructions.
pub fn parse_source(source: &str) -> Result<Vec<Instruction>, LoaderError> {
    let mut instructions = Vec::new();
    for (number, raw) in source.lines().enumerate() {
        let line = number + 1;
        let text = raw.split(';').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        instructions.push(parse_line(text, line)?);
    }
    Ok(instructions)
}

fn parse_line(text: &str, line: usize) -> Result<Instruction, LoaderError> {
    let mut tokens = text.split([' ', '\t', ',']).filter(|t| !t.is_empty());

    let opcode_token = tokens.next().expect("caller skips blank lines");
    let value: u32 = opcode_token.parse().map_err(|_| LoaderError::BadOpcode {
        line,
        token: opcode_token.to_string(),
    })?;
    let opcode = u8::try_from(value)
        .ok()
        .and_then(Opcode::from_byte)
        .ok_or(LoaderError::UnknownOpcode { line, value })?;

    let params: Vec<u32> = tokens
        .map(|token| parse_operand(token, line))
        .collect::<Result<_, _>>()?;
    if params.len() != opcode.operand_count() {
        return Err(LoaderError::BadArity {
            line,
            opcode,
            expected: opcode.operand_count(),
            found: params.len(),
        });
    }

    Ok(Instruction {
        opcode,
        param1: params.first().copied(),
        param2: params.get(1).copied(),
    })
}

/// `r<n>` yields the register number; `$<value>` yields the constant,
/// with negative values sign-extended into 32 bits.
fn parse_operand(token: &str, line: usize) -> Result<u32, LoaderError> {
    if let Some(register) = token.strip_prefix('r') {
        let index: u32 = register.parse().map_err(|_| LoaderError::BadOperand {
            line,
            token: token.to_string(),
        })?;
        if !(1..=NUM_REGISTERS as u32).contains(&index) {
            return Err(LoaderError::BadRegister { line, index });
        }
        return Ok(index);
    }
    if let Some(constant) = token.strip_prefix('$') {
        if let Some(negative) = constant.strip_prefix('-') {
            let magnitude: i64 = negative.parse().map_err(|_| LoaderError::BadOperand {
                line,
                token: token.to_string(),
            })?;
            if magnitude > -(i32::MIN as i64) {
                return Err(LoaderError::BadOperand {
                    line,
                    token: token.to_string(),
                });
            }
            return Ok((-magnitude) as u32);
        }
        return constant.parse().map_err(|_| LoaderError::BadOperand {
            line,
            token: token.to_string(),
        });
    }
    Err(LoaderError::BadOperand {
        line,
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registers_constants_and_comments() {
        let program = parse_source(
            "; a comment line\n\
             6 r1, $5\n\
             2 r6, $16\n\
             \n\
             1 r1 ; trailing comment\n\
             27\n",
        )
        .unwrap();
        assert_eq!(
            program,
            vec![
                Instruction::binary(Opcode::Movi, 1, 5),
                Instruction::binary(Opcode::Addi, 6, 16),
                Instruction::unary(Opcode::Incr, 1),
                Instruction::new(Opcode::Exit),
            ]
        );
    }

    #[test]
    fn negative_constants_sign_extend() {
        let program = parse_source("6 r2, $-19\n").unwrap();
        assert_eq!(program[0].param2, Some((-19i32) as u32));
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(matches!(
            parse_source("99 r1\n"),
            Err(LoaderError::UnknownOpcode { value: 99, .. })
        ));
        assert!(matches!(
            parse_source("6 r1\n"),
            Err(LoaderError::BadArity { found: 1, .. })
        ));
        assert!(matches!(
            parse_source("6 r12, $1\n"),
            Err(LoaderError::BadRegister { index: 12, .. })
        ));
        assert!(matches!(
            parse_source("6 r1, 5\n"),
            Err(LoaderError::BadOperand { .. })
        ));
        assert!(matches!(
            parse_source("six r1, $5\n"),
            Err(LoaderError::BadOpcode { .. })
        ));
    }
}
