//! Parser for QVM assembly tokens.
//!
//! Lines are parsed one at a time into a [`Builder`]. Label references may
//! point forward, so instructions that use them stay pending until
//! [`Builder::finish`] resolves every label.

use std::collections::HashMap;

use crate::error::AsmError;
use crate::lexer::Token;
use qvm_common::instruction::{IMMEDIATE_MAX, IMMEDIATE_MIN};
use qvm_common::{Instruction, Module, Opcode};

/// An instruction whose immediate may still be an unresolved label.
#[derive(Debug)]
enum Pending {
    Ready(Instruction),
    Labelled {
        opcode: Opcode,
        label: String,
        line: usize,
    },
}

/// Module under construction.
#[derive(Debug, Default)]
pub(crate) struct Builder {
    code: Vec<Pending>,
    labels: HashMap<String, usize>,
    data: Vec<u8>,
    literals: Vec<u8>,
    bss_length: u32,
    format_version: Option<u32>,
}

impl Builder {
    /// Parse one tokenized line into the module.
    pub(crate) fn parse_line(&mut self, tokens: &[Token], line: usize) -> Result<(), AsmError> {
        let mut tokens = tokens;

        // Any number of leading label definitions.
        while let Some((Token::Label(name), rest)) = tokens.split_first() {
            if self.labels.insert(name.clone(), self.code.len()).is_some() {
                return Err(AsmError::DuplicateLabel {
                    line,
                    label: name.clone(),
                });
            }
            tokens = rest;
        }

        match tokens.split_first() {
            None => Ok(()),
            Some((Token::Directive(name), args)) => self.directive(name, args, line),
            Some((Token::Ident(mnemonic), args)) => self.instruction(mnemonic, args, line),
            Some((other, _)) => Err(unexpected(other, line)),
        }
    }

    fn instruction(&mut self, mnemonic: &str, args: &[Token], line: usize) -> Result<(), AsmError> {
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
            line,
            token: mnemonic.to_string(),
        })?;

        if !opcode.takes_immediate() {
            expect_end(args, line)?;
            self.code.push(Pending::Ready(Instruction::bare(opcode)));
            return Ok(());
        }

        let pending = match args.first() {
            None => {
                return Err(AsmError::MissingOperand {
                    line,
                    opcode: opcode.mnemonic(),
                })
            }
            Some(Token::Number(value)) => Pending::Ready(Instruction::new(
                opcode,
                immediate(*value, line)?,
            )),
            Some(Token::LabelRef(label)) => Pending::Labelled {
                opcode,
                label: label.clone(),
                line,
            },
            Some(other) => return Err(unexpected(other, line)),
        };
        expect_end(&args[1..], line)?;
        self.code.push(pending);
        Ok(())
    }

    fn directive(&mut self, name: &str, args: &[Token], line: usize) -> Result<(), AsmError> {
        match name {
            ".data" => {
                let bytes = byte_list(args, ".data", line, false)?;
                self.data.extend(bytes);
            }
            ".lit" => {
                let bytes = byte_list(args, ".lit", line, true)?;
                self.literals.extend(bytes);
            }
            ".word" => {
                for arg in args {
                    let value = number(arg, line)?;
                    if !(i32::MIN as i64..=u32::MAX as i64).contains(&value) {
                        return Err(AsmError::ValueOutOfRange {
                            line,
                            directive: ".word",
                            value,
                        });
                    }
                    self.data.extend_from_slice(&(value as u32).to_le_bytes());
                }
            }
            ".bss" => {
                let value = single_u32(args, ".bss", line)?;
                self.bss_length = self.bss_length.checked_add(value).ok_or(
                    AsmError::ValueOutOfRange {
                        line,
                        directive: ".bss",
                        value: value as i64,
                    },
                )?;
            }
            ".version" => {
                self.format_version = Some(single_u32(args, ".version", line)?);
            }
            ".insn" => {
                for arg in args {
                    let value = number(arg, line)?;
                    let word = u32::try_from(value).map_err(|_| AsmError::ValueOutOfRange {
                        line,
                        directive: ".insn",
                        value,
                    })?;
                    self.code.push(Pending::Ready(Instruction::decode(word)));
                }
            }
            _ => {
                return Err(AsmError::UnknownDirective {
                    line,
                    token: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Resolve labels and produce the module.
    pub(crate) fn finish(self) -> Result<Module, AsmError> {
        let labels = self.labels;
        let instructions = self
            .code
            .into_iter()
            .map(|pending| match pending {
                Pending::Ready(instr) => Ok(instr),
                Pending::Labelled {
                    opcode,
                    label,
                    line,
                } => {
                    let target = *labels
                        .get(&label)
                        .ok_or(AsmError::UndefinedLabel { line, label })?;
                    Ok(Instruction::new(opcode, immediate(target as i64, line)?))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut module = Module::new(instructions)
            .with_data(self.data)
            .with_literals(self.literals)
            .with_bss(self.bss_length);
        if let Some(version) = self.format_version {
            module.format_version = version;
        }
        Ok(module)
    }
}

fn immediate(value: i64, line: usize) -> Result<i32, AsmError> {
    if (IMMEDIATE_MIN as i64..=IMMEDIATE_MAX as i64).contains(&value) {
        Ok(value as i32)
    } else {
        Err(AsmError::ImmediateOutOfRange { line, value })
    }
}

fn number(token: &Token, line: usize) -> Result<i64, AsmError> {
    match token {
        Token::Number(n) => Ok(*n),
        other => Err(unexpected(other, line)),
    }
}

fn single_u32(args: &[Token], directive: &'static str, line: usize) -> Result<u32, AsmError> {
    let value = match args.first() {
        Some(token) => number(token, line)?,
        None => {
            return Err(AsmError::MissingOperand {
                line,
                opcode: directive,
            })
        }
    };
    expect_end(&args[1..], line)?;
    u32::try_from(value).map_err(|_| AsmError::ValueOutOfRange {
        line,
        directive,
        value,
    })
}

/// Bytes for `.data` / `.lit`. Strings get a terminating NUL.
fn byte_list(
    args: &[Token],
    directive: &'static str,
    line: usize,
    allow_strings: bool,
) -> Result<Vec<u8>, AsmError> {
    let mut bytes = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Token::Number(n) => {
                let byte = u8::try_from(*n).map_err(|_| AsmError::ValueOutOfRange {
                    line,
                    directive,
                    value: *n,
                })?;
                bytes.push(byte);
            }
            Token::Str(s) if allow_strings => {
                bytes.extend_from_slice(s);
                bytes.push(0);
            }
            other => return Err(unexpected(other, line)),
        }
    }
    Ok(bytes)
}

fn expect_end(args: &[Token], line: usize) -> Result<(), AsmError> {
    match args.first() {
        None => Ok(()),
        Some(token) => Err(unexpected(token, line)),
    }
}

fn unexpected(token: &Token, line: usize) -> AsmError {
    let token = match token {
        Token::Ident(s) | Token::Directive(s) => s.clone(),
        Token::Label(s) => format!("{s}:"),
        Token::LabelRef(s) => format!("@{s}"),
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("\"{}\"", String::from_utf8_lossy(s)),
    };
    AsmError::UnexpectedToken { line, token }
}
