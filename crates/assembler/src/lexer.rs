//! Tokenizer for QVM assembly text.

use crate::error::AsmError;

/// A single token from an assembly line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// An opcode mnemonic. Always uppercase.
    Ident(String),
    /// A directive name including its leading dot. Always lowercase.
    Directive(String),
    /// A label definition (`name:`), without the colon.
    Label(String),
    /// A label reference (`@name`), without the `@`.
    LabelRef(String),
    /// A numeric literal (decimal or hex, optionally negative).
    Number(i64),
    /// A quoted string with escapes resolved.
    Str(Vec<u8>),
}

/// Tokenize a single line of assembly text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `;` outside a string and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == ';' {
            break;
        }
        if c == '"' {
            chars.next();
            tokens.push(Token::Str(lex_string(&mut chars, line_num)?));
            continue;
        }

        let mut end = line.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == ';' || c == '"' {
                end = i;
                break;
            }
            chars.next();
        }
        tokens.push(classify(&line[start..end], line_num)?);
    }

    Ok(tokens)
}

fn classify(word: &str, line_num: usize) -> Result<Token, AsmError> {
    if let Some(name) = word.strip_suffix(':') {
        return Ok(Token::Label(label_name(name, word, line_num)?));
    }
    if let Some(name) = word.strip_prefix('@') {
        return Ok(Token::LabelRef(label_name(name, word, line_num)?));
    }
    if word.starts_with('.') {
        return Ok(Token::Directive(word.to_ascii_lowercase()));
    }
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
        return parse_number(word)
            .map(Token::Number)
            .ok_or_else(|| AsmError::InvalidNumber {
                line: line_num,
                token: word.to_string(),
            });
    }
    Ok(Token::Ident(word.to_ascii_uppercase()))
}

fn label_name(name: &str, word: &str, line_num: usize) -> Result<String, AsmError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if valid {
        Ok(name.to_string())
    } else {
        Err(AsmError::InvalidLabel {
            line: line_num,
            token: word.to_string(),
        })
    }
}

/// Parse `42`, `-7`, `+3`, `0x2a` or `-0x10`.
fn parse_number(word: &str) -> Option<i64> {
    let (negative, digits) = match word.as_bytes().first()? {
        b'-' => (true, &word[1..]),
        b'+' => (false, &word[1..]),
        _ => (false, word),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None if digits.starts_with(|c: char| c.is_ascii_digit()) => digits.parse::<i64>().ok()?,
        None => return None,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    line_num: usize,
) -> Result<Vec<u8>, AsmError> {
    let mut bytes = Vec::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(bytes),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => b'\n',
                    Some((_, 't')) => b'\t',
                    Some((_, 'r')) => b'\r',
                    Some((_, '0')) => 0,
                    Some((_, '\\')) => b'\\',
                    Some((_, '"')) => b'"',
                    Some((_, other)) => {
                        return Err(AsmError::InvalidEscape {
                            line: line_num,
                            escape: other,
                        })
                    }
                    None => break,
                };
                bytes.push(escaped);
            }
            c => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Err(AsmError::UnterminatedString { line: line_num })
}
