//! POSIX shell-style word splitting.
//!
//! Rules:
//! - unquoted whitespace separates words;
//! - `'...'` is taken literally;
//! - inside `"..."` a backslash escapes only `"` and `\`;
//! - outside quotes a backslash escapes the following character;
//! - quoted and unquoted parts of one word are concatenated (`a"b c"` is
//!   the single word `ab c`), and `''` yields an empty word.
//!
//! `#` has no special meaning, so channel names survive untouched.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No closing quotation")]
    UnterminatedQuote,
    #[error("No escaped character")]
    DanglingEscape,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Between words.
    Gap,
    Word,
    Single,
    Double,
}

/// Split `input` into words.
pub fn tokenize(input: &str) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut mode = Mode::Gap;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Gap | Mode::Word => match c {
                c if c.is_whitespace() => {
                    if mode == Mode::Word {
                        words.push(std::mem::take(&mut word));
                        mode = Mode::Gap;
                    }
                }
                '\'' => mode = Mode::Single,
                '"' => mode = Mode::Double,
                '\\' => {
                    let escaped = chars.next().ok_or(ParseError::DanglingEscape)?;
                    word.push(escaped);
                    mode = Mode::Word;
                }
                c => {
                    word.push(c);
                    mode = Mode::Word;
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Word,
                c => word.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Word,
                '\\' => match chars.next() {
                    Some(e @ ('"' | '\\')) => word.push(e),
                    Some(other) => {
                        word.push('\\');
                        word.push(other);
                    }
                    None => return Err(ParseError::UnterminatedQuote),
                },
                c => word.push(c),
            },
        }
    }

    match mode {
        Mode::Single | Mode::Double => Err(ParseError::UnterminatedQuote),
        Mode::Word => {
            words.push(word);
            Ok(words)
        }
        Mode::Gap => Ok(words),
    }
}
