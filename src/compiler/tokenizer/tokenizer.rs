//! Hand-written scanner for Opal source.
//!
//! Produces a flat token vec per file. Comment trivia is discarded except
//! for `// error` markers, which are collected per line so error-test mode
//! can diff them against reported diagnostics.

use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokens::{
    CharPosition, FileTokens, Keyword, TextLocation, Token, TokenKind,
};
use crate::settings::{ERROR_MARKER_COMMENT, SRC_TO_TOKEN_RATIO};
use crate::{return_syntax_error, token_log};
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

struct Scanner<'src> {
    chars: Peekable<Chars<'src>>,
    position: CharPosition,
}

impl<'src> Scanner<'src> {
    fn new(source: &'src str) -> Self {
        Scanner {
            chars: source.chars().peekable(),
            position: CharPosition {
                line_number: 1,
                char_column: 1,
            },
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.position.line_number += 1;
            self.position.char_column = 1;
        } else {
            self.position.char_column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            return true;
        }
        false
    }
}

pub fn tokenize(
    source: &str,
    src_path: &Path,
    string_table: &mut StringTable,
) -> Result<FileTokens, CompileError> {
    let mut scanner = Scanner::new(source);
    let mut tokens: Vec<Token> = Vec::with_capacity(source.len() / SRC_TO_TOKEN_RATIO);
    let mut expected_error_lines: Vec<i32> = Vec::new();

    loop {
        skip_whitespace_and_comments(&mut scanner, &mut expected_error_lines);

        let start = scanner.position;
        let Some(c) = scanner.advance() else {
            tokens.push(Token::new(
                TokenKind::Eof,
                TextLocation::new(start, start),
            ));
            break;
        };

        let kind = match c {
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            '^' => TokenKind::Caret,

            '+' => {
                if scanner.eat('+') {
                    TokenKind::Increment
                } else if scanner.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if scanner.eat('-') {
                    TokenKind::Decrement
                } else if scanner.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if scanner.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if scanner.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if scanner.eat('=') {
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if scanner.eat('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if scanner.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if scanner.eat('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if scanner.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if scanner.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return_syntax_error!(
                        TextLocation::new(start, scanner.position).to_error_location(src_path),
                        "Unexpected character '&' (Opal has no bitwise operators)"
                    );
                }
            }
            '|' => {
                if scanner.eat('|') {
                    TokenKind::OrOr
                } else {
                    return_syntax_error!(
                        TextLocation::new(start, scanner.position).to_error_location(src_path),
                        "Unexpected character '|' (Opal has no bitwise operators)"
                    );
                }
            }

            '"' => scan_string_literal(&mut scanner, src_path, start, string_table)?,
            '\'' => scan_char_literal(&mut scanner, src_path, start)?,

            c if c.is_ascii_digit() => scan_number(&mut scanner, src_path, start, c)?,

            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c);
                while let Some(next) = scanner.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        scanner.advance();
                    } else {
                        break;
                    }
                }

                match Keyword::from_str(&word) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Symbol(string_table.intern(&word)),
                }
            }

            other => {
                return_syntax_error!(
                    TextLocation::new(start, scanner.position).to_error_location(src_path),
                    "Unexpected character '{other}'"
                );
            }
        };

        let location = TextLocation::new(start, scanner.position);
        token_log!("token ", { format!("{:?}", kind) });
        tokens.push(Token::new(kind, location));
    }

    Ok(FileTokens::new(
        src_path.to_path_buf(),
        tokens,
        expected_error_lines,
    ))
}

fn skip_whitespace_and_comments(scanner: &mut Scanner, expected_error_lines: &mut Vec<i32>) {
    loop {
        match scanner.peek() {
            Some(c) if c.is_whitespace() => {
                scanner.advance();
            }
            Some('/') => {
                // Only consume if it really starts a comment
                let mut lookahead = scanner.chars.clone();
                lookahead.next();
                match lookahead.next() {
                    Some('/') => {
                        let comment_line = scanner.position.line_number;
                        scanner.advance();
                        scanner.advance();
                        let mut comment = String::new();
                        while let Some(c) = scanner.peek() {
                            if c == '\n' {
                                break;
                            }
                            comment.push(c);
                            scanner.advance();
                        }
                        if comment.trim_start().starts_with(ERROR_MARKER_COMMENT) {
                            expected_error_lines.push(comment_line);
                        }
                    }
                    Some('*') => {
                        scanner.advance();
                        scanner.advance();
                        let mut last = '\0';
                        while let Some(c) = scanner.advance() {
                            if last == '*' && c == '/' {
                                break;
                            }
                            last = c;
                        }
                    }
                    _ => return,
                }
            }
            _ => return,
        }
    }
}

fn scan_string_literal(
    scanner: &mut Scanner,
    src_path: &Path,
    start: CharPosition,
    string_table: &mut StringTable,
) -> Result<TokenKind, CompileError> {
    let mut value = String::new();

    loop {
        match scanner.advance() {
            Some('"') => break,
            Some('\\') => {
                let code = scan_escape(scanner, src_path, start)?;
                value.push(char::from_u32(code as u32).unwrap_or('\u{fffd}'));
            }
            Some('\n') | None => {
                return_syntax_error!(
                    TextLocation::new(start, scanner.position).to_error_location(src_path),
                    "Unterminated string literal"
                );
            }
            Some(c) => value.push(c),
        }
    }

    Ok(TokenKind::StringLiteral(string_table.intern(&value)))
}

fn scan_char_literal(
    scanner: &mut Scanner,
    src_path: &Path,
    start: CharPosition,
) -> Result<TokenKind, CompileError> {
    let value: u16 = match scanner.advance() {
        Some('\\') => scan_escape(scanner, src_path, start)?,
        Some('\'') | None => {
            return_syntax_error!(
                TextLocation::new(start, scanner.position).to_error_location(src_path),
                "Empty character literal"
            );
        }
        Some(c) => c as u16,
    };

    if scanner.advance() != Some('\'') {
        return_syntax_error!(
            TextLocation::new(start, scanner.position).to_error_location(src_path),
            "Unterminated character literal"
        );
    }

    Ok(TokenKind::CharLiteral(value))
}

fn scan_escape(
    scanner: &mut Scanner,
    src_path: &Path,
    start: CharPosition,
) -> Result<u16, CompileError> {
    match scanner.advance() {
        Some('n') => Ok('\n' as u16),
        Some('t') => Ok('\t' as u16),
        Some('r') => Ok('\r' as u16),
        Some('0') => Ok(0),
        Some('\\') => Ok('\\' as u16),
        Some('\'') => Ok('\'' as u16),
        Some('"') => Ok('"' as u16),
        other => {
            return_syntax_error!(
                TextLocation::new(start, scanner.position).to_error_location(src_path),
                "Unknown escape sequence '\\{}'",
                other.unwrap_or(' ')
            );
        }
    }
}

fn scan_number(
    scanner: &mut Scanner,
    src_path: &Path,
    start: CharPosition,
    first: char,
) -> Result<TokenKind, CompileError> {
    let mut digits = String::new();
    digits.push(first);

    while let Some(c) = scanner.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            scanner.advance();
        } else {
            break;
        }
    }

    let mut is_floating = false;

    // A dot only belongs to the number if a digit follows it, so that
    // member access on literals is not swallowed.
    if scanner.peek() == Some('.') {
        let mut lookahead = scanner.chars.clone();
        lookahead.next();
        if lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
            is_floating = true;
            digits.push('.');
            scanner.advance();
            while let Some(c) = scanner.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    scanner.advance();
                } else {
                    break;
                }
            }
        }
    }

    if scanner.peek() == Some('e') || scanner.peek() == Some('E') {
        let mut lookahead = scanner.chars.clone();
        lookahead.next();
        let next = lookahead.next();
        if next.is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-') {
            is_floating = true;
            digits.push('e');
            scanner.advance();
            if let Some(sign) = scanner.peek() {
                if sign == '+' || sign == '-' {
                    digits.push(sign);
                    scanner.advance();
                }
            }
            while let Some(c) = scanner.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    scanner.advance();
                } else {
                    break;
                }
            }
        }
    }

    if scanner.peek() == Some('f') || scanner.peek() == Some('F') {
        scanner.advance();
        let value: f32 = digits.parse().map_err(|_| {
            CompileError::new(
                format!("Bad float literal '{digits}'"),
                TextLocation::new(start, scanner.position).to_error_location(src_path),
                crate::compiler::compiler_messages::compiler_errors::ErrorType::Syntax,
            )
        })?;
        return Ok(TokenKind::FloatLiteral(value));
    }

    if is_floating {
        let value: f64 = digits.parse().map_err(|_| {
            CompileError::new(
                format!("Bad double literal '{digits}'"),
                TextLocation::new(start, scanner.position).to_error_location(src_path),
                crate::compiler::compiler_messages::compiler_errors::ErrorType::Syntax,
            )
        })?;
        return Ok(TokenKind::DoubleLiteral(value));
    }

    match digits.parse::<i32>() {
        Ok(value) => Ok(TokenKind::IntLiteral(value)),
        Err(_) => {
            return_syntax_error!(
                TextLocation::new(start, scanner.position).to_error_location(src_path),
                "Integer literal '{digits}' does not fit in 32 bits"
            );
        }
    }
}
