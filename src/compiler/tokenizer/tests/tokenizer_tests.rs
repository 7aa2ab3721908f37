#![cfg(test)]

use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokenizer::tokenize;
use crate::compiler::tokenizer::tokens::{Keyword, TokenKind};
use std::path::PathBuf;

fn kinds(source: &str) -> (Vec<TokenKind>, StringTable) {
    let mut table = StringTable::new();
    let file = tokenize(source, &PathBuf::from("test.opl"), &mut table)
        .expect("tokenizer should accept this source");
    (file.tokens.into_iter().map(|t| t.kind).collect(), table)
}

#[test]
fn scans_class_header() {
    let (tokens, table) = kinds("class Node : Object {");
    let name = table.get_existing("Node").unwrap();
    let parent = table.get_existing("Object").unwrap();

    assert_eq!(
        tokens,
        vec![
            TokenKind::Keyword(Keyword::Class),
            TokenKind::Symbol(name),
            TokenKind::Colon,
            TokenKind::Symbol(parent),
            TokenKind::OpenBrace,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn scans_owning_pointer_declaration() {
    let (tokens, table) = kinds("Node^ next;");
    let name = table.get_existing("Node").unwrap();
    let next = table.get_existing("next").unwrap();

    assert_eq!(
        tokens,
        vec![
            TokenKind::Symbol(name),
            TokenKind::Caret,
            TokenKind::Symbol(next),
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn distinguishes_numeric_literal_kinds() {
    let (tokens, _) = kinds("42 2.5 1.5f 1e3");
    assert_eq!(tokens[0], TokenKind::IntLiteral(42));
    assert_eq!(tokens[1], TokenKind::DoubleLiteral(2.5));
    assert_eq!(tokens[2], TokenKind::FloatLiteral(1.5));
    assert_eq!(tokens[3], TokenKind::DoubleLiteral(1000.0));
}

#[test]
fn dot_after_int_is_member_access() {
    let (tokens, _) = kinds("x[0].Count");
    assert!(tokens.contains(&TokenKind::Dot));
    assert_eq!(tokens[1], TokenKind::IntLiteral(0));
}

#[test]
fn string_literal_with_escapes() {
    let (tokens, table) = kinds(r#""hello, world\n""#);
    match tokens[0] {
        TokenKind::StringLiteral(id) => assert_eq!(table.resolve(id), "hello, world\n"),
        other => panic!("expected string literal, got {:?}", other),
    }
}

#[test]
fn collects_error_marker_lines() {
    let mut table = StringTable::new();
    let source = "int x;\nPrint(y); // error\nint z; // just a comment\n";
    let file = tokenize(source, &PathBuf::from("test.opl"), &mut table).unwrap();
    assert_eq!(file.expected_error_lines, vec![2]);
}

#[test]
fn two_char_operators() {
    let (tokens, _) = kinds("a <= b != c && d || !e");
    assert!(tokens.contains(&TokenKind::LtEq));
    assert!(tokens.contains(&TokenKind::NotEq));
    assert!(tokens.contains(&TokenKind::AndAnd));
    assert!(tokens.contains(&TokenKind::OrOr));
    assert!(tokens.contains(&TokenKind::Not));
}

#[test]
fn rejects_unterminated_string() {
    let mut table = StringTable::new();
    let result = tokenize("\"oops", &PathBuf::from("test.opl"), &mut table);
    assert!(result.is_err());
}

#[test]
fn take_and_new_are_keywords() {
    let (tokens, _) = kinds("take new");
    assert_eq!(tokens[0], TokenKind::Keyword(Keyword::Take));
    assert_eq!(tokens[1], TokenKind::Keyword(Keyword::New));
}
