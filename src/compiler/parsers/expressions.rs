//! Expression parsing with precedence climbing.

use crate::compiler::ast_nodes::{
    BinOp, Callee, Expression, ExpressionKind, LogicalOp, TypeExprKind, UnaryOp,
};
use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::compiler::parsers::TokenStream;
use crate::compiler::parsers::classes::parse_type_expr;
use crate::compiler::registry::ParamMode;
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokens::{Keyword, TokenKind};
use crate::return_syntax_error;

pub fn parse_expression(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    parse_assignment(stream, string_table)
}

fn parse_assignment(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let target = parse_ternary(stream, string_table)?;

    let compound = match stream.kind() {
        TokenKind::Assign => None,
        TokenKind::PlusAssign => Some(BinOp::Add),
        TokenKind::MinusAssign => Some(BinOp::Sub),
        TokenKind::StarAssign => Some(BinOp::Mul),
        TokenKind::SlashAssign => Some(BinOp::Div),
        TokenKind::PercentAssign => Some(BinOp::Mod),
        _ => return Ok(target),
    };

    let location = stream.location();
    stream.advance();
    let value = parse_assignment(stream, string_table)?;

    Ok(Expression::new(
        ExpressionKind::Assign {
            target: Box::new(target),
            op: compound,
            value: Box::new(value),
        },
        location,
    ))
}

fn parse_ternary(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let condition = parse_logical_or(stream, string_table)?;

    if !stream.eat(TokenKind::Question) {
        return Ok(condition);
    }

    let location = condition.location;
    let then_value = parse_expression(stream, string_table)?;
    stream.expect(TokenKind::Colon, "':' in conditional expression", string_table)?;
    let else_value = parse_ternary(stream, string_table)?;

    Ok(Expression::new(
        ExpressionKind::Ternary {
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        },
        location,
    ))
}

fn parse_logical_or(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_logical_and(stream, string_table)?;

    while stream.at(TokenKind::OrOr) {
        let location = stream.location();
        stream.advance();
        let right = parse_logical_and(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }

    Ok(left)
}

fn parse_logical_and(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_equality(stream, string_table)?;

    while stream.at(TokenKind::AndAnd) {
        let location = stream.location();
        stream.advance();
        let right = parse_equality(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }

    Ok(left)
}

fn parse_equality(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_relational(stream, string_table)?;

    loop {
        let op = match stream.kind() {
            TokenKind::Eq => BinOp::Eq,
            TokenKind::NotEq => BinOp::NotEq,
            _ => return Ok(left),
        };
        let location = stream.location();
        stream.advance();
        let right = parse_relational(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }
}

fn parse_relational(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_additive(stream, string_table)?;

    loop {
        let op = match stream.kind() {
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::LtEq => BinOp::LtEq,
            TokenKind::GtEq => BinOp::GtEq,
            _ => return Ok(left),
        };
        let location = stream.location();
        stream.advance();
        let right = parse_additive(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }
}

fn parse_additive(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_multiplicative(stream, string_table)?;

    loop {
        let op = match stream.kind() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            _ => return Ok(left),
        };
        let location = stream.location();
        stream.advance();
        let right = parse_multiplicative(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }
}

fn parse_multiplicative(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut left = parse_unary(stream, string_table)?;

    loop {
        let op = match stream.kind() {
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            _ => return Ok(left),
        };
        let location = stream.location();
        stream.advance();
        let right = parse_unary(stream, string_table)?;
        left = Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        );
    }
}

fn parse_unary(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let location = stream.location();

    match stream.kind() {
        TokenKind::Minus => {
            stream.advance();
            let operand = parse_unary(stream, string_table)?;
            Ok(Expression::new(
                ExpressionKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                location,
            ))
        }

        TokenKind::Not => {
            stream.advance();
            let operand = parse_unary(stream, string_table)?;
            Ok(Expression::new(
                ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                location,
            ))
        }

        TokenKind::Keyword(Keyword::Take) => {
            stream.advance();
            let operand = parse_unary(stream, string_table)?;
            Ok(Expression::new(
                ExpressionKind::Take(Box::new(operand)),
                location,
            ))
        }

        TokenKind::OpenParen if starts_cast(stream) => {
            stream.advance();
            let target = parse_type_expr(stream, string_table)?;
            stream.expect(TokenKind::CloseParen, "')' after cast type", string_table)?;
            let value = parse_unary(stream, string_table)?;
            Ok(Expression::new(
                ExpressionKind::Cast {
                    target,
                    value: Box::new(value),
                },
                location,
            ))
        }

        _ => parse_postfix(stream, string_table),
    }
}

/// A parenthesized type is a cast only when what follows the ')' can
/// start an operand — otherwise `(size)` in `(size) - 1` would be
/// misread as a cast.
fn starts_cast(stream: &TokenStream) -> bool {
    let mut offset = 1;

    let named = match stream.peek_kind(offset) {
        TokenKind::Keyword(
            Keyword::Bool
            | Keyword::Char
            | Keyword::Int
            | Keyword::Float
            | Keyword::Double
            | Keyword::Str,
        ) => false,
        TokenKind::Symbol(_) => true,
        _ => return false,
    };
    offset += 1;

    loop {
        match stream.peek_kind(offset) {
            TokenKind::Caret => offset += 1,
            TokenKind::OpenBracket if stream.peek_kind(offset + 1) == TokenKind::CloseBracket => {
                offset += 2
            }
            _ => break,
        }
    }

    if stream.peek_kind(offset) != TokenKind::CloseParen {
        return false;
    }
    offset += 1;

    // A parenthesized primitive keyword can't be anything else.
    if !named {
        return true;
    }

    matches!(
        stream.peek_kind(offset),
        TokenKind::Symbol(_)
            | TokenKind::IntLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::DoubleLiteral(_)
            | TokenKind::CharLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::OpenParen
            | TokenKind::Keyword(
                Keyword::This | Keyword::New | Keyword::Take | Keyword::Null | Keyword::Base,
            )
    )
}

fn parse_postfix(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let mut expression = parse_primary(stream, string_table)?;

    loop {
        match stream.kind() {
            TokenKind::Dot => {
                stream.advance();
                let (name, location) = stream.expect_symbol("a member name", string_table)?;

                if stream.eat(TokenKind::OpenParen) {
                    let (args, arg_modes) = parse_argument_list(stream, string_table)?;
                    expression = Expression::new(
                        ExpressionKind::Call {
                            callee: Callee::Member {
                                object: Box::new(expression),
                                name,
                                location,
                            },
                            args,
                            arg_modes,
                            target: None,
                        },
                        location,
                    );
                } else {
                    expression = Expression::new(
                        ExpressionKind::FieldAccess {
                            object: Box::new(expression),
                            name,
                            binding: crate::compiler::ast_nodes::Binding::Unresolved,
                        },
                        location,
                    );
                }
            }

            TokenKind::OpenBracket => {
                let location = stream.location();
                stream.advance();
                let index = parse_expression(stream, string_table)?;
                stream.expect(TokenKind::CloseBracket, "']'", string_table)?;
                expression = Expression::new(
                    ExpressionKind::Index {
                        object: Box::new(expression),
                        index: Box::new(index),
                        indexer: None,
                    },
                    location,
                );
            }

            TokenKind::Increment | TokenKind::Decrement => {
                let location = stream.location();
                let decrement = stream.at(TokenKind::Decrement);
                stream.advance();
                expression = Expression::new(
                    ExpressionKind::Increment {
                        target: Box::new(expression),
                        decrement,
                    },
                    location,
                );
            }

            _ => return Ok(expression),
        }
    }
}

fn parse_primary(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    let location = stream.location();

    match stream.kind() {
        TokenKind::IntLiteral(value) => {
            stream.advance();
            Ok(Expression::new(ExpressionKind::IntLiteral(value), location))
        }
        TokenKind::FloatLiteral(value) => {
            stream.advance();
            Ok(Expression::new(
                ExpressionKind::FloatLiteral(value),
                location,
            ))
        }
        TokenKind::DoubleLiteral(value) => {
            stream.advance();
            Ok(Expression::new(
                ExpressionKind::DoubleLiteral(value),
                location,
            ))
        }
        TokenKind::CharLiteral(value) => {
            stream.advance();
            Ok(Expression::new(
                ExpressionKind::CharLiteral(value),
                location,
            ))
        }
        TokenKind::StringLiteral(value) => {
            stream.advance();
            Ok(Expression::new(ExpressionKind::StrLiteral(value), location))
        }

        TokenKind::Keyword(Keyword::True) => {
            stream.advance();
            Ok(Expression::new(ExpressionKind::BoolLiteral(true), location))
        }
        TokenKind::Keyword(Keyword::False) => {
            stream.advance();
            Ok(Expression::new(
                ExpressionKind::BoolLiteral(false),
                location,
            ))
        }
        TokenKind::Keyword(Keyword::Null) => {
            stream.advance();
            Ok(Expression::new(ExpressionKind::Null, location))
        }
        TokenKind::Keyword(Keyword::This) => {
            stream.advance();
            Ok(Expression::new(ExpressionKind::This, location))
        }

        TokenKind::Keyword(Keyword::Base) => {
            stream.advance();
            stream.expect(TokenKind::Dot, "'.' after 'base'", string_table)?;
            let (name, name_location) = stream.expect_symbol("a method name", string_table)?;
            stream.expect(TokenKind::OpenParen, "'(' — base access must be a call", string_table)?;
            let (args, arg_modes) = parse_argument_list(stream, string_table)?;

            Ok(Expression::new(
                ExpressionKind::Call {
                    callee: Callee::Base {
                        name,
                        location: name_location,
                    },
                    args,
                    arg_modes,
                    target: None,
                },
                location,
            ))
        }

        TokenKind::Keyword(Keyword::New) => {
            stream.advance();
            parse_new(stream, location, string_table)
        }

        TokenKind::OpenParen => {
            stream.advance();
            let inner = parse_expression(stream, string_table)?;
            stream.expect(TokenKind::CloseParen, "')'", string_table)?;
            Ok(inner)
        }

        TokenKind::Symbol(name) => {
            stream.advance();

            if stream.eat(TokenKind::OpenParen) {
                let (args, arg_modes) = parse_argument_list(stream, string_table)?;
                return Ok(Expression::new(
                    ExpressionKind::Call {
                        callee: Callee::Name { name, location },
                        args,
                        arg_modes,
                        target: None,
                    },
                    location,
                ));
            }

            Ok(Expression::new(
                ExpressionKind::Name {
                    name,
                    binding: crate::compiler::ast_nodes::Binding::Unresolved,
                },
                location,
            ))
        }

        _ => {
            return_syntax_error!(
                stream.error_location(),
                "Expected an expression, found {}",
                stream.current().describe(string_table)
            );
        }
    }
}

fn parse_new(
    stream: &mut TokenStream,
    location: crate::compiler::tokenizer::tokens::TextLocation,
    string_table: &mut StringTable,
) -> Result<Expression, CompileError> {
    // `new(pool) T(...)` — the allocation goes into the pool.
    let pool = if stream.eat(TokenKind::OpenParen) {
        let pool = parse_expression(stream, string_table)?;
        stream.expect(TokenKind::CloseParen, "')' after pool expression", string_table)?;
        Some(Box::new(pool))
    } else {
        None
    };

    // Array form first: `new int[n]`, `new Node^[n]`
    let elem = parse_type_expr(stream, string_table)?;

    if stream.eat(TokenKind::OpenBracket) {
        if pool.is_some() {
            return_syntax_error!(
                location.to_error_location(stream.src_path),
                "Arrays can't be pool-allocated"
            );
        }
        let length = parse_expression(stream, string_table)?;
        stream.expect(TokenKind::CloseBracket, "']'", string_table)?;
        return Ok(Expression::new(
            ExpressionKind::NewArray {
                elem,
                length: Box::new(length),
            },
            location,
        ));
    }

    let TypeExprKind::Named(class_name) = elem.kind else {
        return_syntax_error!(
            location.to_error_location(stream.src_path),
            "'new' needs a class name or an array type"
        );
    };

    stream.expect(TokenKind::OpenParen, "'(' after class name in 'new'", string_table)?;
    let (args, arg_modes) = parse_argument_list(stream, string_table)?;

    Ok(Expression::new(
        ExpressionKind::New {
            class_name,
            args,
            arg_modes,
            pool,
            class_id: None,
            ctor: None,
        },
        location,
    ))
}

/// Arguments after an already-consumed '(' through the matching ')'.
/// Each argument may carry a `ref`/`out` prefix.
pub fn parse_argument_list(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<(Vec<Expression>, Vec<ParamMode>), CompileError> {
    let mut args = Vec::new();
    let mut modes = Vec::new();

    if stream.eat(TokenKind::CloseParen) {
        return Ok((args, modes));
    }

    loop {
        let mode = if stream.eat_keyword(Keyword::Ref) {
            ParamMode::Ref
        } else if stream.eat_keyword(Keyword::Out) {
            ParamMode::Out
        } else {
            ParamMode::In
        };

        args.push(parse_expression(stream, string_table)?);
        modes.push(mode);

        if stream.eat(TokenKind::Comma) {
            continue;
        }
        stream.expect(TokenKind::CloseParen, "')' after arguments", string_table)?;
        return Ok((args, modes));
    }
}
