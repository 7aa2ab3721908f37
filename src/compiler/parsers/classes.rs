//! Declaration parsing: classes and their members.

use crate::compiler::ast_nodes::{TypeExpr, TypeExprKind};
use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::compiler::parsers::statements::parse_block;
use crate::compiler::parsers::{TokenStream, expressions};
use crate::compiler::registry::{
    Access, ClassRegistry, CtorDelegation, DelegationKind, Member, MemberKind, MethodShell, Param,
    ParamMode,
};
use crate::compiler::string_interning::{StringId, StringTable};
use crate::compiler::tokenizer::tokens::{Keyword, TokenKind};
use crate::return_syntax_error;

#[derive(Default)]
struct MemberAttributes {
    access: Option<Access>,
    is_static: bool,
    is_const: bool,
    is_virtual: bool,
    is_override: bool,
    is_abstract: bool,
    is_extern: bool,
}

pub fn parse_file(
    stream: &mut TokenStream,
    registry: &mut ClassRegistry,
    string_table: &mut StringTable,
) -> Result<(), CompileError> {
    while !stream.at_eof() {
        parse_class(stream, registry, string_table)?;
    }
    Ok(())
}

fn parse_class(
    stream: &mut TokenStream,
    registry: &mut ClassRegistry,
    string_table: &mut StringTable,
) -> Result<(), CompileError> {
    let mut is_abstract = false;
    let mut is_extern = false;
    let mut is_public = false;

    loop {
        if stream.eat_keyword(Keyword::Abstract) {
            is_abstract = true;
        } else if stream.eat_keyword(Keyword::Extern) {
            is_extern = true;
        } else if stream.eat_keyword(Keyword::Public) {
            is_public = true;
        } else {
            break;
        }
    }

    stream.expect(TokenKind::Keyword(Keyword::Class), "'class'", string_table)?;
    let (name, name_location) = stream.expect_symbol("a class name", string_table)?;

    let class_id = match registry.declare_class(name, stream.src_path.to_path_buf(), name_location)
    {
        Ok(id) => id,
        Err(_) => {
            return_syntax_error!(
                name_location.to_error_location(stream.src_path),
                "Class '{}' is already defined",
                string_table.resolve(name)
            );
        }
    };

    {
        let class = registry.class_mut(class_id);
        class.is_abstract = is_abstract;
        class.is_extern = is_extern;
        class.is_public = is_public;
    }

    if stream.eat(TokenKind::Colon) {
        let (parent, parent_location) = stream.expect_symbol("a parent class name", string_table)?;
        registry.class_mut(class_id).parent_name = Some((parent, parent_location));
    }

    stream.expect(TokenKind::OpenBrace, "'{'", string_table)?;

    while !stream.eat(TokenKind::CloseBrace) {
        if stream.at_eof() {
            return_syntax_error!(
                stream.error_location(),
                "Unterminated class body for '{}'",
                string_table.resolve(name)
            );
        }

        let member = parse_member(stream, name, string_table)?;
        registry.class_mut(class_id).members.push(member);
    }

    Ok(())
}

fn parse_member(
    stream: &mut TokenStream,
    class_name: StringId,
    string_table: &mut StringTable,
) -> Result<Member, CompileError> {
    let start_location = stream.location();
    let attrs = parse_member_attributes(stream);
    let access = attrs.access.unwrap_or(Access::Public);

    // A constructor is the class name directly followed by '('.
    if let TokenKind::Symbol(symbol) = stream.kind() {
        if symbol == class_name && stream.peek_kind(1) == TokenKind::OpenParen {
            let (_, location) = stream.expect_symbol("a constructor name", string_table)?;
            let shell = parse_constructor_shell(stream, &attrs, string_table)?;
            return Ok(Member {
                name: class_name,
                access,
                kind: MemberKind::Constructor(shell),
                location,
            });
        }
    }

    let declared = parse_type_expr(stream, string_table)?;

    // Indexer: `Type this[Type name] { get ... set ... }`
    if stream.eat_keyword(Keyword::This) {
        stream.expect(TokenKind::OpenBracket, "'['", string_table)?;
        let index_param = parse_param(stream, string_table)?;
        stream.expect(TokenKind::CloseBracket, "']'", string_table)?;
        let (getter, setter) =
            parse_accessors(stream, &declared, Some(index_param.clone()), &attrs, string_table)?;

        return Ok(Member {
            name: string_table.intern("this[]"),
            access,
            kind: MemberKind::Indexer {
                declared,
                data_type: crate::compiler::datatypes::DataType::Void,
                index_param,
                getter,
                setter,
            },
            location: start_location,
        });
    }

    let (name, name_location) = stream.expect_symbol("a member name", string_table)?;

    match stream.kind() {
        TokenKind::OpenParen => {
            let shell = parse_method_shell(stream, declared, &attrs, string_table)?;
            Ok(Member {
                name,
                access,
                kind: MemberKind::Method(shell),
                location: name_location,
            })
        }

        TokenKind::OpenBrace => {
            let (getter, setter) = parse_accessors(stream, &declared, None, &attrs, string_table)?;
            Ok(Member {
                name,
                access,
                kind: MemberKind::Property {
                    declared,
                    data_type: crate::compiler::datatypes::DataType::Void,
                    is_static: attrs.is_static,
                    getter,
                    setter,
                },
                location: name_location,
            })
        }

        _ => {
            let init = if stream.eat(TokenKind::Assign) {
                Some(expressions::parse_expression(stream, string_table)?)
            } else {
                None
            };
            stream.expect(TokenKind::Semicolon, "';' after field", string_table)?;

            Ok(Member {
                name,
                access,
                kind: MemberKind::Field {
                    declared,
                    data_type: crate::compiler::datatypes::DataType::Void,
                    is_static: attrs.is_static,
                    is_const: attrs.is_const,
                    init,
                },
                location: name_location,
            })
        }
    }
}

fn parse_member_attributes(stream: &mut TokenStream) -> MemberAttributes {
    let mut attrs = MemberAttributes::default();

    loop {
        if stream.eat_keyword(Keyword::Public) {
            attrs.access = Some(Access::Public);
        } else if stream.eat_keyword(Keyword::Private) {
            attrs.access = Some(Access::Private);
        } else if stream.eat_keyword(Keyword::Protected) {
            attrs.access = Some(Access::Protected);
        } else if stream.eat_keyword(Keyword::Static) {
            attrs.is_static = true;
        } else if stream.eat_keyword(Keyword::Const) {
            attrs.is_const = true;
        } else if stream.eat_keyword(Keyword::Virtual) {
            attrs.is_virtual = true;
        } else if stream.eat_keyword(Keyword::Override) {
            attrs.is_override = true;
        } else if stream.eat_keyword(Keyword::Abstract) {
            attrs.is_abstract = true;
        } else if stream.eat_keyword(Keyword::Extern) {
            attrs.is_extern = true;
        } else {
            return attrs;
        }
    }
}

fn parse_method_shell(
    stream: &mut TokenStream,
    declared_return: TypeExpr,
    attrs: &MemberAttributes,
    string_table: &mut StringTable,
) -> Result<MethodShell, CompileError> {
    let params = parse_params(stream, string_table)?;
    let mut shell = MethodShell::plain(params, Some(declared_return));
    shell.is_static = attrs.is_static;
    shell.is_virtual = attrs.is_virtual || attrs.is_abstract || attrs.is_override;
    shell.is_override = attrs.is_override;
    shell.is_abstract = attrs.is_abstract;

    if attrs.is_abstract || attrs.is_extern {
        stream.expect(TokenKind::Semicolon, "';' after method header", string_table)?;
    } else {
        stream.expect(TokenKind::OpenBrace, "'{' to start a method body", string_table)?;
        shell.body = Some(parse_block(stream, string_table)?);
    }

    Ok(shell)
}

fn parse_constructor_shell(
    stream: &mut TokenStream,
    attrs: &MemberAttributes,
    string_table: &mut StringTable,
) -> Result<MethodShell, CompileError> {
    let params = parse_params(stream, string_table)?;
    let mut shell = MethodShell::plain(params, None);
    shell.is_static = attrs.is_static;

    // Optional delegation prefix: `: this(...)` or `: base(...)`
    if stream.eat(TokenKind::Colon) {
        let location = stream.location();
        let kind = if stream.eat_keyword(Keyword::This) {
            DelegationKind::This
        } else if stream.eat_keyword(Keyword::Base) {
            DelegationKind::Base
        } else {
            return_syntax_error!(
                stream.error_location(),
                "Expected 'this' or 'base' after ':' in a constructor"
            );
        };

        stream.expect(TokenKind::OpenParen, "'('", string_table)?;
        let (args, modes) = expressions::parse_argument_list(stream, string_table)?;
        if modes.iter().any(|m| *m != ParamMode::In) {
            return_syntax_error!(
                location.to_error_location(stream.src_path),
                "ref and out arguments are not allowed in constructor delegation"
            );
        }

        shell.delegation = Some(CtorDelegation {
            kind,
            args,
            location,
        });
    }

    stream.expect(TokenKind::OpenBrace, "'{' to start a constructor body", string_table)?;
    shell.body = Some(parse_block(stream, string_table)?);

    Ok(shell)
}

fn parse_accessors(
    stream: &mut TokenStream,
    declared: &TypeExpr,
    index_param: Option<Param>,
    attrs: &MemberAttributes,
    string_table: &mut StringTable,
) -> Result<(Option<MethodShell>, Option<MethodShell>), CompileError> {
    stream.expect(TokenKind::OpenBrace, "'{'", string_table)?;

    let mut getter = None;
    let mut setter = None;

    while !stream.eat(TokenKind::CloseBrace) {
        let accessor_location = stream.location();

        if stream.eat_keyword(Keyword::Get) {
            if getter.is_some() {
                return_syntax_error!(
                    accessor_location.to_error_location(stream.src_path),
                    "Duplicate 'get' accessor"
                );
            }

            let params = index_param.iter().cloned().collect();
            let mut shell = MethodShell::plain(params, None);
            shell.is_static = attrs.is_static;
            shell.is_virtual = attrs.is_virtual || attrs.is_abstract || attrs.is_override;
            shell.is_override = attrs.is_override;
            shell.is_abstract = attrs.is_abstract;
            if attrs.is_abstract || attrs.is_extern {
                stream.expect(TokenKind::Semicolon, "';'", string_table)?;
            } else {
                stream.expect(TokenKind::OpenBrace, "'{'", string_table)?;
                shell.body = Some(parse_block(stream, string_table)?);
            }
            getter = Some(shell);
        } else if stream.eat_keyword(Keyword::Set) {
            if setter.is_some() {
                return_syntax_error!(
                    accessor_location.to_error_location(stream.src_path),
                    "Duplicate 'set' accessor"
                );
            }

            // The implicit `value` parameter carries the property type.
            let value_param = Param {
                name: string_table.intern("value"),
                mode: ParamMode::In,
                declared: declared.clone(),
                data_type: crate::compiler::datatypes::DataType::Void,
                location: accessor_location,
            };
            let mut params: Vec<Param> = index_param.iter().cloned().collect();
            params.push(value_param);

            let mut shell = MethodShell::plain(params, None);
            shell.is_static = attrs.is_static;
            shell.is_virtual = attrs.is_virtual || attrs.is_abstract || attrs.is_override;
            shell.is_override = attrs.is_override;
            shell.is_abstract = attrs.is_abstract;
            if attrs.is_abstract || attrs.is_extern {
                stream.expect(TokenKind::Semicolon, "';'", string_table)?;
            } else {
                stream.expect(TokenKind::OpenBrace, "'{'", string_table)?;
                shell.body = Some(parse_block(stream, string_table)?);
            }
            setter = Some(shell);
        } else {
            return_syntax_error!(
                stream.error_location(),
                "Expected 'get' or 'set' in accessor block"
            );
        }
    }

    if getter.is_none() && setter.is_none() {
        return_syntax_error!(
            stream.error_location(),
            "Property must declare at least one accessor"
        );
    }

    Ok((getter, setter))
}

fn parse_params(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Vec<Param>, CompileError> {
    stream.expect(TokenKind::OpenParen, "'('", string_table)?;

    let mut params = Vec::new();
    if stream.eat(TokenKind::CloseParen) {
        return Ok(params);
    }

    loop {
        params.push(parse_param(stream, string_table)?);
        if stream.eat(TokenKind::Comma) {
            continue;
        }
        stream.expect(TokenKind::CloseParen, "')' after parameters", string_table)?;
        return Ok(params);
    }
}

fn parse_param(
    stream: &mut TokenStream,
    string_table: &mut StringTable,
) -> Result<Param, CompileError> {
    let mode = if stream.eat_keyword(Keyword::Ref) {
        ParamMode::Ref
    } else if stream.eat_keyword(Keyword::Out) {
        ParamMode::Out
    } else {
        ParamMode::In
    };

    let declared = parse_type_expr(stream, string_table)?;
    let (name, location) = stream.expect_symbol("a parameter name", string_table)?;

    Ok(Param {
        name,
        mode,
        declared,
        data_type: crate::compiler::datatypes::DataType::Void,
        location,
    })
}

/// Parse a type annotation: a primitive keyword or class name followed
/// by any run of `[]` and `^` suffixes.
pub fn parse_type_expr(
    stream: &mut TokenStream,
    string_table: &StringTable,
) -> Result<TypeExpr, CompileError> {
    let location = stream.location();

    let base_kind = match stream.kind() {
        TokenKind::Keyword(Keyword::Bool) => TypeExprKind::Bool,
        TokenKind::Keyword(Keyword::Char) => TypeExprKind::Char,
        TokenKind::Keyword(Keyword::Int) => TypeExprKind::Int,
        TokenKind::Keyword(Keyword::Float) => TypeExprKind::Float,
        TokenKind::Keyword(Keyword::Double) => TypeExprKind::Double,
        TokenKind::Keyword(Keyword::Str) => TypeExprKind::Str,
        TokenKind::Keyword(Keyword::Void) => TypeExprKind::Void,
        TokenKind::Symbol(name) => TypeExprKind::Named(name),
        _ => {
            return Err(CompileError::new(
                format!(
                    "Expected a type, found {}",
                    stream.current().describe(string_table)
                ),
                stream.error_location(),
                crate::compiler::compiler_messages::compiler_errors::ErrorType::Syntax,
            ));
        }
    };
    stream.advance();

    let mut result = TypeExpr {
        kind: base_kind,
        location,
    };

    loop {
        if stream.kind() == TokenKind::OpenBracket && stream.peek_kind(1) == TokenKind::CloseBracket
        {
            stream.advance();
            stream.advance();
            result = TypeExpr {
                kind: TypeExprKind::Array(Box::new(result)),
                location,
            };
        } else if stream.eat(TokenKind::Caret) {
            result = TypeExpr {
                kind: TypeExprKind::Owned(Box::new(result)),
                location,
            };
        } else {
            return Ok(result);
        }
    }
}
