#![cfg(test)]

use crate::compiler::ast_nodes::{ExpressionKind, NodeKind, TypeExprKind};
use crate::compiler::parsers::parse_program;
use crate::compiler::registry::{Access, ClassRegistry, MemberKind, ParamMode};
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokenizer::tokenize;
use std::path::PathBuf;

fn parse(source: &str) -> (ClassRegistry, StringTable) {
    let mut table = StringTable::new();
    let mut registry = ClassRegistry::with_builtins(&mut table);
    let file = tokenize(source, &PathBuf::from("test.opl"), &mut table)
        .expect("tokenizer should accept this source");
    let errors = parse_program(&[file], &mut registry, &mut table);
    assert!(errors.is_empty(), "parse errors: {:?}", errors);
    (registry, table)
}

fn user_class<'r>(
    registry: &'r ClassRegistry,
    table: &StringTable,
    name: &str,
) -> &'r crate::compiler::registry::Class {
    let id = registry
        .class_by_name(table.get_existing(name).expect("name never seen"))
        .expect("class not registered");
    registry.class(id)
}

#[test]
fn parses_class_with_field_and_method() {
    let (registry, table) = parse(
        "class Node {
            int value;
            Node^ next;

            int Sum() {
                return value;
            }
        }",
    );

    let node = user_class(&registry, &table, "Node");
    assert_eq!(node.members.len(), 3);
    assert!(matches!(node.members[0].kind, MemberKind::Field { .. }));
    assert!(matches!(node.members[1].kind, MemberKind::Field { .. }));
    assert!(matches!(node.members[2].kind, MemberKind::Method(_)));

    let MemberKind::Field { declared, .. } = &node.members[1].kind else {
        unreachable!();
    };
    assert!(matches!(declared.kind, TypeExprKind::Owned(_)));
}

#[test]
fn parses_inheritance_and_attributes() {
    let (registry, table) = parse(
        "abstract class Animal {
            abstract string Speak();
        }
        class Dog : Animal {
            override string Speak() { return \"woof\"; }
        }",
    );

    let animal = user_class(&registry, &table, "Animal");
    assert!(animal.is_abstract);

    let dog = user_class(&registry, &table, "Dog");
    assert!(dog.parent_name.is_some());

    let MemberKind::Method(speak) = &dog.members[0].kind else {
        panic!("expected method");
    };
    assert!(speak.is_override);
    assert!(speak.is_virtual);
}

#[test]
fn parses_constructor_with_delegation() {
    let (registry, table) = parse(
        "class Point {
            int x;
            Point(int x) { this.x = x; }
            Point() : this(0) { }
        }",
    );

    let point = user_class(&registry, &table, "Point");
    let ctors: Vec<_> = point
        .members
        .iter()
        .filter_map(|m| match &m.kind {
            MemberKind::Constructor(shell) => Some(shell),
            _ => None,
        })
        .collect();

    assert_eq!(ctors.len(), 2);
    assert!(ctors[0].delegation.is_none());
    assert!(ctors[1].delegation.is_some());
}

#[test]
fn parses_property_and_indexer() {
    let (registry, table) = parse(
        "class Buffer {
            int count;
            int Count { get { return count; } }
            int this[int i] { get { return i; } set { } }
        }",
    );

    let buffer = user_class(&registry, &table, "Buffer");

    let MemberKind::Property { getter, setter, .. } = &buffer.members[1].kind else {
        panic!("expected property");
    };
    assert!(getter.is_some());
    assert!(setter.is_none());

    let MemberKind::Indexer { getter, setter, .. } = &buffer.members[2].kind else {
        panic!("expected indexer");
    };
    assert!(getter.is_some());
    // The implicit value parameter rides along after the index.
    assert_eq!(setter.as_ref().unwrap().params.len(), 2);
}

#[test]
fn parses_ref_out_parameters() {
    let (registry, table) = parse(
        "class Math {
            void Split(int input, out int high, ref int low) { }
        }",
    );

    let math = user_class(&registry, &table, "Math");
    let MemberKind::Method(split) = &math.members[0].kind else {
        panic!("expected method");
    };
    assert_eq!(split.params[0].mode, ParamMode::In);
    assert_eq!(split.params[1].mode, ParamMode::Out);
    assert_eq!(split.params[2].mode, ParamMode::Ref);
}

#[test]
fn parses_private_members() {
    let (registry, table) = parse(
        "class Secret {
            private int hidden;
            public int Reveal() { return hidden; }
        }",
    );

    let secret = user_class(&registry, &table, "Secret");
    assert_eq!(secret.members[0].access, Access::Private);
    assert_eq!(secret.members[1].access, Access::Public);
}

#[test]
fn parses_statement_forms() {
    let (registry, table) = parse(
        "class Flow {
            void Run(int n) {
                int total = 0;
                for (int i = 0; i < n; i++) {
                    if (i % 2 == 0) { continue; }
                    total += i;
                }
                while (total > 100) { total -= 10; }
                do { total++; } while (total < 0);
                switch (total) {
                    case 0:
                        return;
                    default:
                        break;
                }
            }
        }",
    );

    let flow = user_class(&registry, &table, "Flow");
    let MemberKind::Method(run) = &flow.members[0].kind else {
        panic!("expected method");
    };
    let body = run.body.as_ref().unwrap();
    assert!(matches!(body[0].kind, NodeKind::VarDecl { .. }));
    assert!(matches!(body[1].kind, NodeKind::For { .. }));
    assert!(matches!(body[2].kind, NodeKind::While { .. }));
    assert!(matches!(body[3].kind, NodeKind::DoWhile { .. }));
    assert!(matches!(body[4].kind, NodeKind::Switch { .. }));
}

#[test]
fn parses_new_forms() {
    let (registry, table) = parse(
        "class Factory {
            void Build() {
                Node^ a = new Node();
                int[] xs = new int[10];
                Pool p = new Pool();
                Node b = new(p) Node();
            }
        }",
    );

    let factory = user_class(&registry, &table, "Factory");
    let MemberKind::Method(build) = &factory.members[0].kind else {
        panic!("expected method");
    };
    let body = build.body.as_ref().unwrap();

    let NodeKind::VarDecl { init: Some(init), .. } = &body[0].kind else {
        panic!("expected declaration");
    };
    assert!(matches!(init.kind, ExpressionKind::New { pool: None, .. }));

    let NodeKind::VarDecl { init: Some(init), .. } = &body[1].kind else {
        panic!("expected declaration");
    };
    assert!(matches!(init.kind, ExpressionKind::NewArray { .. }));

    let NodeKind::VarDecl { init: Some(init), .. } = &body[3].kind else {
        panic!("expected declaration");
    };
    assert!(matches!(init.kind, ExpressionKind::New { pool: Some(_), .. }));
}

#[test]
fn parses_take_and_cast() {
    let (registry, table) = parse(
        "class Mover {
            Node^ held;
            Node^ Release() {
                return take held;
            }
            void Check(Object o) {
                Node n = (Node)o;
            }
        }",
    );

    let mover = user_class(&registry, &table, "Mover");
    let MemberKind::Method(release) = &mover.members[1].kind else {
        panic!("expected method");
    };
    let body = release.body.as_ref().unwrap();
    let NodeKind::Return(Some(value)) = &body[0].kind else {
        panic!("expected return");
    };
    assert!(matches!(value.kind, ExpressionKind::Take(_)));

    let MemberKind::Method(check) = &mover.members[2].kind else {
        panic!("expected method");
    };
    let body = check.body.as_ref().unwrap();
    let NodeKind::VarDecl { init: Some(init), .. } = &body[0].kind else {
        panic!("expected declaration");
    };
    assert!(matches!(init.kind, ExpressionKind::Cast { .. }));
}

#[test]
fn cast_heuristic_leaves_parenthesized_math_alone() {
    let (registry, table) = parse(
        "class Calc {
            int Half(int size) {
                return (size) - 1;
            }
        }",
    );

    let calc = user_class(&registry, &table, "Calc");
    let MemberKind::Method(half) = &calc.members[0].kind else {
        panic!("expected method");
    };
    let body = half.body.as_ref().unwrap();
    let NodeKind::Return(Some(value)) = &body[0].kind else {
        panic!("expected return");
    };
    assert!(matches!(
        value.kind,
        ExpressionKind::Binary {
            op: crate::compiler::ast_nodes::BinOp::Sub,
            ..
        }
    ));
}

#[test]
fn duplicate_class_is_rejected() {
    let mut table = StringTable::new();
    let mut registry = ClassRegistry::with_builtins(&mut table);
    let source = "class A { } class A { }";
    let file = tokenize(source, &PathBuf::from("test.opl"), &mut table).unwrap();
    let errors = parse_program(&[file], &mut registry, &mut table);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].msg.contains("already defined"));
}

#[test]
fn foreach_over_array() {
    let (registry, table) = parse(
        "class Walker {
            int Total(int[] xs) {
                int total = 0;
                foreach (int x in xs) {
                    total += x;
                }
                return total;
            }
        }",
    );

    let walker = user_class(&registry, &table, "Walker");
    let MemberKind::Method(total) = &walker.members[0].kind else {
        panic!("expected method");
    };
    let body = total.body.as_ref().unwrap();
    assert!(matches!(body[1].kind, NodeKind::Foreach { .. }));
}
