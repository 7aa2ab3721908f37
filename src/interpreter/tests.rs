#![cfg(test)]

use crate::compiler::checker::tests::test_support::{Checked, check_source};
use crate::compiler::compiler_messages::compiler_errors::ErrorType;
use crate::interpreter::{Interpreter, Value};

fn eval_static(source: &str, class: &str, method: &str, args: Vec<Value>) -> Value {
    let checked = checked(source);
    let mut interpreter = Interpreter::new(
        &checked.registry,
        &checked.program,
        &checked.string_table,
    );
    interpreter
        .call_static_by_name(class, method, args)
        .expect("evaluation should succeed")
}

fn eval_static_error(source: &str, class: &str, method: &str) -> crate::compiler::compiler_messages::compiler_errors::CompileError {
    let checked = checked(source);
    let mut interpreter = Interpreter::new(
        &checked.registry,
        &checked.program,
        &checked.string_table,
    );
    interpreter
        .call_static_by_name(class, method, Vec::new())
        .expect_err("evaluation should fail")
}

fn checked(source: &str) -> Checked {
    let checked = check_source(source);
    checked.assert_clean();
    checked
}

fn as_int(value: Value) -> i32 {
    match value {
        Value::Int(v) => v,
        _ => panic!("expected an int result"),
    }
}

fn as_str(value: Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        _ => panic!("expected a string result"),
    }
}

#[test]
fn arithmetic_and_calls() {
    let result = eval_static(
        "class Math {
            static int Double(int x) {
                return x * 2;
            }
            static int Run() {
                return Double(4) + 10 % 3;
            }
        }",
        "Math",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 9);
}

#[test]
fn recursion_terminates() {
    let result = eval_static(
        "class Math {
            static int Factorial(int n) {
                if (n <= 1) {
                    return 1;
                }
                return n * Factorial(n - 1);
            }
        }",
        "Math",
        "Factorial",
        vec![Value::Int(6)],
    );
    assert_eq!(as_int(result), 720);
}

#[test]
fn virtual_dispatch_picks_the_runtime_class() {
    let result = eval_static(
        "abstract class Animal {
            abstract string Speak();
        }
        class Dog : Animal {
            override string Speak() { return \"woof\"; }
        }
        class Cat : Animal {
            override string Speak() { return \"meow\"; }
        }
        class App {
            static string Run() {
                Animal^ a = new Dog();
                Animal^ b = new Cat();
                return a.Speak() + b.Speak();
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_str(result), "woofmeow");
}

#[test]
fn fields_and_constructors() {
    let result = eval_static(
        "class Point {
            int x;
            int y;
            Point(int x, int y) {
                this.x = x;
                this.y = y;
            }
            Point() : this(3, 4) { }
        }
        class App {
            static int Run() {
                Point^ p = new Point();
                return p.x * 10 + p.y;
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 34);
}

#[test]
fn arrays_and_foreach() {
    let result = eval_static(
        "class App {
            static int Run() {
                int[]^ xs = new int[5];
                for (int i = 0; i < xs.Count; i++) {
                    xs[i] = i + 1;
                }
                int total = 0;
                foreach (int x in xs) {
                    total += x;
                }
                return total;
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 15);
}

#[test]
fn take_leaves_null_behind() {
    let result = eval_static(
        "class Node {
        }
        class Holder {
            Node^ held;
        }
        class App {
            static int Run() {
                Holder^ h = new Holder();
                h.held = new Node();
                Node^ grabbed = take h.held;
                if (h.held == null && grabbed != null) {
                    return 1;
                }
                return 0;
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 1);
}

#[test]
fn switch_selects_sections() {
    let result = eval_static(
        "class App {
            static int Pick(int x) {
                switch (x) {
                    case 1:
                        return 10;
                    case 2:
                        return 20;
                    default:
                        return 0;
                }
            }
            static int Run() {
                return Pick(1) + Pick(2) + Pick(9);
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 30);
}

#[test]
fn properties_and_indexers_dispatch() {
    let result = eval_static(
        "class Buffer {
            int stored;
            int Stored { get { return stored; } set { stored = value; } }
            int this[int i] { get { return i * 2; } }
        }
        class App {
            static int Run() {
                Buffer^ b = new Buffer();
                b.Stored = 7;
                return b.Stored + b[4];
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 15);
}

#[test]
fn string_length_and_index() {
    let result = eval_static(
        "class App {
            static int Run() {
                string s = \"opal\";
                if (s[0] == 'o') {
                    return s.Length;
                }
                return 0;
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 4);
}

#[test]
fn null_dereference_is_fatal() {
    let error = eval_static_error(
        "class Node {
            int value;
        }
        class App {
            static int Run() {
                Node n = null;
                return n.value;
            }
        }",
        "App",
        "Run",
    );
    assert_eq!(error.error_type, ErrorType::Eval);
    assert!(error.msg.contains("null dereference"));
}

#[test]
fn array_bounds_are_fatal() {
    let error = eval_static_error(
        "class App {
            static int Run() {
                int[]^ xs = new int[2];
                return xs[5];
            }
        }",
        "App",
        "Run",
    );
    assert!(error.msg.contains("out of range"));
}

#[test]
fn bad_downcast_is_fatal() {
    let error = eval_static_error(
        "class Animal {
        }
        class Dog : Animal {
        }
        class Cat : Animal {
        }
        class App {
            static int Run() {
                Animal^ a = new Cat();
                Animal borrowed = a;
                Dog d = (Dog)borrowed;
                return 1;
            }
        }",
        "App",
        "Run",
    );
    assert!(error.msg.contains("invalid cast"));
}

#[test]
fn boxing_round_trips_through_object() {
    let result = eval_static(
        "class App {
            static int Run() {
                Object o = (Object)42;
                return (int)o;
            }
        }",
        "App",
        "Run",
        Vec::new(),
    );
    assert_eq!(as_int(result), 42);
}
