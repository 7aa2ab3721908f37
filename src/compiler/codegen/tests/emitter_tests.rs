#![cfg(test)]

use crate::compiler::analysis::refcount;
use crate::compiler::checker::tests::test_support::{Checked, check_source};
use crate::compiler::codegen::emit_program;
use crate::settings::Config;

fn emit(source: &str) -> String {
    emit_with(source, Config::default())
}

fn emit_with(source: &str, config: Config) -> String {
    let mut checked = check_source(source);
    checked.assert_clean();
    refcount::run(
        &checked.registry,
        &mut checked.program,
        config.pessimistic_refcounts,
    );
    emit_program(
        &checked.registry,
        &checked.program,
        &checked.string_table,
        &config,
    )
}

fn assert_ordered(haystack: &str, needles: &[&str]) {
    let mut from = 0;
    for needle in needles {
        match haystack[from..].find(needle) {
            Some(at) => from += at + needle.len(),
            None => panic!("expected {needle:?} (in order) in:\n{haystack}"),
        }
    }
}

const HELLO: &str = "class App {
    static void Main() {
        Print(\"hello, world\\n\");
    }
}";

#[test]
fn hello_world_has_entry_point_and_print() {
    let out = emit(HELLO);
    assert!(out.contains("int main(int argc, char** argv)"));
    assert!(out.contains("App::Main();"));
    assert!(out.contains("opal::Print(opal::Str(u\"hello, world\\n\"))"));
    assert!(out.contains("#include \"opal_runtime.h\""));
}

#[test]
fn forward_decls_come_before_class_decls() {
    let out = emit(HELLO);
    assert_ordered(&out, &["class App;", "class App :", "void App::Main()"]);
}

#[test]
fn parent_is_declared_before_child() {
    let out = emit(
        "class Animal {
            int age;
        }
        class Dog : Animal {
            int bones;
        }
        class App {
            static void Main() { }
        }",
    );
    assert_ordered(&out, &["class Animal :", "class Dog : public Animal"]);
}

#[test]
fn owning_field_uses_the_owning_handle() {
    let out = emit(
        "class Node {
            Node^ next;
            int value;
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("opal::Own<Node> next;"));
    assert!(out.contains("int value;"));
}

#[test]
fn string_field_uses_the_counted_string() {
    let out = emit(
        "class Tag {
            string label;
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("opal::Str label;"));
}

#[test]
fn plain_reference_field_is_a_raw_pointer() {
    let out = emit(
        "class Node {
            Node next;
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("Node* next;"));
}

#[test]
fn virtual_destructor_only_when_needed() {
    let quiet = emit(
        "class Plain {
            int x;
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(!quiet.contains("virtual ~Plain()"));

    // An explicit downcast forces RTTI on the source class.
    let cast = emit(
        "class Animal {
        }
        class Dog : Animal {
        }
        class App {
            static void Main() { }
            void Run(Animal a) {
                Dog d = (Dog)a;
                Print(1);
            }
        }",
    );
    assert!(cast.contains("virtual ~Animal()"));
}

#[test]
fn multiple_constructors_emit_init() {
    let out = emit(
        "class Point {
            int x;
            Point() { x = 0; }
            Point(int start) { x = start; }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("void _Init();"));
    assert!(out.contains("void Point::_Init()"));
    assert!(out.contains("_Init();"));
}

#[test]
fn single_constructor_has_no_init() {
    let out = emit(
        "class Point {
            int x;
            Point(int start) { x = start; }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(!out.contains("_Init"));
}

#[test]
fn this_delegation_emits_construct_forwarder() {
    let out = emit(
        "class Point {
            int x;
            Point(int start) { x = start; }
            Point() : this(0) { }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("void _Construct(int start);"));
    assert!(out.contains("void Point::_Construct("));
    assert!(out.contains("_Construct(0)"));
}

#[test]
fn pool_allocation_emits_two_pass_hooks() {
    let out = emit(
        "class Item {
            int value;
        }
        class App {
            static void Main() {
                Pool^ p = new Pool();
                Item i = new(p) Item();
                Print(i.value);
            }
        }",
    );
    assert!(out.contains("static void _DestroyFirst(void* obj);"));
    assert!(out.contains("void Item::_DestroyFirst(void* obj)"));
    assert!(out.contains("opal::StashVTable"));
    assert!(out.contains("opal::RestoreVTable"));
    assert!(out.contains("->Place(sizeof(Item), &Item::_DestroyFirst, &Item::_DestroySecond)"));
}

#[test]
fn pessimistic_mode_spills_locals_into_counted_handles() {
    let source = "class Node {
        int value;
    }
    class App {
        static void Main() {
            Node n = null;
            Print(1);
        }
    }";

    let precise = emit(source);
    assert!(precise.contains("Node* n = "));

    let mut config = Config::default();
    config.pessimistic_refcounts = true;
    let pessimistic = emit_with(source, config);
    assert!(pessimistic.contains("opal::Ptr<Node> n = "));
}

#[test]
fn unsafe_mode_clears_the_safety_macro() {
    let safe = emit(HELLO);
    assert!(safe.contains("#define OPAL_SAFE 1"));

    let mut config = Config::default();
    config.unsafe_mode = true;
    let unsafe_out = emit_with(HELLO, config);
    assert!(unsafe_out.contains("#define OPAL_SAFE 0"));
}

#[test]
fn take_lowered_to_handle_take() {
    let out = emit(
        "class Node {
        }
        class Holder {
            Node^ held;
            Node^ Give() {
                return take held;
            }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("this->held.Take()"));
    // Ownership returns as a raw pointer.
    assert!(out.contains("Node* Holder::Give()"));
}

#[test]
fn owned_local_moved_into_owning_storage_takes() {
    let out = emit(
        "class Node {
        }
        class App {
            static void Main() {
                Node^ a = new Node();
                Node^ b = a;
            }
        }",
    );
    assert!(out.contains("opal::Own<Node> b = a.Take();"));
}

#[test]
fn foreach_lowers_to_an_indexed_loop() {
    let out = emit(
        "class App {
            static int Total(int[] xs) {
                int total = 0;
                foreach (int x in xs) {
                    total += x;
                }
                return total;
            }
            static void Main() { }
        }",
    );
    assert_ordered(
        &out,
        &["opal::Array<int>* __c", "for (int __i", "->Count()", "->At(__i"],
    );
}

#[test]
fn switch_keeps_break_and_continue_semantics() {
    let out = emit(
        "class App {
            static void Main() {
                for (int i = 0; i < 3; i++) {
                    switch (i) {
                        case 0:
                            continue;
                        default:
                            break;
                    }
                }
            }
        }",
    );
    assert!(out.contains("switch (0) { default: {"));
    assert!(out.contains("__s == (0)"));
    assert!(out.contains("continue;"));
}

#[test]
fn virtual_methods_declare_and_override() {
    let out = emit(
        "abstract class Animal {
            abstract string Speak();
        }
        class Dog : Animal {
            override string Speak() { return \"woof\"; }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("virtual opal::Str Speak() = 0;"));
    assert!(out.contains("opal::Str Speak() override;"));
    assert!(out.contains("opal::Str Dog::Speak()"));
}

#[test]
fn properties_become_accessor_methods() {
    let out = emit(
        "class Buffer {
            int count;
            int Count { get { return count; } }
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("int get_Count();"));
    assert!(out.contains("int Buffer::get_Count()"));
}

#[test]
fn static_fields_get_out_of_line_definitions() {
    let out = emit(
        "class Counter {
            static int total = 5;
        }
        class App {
            static void Main() { }
        }",
    );
    assert!(out.contains("static int total;"));
    assert!(out.contains("int Counter::total = 5;"));
}

#[test]
fn discarded_owning_result_is_pinned_for_the_statement() {
    let out = emit(
        "class Node {
        }
        class App {
            static Node^ Make() {
                return new Node();
            }
            static void Main() {
                Make();
            }
        }",
    );
    // The bare call's owning result must still be destroyed at the end
    // of the statement.
    assert!(out.contains("opal::Own<Node>(App::Make());"));
}
