#![cfg(test)]

use crate::compiler::checker::tests::test_support::check_source;
use crate::compiler::datatypes::DataType;

#[test]
fn well_typed_program_checks_clean() {
    let checked = check_source(
        "class Node {
            int value;
            Node^ next;

            Node(int value) {
                this.value = value;
            }

            int Sum() {
                int total = value;
                Node n = next;
                while (n != null) {
                    total += n.value;
                    n = n.next;
                }
                return total;
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn undefined_name_is_reported() {
    let checked = check_source(
        "class App {
            void Run() {
                Print(missing);
            }
        }",
    );
    checked.assert_error_containing("Undefined name 'missing'");
}

#[test]
fn type_mismatch_is_reported() {
    let checked = check_source(
        "class App {
            void Run() {
                int x = \"hello\";
            }
        }",
    );
    checked.assert_error_containing("can't convert string to int");
}

#[test]
fn void_method_cannot_return_a_value() {
    let checked = check_source(
        "class App {
            void Run() {
                return 1;
            }
        }",
    );
    checked.assert_error_containing("void method can't return a value");
}

#[test]
fn missing_return_path_is_reported() {
    let checked = check_source(
        "class App {
            int Pick(bool flag) {
                if (flag) {
                    return 1;
                }
            }
        }",
    );
    checked.assert_error_containing("Not all code paths return a value");
}

#[test]
fn both_branches_returning_is_fine() {
    let checked = check_source(
        "class App {
            int Pick(bool flag) {
                if (flag) {
                    return 1;
                } else {
                    return 2;
                }
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn switch_sections_must_terminate() {
    let checked = check_source(
        "class App {
            void Run(int x) {
                switch (x) {
                    case 0:
                        Print(0);
                    default:
                        break;
                }
            }
        }",
    );
    checked.assert_error_containing("Switch section must end");
}

#[test]
fn break_outside_loop_is_reported() {
    let checked = check_source(
        "class App {
            void Run() {
                break;
            }
        }",
    );
    checked.assert_error_containing("'break' outside");
}

#[test]
fn concrete_class_must_override_abstract_methods() {
    let checked = check_source(
        "abstract class Animal {
            abstract string Speak();
        }
        class Rock : Animal {
        }",
    );
    checked.assert_error_containing("must override abstract method 'Speak'");
}

#[test]
fn override_satisfies_abstract_method() {
    let checked = check_source(
        "abstract class Animal {
            abstract string Speak();
        }
        class Dog : Animal {
            override string Speak() { return \"woof\"; }
        }",
    );
    checked.assert_clean();
}

#[test]
fn this_is_rejected_in_static_methods() {
    let checked = check_source(
        "class App {
            int value;
            static void Main() {
                Print(this.value);
            }
        }",
    );
    checked.assert_error_containing("'this' is not available in a static method");
}

#[test]
fn owning_marker_rejected_on_ref_param() {
    let checked = check_source(
        "class Node {
            void Swap(ref Node^ other) {
            }
        }",
    );
    checked.assert_error_containing("ref and out parameters can't have an owning type");
}

#[test]
fn moving_a_field_needs_take() {
    let checked = check_source(
        "class Holder {
            Node^ held;
            Node^ Give() {
                return held;
            }
        }
        class Node {
        }",
    );
    checked.assert_error_containing("use 'take'");
}

#[test]
fn taking_a_field_is_fine() {
    let checked = check_source(
        "class Holder {
            Node^ held;
            Node^ Give() {
                return take held;
            }
        }
        class Node {
        }",
    );
    checked.assert_clean();
}

#[test]
fn entry_point_is_discovered() {
    let checked = check_source(
        "class App {
            static void Main() {
                Print(\"hi\");
            }
        }",
    );
    checked.assert_clean();
    assert!(checked.program.entry.is_some());
    assert!(!checked.program.entry_takes_args);
}

#[test]
fn entry_point_with_args_is_discovered() {
    let checked = check_source(
        "class App {
            static void Main(string[] args) {
                Print(args.Count);
            }
        }",
    );
    checked.assert_clean();
    assert!(checked.program.entry_takes_args);
}

#[test]
fn property_access_calls_the_getter() {
    let checked = check_source(
        "class Buffer {
            int count;
            int Count { get { return count; } }
            int Probe() {
                return Count;
            }
        }",
    );
    checked.assert_clean();

    let probe = checked.method("Buffer", "Probe");
    assert!(
        !probe.calls_out.is_empty(),
        "property read should register a call"
    );
}

#[test]
fn foreach_over_int_array_types_the_element() {
    let checked = check_source(
        "class App {
            int Total(int[] xs) {
                int total = 0;
                foreach (int x in xs) {
                    total += x;
                }
                return total;
            }
        }",
    );
    checked.assert_clean();

    let total = checked.method("App", "Total");
    // params: xs; then total; foreach adds hidden collection, hidden
    // index, and the iteration variable.
    assert!(total.locals.len() >= 5);
}

#[test]
fn pool_allocation_is_not_owning() {
    let checked = check_source(
        "class Item {
        }
        class App {
            void Run() {
                Pool^ p = new Pool();
                Item i = new(p) Item();
                Print(1);
            }
        }",
    );
    checked.assert_clean();

    let run = checked.method("App", "Run");
    let item_local = run
        .locals
        .iter()
        .find(|l| checked.string_table.resolve(l.name) == "i")
        .expect("local i");
    assert!(matches!(item_local.data_type, DataType::Class(_)));
}

#[test]
fn pool_allocation_marks_the_class() {
    let checked = check_source(
        "class Item {
        }
        class App {
            void Run() {
                Pool^ p = new Pool();
                Item i = new(p) Item();
                Print(1);
            }
        }",
    );

    let item_class = checked
        .registry
        .class_by_name(checked.string_table.get_existing("Item").unwrap())
        .unwrap();
    assert!(checked.registry.class(item_class).pool_destroy_needed);
    assert!(checked.registry.class(item_class).virtual_needed);
}

#[test]
fn explicit_downcast_marks_source_virtual() {
    let checked = check_source(
        "class Animal {
        }
        class Dog : Animal {
        }
        class App {
            void Run(Animal a) {
                Dog d = (Dog)a;
                Print(1);
            }
        }",
    );
    checked.assert_clean();

    let animal = checked
        .registry
        .class_by_name(checked.string_table.get_existing("Animal").unwrap())
        .unwrap();
    assert!(checked.registry.class(animal).virtual_needed);
}

#[test]
fn unused_variable_warns() {
    use crate::compiler::compiler_messages::compiler_warnings::WarningKind;

    let checked = check_source(
        "class App {
            void Run() {
                int leftover = 3;
            }
        }",
    );
    checked.assert_clean();
    assert!(
        checked
            .messages
            .warnings
            .iter()
            .any(|w| w.warning_kind == WarningKind::UnusedVariable && w.msg == "leftover"),
        "expected an unused-variable warning"
    );
}
