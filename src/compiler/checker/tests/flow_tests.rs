#![cfg(test)]

use crate::compiler::checker::tests::test_support::check_source;

#[test]
fn use_before_init_is_reported_at_the_use() {
    let checked = check_source(
        "class App {
            void Run() {
                int x;
                Print(x);
            }
        }",
    );
    checked.assert_error_containing("may be used before it is assigned");

    let error = checked
        .messages
        .errors
        .iter()
        .find(|e| e.msg.contains("may be used before"))
        .unwrap();
    assert_eq!(error.location.start_pos.line_number, 4);
}

#[test]
fn assignment_before_use_is_fine() {
    let checked = check_source(
        "class App {
            void Run() {
                int x;
                x = 3;
                Print(x);
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn assignment_on_one_branch_only_is_rejected() {
    let checked = check_source(
        "class App {
            void Run(bool flag) {
                int x;
                if (flag) {
                    x = 1;
                }
                Print(x);
            }
        }",
    );
    checked.assert_error_containing("may be used before it is assigned");
}

#[test]
fn assignment_on_both_branches_is_accepted() {
    let checked = check_source(
        "class App {
            void Run(bool flag) {
                int x;
                if (flag) {
                    x = 1;
                } else {
                    x = 2;
                }
                Print(x);
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn loop_body_assignment_does_not_count() {
    let checked = check_source(
        "class App {
            void Run(int n) {
                int x;
                while (n > 0) {
                    x = n;
                    n--;
                }
                Print(x);
            }
        }",
    );
    checked.assert_error_containing("may be used before it is assigned");
}

#[test]
fn parameters_arrive_assigned() {
    let checked = check_source(
        "class App {
            void Run(int x) {
                Print(x);
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn out_parameter_must_be_assigned_on_every_path() {
    let checked = check_source(
        "class App {
            void Split(bool flag, out int result) {
                if (flag) {
                    result = 1;
                }
            }
        }",
    );
    checked.assert_error_containing("may be used before it is assigned");
}

#[test]
fn out_parameter_assigned_everywhere_is_accepted() {
    let checked = check_source(
        "class App {
            void Split(bool flag, out int result) {
                if (flag) {
                    result = 1;
                } else {
                    result = 2;
                }
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn second_take_of_a_local_is_rejected() {
    let checked = check_source(
        "class Node {
        }
        class App {
            void Run() {
                Node^ a = new Node();
                Node^ b = take a;
                Node^ c = take a;
            }
        }",
    );
    checked.assert_error_containing("can't transfer ownership");
}

#[test]
fn use_after_implicit_move_is_rejected() {
    let checked = check_source(
        "class Node {
            int value;
        }
        class App {
            void Run() {
                Node^ a = new Node();
                Node^ b = a;
                Print(a.value);
            }
        }",
    );
    checked.assert_error_containing("can't transfer ownership");
}

#[test]
fn second_take_of_a_field_is_rejected() {
    let checked = check_source(
        "class Node {
        }
        class Holder {
            Node^ held;
            void Drain() {
                Node^ a = take held;
                Node^ b = take held;
            }
        }",
    );
    checked.assert_error_containing("may already have been moved");
}

#[test]
fn take_after_refill_is_accepted() {
    let checked = check_source(
        "class Node {
        }
        class Holder {
            Node^ held;
            void Cycle() {
                Node^ a = take held;
                held = new Node();
                Node^ b = take held;
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn take_on_separate_branches_is_accepted() {
    let checked = check_source(
        "class Node {
        }
        class Holder {
            Node^ held;
            void Either(bool flag) {
                if (flag) {
                    Node^ a = take held;
                } else {
                    Node^ b = take held;
                }
            }
        }",
    );
    checked.assert_clean();
}

#[test]
fn code_after_return_stays_silent() {
    // Nodes appended while unreachable never connect to the entry, so
    // the walk finds no path that misses the assignment.
    let checked = check_source(
        "class App {
            int Run() {
                return 1;
            }
        }",
    );
    checked.assert_clean();
}
