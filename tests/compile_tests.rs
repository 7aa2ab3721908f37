//! End-to-end driver tests: real files in, generated C++ out.

use opal::build;
use opal::settings::Config;
use std::fs;
use std::path::PathBuf;

fn build_to_cpp(dir: &tempfile::TempDir, name: &str, source: &str) -> PathBuf {
    let source_path = dir.path().join(format!("{name}.opl"));
    fs::write(&source_path, source).unwrap();

    let mut config = Config::default();
    config.compile_native = true;
    config.stop_after_emit = true;
    config.source_files.push(source_path);
    build::build(config);

    dir.path().join(format!("{name}.cpp"))
}

#[test]
fn hello_world_emits_a_translation_unit() {
    let dir = tempfile::tempdir().unwrap();
    let cpp = build_to_cpp(
        &dir,
        "hello",
        "class App {
            static void Main() {
                Print(\"hello, world\\n\");
            }
        }",
    );

    let generated = fs::read_to_string(&cpp).expect("compiler should write hello.cpp");
    assert!(generated.contains("int main(int argc, char** argv)"));
    assert!(generated.contains("opal::Print(opal::Str(u\"hello, world\\n\"))"));

    // The bundled runtime header lands next to the unit.
    let header = dir.path().join("opal_runtime.h");
    let runtime = fs::read_to_string(&header).expect("runtime header should be written");
    assert!(runtime.contains("namespace opal"));
    assert!(runtime.contains("class Pool"));
}

#[test]
fn programs_with_errors_emit_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cpp = build_to_cpp(
        &dir,
        "broken",
        "class App {
            static void Main() {
                int x;
                Print(x);
            }
        }",
    );

    assert!(!cpp.exists(), "no C++ should be written for a broken program");
}

#[test]
fn output_name_flag_controls_the_basename() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("prog.opl");
    fs::write(
        &source_path,
        "class App {
            static void Main() {
                Print(1);
            }
        }",
    )
    .unwrap();

    let mut config = Config::default();
    config.compile_native = true;
    config.stop_after_emit = true;
    config.output_name = Some("renamed".to_string());
    config.source_files.push(source_path);
    build::build(config);

    assert!(dir.path().join("renamed.cpp").exists());
}

#[test]
fn project_file_sets_the_output_name() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("opal.toml"), "output = \"fromtoml\"\n").unwrap();
    let source_path = dir.path().join("prog.opl");
    fs::write(
        &source_path,
        "class App {
            static void Main() {
                Print(1);
            }
        }",
    )
    .unwrap();

    let mut config = Config::default();
    config.compile_native = true;
    config.stop_after_emit = true;
    config.source_files.push(source_path);
    build::build(config);

    assert!(dir.path().join("fromtoml.cpp").exists());
}

#[test]
fn linked_list_program_compiles_to_cpp() {
    let dir = tempfile::tempdir().unwrap();
    let cpp = build_to_cpp(
        &dir,
        "list",
        "class Node {
            int value;
            Node^ next;

            Node(int value) {
                this.value = value;
            }
        }
        class App {
            static void Main() {
                Node^ head = null;
                for (int i = 0; i < 10; i++) {
                    Node^ fresh = new Node(i);
                    fresh.next = take head;
                    head = fresh;
                }

                int total = 0;
                Node walk = head;
                while (walk != null) {
                    total += walk.value;
                    walk = walk.next;
                }
                Print(total);
            }
        }",
    );

    let generated = fs::read_to_string(&cpp).unwrap();
    assert!(generated.contains("opal::Own<Node> next;"));
    assert!(generated.contains("opal::Own<Node> head = 0;"));
    assert!(generated.contains(".Take()"));
}
