#![cfg(test)]

use crate::compiler::analysis::destroy_sets::{DestroyAnalysis, TypeSet};
use crate::compiler::checker::tests::test_support::{Checked, check_source};
use crate::compiler::registry::{ClassId, ClassRegistry};
use crate::compiler::string_interning::StringTable;
use proptest::prelude::*;

fn class_id(checked: &Checked, name: &str) -> ClassId {
    checked
        .registry
        .class_by_name(checked.string_table.get_existing(name).unwrap())
        .unwrap()
}

// ------------------------------------------------------------------
//  TypeSet
// ------------------------------------------------------------------

fn hierarchy() -> (ClassRegistry, StringTable, ClassId, ClassId, ClassId) {
    let mut table = StringTable::new();
    let mut registry = ClassRegistry::with_builtins(&mut table);
    let animal = registry.declare_test_class("Animal", None, &mut table);
    let dog = registry.declare_test_class("Dog", Some(animal), &mut table);
    let cat = registry.declare_test_class("Cat", Some(animal), &mut table);
    (registry, table, animal, dog, cat)
}

#[test]
fn inserting_a_subtype_of_a_present_element_is_a_noop() {
    let (registry, _, animal, dog, _) = hierarchy();
    let mut set = TypeSet::new();
    set.insert(&registry, animal);
    set.insert(&registry, dog);
    assert_eq!(set.len(), 1);
    assert!(set.iter().any(|c| c == animal));
}

#[test]
fn inserting_a_supertype_absorbs_subtypes() {
    let (registry, _, animal, dog, cat) = hierarchy();
    let mut set = TypeSet::new();
    set.insert(&registry, dog);
    set.insert(&registry, cat);
    assert_eq!(set.len(), 2);

    set.insert(&registry, animal);
    assert_eq!(set.len(), 1);
    assert!(set.iter().any(|c| c == animal));
}

#[test]
fn root_object_absorbs_everything() {
    let (registry, _, animal, dog, _) = hierarchy();
    let mut set = TypeSet::new();
    set.insert(&registry, dog);
    set.insert(&registry, animal);
    set.insert(&registry, registry.object_class);
    assert_eq!(set.len(), 1);
    assert!(set.contains_root(&registry));
}

#[test]
fn may_destroy_relates_both_directions() {
    let (registry, _, animal, dog, cat) = hierarchy();
    let mut set = TypeSet::new();
    set.insert(&registry, dog);

    // Destroying a Dog may destroy something typed Animal, and
    // destroying an Animal may turn out to be a Dog.
    assert!(set.may_destroy(&registry, animal));
    assert!(set.may_destroy(&registry, dog));
    assert!(!set.may_destroy(&registry, cat));
}

proptest! {
    /// After any insertion sequence the set stays prefix-free: no
    /// element is a strict subtype of another.
    #[test]
    fn type_set_stays_prefix_free(inserts in proptest::collection::vec(0usize..5, 0..20)) {
        let (registry, _, animal, dog, cat) = hierarchy();
        let universe = [registry.object_class, animal, dog, cat, registry.array_class];

        let mut set = TypeSet::new();
        for idx in inserts {
            set.insert(&registry, universe[idx]);
        }

        let items: Vec<ClassId> = set.iter().collect();
        for &a in &items {
            for &b in &items {
                if a == b {
                    continue;
                }
                prop_assert!(
                    !registry.is_subtype(
                        &crate::compiler::datatypes::DataType::Class(a),
                        &crate::compiler::datatypes::DataType::Class(b),
                    ),
                    "set kept related elements"
                );
            }
        }
    }

    /// Union only grows membership (monotonicity).
    #[test]
    fn union_is_monotone(left in proptest::collection::vec(0usize..5, 0..10),
                         right in proptest::collection::vec(0usize..5, 0..10)) {
        let (registry, _, animal, dog, cat) = hierarchy();
        let universe = [registry.object_class, animal, dog, cat, registry.array_class];

        let mut a = TypeSet::new();
        for idx in &left {
            a.insert(&registry, universe[*idx]);
        }
        let mut b = TypeSet::new();
        for idx in &right {
            b.insert(&registry, universe[*idx]);
        }

        let mut merged = a.clone();
        merged.union(&registry, &b);

        for class in a.iter().chain(b.iter()) {
            prop_assert!(merged.may_destroy(&registry, class));
        }
    }
}

// ------------------------------------------------------------------
//  Destruction sets over programs
// ------------------------------------------------------------------

#[test]
fn type_destroys_follows_owned_fields() {
    let checked = check_source(
        "class Leaf {
        }
        class Tree {
            Leaf^ left;
        }
        class App {
            static void Main() { }
        }",
    );
    checked.assert_clean();

    let tree = class_id(&checked, "Tree");
    let leaf = class_id(&checked, "Leaf");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);

    let set = analysis.type_destroys(tree);
    assert!(set.may_destroy(&checked.registry, tree));
    assert!(set.may_destroy(&checked.registry, leaf));
}

#[test]
fn type_destroys_ignores_borrowed_fields() {
    let checked = check_source(
        "class Leaf {
        }
        class Tree {
            Leaf left;
        }
        class App {
            static void Main() { }
        }",
    );
    checked.assert_clean();

    let tree = class_id(&checked, "Tree");
    let leaf = class_id(&checked, "Leaf");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);

    let set = analysis.type_destroys(tree);
    assert!(!set.may_destroy(&checked.registry, leaf));
}

#[test]
fn type_destroys_includes_subclasses() {
    let checked = check_source(
        "class Leaf {
        }
        class Animal {
        }
        class Dog : Animal {
            Leaf^ bone;
        }
        class App {
            static void Main() { }
        }",
    );
    checked.assert_clean();

    let animal = class_id(&checked, "Animal");
    let leaf = class_id(&checked, "Leaf");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);

    // A destructor call on Animal may dispatch to Dog.
    let set = analysis.type_destroys(animal);
    assert!(set.may_destroy(&checked.registry, leaf));
}

#[test]
fn self_referential_class_terminates() {
    let checked = check_source(
        "class Node {
            Node^ next;
        }
        class App {
            static void Main() { }
        }",
    );
    checked.assert_clean();

    let node = class_id(&checked, "Node");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);
    let set = analysis.type_destroys(node);
    assert!(set.may_destroy(&checked.registry, node));
}

#[test]
fn method_destroys_sees_scope_ends() {
    let checked = check_source(
        "class Node {
        }
        class App {
            void Run() {
                Node^ n = new Node();
                Print(1);
            }
        }",
    );
    checked.assert_clean();

    let node = class_id(&checked, "Node");
    let run = checked.method("App", "Run");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);
    let set = analysis.method_destroys(run.key);
    assert!(set.may_destroy(&checked.registry, node));
}

#[test]
fn method_destroys_expands_virtual_overrides() {
    let checked = check_source(
        "class Leaf {
        }
        class Animal {
            virtual void Act() { }
        }
        class Dog : Animal {
            override void Act() {
                Leaf^ l = new Leaf();
            }
        }
        class App {
            void Run(Animal a) {
                a.Act();
            }
        }",
    );
    checked.assert_clean();

    let leaf = class_id(&checked, "Leaf");
    let run = checked.method("App", "Run");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);

    // Run calls Animal.Act, which may dispatch to Dog.Act, which
    // destroys a Leaf.
    let set = analysis.method_destroys(run.key);
    assert!(set.may_destroy(&checked.registry, leaf));
}

#[test]
fn method_destroys_is_empty_for_pure_arithmetic() {
    let checked = check_source(
        "class App {
            int Add(int a, int b) {
                return a + b;
            }
        }",
    );
    checked.assert_clean();

    let add = checked.method("App", "Add");
    let mut analysis = DestroyAnalysis::new(&checked.registry, &checked.program);
    assert!(analysis.method_destroys(add.key).is_empty());
}

// ------------------------------------------------------------------
//  Ref-count necessity
// ------------------------------------------------------------------

fn needs_ref(checked: &Checked, class: &str, method: &str, local: &str) -> bool {
    let method = checked.method(class, method);
    method
        .locals
        .iter()
        .find(|l| checked.string_table.resolve(l.name) == local)
        .unwrap_or_else(|| panic!("no local {local}"))
        .needs_ref
}

fn analyzed(source: &str, pessimistic: bool) -> Checked {
    let mut checked = check_source(source);
    checked.assert_clean();
    crate::compiler::analysis::refcount::run(&checked.registry, &mut checked.program, pessimistic);
    checked
}

#[test]
fn quiet_local_needs_no_refcount() {
    let checked = analyzed(
        "class Node {
            int value;
        }
        class App {
            int Run() {
                Node^ n = new Node();
                return n.value;
            }
        }",
        false,
    );
    assert!(!needs_ref(&checked, "App", "Run", "n"));
}

#[test]
fn local_destroyed_by_a_callee_needs_refcount() {
    let checked = analyzed(
        "class Node {
            int value;
        }
        class App {
            Node^ held;
            void Clear() {
                held = null;
            }
            int Run(Node n) {
                Clear();
                return n.value;
            }
        }",
        false,
    );

    // Clear() overwrites an owning Node field, so the borrowed n could
    // die while Run still needs it.
    assert!(needs_ref(&checked, "App", "Run", "n"));
}

#[test]
fn pessimistic_mode_flags_every_reference_local() {
    let checked = analyzed(
        "class Node {
            int value;
        }
        class App {
            int Run() {
                Node^ n = new Node();
                return n.value;
            }
        }",
        true,
    );
    assert!(needs_ref(&checked, "App", "Run", "n"));
}

#[test]
fn minimality_default_flags_are_a_subset_of_pessimistic() {
    let source = "class Node {
            int value;
        }
        class App {
            Node^ held;
            void Clear() {
                held = null;
            }
            int Run(Node n) {
                Node^ quiet = new Node();
                Clear();
                return n.value + quiet.value;
            }
        }";

    let precise = analyzed(source, false);
    let pessimistic = analyzed(source, true);

    let precise_run = precise.method("App", "Run");
    let pessimistic_run = pessimistic.method("App", "Run");
    for (a, b) in precise_run.locals.iter().zip(&pessimistic_run.locals) {
        if a.needs_ref {
            assert!(b.needs_ref, "pessimistic mode must cover the precise flags");
        }
    }
}

#[test]
fn object_locals_are_always_flagged() {
    let checked = analyzed(
        "class App {
            void Run(Object o) {
                Print(1);
            }
        }",
        false,
    );
    assert!(needs_ref(&checked, "App", "Run", "o"));
}
