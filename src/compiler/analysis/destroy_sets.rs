//! Destruction sets.
//!
//! For every concrete class: the set of class types destroying one
//! instance may reach. For every method: the set of class types its
//! execution may destroy, through its own scope ends and temporaries,
//! its callees, and every override of those callees.
//!
//! Sets are prefix-free under subtyping: inserting a supertype absorbs
//! its subtypes, inserting a subtype of a present element is a no-op.
//! Once a set holds the root object class it can't grow, so searches
//! prune there.

use crate::compiler::cfg::NodeEffect;
use crate::compiler::checker::CheckedProgram;
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{ClassId, ClassRegistry, MethodKey};
use crate::compiler::string_interning::StringTable;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSet {
    items: Vec<ClassId>,
}

impl TypeSet {
    pub fn new() -> Self {
        TypeSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.items.iter().copied()
    }

    /// Prefix-free insert: subsumed by an existing supertype means
    /// no-op, and a new supertype absorbs existing subtypes.
    pub fn insert(&mut self, registry: &ClassRegistry, class: ClassId) {
        let candidate = DataType::Class(class);

        for &existing in &self.items {
            if registry.is_subtype(&candidate, &DataType::Class(existing)) {
                return;
            }
        }

        self.items
            .retain(|&existing| !registry.is_subtype(&DataType::Class(existing), &candidate));
        self.items.push(class);
    }

    pub fn union(&mut self, registry: &ClassRegistry, other: &TypeSet) {
        for class in other.iter() {
            self.insert(registry, class);
        }
    }

    pub fn contains_root(&self, registry: &ClassRegistry) -> bool {
        self.items.contains(&registry.object_class)
    }

    /// Whether destroying something in this set can touch an instance
    /// statically typed as `class`: related in either direction.
    pub fn may_destroy(&self, registry: &ClassRegistry, class: ClassId) -> bool {
        let target = DataType::Class(class);
        self.items.iter().any(|&existing| {
            let existing = DataType::Class(existing);
            registry.is_subtype(&existing, &target) || registry.is_subtype(&target, &existing)
        })
    }

    pub fn display(&self, registry: &ClassRegistry, string_table: &StringTable) -> Vec<String> {
        let mut names: Vec<String> = self
            .items
            .iter()
            .map(|&id| registry.class_name(id, string_table).to_string())
            .collect();
        names.sort();
        names
    }
}

/// Memoized fixed-point queries over the class graph and call graph.
/// Lazy: nothing is computed until the ref-count analysis or the
/// `-typeset` dump asks.
pub struct DestroyAnalysis<'a> {
    registry: &'a ClassRegistry,
    program: &'a CheckedProgram,
    type_memo: FxHashMap<ClassId, TypeSet>,
    method_memo: FxHashMap<MethodKey, TypeSet>,
}

impl<'a> DestroyAnalysis<'a> {
    pub fn new(registry: &'a ClassRegistry, program: &'a CheckedProgram) -> Self {
        DestroyAnalysis {
            registry,
            program,
            type_memo: FxHashMap::default(),
            method_memo: FxHashMap::default(),
        }
    }

    /// Everything destroying one instance of `class` may destroy.
    pub fn type_destroys(&mut self, class: ClassId) -> TypeSet {
        if let Some(memoized) = self.type_memo.get(&class) {
            return memoized.clone();
        }

        let mut set = TypeSet::new();
        let mut visited = FxHashSet::default();
        self.collect_type(class, &mut set, &mut visited);

        self.type_memo.insert(class, set.clone());
        set
    }

    fn collect_type(
        &mut self,
        class: ClassId,
        set: &mut TypeSet,
        visited: &mut FxHashSet<ClassId>,
    ) {
        if !visited.insert(class) || set.contains_root(self.registry) {
            return;
        }

        if let Some(memoized) = self.type_memo.get(&class) {
            let memoized = memoized.clone();
            set.union(self.registry, &memoized);
            return;
        }

        set.insert(self.registry, class);

        // A pool destroys whatever was allocated inside it; statically
        // that is anything.
        if class == self.registry.pool_class {
            set.insert(self.registry, self.registry.object_class);
            return;
        }

        // Owned fields of the class and all its ancestors.
        for ancestor in self.registry.ancestry(class) {
            let field_types: Vec<DataType> = self
                .registry
                .class(ancestor)
                .members
                .iter()
                .filter_map(|member| match &member.kind {
                    crate::compiler::registry::MemberKind::Field {
                        data_type,
                        is_static: false,
                        is_const: false,
                        ..
                    } => Some(data_type.clone()),
                    _ => None,
                })
                .collect();

            for field_type in field_types {
                self.collect_var(&field_type, set, visited);
            }
        }

        // A destructor call on `class` may dispatch to any subclass.
        for subclass in self.registry.class(class).subclasses.clone() {
            self.collect_type(subclass, set, visited);
        }
    }

    /// What destroying a variable of this declared type may destroy:
    /// the type-destroys of the base for owning types, nothing for
    /// borrowed references and values.
    fn collect_var(
        &mut self,
        data_type: &DataType,
        set: &mut TypeSet,
        visited: &mut FxHashSet<ClassId>,
    ) {
        let DataType::Owned(inner) = data_type else {
            return;
        };

        match inner.as_ref() {
            DataType::Class(class) => self.collect_type(*class, set, visited),
            DataType::Array(elem) => {
                self.collect_type(self.registry.array_class, set, visited);
                // Owned elements die with the array.
                self.collect_var(elem, set, visited);
            }
            _ => {}
        }
    }

    /// Everything `key`'s execution may destroy.
    pub fn method_destroys(&mut self, key: MethodKey) -> TypeSet {
        if let Some(memoized) = self.method_memo.get(&key) {
            return memoized.clone();
        }

        let mut set = TypeSet::new();
        let mut visited = FxHashSet::default();
        self.collect_method(key, &mut set, &mut visited);

        self.method_memo.insert(key, set.clone());
        set
    }

    fn collect_method(
        &mut self,
        key: MethodKey,
        set: &mut TypeSet,
        visited: &mut FxHashSet<MethodKey>,
    ) {
        if !visited.insert(key) || set.contains_root(self.registry) {
            return;
        }

        if let Some(memoized) = self.method_memo.get(&key) {
            let memoized = memoized.clone();
            set.union(self.registry, &memoized);
            return;
        }

        let Some(method) = self.program.method(key) else {
            // Extern and abstract members have no body here; their
            // overrides are expanded at the call sites below.
            return;
        };

        // Scope ends, overwrites and statement temporaries.
        let mut type_visited = FxHashSet::default();
        for idx in 0..method.graph.len() {
            let id = crate::compiler::cfg::FlowId(idx as u32);
            for destroyed in method.graph.effect(id).destroys.clone() {
                self.collect_var(&destroyed, set, &mut type_visited);
                if set.contains_root(self.registry) {
                    return;
                }
            }
        }

        // Direct callees plus every override virtual dispatch could
        // reach.
        let mut callees: Vec<MethodKey> = method.calls_out.clone();
        let mut expanded: FxHashSet<MethodKey> = FxHashSet::default();
        while let Some(callee) = callees.pop() {
            if !expanded.insert(callee) {
                continue;
            }
            self.collect_method(callee, set, visited);
            if set.contains_root(self.registry) {
                return;
            }
            if let Some(overrides) = self.program.overrides_of.get(&callee) {
                callees.extend(overrides.iter().copied());
            }
        }
    }

    /// What a call site may destroy: the declared callee plus every
    /// override virtual dispatch could land on.
    pub fn call_destroys(&mut self, callee: MethodKey) -> TypeSet {
        let mut result = self.method_destroys(callee);

        let mut stack: Vec<MethodKey> = self
            .program
            .overrides_of
            .get(&callee)
            .cloned()
            .unwrap_or_default();
        let mut seen: FxHashSet<MethodKey> = FxHashSet::default();

        while let Some(key) = stack.pop() {
            if result.contains_root(self.registry) {
                break;
            }
            if !seen.insert(key) {
                continue;
            }
            let destroyed = self.method_destroys(key);
            result.union(self.registry, &destroyed);
            if let Some(overrides) = self.program.overrides_of.get(&key) {
                stack.extend(overrides.iter().copied());
            }
        }

        result
    }

    /// Whether executing a node with this effect can destroy an
    /// instance statically typed `class`.
    pub fn node_can_destroy(&mut self, effect: &NodeEffect, class: ClassId) -> bool {
        if let Some(callee) = effect.calls {
            if self.call_destroys(callee).may_destroy(self.registry, class) {
                return true;
            }
        }

        for destroyed in &effect.destroys {
            let mut set = TypeSet::new();
            let mut visited = FxHashSet::default();
            self.collect_var(&destroyed.clone(), &mut set, &mut visited);
            if set.may_destroy(self.registry, class) {
                return true;
            }
        }

        false
    }

    /// The class standing in for a declared type in destroy-set queries.
    pub fn class_of_interest(&self, data_type: &DataType) -> Option<ClassId> {
        match data_type.strip_owned() {
            DataType::Class(id) => Some(*id),
            DataType::Array(_) => Some(self.registry.array_class),
            _ => None,
        }
    }
}
