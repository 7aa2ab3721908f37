//! The Opal type lattice and conversion rules.
//!
//! A conversion is legal when two independent axes agree: ownership
//! compatibility (who is allowed to hold the value) and base-type
//! compatibility (subtyping, widening, boxing). Some successful
//! conversions leave marks on the classes involved; emission later reads
//! those marks to decide which classes need virtual destructors or a
//! root-object base.

use crate::compiler::registry::{ClassId, ClassRegistry};
use crate::compiler::string_interning::StringTable;

#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Bool,
    /// 16-bit wide character
    Char,
    Int,
    Float,
    Double,
    /// Value-like at the language level, ref-counted handle underneath
    Str,
    /// The type of the `null` literal, convertible to any reference type
    Null,
    Void,
    Class(ClassId),
    Array(Box<DataType>),
    /// `T^` — exclusive ownership of a non-value type
    Owned(Box<DataType>),
}

/// Where a conversion happens changes what ownership transfers are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertContext {
    Other,
    AssignVar,
    MethodArg,
}

impl DataType {
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            DataType::Bool | DataType::Char | DataType::Int | DataType::Float | DataType::Double
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Char | DataType::Int | DataType::Float | DataType::Double
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            DataType::Str
                | DataType::Null
                | DataType::Class(_)
                | DataType::Array(_)
                | DataType::Owned(_)
        )
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, DataType::Owned(_))
    }

    /// Strip one owning wrapper if present.
    pub fn strip_owned(&self) -> &DataType {
        match self {
            DataType::Owned(inner) => inner,
            other => other,
        }
    }

    pub fn into_owned(self) -> DataType {
        match self {
            already @ DataType::Owned(_) => already,
            other => DataType::Owned(Box::new(other)),
        }
    }

    /// Only non-value, non-string types may carry the owning marker.
    pub fn may_be_owned(&self) -> bool {
        matches!(self, DataType::Class(_) | DataType::Array(_))
    }

    pub fn element_type(&self) -> Option<&DataType> {
        match self.strip_owned() {
            DataType::Array(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn display(&self, registry: &ClassRegistry, string_table: &StringTable) -> String {
        match self {
            DataType::Bool => "bool".to_string(),
            DataType::Char => "char".to_string(),
            DataType::Int => "int".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Double => "double".to_string(),
            DataType::Str => "string".to_string(),
            DataType::Null => "null".to_string(),
            DataType::Void => "void".to_string(),
            DataType::Class(id) => registry.class_name(*id, string_table).to_string(),
            DataType::Array(elem) => format!("{}[]", elem.display(registry, string_table)),
            DataType::Owned(inner) => format!("{}^", inner.display(registry, string_table)),
        }
    }
}

/// The single entry point for every conversion question in the checker.
///
/// `explicit` widens the relation to casts; `subtype_only` restricts the
/// base axis to the subtype relation (used by override checking and
/// destruction-set membership).
pub fn can_convert(
    registry: &mut ClassRegistry,
    source: &DataType,
    dest: &DataType,
    ctx: ConvertContext,
    explicit: bool,
    subtype_only: bool,
) -> bool {
    if !convertible(registry, source, dest, ctx, explicit, subtype_only) {
        return false;
    }

    apply_conversion_marks(registry, source.strip_owned(), dest.strip_owned(), dest, explicit);
    true
}

/// Pure conversion test with no side effects on the registry. Overload
/// scoring probes many candidates; only the chosen one may leave marks.
pub fn convertible(
    registry: &ClassRegistry,
    source: &DataType,
    dest: &DataType,
    ctx: ConvertContext,
    explicit: bool,
    subtype_only: bool,
) -> bool {
    if !ownership_compatible(source, dest, ctx) {
        return false;
    }

    base_compatible(
        registry,
        source.strip_owned(),
        dest.strip_owned(),
        explicit,
        subtype_only,
    )
}

fn ownership_compatible(source: &DataType, dest: &DataType, ctx: ConvertContext) -> bool {
    if matches!(source, DataType::Null) {
        return true;
    }

    match (source.is_owned(), dest.is_owned()) {
        (false, false) => true,
        (true, true) => true,

        // Dropping ownership is a transfer and only legal where a
        // transfer makes sense.
        (true, false) => matches!(ctx, ConvertContext::AssignVar | ConvertContext::MethodArg),

        // Gaining ownership out of nowhere only happens by boxing:
        // a value being wrapped into a fresh owning object, or a string
        // aliasing its ref-counted payload.
        (false, true) => {
            (source.is_value_type() && ctx == ConvertContext::MethodArg)
                || matches!(source, DataType::Str)
        }
    }
}

fn base_compatible(
    registry: &ClassRegistry,
    s: &DataType,
    d: &DataType,
    explicit: bool,
    subtype_only: bool,
) -> bool {
    if s == d {
        return true;
    }

    if matches!(s, DataType::Null) {
        return d.is_reference();
    }

    if registry.is_subtype(s, d) {
        return true;
    }

    if subtype_only {
        return false;
    }

    // Implicit widenings
    let widens = matches!(
        (s, d),
        (DataType::Int, DataType::Float)
            | (DataType::Int, DataType::Double)
            | (DataType::Float, DataType::Double)
    );
    if widens {
        return true;
    }

    // A string may always stand in for the root object; a value type may
    // be boxed into it.
    if registry.is_object(d) && (matches!(s, DataType::Str) || s.is_value_type()) {
        return true;
    }

    if !explicit {
        return false;
    }

    // Explicit casts add the reverse directions: downcasts, narrowing
    // numerics, unboxing.
    if registry.is_subtype(d, s) {
        return true;
    }

    let narrows = matches!(
        (s, d),
        (DataType::Float, DataType::Int)
            | (DataType::Double, DataType::Int)
            | (DataType::Double, DataType::Float)
    );
    if narrows {
        return true;
    }

    registry.is_object(s) && (matches!(d, DataType::Str) || d.is_value_type())
}

/// Successful conversions can force RTTI or root-object inheritance on
/// the classes they touch; emission honors these marks later.
fn apply_conversion_marks(
    registry: &mut ClassRegistry,
    s: &DataType,
    d: &DataType,
    dest: &DataType,
    explicit: bool,
) {
    if explicit {
        if let DataType::Class(id) = s {
            registry.mark_virtual_needed(*id);
        }
    }

    // The destination's destructor must be virtual when ownership of a
    // possibly-derived instance lands behind a base-typed owning handle.
    if dest.is_owned() {
        if let DataType::Class(id) = d {
            registry.mark_virtual_needed(*id);
        }
    }

    let s_is_object = registry.is_object(s);
    let d_is_object = registry.is_object(d);

    if s_is_object != d_is_object {
        if let DataType::Class(id) = s {
            if !s_is_object {
                registry.mark_object_inheritance_needed(*id);
            }
        }
        if let DataType::Class(id) = d {
            if !d_is_object {
                registry.mark_object_inheritance_needed(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::registry::ClassRegistry;
    use crate::compiler::string_interning::StringTable;

    fn setup() -> (ClassRegistry, StringTable, ClassId, ClassId) {
        let mut table = StringTable::new();
        let mut registry = ClassRegistry::with_builtins(&mut table);
        let animal = registry.declare_test_class("Animal", None, &mut table);
        let dog = registry.declare_test_class("Dog", Some(animal), &mut table);
        (registry, table, animal, dog)
    }

    #[test]
    fn identity_converts_in_any_context() {
        let (mut registry, _, animal, _) = setup();
        for ctx in [
            ConvertContext::Other,
            ConvertContext::AssignVar,
            ConvertContext::MethodArg,
        ] {
            assert!(can_convert(
                &mut registry,
                &DataType::Class(animal),
                &DataType::Class(animal),
                ctx,
                false,
                false,
            ));
        }
    }

    #[test]
    fn upcast_is_implicit_downcast_is_explicit() {
        let (mut registry, _, animal, dog) = setup();
        let up = can_convert(
            &mut registry,
            &DataType::Class(dog),
            &DataType::Class(animal),
            ConvertContext::Other,
            false,
            false,
        );
        assert!(up);

        let down_implicit = can_convert(
            &mut registry,
            &DataType::Class(animal),
            &DataType::Class(dog),
            ConvertContext::Other,
            false,
            false,
        );
        assert!(!down_implicit);

        let down_explicit = can_convert(
            &mut registry,
            &DataType::Class(animal),
            &DataType::Class(dog),
            ConvertContext::Other,
            true,
            false,
        );
        assert!(down_explicit);
    }

    #[test]
    fn explicit_cast_marks_source_virtual() {
        let (mut registry, _, animal, dog) = setup();
        assert!(!registry.class(animal).virtual_needed);
        can_convert(
            &mut registry,
            &DataType::Class(animal),
            &DataType::Class(dog),
            ConvertContext::Other,
            true,
            false,
        );
        assert!(registry.class(animal).virtual_needed);
    }

    #[test]
    fn numeric_widening_is_one_way() {
        let (mut registry, ..) = setup();
        assert!(can_convert(
            &mut registry,
            &DataType::Int,
            &DataType::Double,
            ConvertContext::Other,
            false,
            false,
        ));
        assert!(!can_convert(
            &mut registry,
            &DataType::Double,
            &DataType::Int,
            ConvertContext::Other,
            false,
            false,
        ));
        assert!(can_convert(
            &mut registry,
            &DataType::Double,
            &DataType::Int,
            ConvertContext::Other,
            true,
            false,
        ));
    }

    #[test]
    fn losing_ownership_needs_a_transfer_context() {
        let (mut registry, _, animal, _) = setup();
        let owned = DataType::Owned(Box::new(DataType::Class(animal)));
        let plain = DataType::Class(animal);

        assert!(!can_convert(
            &mut registry,
            &owned,
            &plain,
            ConvertContext::Other,
            false,
            false,
        ));
        assert!(can_convert(
            &mut registry,
            &owned,
            &plain,
            ConvertContext::AssignVar,
            false,
            false,
        ));
        assert!(can_convert(
            &mut registry,
            &owned,
            &plain,
            ConvertContext::MethodArg,
            false,
            false,
        ));
    }

    #[test]
    fn boxing_an_int_only_works_as_an_argument() {
        let (mut registry, ..) = setup();
        let boxed_object = DataType::Owned(Box::new(DataType::Class(registry.object_class)));

        assert!(can_convert(
            &mut registry,
            &DataType::Int,
            &boxed_object,
            ConvertContext::MethodArg,
            false,
            false,
        ));
        assert!(!can_convert(
            &mut registry,
            &DataType::Int,
            &boxed_object,
            ConvertContext::AssignVar,
            false,
            false,
        ));

        // Strings alias their ref-counted payload, so they may be boxed
        // anywhere.
        assert!(can_convert(
            &mut registry,
            &DataType::Str,
            &boxed_object,
            ConvertContext::AssignVar,
            false,
            false,
        ));
    }

    #[test]
    fn owning_destination_marks_virtual_destructor() {
        let (mut registry, _, animal, dog) = setup();
        assert!(!registry.class(animal).virtual_needed);
        can_convert(
            &mut registry,
            &DataType::Owned(Box::new(DataType::Class(dog))),
            &DataType::Owned(Box::new(DataType::Class(animal))),
            ConvertContext::AssignVar,
            false,
            false,
        );
        assert!(registry.class(animal).virtual_needed);
    }

    #[test]
    fn null_converts_to_references_not_values() {
        let (mut registry, _, animal, _) = setup();
        assert!(can_convert(
            &mut registry,
            &DataType::Null,
            &DataType::Class(animal),
            ConvertContext::Other,
            false,
            false,
        ));
        assert!(can_convert(
            &mut registry,
            &DataType::Null,
            &DataType::Owned(Box::new(DataType::Class(animal))),
            ConvertContext::Other,
            false,
            false,
        ));
        assert!(!can_convert(
            &mut registry,
            &DataType::Null,
            &DataType::Int,
            ConvertContext::Other,
            false,
            false,
        ));
    }

    #[test]
    fn object_boundary_marks_inheritance() {
        let (mut registry, _, animal, _) = setup();
        assert!(!registry.class(animal).object_inheritance_needed);
        let object = DataType::Class(registry.object_class);
        can_convert(
            &mut registry,
            &DataType::Class(animal),
            &object,
            ConvertContext::AssignVar,
            false,
            false,
        );
        assert!(registry.class(animal).object_inheritance_needed);
    }
}
