use relata::construct::RelatedObject;
use relata::datatype::{Kind, Value};
use relata::error::RelataError;
use relata::schema::{Modifiers, RelationType, TypeRegistry};

#[test]
fn names_are_unique_per_registry() {
    let mut registry = TypeRegistry::new();
    let first = registry
        .declare("person.name", Kind::Text, Modifiers::empty())
        .expect("first registration");
    let second = registry.declare("person.name", Kind::Int, Modifiers::empty());
    assert!(matches!(second, Err(RelataError::InvalidName { .. })));
    // the original stays resolvable
    let resolved = registry.lookup("person.name").expect("still registered");
    assert!(RelationType::same(&first, &resolved));
}

#[test]
fn name_grammar_is_enforced() {
    let mut registry = TypeRegistry::new();
    for bad in ["", "9lives", "a..b", "a.b.", ".a", "a-b", "a b", "a.#"] {
        let result = registry.declare(bad, Kind::Text, Modifiers::empty());
        assert!(
            matches!(result, Err(RelataError::InvalidName { .. })),
            "'{bad}' should be rejected"
        );
    }
    for good in ["a", "a.b", "person.name", "_x.y_2", "N1.N2.N3"] {
        assert!(
            registry.declare(good, Kind::Text, Modifiers::empty()).is_ok(),
            "'{good}' should be accepted"
        );
    }
}

#[test]
fn lookup_by_name_and_id() {
    let mut registry = TypeRegistry::new();
    let rtype = registry
        .declare("city.population", Kind::Int, Modifiers::empty())
        .unwrap();
    assert_eq!(registry.name_of(rtype.id()), Some("city.population"));
    let by_id = registry.lookup_id(rtype.id()).expect("id resolves");
    assert!(RelationType::same(&rtype, &by_id));
    assert!(registry.lookup("city.unknown").is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn unregister_frees_the_name() {
    let mut registry = TypeRegistry::new();
    let original = registry
        .declare("tmp.slot", Kind::Text, Modifiers::empty())
        .unwrap();
    assert!(registry.unregister("tmp.slot").is_some());
    assert!(registry.lookup("tmp.slot").is_none());
    // the name can be taken again, by a distinct type
    let replacement = registry
        .declare("tmp.slot", Kind::Text, Modifiers::empty())
        .unwrap();
    assert!(!RelationType::same(&original, &replacement));
    // relations created with the removed type keep working
    let object = RelatedObject::new();
    object.set(&original, "still usable").unwrap();
    assert_eq!(object.get(&original), Some(Value::from("still usable")));
}

#[test]
fn unregistered_types_cannot_mutate() {
    use std::sync::Arc;
    let loose = Arc::new(RelationType::new(Kind::Text));
    let object = RelatedObject::new();
    assert!(matches!(
        object.set(&loose, "nope"),
        Err(RelataError::IllegalState(_))
    ));
    assert!(matches!(
        object.delete(&loose),
        Err(RelataError::IllegalState(_))
    ));
    assert!(!object.has(&loose));
}

#[test]
#[should_panic(expected = "before registration")]
fn unregistered_types_cannot_read() {
    use std::sync::Arc;
    let loose = Arc::new(RelationType::new(Kind::Text));
    let object = RelatedObject::new();
    let _ = object.get(&loose);
}

#[test]
fn already_registered_types_are_rejected() {
    let mut registry = TypeRegistry::new();
    let kept = registry
        .declare("one.name", Kind::Text, Modifiers::empty())
        .unwrap();
    // a second registry may reuse the name, but not the initialized type
    let mut other = TypeRegistry::new();
    assert!(other.declare("one.name", Kind::Text, Modifiers::empty()).is_ok());
    drop(kept);
    let taken = registry.unregister("one.name").unwrap();
    let taken = std::sync::Arc::try_unwrap(taken).ok().expect("sole owner");
    assert!(matches!(
        other.register("two.name", taken),
        Err(RelataError::IllegalState(_))
    ));
}
