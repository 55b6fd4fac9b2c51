use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use relata::construct::RelatedObject;
use relata::datatype::{Kind, Value};
use relata::schema::{Modifiers, TypeRegistry};

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[test]
fn relations_compare_by_type_identity_and_data() {
    let mut registry = TypeRegistry::new();
    let slot = registry
        .declare("doc.slot", Kind::Int, Modifiers::empty())
        .unwrap();
    let first = RelatedObject::new().set(&slot, 5).unwrap();
    let second = RelatedObject::new().set(&slot, 5).unwrap();
    assert_eq!(first, second);
    assert_eq!(hash_of(&*first), hash_of(&*second));

    second.set_target(Value::Int(6)).unwrap();
    assert_ne!(first, second);
}

#[test]
fn same_name_is_not_same_type() {
    let mut registry = TypeRegistry::new();
    let mut other = TypeRegistry::new();
    let here = registry
        .declare("doc.slot", Kind::Int, Modifiers::empty())
        .unwrap();
    let there = other
        .declare("doc.slot", Kind::Int, Modifiers::empty())
        .unwrap();
    let first = RelatedObject::new().set(&here, 5).unwrap();
    let second = RelatedObject::new().set(&there, 5).unwrap();
    // equal names and values, but distinct type instances
    assert_ne!(first, second);
}

#[test]
fn annotations_are_part_of_relation_equality() {
    let mut registry = TypeRegistry::new();
    let slot = registry
        .declare("doc.slot", Kind::Int, Modifiers::empty())
        .unwrap();
    let note = registry
        .declare("meta.note", Kind::Text, Modifiers::empty())
        .unwrap();
    let first = RelatedObject::new().set(&slot, 5).unwrap();
    let second = RelatedObject::new().set(&slot, 5).unwrap();
    first.annotate(&note, Value::from("checked")).unwrap();
    assert_ne!(first, second);
    second.annotate(&note, Value::from("checked")).unwrap();
    assert_eq!(first, second);
    assert_eq!(hash_of(&*first), hash_of(&*second));
}

#[test]
fn objects_compare_by_their_relation_maps() {
    let mut registry = TypeRegistry::new();
    let name = registry
        .declare("person.name", Kind::Text, Modifiers::empty())
        .unwrap();
    let age = registry
        .declare("person.age", Kind::Int, Modifiers::empty())
        .unwrap();

    let first = RelatedObject::new();
    first.set(&name, "Alice").unwrap();
    first.set(&age, 40).unwrap();

    // same relations, inserted in the opposite order
    let second = RelatedObject::new();
    second.set(&age, 40).unwrap();
    second.set(&name, "Alice").unwrap();

    assert_eq!(first, second);
    assert_eq!(hash_of(&first), hash_of(&second));

    second.set(&age, 41).unwrap();
    assert_ne!(first, second);
}

#[test]
fn clones_share_state_and_compare_equal() {
    let mut registry = TypeRegistry::new();
    let name = registry
        .declare("person.name", Kind::Text, Modifiers::empty())
        .unwrap();
    let original = RelatedObject::new();
    let handle = original.clone();
    handle.set(&name, "Alice").unwrap();
    assert_eq!(original.get(&name), Some(Value::from("Alice")));
    assert_eq!(original, handle);
}

#[test]
fn wrapper_equality_follows_the_wrapped_identity() {
    let mut registry = TypeRegistry::new();
    let original = registry
        .declare("left.value", Kind::Int, Modifiers::empty())
        .unwrap();
    let mirrored = registry
        .declare("right.value", Kind::Int, Modifiers::empty())
        .unwrap();
    let left = RelatedObject::new();
    let relation = left.set(&original, 1).unwrap();
    let first_parent = RelatedObject::new();
    let second_parent = RelatedObject::new();
    let first = relation.alias_as(&mirrored, &first_parent).unwrap();
    let second = relation.alias_as(&mirrored, &second_parent).unwrap();
    // both wrap the same cell under the same type
    assert_eq!(first, second);

    let other_relation = RelatedObject::new().set(&original, 1).unwrap();
    let third_parent = RelatedObject::new();
    let third = other_relation.alias_as(&mirrored, &third_parent).unwrap();
    assert_ne!(first, third);
}
