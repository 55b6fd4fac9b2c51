use relata::construct::RelatedObject;
use relata::datatype::{Decimal, Kind, Value};
use relata::error::RelataError;
use relata::json;
use relata::schema::{Modifiers, TypeRegistry};

#[test]
fn documents_round_trip_through_text() {
    let text = r#"{"name":"Alice","age":40,"tags":["a","b"],"address":{"city":"Uppsala","zip":null},"active":true}"#;
    let value = json::parse_text(text).expect("parses");
    assert_eq!(json::to_text(&value), text);
}

#[test]
fn object_keys_keep_insertion_order() {
    let text = r#"{"z":1,"a":2,"m":3}"#;
    let value = json::parse_text(text).unwrap();
    let keys: Vec<&String> = value.as_map().unwrap().keys().collect();
    assert_eq!(keys, ["z", "a", "m"]);
}

#[test]
fn escapes_round_trip() {
    let text = r#""line\nbreak \"quoted\" tab\t back\\slash""#;
    let value = json::parse_text(text).unwrap();
    assert_eq!(
        value,
        Value::from("line\nbreak \"quoted\" tab\t back\\slash")
    );
    let rendered = json::to_text(&value);
    assert_eq!(json::parse_text(&rendered).unwrap(), value);
}

#[test]
fn unicode_escapes_cover_surrogate_pairs() {
    let value = json::parse_text("\"\\u0041\\u00e5\\uD83D\\uDE00\"").unwrap();
    assert_eq!(value, Value::from("A\u{e5}\u{1F600}"));
    // a lone high surrogate is malformed
    assert!(json::parse_text(r#""\uD83D""#).is_err());
}

#[test]
fn numbers_keep_arbitrary_precision() {
    assert_eq!(json::parse_text("42").unwrap(), Value::Int(42));
    assert_eq!(json::parse_text("-7").unwrap(), Value::Int(-7));
    assert_eq!(
        json::parse_text("3.14").unwrap(),
        Value::Decimal(Decimal::from_str("3.14").unwrap())
    );
    // exponents and over-sized integers stay decimal, not float
    assert_eq!(
        json::parse_text("1e3").unwrap(),
        Value::Decimal(Decimal::from_str("1000").unwrap())
    );
    assert_eq!(
        json::parse_text("123456789012345678901234567890").unwrap(),
        Value::Decimal(Decimal::from_str("123456789012345678901234567890").unwrap())
    );
    let long = json::parse_text("0.10000000000000000000000000000001").unwrap();
    assert_eq!(
        json::to_text(&long),
        "0.10000000000000000000000000000001"
    );
}

#[test]
fn malformed_documents_report_positions() {
    let result = json::parse_text("{\"a\": 1,\n  2}");
    match result {
        Err(RelataError::Parse { line, .. }) => assert_eq!(line, Some(2)),
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert!(json::parse_text("").is_err());
    assert!(json::parse_text("{\"a\":1} trailing").is_err());
    assert!(json::parse_text("01").is_err());
}

#[test]
fn rendering_agrees_with_serde_json() {
    let value = json::parse_text(
        r#"{"name":"es\"caped","count":3,"flags":[true,false,null],"nested":{"empty":{}}}"#,
    )
    .unwrap();
    let ours = json::to_text(&value);
    // our writer's output is valid JSON with identical structure
    let reparsed: serde_json::Value = serde_json::from_str(&ours).expect("valid JSON");
    // and the Serialize impl agrees with the native writer
    assert_eq!(serde_json::to_string(&value).unwrap(), ours);
    assert_eq!(reparsed["count"], serde_json::json!(3));
    assert_eq!(reparsed["name"], serde_json::json!("es\"caped"));
}

#[test]
fn pretty_printing_is_reparsable() {
    let value = json::parse_text(r#"{"a":[1,2],"b":{"c":"d"}}"#).unwrap();
    let pretty = json::to_pretty(&value);
    assert!(pretty.contains('\n'));
    assert_eq!(json::parse_text(&pretty).unwrap(), value);
}

fn person_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .declare("person.name", Kind::Text, Modifiers::empty())
        .unwrap();
    registry
        .declare("person.age", Kind::Int, Modifiers::empty())
        .unwrap();
    registry
        .declare("person.born", Kind::Date, Modifiers::empty())
        .unwrap();
    registry
        .declare("person.session", Kind::Text, Modifiers::TRANSIENT)
        .unwrap();
    registry
        .declare("person.scratch", Kind::Text, Modifiers::PRIVATE)
        .unwrap();
    registry
}

#[test]
fn objects_serialize_their_visible_relations_in_order() {
    let registry = person_registry();
    let name = registry.lookup("person.name").unwrap();
    let age = registry.lookup("person.age").unwrap();
    let session = registry.lookup("person.session").unwrap();
    let scratch = registry.lookup("person.scratch").unwrap();

    let person = RelatedObject::new();
    person.set(&name, "Alice").unwrap();
    person.set(&age, 40).unwrap();
    person.set(&session, "s-123").unwrap();
    person.set(&scratch, "tmp").unwrap();

    // transient and private relations never serialize
    assert_eq!(
        json::object_to_text(&person),
        r#"{"person.name":"Alice","person.age":40}"#
    );
}

#[test]
fn objects_reconstruct_by_type_name() {
    let registry = person_registry();
    let text = r#"{"person.name":"Bob","person.age":7,"person.born":"2019-03-01"}"#;
    let person = json::object_from_text(text, &registry).expect("reconstructs");
    let name = registry.lookup("person.name").unwrap();
    let born = registry.lookup("person.born").unwrap();
    assert_eq!(person.get(&name), Some(Value::from("Bob")));
    // the declared kind coerces the textual date
    assert_eq!(
        person.get(&born),
        Some(Value::Date("2019-03-01".parse().unwrap()))
    );
    // and the round trip is stable
    assert_eq!(
        json::object_from_text(&json::object_to_text(&person), &registry).unwrap(),
        person
    );
}

#[test]
fn unknown_type_names_fail_reconstruction() {
    let registry = person_registry();
    let result = json::object_from_text(r#"{"person.shoe_size":44}"#, &registry);
    assert!(matches!(
        result,
        Err(RelataError::UnresolvableRelation(name)) if name == "person.shoe_size"
    ));
}

#[test]
fn reconstruction_requires_a_top_level_object() {
    let registry = person_registry();
    assert!(matches!(
        json::object_from_text("[1,2,3]", &registry),
        Err(RelataError::Parse { .. })
    ));
}

#[test]
fn mismatched_kinds_fail_reconstruction() {
    let registry = person_registry();
    assert!(matches!(
        json::object_from_text(r#"{"person.age":"forty"}"#, &registry),
        Err(RelataError::InvalidTarget { .. })
    ));
}
