//! Well-known annotation types, registered in the process-wide
//! registry on first use.
//!
//! These exercise the model's own machinery: a relation type or a
//! relation cell is annotated through the same API it provides.

use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;

use crate::datatype::{Kind, Value};
use crate::schema::{global, Modifiers, RelationType};

lazy_static! {
    static ref IMMUTABLE: Arc<RelationType> =
        reserve("meta.immutable", Kind::Bool, Modifiers::PRIVATE);
    static ref NAMESPACE: Arc<RelationType> =
        reserve("meta.namespace", Kind::Text, Modifiers::empty());
    static ref DESCRIPTION: Arc<RelationType> =
        reserve("meta.description", Kind::Text, Modifiers::empty());
    static ref CREATED: Arc<RelationType> =
        reserve("meta.created", Kind::DateTime, Modifiers::TRANSIENT);
}

fn reserve(name: &str, kind: Kind, modifiers: Modifiers) -> Arc<RelationType> {
    global()
        .lock()
        .unwrap()
        .register(name, RelationType::new(kind).with_modifiers(modifiers))
        .expect("well-known type registration")
}

/// Marks a relation cell as immutable; checked before every target
/// mutation of the annotated cell.
pub fn immutable() -> Arc<RelationType> {
    Arc::clone(&IMMUTABLE)
}

/// The namespace a type or object belongs to.
pub fn namespace() -> Arc<RelationType> {
    Arc::clone(&NAMESPACE)
}

/// Free-form description of a type or object.
pub fn description() -> Arc<RelationType> {
    Arc::clone(&DESCRIPTION)
}

/// Creation timestamp; transient, so it never serializes.
pub fn created() -> Arc<RelationType> {
    Arc::clone(&CREATED)
}

/// The current moment, in the shape `created()` expects.
pub fn created_now() -> Value {
    Value::DateTime(Utc::now().naive_utc())
}
