//! Relata – a typed attribute-attachment engine for arbitrary objects.
//!
//! Relata lets any object carry strongly-typed, named, annotated
//! attributes at runtime:
//! * A [`schema::RelationType`] is a globally unique, named descriptor
//!   of an attribute slot, with a target [`datatype::Kind`] and
//!   behavioral [`schema::Modifiers`].
//! * A [`construct::Relation`] is a concrete attribute cell binding a
//!   type to a value on one owning object, through one of five storage
//!   strategies (direct, transformed, deferred, alias, view).
//! * A [`construct::RelatedObject`] owns a set of relations keyed by
//!   type, enumerated in insertion order.
//!
//! Types are owned and deduplicated by a "keeper" structure (the
//! [`schema::TypeRegistry`]) enabling canonical sharing through `Arc`:
//! the registry enforces the name grammar and one live type per name.
//!
//! ## Modules
//! * [`schema`] – Relation types, modifiers and the type registry.
//! * [`construct`] – Relation cells, related objects and the
//!   [`construct::Relatable`] capability contract.
//! * [`datatype`] – The closed [`datatype::Value`] sum type and kinds.
//! * [`event`] – Synchronous, veto-capable change notification.
//! * [`standard`] – Well-known annotation types.
//! * [`json`] – JSON text conversion built on the enumeration contract.
//!
//! ## Values
//! Values are a closed set of tagged variants (null, bool, int,
//! decimal, text, date, datetime, list, map). Validity is checked at
//! the boundary where values enter the model, against the declared
//! kind of the relation type.
//!
//! ## Change notification
//! Listeners can watch one object, one relation cell, or one type
//! across all objects. They run synchronously before a mutation
//! commits and veto it by returning an error.
//!
//! ## Quick Start
//! ```
//! use relata::construct::RelatedObject;
//! use relata::datatype::{Kind, Value};
//! use relata::schema::{global, Modifiers};
//!
//! let name = global()
//!     .lock()
//!     .unwrap()
//!     .declare("person.name", Kind::Text, Modifiers::empty())
//!     .unwrap();
//! let person = RelatedObject::new();
//! assert!(!person.has(&name));
//! person.set(&name, "Alice").unwrap();
//! assert_eq!(person.get(&name), Some(Value::from("Alice")));
//! ```

pub mod construct;
pub mod datatype;
pub mod error;
pub mod event;
pub mod json;
pub mod schema;
pub mod standard;
