//! Change notification for relation mutations.
//!
//! Listeners run synchronously on the caller's stack, before the
//! mutation reaches backing storage. Returning an error vetoes the
//! mutation; the error propagates to the caller unchanged. Three
//! scopes exist (object, relation, type) and fire in that order.

use std::fmt;
use std::sync::Arc;

use crate::construct::Relation;
use crate::datatype::Value;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventKind::Add => write!(f, "add"),
            EventKind::Update => write!(f, "update"),
            EventKind::Remove => write!(f, "remove"),
        }
    }
}

/// A pending mutation. `value` carries the proposed new target for
/// updates; adds and removes describe the relation alone.
pub struct RelationEvent<'a> {
    pub kind: EventKind,
    pub relation: &'a Arc<Relation>,
    pub value: Option<&'a Value>,
}

pub type Listener = Arc<dyn Fn(&RelationEvent<'_>) -> Result<()> + Send + Sync>;

pub(crate) fn dispatch(listeners: &[Listener], event: &RelationEvent<'_>) -> Result<()> {
    for listener in listeners {
        listener(event)?;
    }
    Ok(())
}
