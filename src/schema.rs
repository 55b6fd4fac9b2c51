use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

// used to keep the two-way mapping between type names and their ids
use bimap::BiMap;
use bitflags::bitflags;
use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;
use tracing::debug;

use crate::construct::{Relation, RelatedObject};
use crate::datatype::{Kind, Value};
use crate::error::{RelataError, Result};
use crate::event::Listener;

// ------------- TypeId -------------
pub type TypeId = u64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;

/// The id a type carries before registration assigns a real one.
pub const UNREGISTERED: TypeId = 0;

// Ids are never restored from storage, so a plain process-wide counter
// is all the identity generation needed.
static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

bitflags! {
    /// Behavioral flags of a relation type.
    ///
    /// * `FINAL` – immutable once a relation exists: update and delete fail.
    /// * `READONLY` – never settable by callers.
    /// * `TRANSIENT` – excluded from serialization.
    /// * `PRIVATE` – excluded from enumeration and event dispatch,
    ///   but directly retrievable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const FINAL = 1;
        const READONLY = 1 << 1;
        const TRANSIENT = 1 << 2;
        const PRIVATE = 1 << 3;
    }
}

pub type ValueFn = Arc<dyn Fn(&RelatedObject) -> Option<Value> + Send + Sync>;
pub type DeleteGuard = Arc<dyn Fn(&RelatedObject, &Arc<Relation>) -> Result<()> + Send + Sync>;

// ------------- RelationType -------------
/// A named descriptor for an attribute slot: target kind, behavioral
/// modifiers, and the default/initial value policies.
///
/// A type starts out unregistered (no name, no id) and is initialized
/// exactly once when a [`TypeRegistry`] accepts it. Everything else is
/// fixed at construction; a type is also relation-bearing itself, so
/// annotations describing the type go through [`RelationType::meta`].
pub struct RelationType {
    ident: OnceLock<TypeIdent>,
    kind: Kind,
    modifiers: Modifiers,
    default_fn: Option<ValueFn>,
    initial_fn: Option<ValueFn>,
    delete_guard: Option<DeleteGuard>,
    listeners: Mutex<Vec<Listener>>,
    meta: RelatedObject,
}

#[derive(Debug, Clone)]
struct TypeIdent {
    id: TypeId,
    name: String,
}

impl RelationType {
    pub fn new(kind: Kind) -> Self {
        Self {
            ident: OnceLock::new(),
            kind,
            modifiers: Modifiers::empty(),
            default_fn: None,
            initial_fn: None,
            delete_guard: None,
            listeners: Mutex::new(Vec::new()),
            meta: RelatedObject::new(),
        }
    }
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
    /// Value answered for an absent relation, without creating one.
    pub fn with_default(mut self, default_fn: ValueFn) -> Self {
        self.default_fn = Some(default_fn);
        self
    }
    /// Value materialized as a direct relation on the first read of an
    /// absent relation. Distinct from the default on purpose: defaults
    /// answer without commitment, initial values persist.
    pub fn with_initial(mut self, initial_fn: ValueFn) -> Self {
        self.initial_fn = Some(initial_fn);
        self
    }
    /// Hook consulted before any relation of this type is deleted; an
    /// error vetoes the deletion.
    pub fn with_delete_guard(mut self, guard: DeleteGuard) -> Self {
        self.delete_guard = Some(guard);
        self
    }

    pub fn id(&self) -> TypeId {
        self.ident.get().map(|i| i.id).unwrap_or(UNREGISTERED)
    }
    pub fn name(&self) -> Option<&str> {
        self.ident.get().map(|i| i.name.as_str())
    }
    pub fn kind(&self) -> Kind {
        self.kind
    }
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }
    pub fn is(&self, modifiers: Modifiers) -> bool {
        self.modifiers.contains(modifiers)
    }
    pub fn is_registered(&self) -> bool {
        self.ident.get().is_some()
    }
    /// The type's own annotation container.
    pub fn meta(&self) -> &RelatedObject {
        &self.meta
    }

    pub fn default_value(&self, owner: &RelatedObject) -> Option<Value> {
        self.default_fn.as_ref().and_then(|f| f(owner))
    }
    pub fn initial_value(&self, owner: &RelatedObject) -> Option<Value> {
        self.initial_fn.as_ref().and_then(|f| f(owner))
    }

    /// Listeners notified of mutations of this type across all objects.
    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Pointer identity; names are unique per registry but identity is
    /// what keys relation maps.
    pub fn same(a: &Arc<RelationType>, b: &Arc<RelationType>) -> bool {
        Arc::ptr_eq(a, b)
    }

    pub(crate) fn require_registered(&self) -> Result<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(RelataError::IllegalState(
                "relation type used before registration".to_owned(),
            ))
        }
    }
    pub(crate) fn listeners_snapshot(&self) -> Vec<Listener> {
        self.listeners.lock().unwrap().clone()
    }
    pub(crate) fn check_delete(&self, owner: &RelatedObject, relation: &Arc<Relation>) -> Result<()> {
        if let Some(guard) = &self.delete_guard {
            guard(owner, relation)?;
        }
        Ok(())
    }
    fn initialize(&self, id: TypeId, name: &str) {
        let _ = self.ident.set(TypeIdent {
            id,
            name: name.to_owned(),
        });
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name().unwrap_or("<unregistered>"))
    }
}

impl fmt::Debug for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RelationType")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("modifiers", &self.modifiers)
            .finish_non_exhaustive()
    }
}

// ------------- TypeRegistry -------------
lazy_static! {
    // identifier segments joined by dots, e.g. "person.name"
    static ref NAME_GRAMMAR: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref GLOBAL: Arc<Mutex<TypeRegistry>> = Arc::new(Mutex::new(TypeRegistry::new()));
}

/// Keeper of relation types: enforces the name grammar and one live
/// type per name, and hands out the canonical `Arc` for each.
pub struct TypeRegistry {
    names: BiMap<String, TypeId>,
    kept: HashMap<TypeId, Arc<RelationType>, IdHasher>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            names: BiMap::new(),
            kept: HashMap::default(),
        }
    }
    pub fn register(&mut self, name: &str, rtype: RelationType) -> Result<Arc<RelationType>> {
        if !NAME_GRAMMAR.is_match(name) {
            return Err(RelataError::InvalidName {
                name: name.to_owned(),
                reason: "does not match the identifier-with-optional-dot-namespace grammar"
                    .to_owned(),
            });
        }
        if self.names.contains_left(name) {
            return Err(RelataError::InvalidName {
                name: name.to_owned(),
                reason: "a type with this name is already registered".to_owned(),
            });
        }
        if rtype.is_registered() {
            return Err(RelataError::IllegalState(format!(
                "relation type {rtype} is already registered"
            )));
        }
        let id = NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed);
        rtype.initialize(id, name);
        let kept = Arc::new(rtype);
        self.names.insert(name.to_owned(), id);
        self.kept.insert(id, Arc::clone(&kept));
        debug!(name, id, "registered relation type");
        Ok(kept)
    }
    pub fn declare(&mut self, name: &str, kind: Kind, modifiers: Modifiers) -> Result<Arc<RelationType>> {
        self.register(name, RelationType::new(kind).with_modifiers(modifiers))
    }
    pub fn lookup(&self, name: &str) -> Option<Arc<RelationType>> {
        self.names
            .get_by_left(name)
            .and_then(|id| self.kept.get(id))
            .map(Arc::clone)
    }
    pub fn lookup_id(&self, id: TypeId) -> Option<Arc<RelationType>> {
        self.kept.get(&id).map(Arc::clone)
    }
    pub fn name_of(&self, id: TypeId) -> Option<&str> {
        self.names.get_by_right(&id).map(String::as_str)
    }
    /// Removes a type from the registry. Intended for teardown;
    /// relations already holding the type keep working.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<RelationType>> {
        let (_, id) = self.names.remove_by_left(name)?;
        let removed = self.kept.remove(&id);
        debug!(name, id, "unregistered relation type");
        removed
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RelationType>> {
        self.kept.values()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("len", &self.kept.len())
            .finish_non_exhaustive()
    }
}

/// The process-wide registry. Registration from multiple threads is
/// serialized by the mutex; nothing in the object model requires this
/// particular instance, so independent registries can be created freely.
pub fn global() -> Arc<Mutex<TypeRegistry>> {
    Arc::clone(&GLOBAL)
}
