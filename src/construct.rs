use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

// insertion-ordered relation maps, so enumeration is reproducible
use indexmap::IndexMap;
use seahash::SeaHasher;
use tracing::warn;

use crate::datatype::Value;
use crate::error::{RelataError, Result};
use crate::event::{dispatch, EventKind, Listener, RelationEvent};
use crate::schema::{IdHasher, Modifiers, RelationType, TypeId};
use crate::standard;

pub type RelationMap = IndexMap<TypeId, Arc<Relation>, IdHasher>;

// ------------- Conversions -------------
/// Invertible conversion between a relation's exposed values and its
/// stored representation. `forward` runs toward storage, `inverse`
/// back toward the reader; `inverse(forward(v))` must reproduce `v`.
pub trait Transform: Send + Sync {
    fn forward(&self, value: Value) -> Value;
    fn inverse(&self, value: Value) -> Value;
}

/// A [`Transform`] built from a pair of closures.
pub struct Invertible<F, G> {
    forward: F,
    inverse: G,
}

impl<F, G> Invertible<F, G>
where
    F: Fn(Value) -> Value + Send + Sync,
    G: Fn(Value) -> Value + Send + Sync,
{
    pub fn new(forward: F, inverse: G) -> Self {
        Self { forward, inverse }
    }
}

impl<F, G> Transform for Invertible<F, G>
where
    F: Fn(Value) -> Value + Send + Sync,
    G: Fn(Value) -> Value + Send + Sync,
{
    fn forward(&self, value: Value) -> Value {
        (self.forward)(value)
    }
    fn inverse(&self, value: Value) -> Value {
        (self.inverse)(value)
    }
}

/// The no-op conversion, used by plain aliases and views.
pub struct Identity;

impl Transform for Identity {
    fn forward(&self, value: Value) -> Value {
        value
    }
    fn inverse(&self, value: Value) -> Value {
        value
    }
}

/// One-way conversion of a raw intermediate value into the target,
/// applied once on the first read of a deferred relation.
pub trait Resolve: Send + Sync {
    fn resolve(&self, raw: Value) -> Value;
}

impl<F> Resolve for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn resolve(&self, raw: Value) -> Value {
        self(raw)
    }
}

// ------------- Relation -------------
// The storage strategies are mutually exclusive; a deferred cell
// rewrites itself into a direct one on first read.
enum State {
    Direct {
        target: Value,
    },
    Transformed {
        stored: Value,
        codec: Arc<dyn Transform>,
    },
    Intermediate {
        raw: Value,
        resolver: Arc<dyn Resolve>,
    },
    Alias {
        source: Arc<Relation>,
        codec: Arc<dyn Transform>,
    },
    View {
        source: Arc<Relation>,
        codec: Arc<dyn Transform>,
    },
}

// Wrappers are owned weakly by their source so a dropped parent object
// releases its cells; the parent handle is needed to remove a wrapper
// from its map when the source is deleted.
pub(crate) struct WrapperHandle {
    relation: Weak<Relation>,
    parent: Weak<ObjectCore>,
}

/// A single attribute cell: one per (owning object, relation type)
/// pair, holding a target value through one of five storage
/// strategies. Cells are shared (`Arc`), so aliases and views on other
/// objects reach the same storage.
///
/// A relation is itself relation-bearing: annotations attach through
/// [`Relation::meta`]. Annotation graphs must stay acyclic; equality,
/// hashing and copying recurse through them without a cycle guard.
pub struct Relation {
    rtype: Arc<RelationType>,
    state: Mutex<State>,
    wrappers: Mutex<Vec<WrapperHandle>>,
    listeners: Mutex<Vec<Listener>>,
    meta: RelatedObject,
    this: Weak<Relation>,
}

fn invalid_target(rtype: &RelationType, value: &Value) -> RelataError {
    RelataError::InvalidTarget {
        expected: rtype.kind().name().to_owned(),
        actual: value.type_name().to_owned(),
    }
}

impl Relation {
    fn create(rtype: Arc<RelationType>, state: State) -> Arc<Relation> {
        Arc::new_cyclic(|this| Relation {
            rtype,
            state: Mutex::new(state),
            wrappers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            meta: RelatedObject::new(),
            this: this.clone(),
        })
    }
    pub(crate) fn direct(rtype: Arc<RelationType>, target: Value) -> Arc<Relation> {
        Self::create(rtype, State::Direct { target })
    }
    pub(crate) fn deferred(
        rtype: Arc<RelationType>,
        resolver: Arc<dyn Resolve>,
        raw: Value,
    ) -> Arc<Relation> {
        Self::create(rtype, State::Intermediate { raw, resolver })
    }
    pub(crate) fn transformed(
        rtype: Arc<RelationType>,
        stored: Value,
        codec: Arc<dyn Transform>,
    ) -> Arc<Relation> {
        Self::create(rtype, State::Transformed { stored, codec })
    }

    pub fn rtype(&self) -> Arc<RelationType> {
        Arc::clone(&self.rtype)
    }
    /// The cell's own annotation container.
    pub fn meta(&self) -> &RelatedObject {
        &self.meta
    }
    pub fn annotate(&self, rtype: &Arc<RelationType>, value: Value) -> Result<Arc<Relation>> {
        self.meta.set(rtype, value)
    }
    pub fn annotation(&self, rtype: &Arc<RelationType>) -> Option<Value> {
        self.meta.get(rtype)
    }
    /// Marks the cell immutable; any later target mutation fails.
    pub fn seal(&self) -> Result<()> {
        self.meta.set(&standard::immutable(), Value::Bool(true))?;
        Ok(())
    }
    pub fn is_immutable(&self) -> bool {
        matches!(
            self.meta.get(&standard::immutable()),
            Some(Value::Bool(true))
        )
    }
    pub fn is_wrapper(&self) -> bool {
        matches!(
            &*self.state.lock().unwrap(),
            State::Alias { .. } | State::View { .. }
        )
    }
    /// The wrapped relation, for aliases and views.
    pub fn source(&self) -> Option<Arc<Relation>> {
        match &*self.state.lock().unwrap() {
            State::Alias { source, .. } | State::View { source, .. } => Some(Arc::clone(source)),
            _ => None,
        }
    }

    /// Listeners notified of mutations of this particular cell.
    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }
    pub(crate) fn listeners_snapshot(&self) -> Vec<Listener> {
        self.listeners.lock().unwrap().clone()
    }

    /// The exposed target value. Deferred cells resolve here, exactly
    /// once, and become direct; later reads return the stored result
    /// without consulting the resolver again.
    pub fn target(&self) -> Value {
        enum Fetch {
            Ready(Value),
            Convert(Arc<dyn Transform>, Value),
            Defer(Arc<dyn Resolve>, Value),
            Delegate(Arc<Relation>, Arc<dyn Transform>),
        }
        // user conversions run outside the state lock so they may
        // re-enter the model
        let fetch = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::Direct { target } => Fetch::Ready(target.clone()),
                State::Transformed { stored, codec } => {
                    Fetch::Convert(Arc::clone(codec), stored.clone())
                }
                State::Intermediate { raw, resolver } => {
                    Fetch::Defer(Arc::clone(resolver), raw.clone())
                }
                State::Alias { source, codec } | State::View { source, codec } => {
                    Fetch::Delegate(Arc::clone(source), Arc::clone(codec))
                }
            }
        };
        match fetch {
            Fetch::Ready(value) => value,
            Fetch::Convert(codec, stored) => codec.inverse(stored),
            Fetch::Defer(resolver, raw) => {
                let resolved = resolver.resolve(raw);
                let mut state = self.state.lock().unwrap();
                if matches!(&*state, State::Intermediate { .. }) {
                    *state = State::Direct {
                        target: resolved.clone(),
                    };
                }
                resolved
            }
            Fetch::Delegate(source, codec) => codec.inverse(source.target()),
        }
    }

    /// Writes the target through the cell's storage strategy, with the
    /// same validation and relation/type-scoped notification `set` on
    /// the owning object performs (object-scoped listeners only fire
    /// through the owner).
    pub fn set_target(&self, value: Value) -> Result<()> {
        if self.rtype.is(Modifiers::READONLY) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {} is read-only",
                self.rtype
            )));
        }
        if self.rtype.is(Modifiers::FINAL) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {} is final",
                self.rtype
            )));
        }
        self.check_assign(&value)?;
        if !self.rtype.is(Modifiers::PRIVATE) {
            self.notify_update(&value, None)?;
            if let Some(this) = self.this.upgrade() {
                let event = RelationEvent {
                    kind: EventKind::Update,
                    relation: &this,
                    value: Some(&value),
                };
                dispatch(&self.rtype.listeners_snapshot(), &event)?;
            }
        }
        self.commit_target(value)
    }

    // Validation without commitment. Wrappers forward the converted
    // value to their delegate, checking the delegate's modifiers first.
    pub(crate) fn check_assign(&self, value: &Value) -> Result<()> {
        if self.is_immutable() {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation {} is marked immutable",
                self.rtype
            )));
        }
        let delegate = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::View { .. } => {
                    return Err(RelataError::UnsupportedOperation(format!(
                        "view relation {} is read-only",
                        self.rtype
                    )));
                }
                State::Alias { source, codec } => Some((Arc::clone(source), Arc::clone(codec))),
                State::Direct { .. } | State::Transformed { .. } | State::Intermediate { .. } => {
                    if !self.rtype.kind().accepts(value) {
                        return Err(invalid_target(&self.rtype, value));
                    }
                    None
                }
            }
        };
        if let Some((source, codec)) = delegate {
            let source_type = source.rtype();
            if source_type.is(Modifiers::READONLY) {
                return Err(RelataError::UnsupportedOperation(format!(
                    "aliased relation type {source_type} is read-only"
                )));
            }
            if source_type.is(Modifiers::FINAL) {
                return Err(RelataError::UnsupportedOperation(format!(
                    "aliased relation type {source_type} is final"
                )));
            }
            source.check_assign(&codec.forward(value.clone()))?;
        }
        Ok(())
    }

    // Relation-scoped dispatch for a pending update: own listeners
    // first, then every wrapper with its conversion applied. The
    // originating wrapper of a delegated write is skipped so its
    // listeners fire once.
    pub(crate) fn notify_update(&self, value: &Value, skip: Option<&Relation>) -> Result<()> {
        if self.rtype.is(Modifiers::PRIVATE) {
            return Ok(());
        }
        if let Some(this) = self.this.upgrade() {
            let event = RelationEvent {
                kind: EventKind::Update,
                relation: &this,
                value: Some(value),
            };
            dispatch(&self.listeners_snapshot(), &event)?;
        }
        let wrappers: Vec<Arc<Relation>> = {
            let handles = self.wrappers.lock().unwrap();
            handles.iter().filter_map(|h| h.relation.upgrade()).collect()
        };
        for wrapper in wrappers {
            if let Some(skip) = skip {
                if std::ptr::eq(skip, wrapper.as_ref()) {
                    continue;
                }
            }
            let converted = wrapper.convert_exposed(value.clone());
            wrapper.notify_update(&converted, None)?;
        }
        Ok(())
    }

    // How this wrapper exposes a value of its source; identity for
    // non-wrapper cells.
    fn convert_exposed(&self, source_value: Value) -> Value {
        let codec = match &*self.state.lock().unwrap() {
            State::Alias { codec, .. } | State::View { codec, .. } => Some(Arc::clone(codec)),
            _ => None,
        };
        match codec {
            Some(codec) => codec.inverse(source_value),
            None => source_value,
        }
    }

    // The commit half of a write: all validation and entry-level
    // notification has happened. Delegation into an alias source
    // notifies the source side before its storage changes.
    pub(crate) fn commit_target(&self, value: Value) -> Result<()> {
        enum Commit {
            Store,
            Convert(Arc<dyn Transform>),
            Delegate(Arc<Relation>, Arc<dyn Transform>),
        }
        let plan = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::View { .. } => {
                    return Err(RelataError::UnsupportedOperation(format!(
                        "view relation {} is read-only",
                        self.rtype
                    )));
                }
                State::Alias { source, codec } => {
                    Commit::Delegate(Arc::clone(source), Arc::clone(codec))
                }
                State::Transformed { codec, .. } => Commit::Convert(Arc::clone(codec)),
                State::Direct { .. } | State::Intermediate { .. } => Commit::Store,
            }
        };
        match plan {
            Commit::Store => {
                *self.state.lock().unwrap() = State::Direct { target: value };
                Ok(())
            }
            Commit::Convert(codec) => {
                let stored = codec.forward(value);
                if let State::Transformed { stored: slot, .. } = &mut *self.state.lock().unwrap() {
                    *slot = stored;
                }
                Ok(())
            }
            Commit::Delegate(source, codec) => {
                let converted = codec.forward(value);
                source.notify_update(&converted, Some(self))?;
                source.commit_target(converted)
            }
        }
    }

    /// Registers a writable wrapper of this cell under `rtype` on
    /// `parent`. Reads and writes pass through `codec`
    /// (stored-side = this cell, exposed-side = the wrapper).
    pub fn alias_via(
        &self,
        rtype: &Arc<RelationType>,
        parent: &RelatedObject,
        codec: Arc<dyn Transform>,
    ) -> Result<Arc<Relation>> {
        self.wrap(rtype, parent, codec, false)
    }
    /// [`Relation::alias_via`] with the identity conversion.
    pub fn alias_as(&self, rtype: &Arc<RelationType>, parent: &RelatedObject) -> Result<Arc<Relation>> {
        self.wrap(rtype, parent, Arc::new(Identity), false)
    }
    /// Registers a read-only wrapper of this cell under `rtype` on
    /// `parent`; writes through it fail.
    pub fn view_via(
        &self,
        rtype: &Arc<RelationType>,
        parent: &RelatedObject,
        codec: Arc<dyn Transform>,
    ) -> Result<Arc<Relation>> {
        self.wrap(rtype, parent, codec, true)
    }
    /// [`Relation::view_via`] with the identity conversion.
    pub fn view_as(&self, rtype: &Arc<RelationType>, parent: &RelatedObject) -> Result<Arc<Relation>> {
        self.wrap(rtype, parent, Arc::new(Identity), true)
    }

    fn wrap(
        &self,
        rtype: &Arc<RelationType>,
        parent: &RelatedObject,
        codec: Arc<dyn Transform>,
        readonly: bool,
    ) -> Result<Arc<Relation>> {
        rtype.require_registered()?;
        let source = self.this.upgrade().ok_or_else(|| {
            RelataError::IllegalState("relation is no longer owned by any object".to_owned())
        })?;
        if parent.core.relations.lock().unwrap().contains_key(&rtype.id()) {
            return Err(RelataError::IllegalState(format!(
                "target object already has a {rtype} relation"
            )));
        }
        let state = if readonly {
            State::View { source, codec }
        } else {
            State::Alias { source, codec }
        };
        let wrapper = Relation::create(Arc::clone(rtype), state);
        parent.dispatch_add(&wrapper)?;
        parent
            .core
            .relations
            .lock()
            .unwrap()
            .insert(rtype.id(), Arc::clone(&wrapper));
        self.wrappers.lock().unwrap().push(WrapperHandle {
            relation: Arc::downgrade(&wrapper),
            parent: Arc::downgrade(&parent.core),
        });
        Ok(wrapper)
    }

    pub(crate) fn take_wrappers(&self) -> Vec<WrapperHandle> {
        std::mem::take(&mut *self.wrappers.lock().unwrap())
    }
    pub(crate) fn detach_wrapper(&self, wrapper: &Arc<Relation>) {
        self.wrappers.lock().unwrap().retain(|h| {
            h.relation
                .upgrade()
                .map_or(false, |r| !Arc::ptr_eq(&r, wrapper))
        });
    }

    // Structural duplication for copy semantics; wrappers belong to
    // their source and are not duplicated.
    pub(crate) fn duplicate(&self) -> Option<Arc<Relation>> {
        let cloned = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::Direct { target } => State::Direct {
                    target: target.clone(),
                },
                State::Transformed { stored, codec } => State::Transformed {
                    stored: stored.clone(),
                    codec: Arc::clone(codec),
                },
                State::Intermediate { raw, resolver } => State::Intermediate {
                    raw: raw.clone(),
                    resolver: Arc::clone(resolver),
                },
                State::Alias { .. } | State::View { .. } => return None,
            }
        };
        let duplicate = Relation::create(Arc::clone(&self.rtype), cloned);
        self.meta.copy_relations_to(&duplicate.meta, true);
        Some(duplicate)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if !Arc::ptr_eq(&self.rtype, &other.rtype) {
            return false;
        }
        let states_equal = {
            let a = self.state.lock().unwrap();
            let b = other.state.lock().unwrap();
            match (&*a, &*b) {
                (State::Direct { target: x }, State::Direct { target: y }) => x == y,
                (State::Transformed { stored: x, .. }, State::Transformed { stored: y, .. }) => {
                    x == y
                }
                (State::Intermediate { raw: x, .. }, State::Intermediate { raw: y, .. }) => x == y,
                (State::Alias { source: x, .. }, State::Alias { source: y, .. })
                | (State::View { source: x, .. }, State::View { source: y, .. }) => {
                    Arc::ptr_eq(x, y)
                }
                _ => false,
            }
        };
        states_equal && self.meta == other.meta
    }
}
impl Eq for Relation {}

impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rtype.id().hash(state);
        {
            let cell = self.state.lock().unwrap();
            match &*cell {
                State::Direct { target } => {
                    0u8.hash(state);
                    target.hash(state);
                }
                State::Transformed { stored, .. } => {
                    1u8.hash(state);
                    stored.hash(state);
                }
                State::Intermediate { raw, .. } => {
                    2u8.hash(state);
                    raw.hash(state);
                }
                State::Alias { source, .. } => {
                    3u8.hash(state);
                    (Arc::as_ptr(source) as usize).hash(state);
                }
                State::View { source, .. } => {
                    4u8.hash(state);
                    (Arc::as_ptr(source) as usize).hash(state);
                }
            }
        }
        self.meta.hash(state);
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = self.rtype.name().unwrap_or("<unregistered>");
        let state = self.state.lock().unwrap();
        match &*state {
            State::Direct { target } => write!(f, "{} = {}", name, target),
            State::Transformed { stored, codec } => {
                write!(f, "{} = {}", name, codec.inverse(stored.clone()))
            }
            State::Intermediate { raw, .. } => write!(f, "{} = {} (deferred)", name, raw),
            State::Alias { source, .. } => write!(f, "{} -> {}", name, source.rtype()),
            State::View { source, .. } => write!(f, "{} => {}", name, source.rtype()),
        }
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Relation({self})")
    }
}

// ------------- RelatedObject -------------
pub(crate) struct ObjectCore {
    pub(crate) relations: Mutex<RelationMap>,
    pub(crate) listeners: Mutex<Vec<Listener>>,
}

/// A container of relations keyed by relation type: at most one cell
/// per type, enumerated in insertion order.
///
/// The container is a cheap handle over shared state, so clones refer
/// to the same relations. Equality is deep over the relation map.
#[derive(Clone)]
pub struct RelatedObject {
    core: Arc<ObjectCore>,
}

impl RelatedObject {
    pub fn new() -> Self {
        Self {
            core: Arc::new(ObjectCore {
                relations: Mutex::new(RelationMap::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The target of the type's relation on this object. An absent
    /// relation first consults the type's initial value, which when
    /// present is persisted as a new direct cell (a side-effecting
    /// read); otherwise the type's default answers without any state
    /// change. Use [`RelatedObject::has`] to probe existence.
    pub fn get(&self, rtype: &Arc<RelationType>) -> Option<Value> {
        assert!(
            rtype.is_registered(),
            "relation type used before registration"
        );
        let id = rtype.id();
        let existing = self.core.relations.lock().unwrap().get(&id).cloned();
        if let Some(relation) = existing {
            return Some(relation.target());
        }
        if let Some(initial) = rtype.initial_value(self) {
            let relation = Relation::direct(Arc::clone(rtype), initial.clone());
            self.core
                .relations
                .lock()
                .unwrap()
                .insert(id, relation);
            return Some(initial);
        }
        rtype.default_value(self)
    }

    /// Whether a relation of the type exists. Never materializes
    /// initial values and never consults defaults.
    pub fn has(&self, rtype: &Arc<RelationType>) -> bool {
        self.core
            .relations
            .lock()
            .unwrap()
            .contains_key(&rtype.id())
    }

    /// The raw cell, private types included. No side effects.
    pub fn relation(&self, rtype: &Arc<RelationType>) -> Option<Arc<Relation>> {
        self.core.relations.lock().unwrap().get(&rtype.id()).cloned()
    }

    /// All non-private cells in insertion order, optionally filtered.
    pub fn relations(&self, filter: Option<&dyn Fn(&Arc<Relation>) -> bool>) -> Vec<Arc<Relation>> {
        self.core
            .relations
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.rtype().is(Modifiers::PRIVATE))
            .filter(|r| filter.map_or(true, |f| f(r)))
            .cloned()
            .collect()
    }

    /// Sets the target of the type's relation, creating a direct cell
    /// when absent. Validation (modifiers, target kind, immutability)
    /// and all listener dispatch happen before anything is committed,
    /// so a failure leaves no observable change.
    pub fn set(&self, rtype: &Arc<RelationType>, value: impl Into<Value>) -> Result<Arc<Relation>> {
        rtype.require_registered()?;
        if rtype.is(Modifiers::READONLY) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {rtype} is read-only"
            )));
        }
        let value = value.into();
        let id = rtype.id();
        let existing = self.core.relations.lock().unwrap().get(&id).cloned();
        if let Some(relation) = existing {
            if rtype.is(Modifiers::FINAL) {
                return Err(RelataError::UnsupportedOperation(format!(
                    "relation type {rtype} is final and already set"
                )));
            }
            relation.check_assign(&value)?;
            if !rtype.is(Modifiers::PRIVATE) {
                let event = RelationEvent {
                    kind: EventKind::Update,
                    relation: &relation,
                    value: Some(&value),
                };
                dispatch(&self.object_listeners(), &event)?;
                relation.notify_update(&value, None)?;
                dispatch(&rtype.listeners_snapshot(), &event)?;
            }
            relation.commit_target(value)?;
            return Ok(relation);
        }
        if !rtype.kind().accepts(&value) {
            return Err(invalid_target(rtype, &value));
        }
        let relation = Relation::direct(Arc::clone(rtype), value);
        self.dispatch_add(&relation)?;
        self.core
            .relations
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&relation));
        Ok(relation)
    }

    /// Creates a deferred cell holding a raw value and a one-way
    /// resolver; the conversion runs on the first read. Only legal
    /// while the type is absent, so an existing cell's value cannot be
    /// silently discarded.
    pub fn set_deferred(
        &self,
        rtype: &Arc<RelationType>,
        resolver: Arc<dyn Resolve>,
        raw: Value,
    ) -> Result<Arc<Relation>> {
        rtype.require_registered()?;
        if rtype.is(Modifiers::READONLY) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {rtype} is read-only"
            )));
        }
        let id = rtype.id();
        if self.core.relations.lock().unwrap().contains_key(&id) {
            return Err(RelataError::IllegalState(format!(
                "a {rtype} relation is already present; deferred cells cannot replace it"
            )));
        }
        let relation = Relation::deferred(Arc::clone(rtype), resolver, raw);
        self.dispatch_add(&relation)?;
        self.core
            .relations
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&relation));
        Ok(relation)
    }

    /// Replaces the type's cell with a transformed cell whose stored
    /// representation is `codec.forward` of the prior target (or of
    /// the type's initial value when absent). Wrappers cannot be
    /// transformed in place.
    pub fn transform(
        &self,
        rtype: &Arc<RelationType>,
        codec: Arc<dyn Transform>,
    ) -> Result<Arc<Relation>> {
        rtype.require_registered()?;
        if rtype.is(Modifiers::READONLY) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {rtype} is read-only"
            )));
        }
        let id = rtype.id();
        let existing = self.core.relations.lock().unwrap().get(&id).cloned();
        let seed = match &existing {
            Some(relation) => {
                if relation.is_wrapper() {
                    return Err(RelataError::IllegalState(
                        "alias and view relations cannot be transformed in place".to_owned(),
                    ));
                }
                if rtype.is(Modifiers::FINAL) {
                    return Err(RelataError::UnsupportedOperation(format!(
                        "relation type {rtype} is final and already set"
                    )));
                }
                relation.target()
            }
            None => rtype.initial_value(self).unwrap_or(Value::Null),
        };
        let relation = Relation::transformed(Arc::clone(rtype), codec.forward(seed), codec);
        if let Some(old) = existing {
            old.meta().copy_relations_to(relation.meta(), true);
        }
        self.core
            .relations
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&relation));
        Ok(relation)
    }

    /// Deletes the type's relation. The type-level delete guard and
    /// every listener scope may veto; afterwards all aliases and views
    /// of the cell are removed from their objects as well. Returns
    /// whether a relation existed.
    pub fn delete(&self, rtype: &Arc<RelationType>) -> Result<bool> {
        rtype.require_registered()?;
        let id = rtype.id();
        let existing = self.core.relations.lock().unwrap().get(&id).cloned();
        let Some(relation) = existing else {
            return Ok(false);
        };
        if rtype.is(Modifiers::FINAL) {
            return Err(RelataError::UnsupportedOperation(format!(
                "relation type {rtype} is final and cannot be deleted"
            )));
        }
        rtype.check_delete(self, &relation)?;
        if !rtype.is(Modifiers::PRIVATE) {
            let event = RelationEvent {
                kind: EventKind::Remove,
                relation: &relation,
                value: None,
            };
            dispatch(&self.object_listeners(), &event)?;
            dispatch(&relation.listeners_snapshot(), &event)?;
            dispatch(&rtype.listeners_snapshot(), &event)?;
        }
        self.core.relations.lock().unwrap().shift_remove(&id);
        if let Some(source) = relation.source() {
            source.detach_wrapper(&relation);
        }
        cascade_remove(&relation);
        Ok(true)
    }

    /// Deletes exactly this cell, if it is the one registered here.
    pub fn delete_relation(&self, relation: &Arc<Relation>) -> Result<bool> {
        let rtype = relation.rtype();
        let entry = self.core.relations.lock().unwrap().get(&rtype.id()).cloned();
        match entry {
            Some(kept) if Arc::ptr_eq(&kept, relation) => self.delete(&rtype),
            _ => Ok(false),
        }
    }

    /// Listeners notified of every relation mutation on this object.
    pub fn add_listener(&self, listener: Listener) {
        self.core.listeners.lock().unwrap().push(listener);
    }

    /// Structural duplication of all non-wrapper cells (annotations
    /// included) onto `target`. No listener dispatch and no modifier
    /// gating: this replicates state rather than performing mutations.
    pub fn copy_relations_to(&self, target: &RelatedObject, replace: bool) {
        let snapshot: Vec<Arc<Relation>> = self
            .core
            .relations
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for relation in snapshot {
            let id = relation.rtype().id();
            if !replace && target.core.relations.lock().unwrap().contains_key(&id) {
                continue;
            }
            if let Some(duplicate) = relation.duplicate() {
                target
                    .core
                    .relations
                    .lock()
                    .unwrap()
                    .insert(id, duplicate);
            }
        }
    }

    /// Number of cells, private types included.
    pub fn len(&self) -> usize {
        self.core.relations.lock().unwrap().len()
    }
    pub fn is_empty(&self) -> bool {
        self.core.relations.lock().unwrap().is_empty()
    }

    fn object_listeners(&self) -> Vec<Listener> {
        self.core.listeners.lock().unwrap().clone()
    }

    pub(crate) fn dispatch_add(&self, relation: &Arc<Relation>) -> Result<()> {
        let rtype = relation.rtype();
        if rtype.is(Modifiers::PRIVATE) {
            return Ok(());
        }
        let event = RelationEvent {
            kind: EventKind::Add,
            relation,
            value: None,
        };
        dispatch(&self.object_listeners(), &event)?;
        dispatch(&rtype.listeners_snapshot(), &event)
    }

    // Structural insert used by deserialization and reconstruction.
    pub(crate) fn adopt(&self, relation: Arc<Relation>) {
        self.core
            .relations
            .lock()
            .unwrap()
            .insert(relation.rtype().id(), relation);
    }
}

// Removes every wrapper of a deleted cell from its object, and their
// wrappers in turn. The primary mutation has already committed, so
// listener errors here are logged rather than propagated.
fn cascade_remove(relation: &Arc<Relation>) {
    for handle in relation.take_wrappers() {
        let Some(wrapper) = handle.relation.upgrade() else {
            continue;
        };
        let parent = handle.parent.upgrade();
        if !wrapper.rtype().is(Modifiers::PRIVATE) {
            let event = RelationEvent {
                kind: EventKind::Remove,
                relation: &wrapper,
                value: None,
            };
            let mut listeners = Vec::new();
            if let Some(core) = &parent {
                listeners.extend(core.listeners.lock().unwrap().iter().cloned());
            }
            listeners.extend(wrapper.listeners_snapshot());
            listeners.extend(wrapper.rtype().listeners_snapshot());
            if let Err(error) = dispatch(&listeners, &event) {
                warn!(%error, relation = %wrapper, "listener error during cascaded removal");
            }
        }
        if let Some(core) = parent {
            core.relations
                .lock()
                .unwrap()
                .shift_remove(&wrapper.rtype().id());
        }
        cascade_remove(&wrapper);
    }
}

impl Default for RelatedObject {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for RelatedObject {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.core, &other.core) {
            return true;
        }
        let a = self.core.relations.lock().unwrap();
        let b = other.core.relations.lock().unwrap();
        *a == *b
    }
}
impl Eq for RelatedObject {}

// The relation map compares without regard to order, so the hash folds
// per-entry hashes commutatively.
impl Hash for RelatedObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let map = self.core.relations.lock().unwrap();
        let mut acc: u64 = 0;
        for (id, relation) in map.iter() {
            let mut entry = SeaHasher::new();
            id.hash(&mut entry);
            relation.hash(&mut entry);
            acc = acc.wrapping_add(entry.finish());
        }
        state.write_u64(acc);
    }
}

impl fmt::Display for RelatedObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = String::new();
        for relation in self.relations(None) {
            s += &(relation.to_string() + ", ");
        }
        s.pop();
        s.pop();
        write!(f, "{{{}}}", s)
    }
}

impl fmt::Debug for RelatedObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RelatedObject{self}")
    }
}

// ------------- Relatable -------------
/// The capability contract for anything that carries relations.
/// Implementors embed (or are) a [`RelatedObject`] and surface it via
/// [`Relatable::container`]; every operation has a default delegating
/// implementation.
pub trait Relatable {
    fn container(&self) -> &RelatedObject;

    fn get(&self, rtype: &Arc<RelationType>) -> Option<Value> {
        self.container().get(rtype)
    }
    fn has(&self, rtype: &Arc<RelationType>) -> bool {
        self.container().has(rtype)
    }
    fn relation(&self, rtype: &Arc<RelationType>) -> Option<Arc<Relation>> {
        self.container().relation(rtype)
    }
    fn relations(&self, filter: Option<&dyn Fn(&Arc<Relation>) -> bool>) -> Vec<Arc<Relation>> {
        self.container().relations(filter)
    }
    fn set(&self, rtype: &Arc<RelationType>, value: Value) -> Result<Arc<Relation>> {
        self.container().set(rtype, value)
    }
    fn set_deferred(
        &self,
        rtype: &Arc<RelationType>,
        resolver: Arc<dyn Resolve>,
        raw: Value,
    ) -> Result<Arc<Relation>> {
        self.container().set_deferred(rtype, resolver, raw)
    }
    fn transform(&self, rtype: &Arc<RelationType>, codec: Arc<dyn Transform>) -> Result<Arc<Relation>> {
        self.container().transform(rtype, codec)
    }
    fn delete(&self, rtype: &Arc<RelationType>) -> Result<bool> {
        self.container().delete(rtype)
    }
    fn listen(&self, listener: Listener) {
        self.container().add_listener(listener)
    }
}

impl Relatable for RelatedObject {
    fn container(&self) -> &RelatedObject {
        self
    }
}

impl Relatable for RelationType {
    fn container(&self) -> &RelatedObject {
        self.meta()
    }
}

impl Relatable for Relation {
    fn container(&self) -> &RelatedObject {
        self.meta()
    }
}
