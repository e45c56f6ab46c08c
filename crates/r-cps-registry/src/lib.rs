//! ---
//! cps_section: "03-entity-registry"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Typed entity/component storage for co-simulation agents."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Entity/component registry.
//!
//! Components are stored per kind (one map per component type) and keyed
//! by [`Entity`], with at most one component of a given kind per entity.
//! The registry is single-threaded and shared between agent tasks via
//! `Rc`; borrows are checked dynamically, so holding a component borrow
//! across a structural mutation of the same kind is detected at runtime
//! instead of corrupting iteration.
//!
//! Agent tasks must release component borrows before awaiting: the next
//! resumed task may mutate the same component. [`Components::entities`]
//! exists for exactly that pattern — snapshot the ids first, then
//! re-borrow one entity at a time between suspension points.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// Identifier of a simulated entity, allocated monotonically by the
/// registry and never reused within its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u64);

impl Entity {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

type Store<K> = Rc<RefCell<IndexMap<Entity, K>>>;

/// Cheap per-kind handle into the registry.
///
/// Cloning shares the underlying store; agents typically grab the
/// handles they need once at startup and keep them across the task body.
pub struct Components<K> {
    store: Store<K>,
}

impl<K> Clone for Components<K> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl<K: 'static> Components<K> {
    /// Borrow entity `e`'s component, if attached. The borrow is valid
    /// until the next structural mutation of this kind.
    pub fn get(&self, e: Entity) -> Option<Ref<'_, K>> {
        let map = self.store.borrow();
        if map.contains_key(&e) {
            Some(Ref::map(map, |m| m.get(&e).expect("checked above")))
        } else {
            None
        }
    }

    /// Mutably borrow entity `e`'s component, if attached.
    pub fn get_mut(&self, e: Entity) -> Option<RefMut<'_, K>> {
        let map = self.store.borrow_mut();
        if map.contains_key(&e) {
            Some(RefMut::map(map, |m| m.get_mut(&e).expect("checked above")))
        } else {
            None
        }
    }

    /// Attach (or replace) the component on entity `e`.
    pub fn attach(&self, e: Entity, value: K) {
        self.store.borrow_mut().insert(e, value);
    }

    /// Remove the component from entity `e`, returning it if present.
    pub fn detach(&self, e: Entity) -> Option<K> {
        self.store.borrow_mut().shift_remove(&e)
    }

    /// Visit every `(entity, &component)` pair. The store is pinned for
    /// the duration of the call: structurally modifying this kind from
    /// inside `f` panics rather than invalidating the iteration.
    pub fn for_each(&self, mut f: impl FnMut(Entity, &K)) {
        let map = self.store.borrow();
        for (&entity, component) in map.iter() {
            f(entity, component);
        }
    }

    /// Visit every `(entity, &mut component)` pair, with the same
    /// pinning rule as [`Components::for_each`].
    pub fn for_each_mut(&self, mut f: impl FnMut(Entity, &mut K)) {
        let mut map = self.store.borrow_mut();
        for (&entity, component) in map.iter_mut() {
            f(entity, component);
        }
    }

    /// Snapshot the ids carrying this kind, for re-borrowing one entity
    /// at a time across suspension points.
    pub fn entities(&self) -> Vec<Entity> {
        self.store.borrow().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }
}

/// The component registry: `(component kind) → (entity → value)`.
#[derive(Default)]
pub struct Registry {
    next_entity: RefCell<u64>,
    stores: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh entity id.
    pub fn create_entity(&self) -> Entity {
        let mut next = self.next_entity.borrow_mut();
        *next += 1;
        Entity(*next)
    }

    /// Handle to the store of kind `K`, created on first use.
    pub fn kind<K: 'static>(&self) -> Components<K> {
        let mut stores = self.stores.borrow_mut();
        let entry = stores
            .entry(TypeId::of::<K>())
            .or_insert_with(|| Box::new(Store::<K>::default()));
        let store = entry
            .downcast_ref::<Store<K>>()
            .expect("store indexed by its own TypeId");
        Components {
            store: Rc::clone(store),
        }
    }

    /// Attach (or replace) a `K` component on entity `e`.
    pub fn attach<K: 'static>(&self, e: Entity, value: K) {
        self.kind::<K>().attach(e, value);
    }

    /// Remove the `K` component from entity `e`, if present.
    pub fn detach<K: 'static>(&self, e: Entity) -> Option<K> {
        self.kind::<K>().detach(e)
    }

    /// Visit every entity carrying a `K` component.
    pub fn for_each<K: 'static>(&self, f: impl FnMut(Entity, &K)) {
        self.kind::<K>().for_each(f);
    }

    /// Read entity `e`'s `K` component through a closure. Absent
    /// components yield `None`, never an error.
    pub fn with<K: 'static, R>(&self, e: Entity, f: impl FnOnce(&K) -> R) -> Option<R> {
        self.kind::<K>().get(e).map(|k| f(&k))
    }

    /// Mutate entity `e`'s `K` component through a closure.
    pub fn with_mut<K: 'static, R>(&self, e: Entity, f: impl FnOnce(&mut K) -> R) -> Option<R> {
        self.kind::<K>().get_mut(e).map(|mut k| f(&mut k))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &*self.next_entity.borrow())
            .field("kinds", &self.stores.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Soc(f64);

    #[derive(Debug, PartialEq)]
    struct Label(&'static str);

    #[test]
    fn entity_ids_are_monotonic_and_unique() {
        let registry = Registry::new();
        let a = registry.create_entity();
        let b = registry.create_entity();
        let c = registry.create_entity();
        assert!(a < b && b < c);
    }

    #[test]
    fn at_most_one_component_per_kind_per_entity() {
        let registry = Registry::new();
        let e = registry.create_entity();
        registry.attach(e, Soc(0.5));
        registry.attach(e, Soc(0.8));
        assert_eq!(registry.with(e, |s: &Soc| s.0), Some(0.8));
        assert_eq!(registry.kind::<Soc>().len(), 1);
    }

    #[test]
    fn absent_components_are_none_not_errors() {
        let registry = Registry::new();
        let e = registry.create_entity();
        registry.attach(e, Soc(0.5));
        assert!(registry.kind::<Label>().get(e).is_none());
        assert!(registry.with(e, |l: &Label| l.0).is_none());
    }

    #[test]
    fn detach_removes_only_the_named_kind() {
        let registry = Registry::new();
        let e = registry.create_entity();
        registry.attach(e, Soc(0.5));
        registry.attach(e, Label("ess-1"));
        assert_eq!(registry.detach::<Soc>(e), Some(Soc(0.5)));
        assert!(registry.kind::<Soc>().get(e).is_none());
        assert_eq!(registry.with(e, |l: &Label| l.0), Some("ess-1"));
        assert_eq!(registry.detach::<Soc>(e), None);
    }

    #[test]
    fn for_each_visits_every_pair_in_attach_order() {
        let registry = Registry::new();
        let mut expected = Vec::new();
        for i in 0..5 {
            let e = registry.create_entity();
            registry.attach(e, Soc(i as f64));
            expected.push((e, i as f64));
        }
        let mut seen = Vec::new();
        registry.for_each(|e, soc: &Soc| seen.push((e, soc.0)));
        assert_eq!(seen, expected);
    }

    #[test]
    fn other_kinds_stay_mutable_during_a_for_each() {
        let registry = Registry::new();
        let e = registry.create_entity();
        registry.attach(e, Soc(0.5));
        registry.for_each(|entity, _soc: &Soc| {
            // Structurally modifying a *different* kind is allowed.
            registry.attach(entity, Label("tagged"));
        });
        assert_eq!(registry.with(e, |l: &Label| l.0), Some("tagged"));
    }

    #[test]
    #[should_panic]
    fn structural_modification_of_the_pinned_kind_is_detected() {
        let registry = Registry::new();
        let e = registry.create_entity();
        registry.attach(e, Soc(0.5));
        registry.for_each(|_entity, _soc: &Soc| {
            let other = registry.create_entity();
            registry.attach(other, Soc(0.9));
        });
    }

    #[test]
    fn entity_snapshot_supports_reborrowing() {
        let registry = Registry::new();
        for i in 0..3 {
            let e = registry.create_entity();
            registry.attach(e, Soc(i as f64));
        }
        let socs = registry.kind::<Soc>();
        for e in socs.entities() {
            // Fresh borrow per iteration; attaching between iterations
            // would be fine here.
            let mut soc = socs.get_mut(e).unwrap();
            soc.0 += 1.0;
        }
        let mut total = 0.0;
        socs.for_each(|_, soc| total += soc.0);
        assert_eq!(total, 6.0);
    }

    #[test]
    fn trait_object_components_dispatch_dynamically() {
        trait Named {
            fn name(&self) -> &str;
        }
        struct A;
        impl Named for A {
            fn name(&self) -> &str {
                "a"
            }
        }
        struct B;
        impl Named for B {
            fn name(&self) -> &str {
                "b"
            }
        }

        let registry = Registry::new();
        let e1 = registry.create_entity();
        let e2 = registry.create_entity();
        registry.attach::<Box<dyn Named>>(e1, Box::new(A));
        registry.attach::<Box<dyn Named>>(e2, Box::new(B));

        let mut names = Vec::new();
        registry.for_each(|_, named: &Box<dyn Named>| names.push(named.name().to_owned()));
        assert_eq!(names, vec!["a", "b"]);
    }
}
