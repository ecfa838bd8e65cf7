//! Normalized entity collections
//!
//! An [`EntityStore`] keeps one collection as an ordered sequence plus an
//! id index over the same elements. Both views share the same `Arc` per
//! element, so `store.get(&e.id())` is pointer-identical to `e` for every
//! element of the sequence.
//!
//! Stores are immutable values: every mutation builds a new store, and
//! [`apply_change`] returns the *same* `Arc` when a change carries nothing,
//! so observers can compare collections with [`Arc::ptr_eq`].

use serde::{de::DeserializeOwned, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use api_client::DeltaPackage;

/// A record with a collection-unique string id and a canonical order
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique id within the collection
    fn id(&self) -> &str;

    /// Canonical order of the collection
    ///
    /// Must be a total order; ties are broken by id.
    fn compare(a: &Self, b: &Self) -> Ordering;
}

/// Ordered, id-indexed collection of entities
pub struct EntityStore<T> {
    entities: Vec<Arc<T>>,
    dict: HashMap<String, Arc<T>>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self { entities: Vec::new(), dict: HashMap::new() }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore").field("entities", &self.entities).finish()
    }
}

impl<T: Entity> PartialEq for EntityStore<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.entities.len() == other.entities.len()
            && self.entities.iter().zip(&other.entities).all(|(a, b)| a == b)
    }
}

impl<T: Entity> EntityStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace-all: build a store from a complete list
    ///
    /// When the list holds an id more than once, the last occurrence wins.
    pub fn from_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let entities = dedupe_last_wins(entities.into_iter().collect());
        Self::from_arcs(entities.into_iter().map(Arc::new).collect())
    }

    /// Incremental update: drop removed and re-added ids, append `add`, re-sort
    ///
    /// Re-added ids replace the current element rather than patching it.
    pub fn updated(&self, remove: &[String], add: Vec<T>) -> Self {
        let add = dedupe_last_wins(add);

        let mut entities: Vec<Arc<T>> = {
            let mut dropped: HashSet<&str> = remove.iter().map(String::as_str).collect();
            dropped.extend(add.iter().map(|entity| entity.id()));

            self.entities
                .iter()
                .filter(|entity| !dropped.contains(entity.id()))
                .cloned()
                .collect()
        };
        entities.extend(add.into_iter().map(Arc::new));

        Self::from_arcs(entities)
    }

    fn from_arcs(mut entities: Vec<Arc<T>>) -> Self {
        entities.sort_by(|a, b| T::compare(a, b));
        let dict = entities
            .iter()
            .map(|entity| (entity.id().to_string(), Arc::clone(entity)))
            .collect();

        let store = Self { entities, dict };
        debug_assert!(store.is_consistent());
        store
    }

    /// All entities in canonical order
    pub fn entities(&self) -> &[Arc<T>] {
        &self.entities
    }

    /// Iterate entities in canonical order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entities.iter()
    }

    /// Look up one entity by id
    pub fn get(&self, id: &str) -> Option<&Arc<T>> {
        self.dict.get(id)
    }

    /// Look up many entities by id, skipping unknown ids, in request order
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Arc<T>> {
        ids.iter().filter_map(|id| self.dict.get(id.as_ref()).cloned()).collect()
    }

    /// Check if an id is present
    pub fn contains(&self, id: &str) -> bool {
        self.dict.contains_key(id)
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check that the index and the sequence describe the same element set
    pub fn is_consistent(&self) -> bool {
        self.dict.len() == self.entities.len()
            && self.entities.iter().all(|entity| {
                self.dict.get(entity.id()).is_some_and(|indexed| Arc::ptr_eq(indexed, entity))
            })
    }
}

fn dedupe_last_wins<T: Entity>(entities: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(entities.len());
    let mut unique: Vec<T> = entities
        .into_iter()
        .rev()
        .filter(|entity| seen.insert(entity.id().to_string()))
        .collect();
    unique.reverse();
    unique
}

/// Batch change against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange<T> {
    /// Replace the whole collection with `add`
    pub remove_all: bool,
    /// Ids to remove
    pub remove: Vec<String>,
    /// Entities to add or replace
    pub add: Vec<T>,
}

impl<T> Default for EntityChange<T> {
    fn default() -> Self {
        Self { remove_all: false, remove: Vec::new(), add: Vec::new() }
    }
}

impl<T> EntityChange<T> {
    /// Replace the collection with `entities`
    pub fn replace_all(entities: Vec<T>) -> Self {
        Self { remove_all: true, remove: Vec::new(), add: entities }
    }

    /// Remove `remove`, then add or replace `add`
    pub fn incremental(remove: Vec<String>, add: Vec<T>) -> Self {
        Self { remove_all: false, remove, add }
    }

    /// Check if this change would leave the collection untouched
    pub fn is_empty(&self) -> bool {
        !self.remove_all && self.remove.is_empty() && self.add.is_empty()
    }
}

impl<T> From<DeltaPackage<T>> for EntityChange<T> {
    fn from(package: DeltaPackage<T>) -> Self {
        Self {
            remove_all: package.remove_all_before_insert,
            remove: package.deleted_entities.unwrap_or_default(),
            add: package.changed_entities.unwrap_or_default(),
        }
    }
}

/// Apply a change, returning the same `Arc` when nothing changes
///
/// `remove_all` takes precedence: any `remove` ids are ignored and the
/// collection becomes exactly `add`.
pub fn apply_change<T: Entity>(
    store: &Arc<EntityStore<T>>,
    change: EntityChange<T>,
) -> Arc<EntityStore<T>> {
    if change.is_empty() {
        return Arc::clone(store);
    }

    if change.remove_all {
        Arc::new(EntityStore::from_entities(change.add))
    } else {
        Arc::new(store.updated(&change.remove, change.add))
    }
}
