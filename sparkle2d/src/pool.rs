//! Typed free-lists for frequently churned value objects.
//!
//! The pool is part of the explicit engine context: every constructor that
//! needs value objects takes `&mut PoolManager` instead of reaching for a
//! global.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use crate::math::{Color, Matrix, Rect, Vec2};

/// A value object that can be recycled by a [`PoolManager`].
pub trait Poolable: Sized + 'static {
    /// Arguments used both to construct and to reinitialize an instance.
    type Args;

    fn create(args: Self::Args) -> Self;

    /// Reinitialize a recycled instance in place.
    fn reset(&mut self, args: Self::Args);
}

/// Free-list for a single type.
pub struct ObjectPool<T> {
    free: Vec<T>,
    max_objects: usize,
}

impl<T: Poolable> ObjectPool<T> {
    pub const DEFAULT_MAX_OBJECTS: usize = 1024;

    pub fn new() -> Self {
        Self::with_max_objects(Self::DEFAULT_MAX_OBJECTS)
    }

    pub fn with_max_objects(max_objects: usize) -> Self {
        Self {
            free: Vec::new(),
            max_objects,
        }
    }

    /// Pop a recycled instance (reset with `args`) or construct a new one.
    pub fn pull(&mut self, args: T::Args) -> T {
        match self.free.pop() {
            Some(mut obj) => {
                obj.reset(args);
                obj
            }
            None => T::create(args),
        }
    }

    /// Returns `false` when the pool is full and the object was dropped.
    pub fn push(&mut self, obj: T) -> bool {
        if self.free.len() < self.max_objects {
            self.free.push(obj);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }
}

impl<T: Poolable> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

trait ErasedPool: Any {
    fn clear(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Poolable> ErasedPool for ObjectPool<T> {
    fn clear(&mut self) {
        ObjectPool::clear(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Registry of object pools keyed by Rust type.
///
/// Acquiring a type that was never registered is a programming error and
/// panics.
pub struct PoolManager {
    pools: HashMap<TypeId, Box<dyn ErasedPool>>,
    recycled: usize,
}

impl PoolManager {
    /// Create an empty manager with no registered types.
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            recycled: 0,
        }
    }

    /// Create a manager with the engine's value types registered.
    pub fn with_defaults() -> Self {
        let mut pool = Self::new();
        pool.register::<Vec2>();
        pool.register::<Matrix>();
        pool.register::<Color>();
        pool.register::<Rect>();
        pool
    }

    /// Register a pool for `T`. Registering twice keeps the existing pool.
    pub fn register<T: Poolable>(&mut self) {
        self.pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ObjectPool::<T>::new()));
    }

    pub fn is_registered<T: Poolable>(&self) -> bool {
        self.pools.contains_key(&TypeId::of::<T>())
    }

    pub fn acquire<T: Poolable>(&mut self, args: T::Args) -> T {
        let reused = !self.pool::<T>().is_empty();
        let obj = self.pool_mut::<T>().pull(args);
        if reused {
            self.recycled = self.recycled.saturating_sub(1);
        }
        obj
    }

    pub fn release<T: Poolable>(&mut self, obj: T) {
        if self.pool_mut::<T>().push(obj) {
            self.recycled += 1;
        }
    }

    /// Release every object yielded by `objs`.
    pub fn release_all<T: Poolable>(&mut self, objs: impl IntoIterator<Item = T>) {
        for obj in objs {
            self.release(obj);
        }
    }

    /// Number of idle instances of `T`.
    pub fn free_len<T: Poolable>(&self) -> usize {
        self.pool::<T>().len()
    }

    /// Total idle instances across all pools.
    pub fn recycled_count(&self) -> usize {
        self.recycled
    }

    /// Drop every idle instance, keeping registrations.
    pub fn purge(&mut self) {
        for pool in self.pools.values_mut() {
            pool.clear();
        }
        self.recycled = 0;
    }

    fn pool<T: Poolable>(&self) -> &ObjectPool<T> {
        self.pools
            .get(&TypeId::of::<T>())
            .unwrap_or_else(|| panic!("pool for `{}` is not registered", type_name::<T>()))
            .as_any()
            .downcast_ref::<ObjectPool<T>>()
            .expect("pool storage type mismatch")
    }

    fn pool_mut<T: Poolable>(&mut self) -> &mut ObjectPool<T> {
        self.pools
            .get_mut(&TypeId::of::<T>())
            .unwrap_or_else(|| panic!("pool for `{}` is not registered", type_name::<T>()))
            .as_any_mut()
            .downcast_mut::<ObjectPool<T>>()
            .expect("pool storage type mismatch")
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
