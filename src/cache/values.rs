//! Per-render memoization of parameter reads.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::foundation::core::{DimIdx, KnobId, TimeValue, ViewIdx};
use crate::project::curve::Curve;

/// Identity of one memoized read of a knob.
///
/// Ordered by view, then dimension, then time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub time: TimeValue,
    pub dimension: DimIdx,
    pub view: ViewIdx,
}

impl CacheKey {
    pub fn new(time: TimeValue, dimension: DimIdx, view: ViewIdx) -> Self {
        Self {
            time,
            dimension,
            view,
        }
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.view
            .cmp(&other.view)
            .then(self.dimension.cmp(&other.dimension))
            .then(self.time.cmp(&other.time))
    }
}

type Table<T> = HashMap<KnobId, BTreeMap<CacheKey, T>>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for i32 {}
    impl Sealed for f64 {}
    impl Sealed for String {}
}

/// Value types a knob can be cached as. Each type has its own table.
pub trait CachedValue: Clone + sealed::Sealed {
    #[doc(hidden)]
    fn table(cache: &RenderValuesCache) -> &Table<Self>;
    #[doc(hidden)]
    fn table_mut(cache: &mut RenderValuesCache) -> &mut Table<Self>;
}

macro_rules! cached_value {
    ($ty:ty, $field:ident) => {
        impl CachedValue for $ty {
            fn table(cache: &RenderValuesCache) -> &Table<Self> {
                &cache.$field
            }
            fn table_mut(cache: &mut RenderValuesCache) -> &mut Table<Self> {
                &mut cache.$field
            }
        }
    };
}

cached_value!(bool, bools);
cached_value!(i32, ints);
cached_value!(f64, doubles);
cached_value!(String, strings);

/// Hit/miss counters of one cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Values read during one render evaluation.
///
/// Entries are never invalidated: the cache lives exactly as long as the render scope it is
/// attached to and is dropped wholesale afterwards. The type is `!Sync` and carries no locking;
/// every worker thread owns its own instance.
#[derive(Debug, Default)]
pub struct RenderValuesCache {
    bools: Table<bool>,
    ints: Table<i32>,
    doubles: Table<f64>,
    strings: Table<String>,
    curves: HashMap<(KnobId, DimIdx), Arc<Curve>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl RenderValuesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a previously stored value. A miss is the normal "not computed yet" state.
    pub fn get_cached_value<T: CachedValue>(
        &self,
        knob: KnobId,
        time: TimeValue,
        dimension: DimIdx,
        view: ViewIdx,
    ) -> Option<T> {
        let found = T::table(self)
            .get(&knob)
            .and_then(|m| m.get(&CacheKey::new(time, dimension, view)))
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.set(counter.get() + 1);
        found
    }

    /// Store a value, replacing any previous one for the same key.
    pub fn set_cached_value<T: CachedValue>(
        &mut self,
        knob: KnobId,
        time: TimeValue,
        dimension: DimIdx,
        view: ViewIdx,
        value: T,
    ) {
        T::table_mut(self)
            .entry(knob)
            .or_default()
            .insert(CacheKey::new(time, dimension, view), value);
    }

    /// Return the curve cloned for `(knob, dimension)`, cloning `source` on first request.
    ///
    /// Later calls return the same clone whatever `source` is, so one render sees a single
    /// shape even if the live curve changes meanwhile.
    pub fn get_or_create_cached_parametric_curve(
        &mut self,
        knob: KnobId,
        dimension: DimIdx,
        source: &Curve,
    ) -> Arc<Curve> {
        self.curves
            .entry((knob, dimension))
            .or_insert_with(|| Arc::new(source.clone()))
            .clone()
    }

    /// Number of stored values across all types, curves excluded.
    pub fn len(&self) -> usize {
        fn count<T>(t: &Table<T>) -> usize {
            t.values().map(BTreeMap::len).sum()
        }
        count(&self.bools) + count(&self.ints) + count(&self.doubles) + count(&self.strings)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.curves.is_empty()
    }

    pub fn cached_curve_count(&self) -> usize {
        self.curves.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/values.rs"]
mod tests;
