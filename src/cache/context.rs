//! Thread-local render scope that owns the current [`RenderValuesCache`].

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::cache::values::{CachedValue, RenderValuesCache};
use crate::foundation::core::{DimIdx, KnobId, TimeValue, ViewIdx};
use crate::foundation::error::RenderLinkResult;
use crate::project::curve::Curve;

thread_local! {
    static CURRENT: RefCell<Option<RenderValuesCache>> = const { RefCell::new(None) };
}

/// Attaches a fresh cache to the current thread until dropped.
///
/// Scopes nest: entering a scope while another is active shadows the outer cache, which is
/// restored when the inner scope ends. The guard is `!Send` so it is dropped on the thread that
/// created it.
pub struct RenderScope {
    previous: Option<RenderValuesCache>,
    _thread_bound: PhantomData<*const ()>,
}

impl RenderScope {
    pub fn enter() -> Self {
        let previous = CURRENT.with(|c| c.borrow_mut().replace(RenderValuesCache::new()));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }

    /// End the scope and hand back its cache (for statistics).
    pub fn finish(self) -> RenderValuesCache {
        CURRENT
            .with(|c| c.borrow_mut().take())
            .unwrap_or_default()
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT.try_with(|c| *c.borrow_mut() = previous);
    }
}

pub fn in_render_scope() -> bool {
    CURRENT.with(|c| c.borrow().is_some())
}

/// Run `f` against the current thread's cache, or return `None` outside a render scope.
///
/// `f` must not call back into this module.
pub fn with_values_cache<R>(f: impl FnOnce(&mut RenderValuesCache) -> R) -> Option<R> {
    CURRENT.with(|c| c.borrow_mut().as_mut().map(f))
}

/// Read a knob value through the current cache.
///
/// On a miss `compute` evaluates the value, which is then stored so every later read of the same
/// key in this scope returns it unchanged. Outside a render scope `compute` runs every time.
pub fn read_cached<T: CachedValue>(
    knob: KnobId,
    time: TimeValue,
    dimension: DimIdx,
    view: ViewIdx,
    compute: impl FnOnce() -> RenderLinkResult<T>,
) -> RenderLinkResult<T> {
    if let Some(hit) = with_values_cache(|c| c.get_cached_value::<T>(knob, time, dimension, view)).flatten() {
        return Ok(hit);
    }
    let value = compute()?;
    with_values_cache(|c| c.set_cached_value(knob, time, dimension, view, value.clone()));
    Ok(value)
}

/// Curve to sample for a parametric knob dimension during the current render.
pub fn cached_parametric_curve(knob: KnobId, dimension: DimIdx, source: &Curve) -> Arc<Curve> {
    with_values_cache(|c| c.get_or_create_cached_parametric_curve(knob, dimension, source))
        .unwrap_or_else(|| Arc::new(source.clone()))
}

#[cfg(test)]
#[path = "../../tests/unit/cache/context.rs"]
mod tests;
