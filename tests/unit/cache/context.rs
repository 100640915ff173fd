use std::cell::Cell;

use super::*;

fn at(t: f64) -> (KnobId, TimeValue, DimIdx, ViewIdx) {
    (KnobId(1), TimeValue(t), DimIdx(0), ViewIdx(0))
}

#[test]
fn reads_inside_a_scope_compute_once() {
    let calls = Cell::new(0);
    let compute = || {
        calls.set(calls.get() + 1);
        Ok(calls.get() as f64)
    };

    let scope = RenderScope::enter();
    let (k, t, d, v) = at(4.0);
    assert_eq!(read_cached(k, t, d, v, compute).unwrap(), 1.0);
    assert_eq!(read_cached(k, t, d, v, compute).unwrap(), 1.0);
    assert_eq!(calls.get(), 1);

    let cache = scope.finish();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().hits, 1);
    assert!(!in_render_scope());
}

#[test]
fn reads_outside_a_scope_are_not_memoized() {
    assert!(!in_render_scope());
    let calls = Cell::new(0);
    let (k, t, d, v) = at(0.0);
    for _ in 0..2 {
        read_cached(k, t, d, v, || {
            calls.set(calls.get() + 1);
            Ok(true)
        })
        .unwrap();
    }
    assert_eq!(calls.get(), 2);
    assert!(with_values_cache(|c| c.len()).is_none());
}

#[test]
fn failed_compute_stores_nothing() {
    let _scope = RenderScope::enter();
    let (k, t, d, v) = at(1.0);
    let err = read_cached::<i32>(k, t, d, v, || Err(crate::RenderLinkError::render("boom")));
    assert!(err.is_err());
    assert_eq!(with_values_cache(|c| c.len()), Some(0));
}

#[test]
fn nested_scopes_restore_the_outer_cache() {
    let outer = RenderScope::enter();
    let (k, t, d, v) = at(2.0);
    read_cached(k, t, d, v, || Ok(5_i32)).unwrap();
    {
        let _inner = RenderScope::enter();
        assert_eq!(with_values_cache(|c| c.len()), Some(0));
    }
    assert_eq!(with_values_cache(|c| c.len()), Some(1));
    drop(outer);
    assert!(!in_render_scope());
}

#[test]
fn each_thread_has_its_own_cache() {
    let _scope = RenderScope::enter();
    let (k, t, d, v) = at(3.0);
    read_cached(k, t, d, v, || Ok(1.0_f64)).unwrap();
    let seen_elsewhere = std::thread::spawn(|| in_render_scope()).join().unwrap();
    assert!(!seen_elsewhere);
}

#[test]
fn parametric_curve_is_stable_within_a_scope() {
    let a = Curve::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
    let b = Curve::constant(0.5);

    let _scope = RenderScope::enter();
    let first = cached_parametric_curve(KnobId(2), DimIdx(0), &a);
    let second = cached_parametric_curve(KnobId(2), DimIdx(0), &b);
    assert!(Arc::ptr_eq(&first, &second));
}
