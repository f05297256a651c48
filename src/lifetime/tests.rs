use super::*;
use crate::config::MisusePolicy;
use crate::testing::mock_api;
use crate::variant::Variant;

#[test]
fn new_lifetime_is_empty() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    assert!(lifetime.is_empty());
    assert!(!lifetime.is_ended());
    assert_eq!(lifetime.depth(), 0);
    assert!(Arc::ptr_eq(lifetime.api(), &setup.api));
}

#[test]
fn ids_are_unique() {
    let setup = mock_api(MisusePolicy::Error);
    let a = Lifetime::new(&setup.api);
    let b = Lifetime::new(&setup.api);
    let c = a.nest().unwrap();
    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert_ne!(b.id(), c.id());
}

#[test]
fn end_releases_every_value() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    for i in 0..5 {
        Variant::new(&lifetime, i as i64).unwrap();
    }
    setup.engine.new_array(&lifetime, &[1, 2]).unwrap();
    assert_eq!(lifetime.len(), 6);
    assert_eq!(lifetime.end(), 6);
    assert_eq!(setup.engine.destroyed_ints().len(), 5);
    assert_eq!(setup.engine.live_objects(), 0);
}

#[test]
fn drop_ends_lifetime() {
    let setup = mock_api(MisusePolicy::Error);
    {
        let lifetime = Lifetime::new(&setup.api);
        setup.engine.new_array(&lifetime, &[1]).unwrap();
        assert_eq!(setup.engine.live_objects(), 1);
    }
    assert_eq!(setup.engine.live_objects(), 0);
}

#[test]
fn individually_freed_values_are_not_released_again() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    let a = Variant::new(&lifetime, 1i64).unwrap();
    let _b = Variant::new(&lifetime, 2i64).unwrap();
    a.free().unwrap();
    assert_eq!(lifetime.len(), 1);
    assert_eq!(lifetime.end(), 1);
    assert_eq!(setup.engine.destroyed_ints(), vec![1, 2]);
}

#[test]
fn freed_slots_are_reused() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    for i in 0..100 {
        Variant::new(&lifetime, i as i64).unwrap().free().unwrap();
    }
    assert!(lifetime.is_empty());
    assert_eq!(lifetime.scope().state.lock().entries.len(), 1);
}

#[test]
fn nested_lifetimes_release_inner_first() {
    let setup = mock_api(MisusePolicy::Error);
    let outer = Lifetime::new(&setup.api);
    Variant::new(&outer, 1i64).unwrap();
    let middle = outer.nest().unwrap();
    Variant::new(&middle, 2i64).unwrap();
    let inner = middle.nest().unwrap();
    Variant::new(&inner, 3i64).unwrap();
    assert_eq!(inner.depth(), 2);

    assert_eq!(outer.end(), 3);
    assert_eq!(setup.engine.destroyed_ints(), vec![3, 2, 1]);
    assert!(middle.is_ended());
    assert!(inner.is_ended());
}

#[test]
fn ending_child_leaves_parent_alive() {
    let setup = mock_api(MisusePolicy::Error);
    let parent = Lifetime::new(&setup.api);
    let kept = Variant::new(&parent, 10i64).unwrap();
    let child = parent.nest().unwrap();
    Variant::new(&child, 20i64).unwrap();

    assert_eq!(child.end(), 1);
    assert!(!parent.is_ended());
    assert_eq!(kept.to::<i64>().unwrap(), 10);
    assert_eq!(setup.engine.destroyed_ints(), vec![20]);
}

#[test]
fn ended_lifetime_rejects_new_values() {
    let setup = mock_api(MisusePolicy::Error);
    let parent = Lifetime::new(&setup.api);
    let child = parent.nest().unwrap();
    parent.end();

    let err = Variant::new(&child, 5i64).unwrap_err();
    assert!(matches!(err, Error::LifetimeEnded(id) if id == child.id()));
    // the value created for the failed bind is destroyed, not leaked
    assert_eq!(setup.engine.destroyed_ints(), vec![5]);

    assert!(matches!(child.nest(), Err(Error::LifetimeEnded(_))));
}

#[test]
fn end_twice_is_noop() {
    let setup = mock_api(MisusePolicy::Error);
    let parent = Lifetime::new(&setup.api);
    let child = parent.nest().unwrap();
    Variant::new(&child, 1i64).unwrap();
    assert_eq!(parent.end(), 1);
    assert_eq!(child.end(), 0);
    assert_eq!(setup.engine.destroyed_ints(), vec![1]);
}

#[test]
fn dropped_children_are_pruned() {
    let setup = mock_api(MisusePolicy::Error);
    let parent = Lifetime::new(&setup.api);
    for _ in 0..10 {
        parent.nest().unwrap();
    }
    let _live = parent.nest().unwrap();
    assert_eq!(parent.scope().state.lock().children.len(), 1);
}
