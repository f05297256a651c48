//! End-to-end marshaling scenarios against the in-process engine

use gdmarshal::config::Config;
use gdmarshal::handle::kinds::{Array, Dictionary};
use gdmarshal::testing::{mock_api, CountingAllocator, MockEngine};
use gdmarshal::{
    resolve_operator, resolve_type, Error, Handle, Lifetime, MisusePolicy, Operator, Variant,
    VariantType, MAX_ARGS,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

proptest! {
    #[test]
    fn frame_round_trips_any_prefix(words in prop::collection::vec(any::<usize>(), 0..=MAX_ARGS)) {
        let setup = mock_api(MisusePolicy::Error);
        let mut frame = setup.api.new_frame().unwrap();
        for (i, &word) in words.iter().enumerate() {
            frame.set(i, word);
        }
        for (i, &word) in words.iter().enumerate() {
            prop_assert_eq!(frame.read(i), word);
        }
        for i in words.len()..MAX_ARGS {
            prop_assert_eq!(frame.read(i), 0);
        }
    }

    #[test]
    fn slot_past_capacity_is_rejected(index in MAX_ARGS..usize::MAX) {
        let setup = mock_api(MisusePolicy::Error);
        let mut frame = setup.api.new_frame().unwrap();
        let rejected = matches!(frame.try_set(index, 1), Err(Error::SlotOutOfRange { .. }));
        prop_assert!(rejected);
    }

    #[test]
    fn int_values_survive_the_engine(value in any::<i64>()) {
        let setup = mock_api(MisusePolicy::Error);
        let lifetime = Lifetime::new(&setup.api);
        let v = Variant::new(&lifetime, value).unwrap();
        prop_assert_eq!(v.to::<i64>().unwrap(), value);
    }
}

#[test]
fn type_names_resolve_stably_and_distinctly() {
    let first: Vec<_> = VariantType::ALL
        .iter()
        .map(|ty| resolve_type(ty.name()).unwrap())
        .collect();
    let second: Vec<_> = VariantType::ALL
        .iter()
        .map(|ty| resolve_type(ty.name()).unwrap())
        .collect();
    assert_eq!(first, second);
    assert_eq!(first.iter().collect::<HashSet<_>>().len(), VariantType::COUNT);
}

#[test]
fn operator_names_resolve_distinctly() {
    let tags: HashSet<_> = Operator::ALL
        .iter()
        .map(|op| resolve_operator(op.name()).unwrap())
        .collect();
    assert_eq!(tags.len(), Operator::COUNT);
    assert!(resolve_operator("Concat").is_err());
}

#[test]
fn iterate_one_two_three() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    let array = setup.engine.new_array(&lifetime, &[1, 2, 3]).unwrap();
    let mut iter = array.iter().unwrap();

    for expected in 1..=3i64 {
        assert!(iter.next().unwrap());
        assert_eq!(iter.value(&lifetime).unwrap().to::<i64>().unwrap(), expected);
    }
    assert!(!iter.next().unwrap());
    assert!(iter.value(&lifetime).is_err());
}

#[test]
fn default_vector3i_matches_resolved_tag() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    let before = setup.allocator.outstanding();

    let v = Variant::construct(&lifetime, VariantType::Vector3i).unwrap();
    assert_eq!(v.ty().unwrap(), resolve_type("Vector3i").unwrap());
    assert_eq!(v.raw().unwrap().tag(), resolve_type("Vector3i").unwrap().tag());
    v.free().unwrap();

    assert_eq!(setup.allocator.outstanding(), before);
}

#[test]
fn ending_a_lifetime_drains_every_allocation() {
    let setup = mock_api(MisusePolicy::Error);
    assert_eq!(setup.allocator.outstanding(), 0);
    {
        let lifetime = Lifetime::new(&setup.api);
        for i in 0..8 {
            setup.engine.new_array(&lifetime, &[i, i + 1]).unwrap();
            Variant::new(&lifetime, gdmarshal::variant::Transform3D::default()).unwrap();
            Handle::<Dictionary>::construct(&lifetime).unwrap();
        }
        let frame = setup.api.new_frame().unwrap();
        assert!(setup.allocator.outstanding() > 0);
        frame.free();
        assert_eq!(lifetime.len(), 24);
    }
    assert_eq!(setup.allocator.outstanding(), 0);
    assert_eq!(setup.engine.live_objects(), 0);
}

#[test]
fn free_then_end_does_not_double_free() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    let a = setup.engine.new_array(&lifetime, &[1]).unwrap();
    let b = Handle::<Array>::construct(&lifetime).unwrap();
    a.free().unwrap();
    b.free().unwrap();
    assert_eq!(setup.allocator.outstanding(), 0);
    assert_eq!(lifetime.end(), 0);
    assert_eq!(setup.allocator.outstanding(), 0);
}

#[test]
fn nested_lifetimes_release_inner_to_outer() {
    let setup = mock_api(MisusePolicy::Error);
    let outer = Lifetime::new(&setup.api);
    let inner = outer.nest().unwrap();
    let innermost = inner.nest().unwrap();
    Variant::new(&outer, 100i64).unwrap();
    Variant::new(&innermost, 300i64).unwrap();
    Variant::new(&inner, 200i64).unwrap();

    drop(outer);
    assert_eq!(setup.engine.destroyed_ints(), vec![300, 200, 100]);
    assert!(inner.is_ended());
    assert!(innermost.is_ended());
}

#[test]
fn results_outlive_their_call_scope() {
    let setup = mock_api(MisusePolicy::Error);
    let results = Lifetime::new(&setup.api);
    let sum = {
        let scratch = Lifetime::new(&setup.api);
        let a = Variant::new(&scratch, 19i64).unwrap();
        let b = Variant::new(&scratch, 23i64).unwrap();
        a.evaluate(Operator::Add, Some(&b), &results).unwrap()
    };
    assert_eq!(sum.to::<i64>().unwrap(), 42);
}

#[test]
fn double_release_panics_when_configured() {
    let setup = mock_api(MisusePolicy::Panic);
    let lifetime = Lifetime::new(&setup.api);
    let v = Variant::new(&lifetime, 1i64).unwrap();
    lifetime.end();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| v.free()));
    assert!(outcome.is_err());
}

#[test]
fn init_from_config_file() {
    let mut metadata = tempfile::NamedTempFile::new().unwrap();
    write!(
        metadata,
        r#"{{ "builtin_classes": [{{ "name": "int", "operators": [
            {{ "name": "Add", "right_type": "int", "return_type": "int" }}
        ] }}] }}"#
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("gdmarshal.toml");
    std::fs::write(
        &config_path,
        format!(
            "[registry]\nmetadata = {:?}\n\n[handles]\nmisuse = \"error\"\n",
            metadata.path().to_string_lossy()
        ),
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    let allocator = Arc::new(CountingAllocator::new());
    let engine = Arc::new(MockEngine::new(allocator.clone()));
    let api = gdmarshal::init(&config, engine, allocator).unwrap();
    assert_eq!(api.registry().operator_count(), 1);
    assert_eq!(api.misuse_policy(), MisusePolicy::Error);
}

#[test]
fn init_fails_on_unknown_metadata_name() {
    let mut metadata = tempfile::NamedTempFile::new().unwrap();
    write!(metadata, r#"{{ "builtin_classes": [{{ "name": "Quaternion2" }}] }}"#).unwrap();

    let mut config = Config::default();
    config.registry.metadata = Some(metadata.path().to_path_buf());
    let allocator = Arc::new(CountingAllocator::new());
    let engine = Arc::new(MockEngine::new(allocator.clone()));
    let err = gdmarshal::init(&config, engine, allocator).unwrap_err();
    assert!(matches!(err, Error::UnknownType(ref name) if name == "Quaternion2"));
}
