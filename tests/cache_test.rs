//! Dedup, ordering and boundedness of the entity cache, fed through the normalizer.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use spinfeed::services::normalizer::{self, PayloadShape};
use spinfeed::services::EntityCache;
use spinfeed::types::{RouletteEntity, SpinColor};

fn entity(payload: Value) -> RouletteEntity {
    normalizer::normalize_entity(&payload).unwrap()
}

fn numbers(cache: &EntityCache, key: &str) -> Vec<u8> {
    cache
        .history(key)
        .unwrap()
        .iter()
        .map(|s| s.number)
        .collect()
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 20, minute, 0).unwrap()
}

#[test]
fn test_new_number_on_top_of_known_history() {
    let cache = EntityCache::new(1000);
    cache.apply(entity(json!({ "id": "r1", "numbers": [15, 10, 5] })));

    let outcome = cache
        .apply(entity(json!({ "id": "r1", "numbers": [20, 15, 10, 5] })))
        .unwrap();

    let new: Vec<u8> = outcome.new_spins.iter().map(|s| s.number).collect();
    assert_eq!(new, vec![20]);
    assert_eq!(numbers(&cache, "r1"), vec![20, 15, 10, 5]);
}

#[test]
fn test_identical_batch_changes_nothing() {
    let cache = EntityCache::new(1000);
    cache.apply(entity(json!({ "id": "r1", "numbers": [15, 10, 5] })));

    let outcome = cache
        .apply(entity(json!({ "id": "r1", "numbers": [15, 10, 5] })))
        .unwrap();

    assert!(outcome.new_spins.is_empty());
    assert!(!outcome.changed);
    assert_eq!(numbers(&cache, "r1"), vec![15, 10, 5]);
}

#[test]
fn test_applying_twice_equals_applying_once() {
    let batch = vec![
        entity(json!({ "id": "r1", "numbers": [3, 2, 1] })),
        entity(json!({ "id": "r2", "name": "Speed", "numbers": [9] })),
    ];

    let cache = EntityCache::new(1000);
    cache.apply_batch(batch.clone());
    let once = cache.all();

    let outcomes = cache.apply_batch(batch);

    assert!(outcomes.iter().all(|o| o.new_spins.is_empty() && !o.changed));
    assert_eq!(cache.all(), once);
}

#[test]
fn test_bare_numbers_keep_repeats() {
    let cache = EntityCache::new(1000);
    cache.apply(entity(json!({ "id": "r1", "numbers": [15, 10, 5] })));

    let outcome = cache
        .apply(entity(json!({ "id": "r1", "numbers": [10, 15, 10, 5] })))
        .unwrap();

    let new: Vec<u8> = outcome.new_spins.iter().map(|s| s.number).collect();
    assert_eq!(new, vec![10]);
    assert_eq!(numbers(&cache, "r1"), vec![10, 15, 10, 5]);

    let again = cache
        .apply(entity(json!({ "id": "r1", "numbers": [10, 15, 10, 5] })))
        .unwrap();
    assert!(again.new_spins.is_empty());
}

#[test]
fn test_bare_numbers_are_unique_by_number_and_time() {
    let cache = EntityCache::new(1000);
    cache.apply(entity(json!({ "id": "r1", "numbers": [3, 3, 1] })));
    cache.apply(entity(json!({ "id": "r1", "numbers": [1, 3, 3, 1] })));

    let history = cache.history("r1").unwrap();
    assert_eq!(numbers(&cache, "r1"), vec![1, 3, 3, 1]);

    let mut keys: Vec<(u8, Option<DateTime<Utc>>)> =
        history.iter().map(|s| (s.number, s.timestamp)).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), history.len());
    assert!(history
        .windows(2)
        .all(|w| w[0].timestamp > w[1].timestamp));
}

#[test]
fn test_history_stays_newest_first_and_unique() {
    let cache = EntityCache::new(1000);
    let spins = |minutes: &[u32]| -> Value {
        Value::Array(
            minutes
                .iter()
                .map(|m| json!({ "number": m, "timestamp": at(*m).to_rfc3339() }))
                .collect(),
        )
    };

    cache.apply(entity(json!({ "id": "r1", "history": spins(&[3, 2, 1]) })));
    // Stream and poll overlap, arriving out of order.
    cache.apply(entity(json!({ "id": "r1", "history": spins(&[5, 4, 3, 2]) })));
    cache.apply(entity(json!({ "id": "r1", "history": spins(&[4, 3]) })));
    cache.apply(entity(json!({ "id": "r1", "history": spins(&[1, 6, 5]) })));

    let history = cache.history("r1").unwrap();
    let minutes: Vec<u8> = history.iter().map(|s| s.number).collect();
    assert_eq!(minutes, vec![6, 5, 4, 3, 2, 1]);

    assert!(history
        .windows(2)
        .all(|w| w[0].timestamp > w[1].timestamp));
}

#[test]
fn test_history_is_bounded() {
    let cache = EntityCache::new(5);
    for round in 0..20u8 {
        let latest: Vec<u8> = (0..=round).rev().map(|n| n % 37).collect();
        cache.apply(entity(json!({ "id": "r1", "numbers": latest })));
        assert!(cache.history("r1").unwrap().len() <= 5);
    }
    assert_eq!(numbers(&cache, "r1"), vec![19, 18, 17, 16, 15]);
}

#[test]
fn test_no_entity_without_data() {
    let cache = EntityCache::new(1000);
    assert!(cache.apply(entity(json!({ "id": "r1", "numbers": [] }))).is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_shapes_resolve_to_same_entity() {
    let objects = json!({
        "id": "r1",
        "name": "Lightning",
        "results": [{ "number": 7 }, { "number": "0" }]
    });
    let bare = json!({ "roulette_id": "r1", "name": "Lightning", "numbers": [7, 0] });
    let nested = json!({ "tableId": "r1", "title": "Lightning", "data": { "lastNumbers": ["7", 0] } });

    assert_eq!(normalizer::detect_shape(&objects), Some(PayloadShape::SpinObjects));
    assert_eq!(normalizer::detect_shape(&bare), Some(PayloadShape::BareNumbers));
    assert_eq!(normalizer::detect_shape(&nested), Some(PayloadShape::NestedList));

    let a = entity(objects);
    assert_eq!(a, entity(bare));
    assert_eq!(a, entity(nested));
    assert_eq!(a.history[1].color, SpinColor::Green);
}

#[test]
fn test_malformed_entity_skipped_siblings_kept() {
    let payloads = vec![
        json!({ "id": "r1", "numbers": [1, 2] }),
        json!({ "name": "No History" }),
        json!({ "numbers": [3] }),
        json!({ "id": "r4", "spins": [{ "number": 99 }] }),
        json!({ "id": "r5", "spins": [{ "number": 5, "color": "black" }] }),
    ];

    let entities = normalizer::normalize_batch(&payloads);
    let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();

    assert_eq!(ids, vec!["r1", "r5"]);
    assert_eq!(entities[1].history[0].color, SpinColor::Black);
}

#[test]
fn test_frame_forms() {
    let batch = normalizer::parse_frame(r#"{"type":"all_roulettes_update","data":[{"id":"r1","numbers":[1]}]}"#).unwrap();
    assert!(!batch.encrypted);
    assert_eq!(batch.payloads.len(), 1);

    let batch = normalizer::parse_frame(r#"{"encrypted":true}"#).unwrap();
    assert!(batch.encrypted);
    assert!(batch.payloads.is_empty());

    let batch = normalizer::parse_frame(r#"[{"id":"r1","numbers":[1]},{"id":"r2","numbers":[2]}]"#).unwrap();
    assert_eq!(batch.payloads.len(), 2);

    let batch = normalizer::parse_frame(r#"{"type":"ping"}"#).unwrap();
    assert!(batch.payloads.is_empty());

    let batch = normalizer::parse_frame(r#"{"roulettes":{"id":"r1","numbers":[1]}}"#).unwrap();
    assert_eq!(batch.payloads.len(), 1);

    assert!(normalizer::parse_frame("not json").is_err());
    assert!(normalizer::parse_frame("42").is_err());
    assert!(normalizer::parse_frame(r#"{"hello":"world"}"#).is_err());
}

#[test]
fn test_lookup_by_name_after_normalize() {
    let cache = EntityCache::new(1000);
    cache.apply(entity(json!({ "name": "  Immersive   Roulette ", "numbers": [12] })));

    let found = cache.get("immersive roulette").unwrap();
    assert_eq!(found.display_name, "Immersive   Roulette");
    assert_eq!(found.id, "immersive roulette");
}
