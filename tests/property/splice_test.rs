// tests/property/splice_test.rs

//! The insert splice must form a valid query document for any
//! database name, table name, and raw JSON document.

use opaldb_client::core::protocol::query;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn insert_wrapper_forms_valid_json(
        db in ".{0,24}",
        table in ".{0,24}",
        fields in prop::collection::btree_map("[a-z]{1,12}", any::<i64>(), 0..8),
    ) {
        let document: BTreeMap<&String, &i64> = fields.iter().collect();
        let raw = serde_json::to_vec(&document).unwrap();

        let (prefix, suffix) = query::insert_raw_wrapper(&db, &table, &Map::new());
        let mut wire = Vec::new();
        wire.extend_from_slice(&prefix);
        wire.extend_from_slice(&raw);
        wire.extend_from_slice(&suffix);

        // The spliced payload length is the sum of the part lengths.
        prop_assert_eq!(wire.len(), prefix.len() + raw.len() + suffix.len());

        let parsed: Value = serde_json::from_slice(&wire).unwrap();
        prop_assert_eq!(&parsed[0], &json!(1));
        // The names survive JSON escaping and the raw document lands
        // unmodified in the insert term's document slot.
        prop_assert_eq!(&parsed[1][1][0][1][0][1][0], &json!(db));
        prop_assert_eq!(&parsed[1][1][0][1][1], &json!(table));
        let expected_doc: Value = serde_json::from_slice(&raw).unwrap();
        prop_assert_eq!(&parsed[1][1][1], &expected_doc);
    }
}
