//! Merging fragments and appending batches to the CSV store.

use chrono::NaiveDate;
use flag_activity_core::{
    error::{FailureKind, FlagError},
    fragment::Fragment,
    merger::{BasePolicy, IncrementalMerger},
    store::{CsvFlagStore, FlagStore, PersistOutcome, RowKey},
    types::Product,
};
use std::collections::HashMap;

fn p(tag: &str) -> Product {
    Product::parse(tag).expect("valid product tag")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
}

fn fragment(tag: &str, flags: &[(&str, bool)]) -> Fragment {
    Fragment::new(p(tag), flags.iter().map(|(id, f)| (id.to_string(), *f)).collect())
        .expect("fragment")
}

fn fragments(list: Vec<Fragment>) -> HashMap<Product, Fragment> {
    list.into_iter().map(|f| (f.product().clone(), f)).collect()
}

fn merger(tags: &[&str]) -> IncrementalMerger {
    IncrementalMerger::new(tags.iter().map(|t| p(t)).collect(), BasePolicy::Designated)
        .expect("merger")
}

#[test]
fn all_products_present_gives_one_column_each_in_order() {
    let out = merger(&["a", "b", "c"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![
                fragment("c", &[("1", true), ("2", false)]),
                fragment("a", &[("1", true), ("2", true), ("3", false)]),
                fragment("b", &[("2", true)]),
            ]),
        )
        .expect("merge");

    assert_eq!(out.base, p("a"));
    assert_eq!(out.batch.columns(), &["flag_a", "flag_b", "flag_c"]);
    assert_eq!(out.batch.len(), 3, "rows come from the base fragment");
    assert_eq!(out.batch.value("1", "flag_c"), Some(Some(true)));
    assert_eq!(out.batch.value("1", "flag_b"), Some(None), "left join leaves gaps empty");
    assert_eq!(out.batch.value("3", "flag_c"), Some(None));
    assert!(out.skipped.is_empty());
}

#[test]
fn absent_product_leaves_its_column_out() {
    let out = merger(&["a", "b", "c"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![fragment("a", &[("1", true)]), fragment("c", &[("1", false)])]),
        )
        .expect("merge");
    assert_eq!(out.batch.columns(), &["flag_a", "flag_c"]);
    assert_eq!(out.skipped, vec![p("b")]);
}

#[test]
fn missing_base_is_fatal_and_store_is_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flags.csv");
    let store = CsvFlagStore::new(&path);

    let seed = merger(&["a"])
        .merge(date("2024-02-01"), &fragments(vec![fragment("a", &[("1", true)])]))
        .expect("seed merge");
    assert!(matches!(IncrementalMerger::persist(&store, &seed.batch), PersistOutcome::Applied(_)));
    let before = std::fs::read_to_string(&path).expect("store contents");

    let err = merger(&["a", "b", "c"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![fragment("b", &[("1", true)]), fragment("c", &[("1", false)])]),
        )
        .unwrap_err();
    assert!(matches!(err, FlagError::MergeBaseUnavailable { ref product } if product == "a"));
    assert_eq!(std::fs::read_to_string(&path).expect("store contents"), before);
}

#[test]
fn first_run_creates_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("flags.csv"));
    assert_eq!(store.read_schema().expect("schema"), None);

    let out = merger(&["a", "b"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![
                fragment("a", &[("1", true), ("2", false)]),
                fragment("b", &[("1", false), ("2", true)]),
            ]),
        )
        .expect("merge");
    let PersistOutcome::Applied(summary) = IncrementalMerger::persist(&store, &out.batch) else {
        panic!("persist failed");
    };
    assert!(summary.created);
    assert_eq!(summary.appended_rows, 2);

    let text = std::fs::read_to_string(store.path()).expect("store contents");
    assert_eq!(text, "id,run_date,flag_a,flag_b\n1,2024-03-01,1,0\n2,2024-03-01,0,1\n");
}

#[test]
fn existing_columns_are_never_duplicated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("flags.csv"));
    let batch = merger(&["a"])
        .merge(date("2024-03-01"), &fragments(vec![fragment("a", &[("1", true)])]))
        .expect("merge")
        .batch;

    IncrementalMerger::persist(&store, &batch);
    let PersistOutcome::Applied(again) = IncrementalMerger::persist(&store, &batch) else {
        panic!("second persist failed");
    };
    assert!(again.added_columns.is_empty());
    assert_eq!(again.already_present, vec!["flag_a".to_string()]);
    assert_eq!(again.skipped_rows, 1);

    let table = store.read_table().expect("read").expect("store exists");
    assert_eq!(table.flag_columns, vec!["flag_a"]);
    assert_eq!(table.row_count(), 1, "re-running a date must not duplicate rows");
}

#[test]
fn later_run_widens_with_new_product_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("flags.csv"));
    let run_date = date("2024-03-01");

    let first = merger(&["a", "b"])
        .merge(
            run_date,
            &fragments(vec![
                fragment("a", &[("1", true), ("2", false)]),
                fragment("b", &[("1", true), ("2", true)]),
            ]),
        )
        .expect("first merge");
    IncrementalMerger::persist(&store, &first.batch);

    let second = merger(&["a", "c"])
        .merge(
            run_date,
            &fragments(vec![
                fragment("a", &[("1", true), ("2", false)]),
                fragment("c", &[("2", true)]),
            ]),
        )
        .expect("second merge");
    let PersistOutcome::Applied(summary) = IncrementalMerger::persist(&store, &second.batch) else {
        panic!("persist failed");
    };
    assert_eq!(summary.added_columns, vec!["flag_c".to_string()]);
    assert_eq!(summary.already_present, vec!["flag_a".to_string()]);

    let table = store.read_table().expect("read").expect("store exists");
    assert_eq!(table.flag_columns, vec!["flag_a", "flag_b", "flag_c"]);
    assert_eq!(table.value(&RowKey::new("2", run_date), "flag_c"), Some(Some(true)));
    assert_eq!(table.value(&RowKey::new("1", run_date), "flag_c"), Some(None));
    assert_eq!(table.value(&RowKey::new("1", run_date), "flag_b"), Some(Some(true)));
}

#[test]
fn new_run_date_appends_rows_without_values_for_absent_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("flags.csv"));

    let march = merger(&["a", "b"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![fragment("a", &[("1", true)]), fragment("b", &[("1", true)])]),
        )
        .expect("march");
    IncrementalMerger::persist(&store, &march.batch);

    let april = merger(&["a"])
        .merge(date("2024-04-01"), &fragments(vec![fragment("a", &[("1", false)])]))
        .expect("april");
    let PersistOutcome::Applied(summary) = IncrementalMerger::persist(&store, &april.batch) else {
        panic!("persist failed");
    };
    assert_eq!(summary.appended_rows, 1);

    let table = store.read_table().expect("read").expect("store exists");
    assert_eq!(table.row_count(), 2);
    let april_key = RowKey::new("1", date("2024-04-01"));
    assert_eq!(table.value(&april_key, "flag_a"), Some(Some(false)));
    assert_eq!(table.value(&april_key, "flag_b"), Some(None));
}

#[test]
fn unreadable_store_is_reported_not_raised() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flags.csv");
    std::fs::write(&path, "customer,flag_a\n1,1\n").expect("write bad store");
    let store = CsvFlagStore::new(&path);

    let batch = merger(&["a"])
        .merge(date("2024-03-01"), &fragments(vec![fragment("a", &[("1", true)])]))
        .expect("merge")
        .batch;
    match IncrementalMerger::persist(&store, &batch) {
        PersistOutcome::Failed { reason, .. } => assert!(!reason.is_empty()),
        PersistOutcome::Applied(_) => panic!("a store without id,run_date must not be written"),
    }
    assert_eq!(std::fs::read_to_string(&path).expect("contents"), "customer,flag_a\n1,1\n");
}

#[test]
fn io_failure_during_persist_is_a_store_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("missing_dir").join("flags.csv"));

    let batch = merger(&["a"])
        .merge(date("2024-03-01"), &fragments(vec![fragment("a", &[("1", true)])]))
        .expect("merge")
        .batch;
    match IncrementalMerger::persist(&store, &batch) {
        PersistOutcome::Failed { kind, reason } => {
            assert_eq!(kind, FailureKind::Store, "{reason}");
        }
        PersistOutcome::Applied(_) => panic!("a store in a missing directory cannot be written"),
    }
}

#[test]
fn retry_fills_cells_a_failed_product_left_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CsvFlagStore::new(dir.path().join("flags.csv"));
    let april = date("2024-04-01");

    let march = merger(&["a", "b"])
        .merge(
            date("2024-03-01"),
            &fragments(vec![fragment("a", &[("1", true)]), fragment("b", &[("1", true)])]),
        )
        .expect("march");
    IncrementalMerger::persist(&store, &march.batch);

    // b failed the first time April ran.
    let partial = merger(&["a", "b"])
        .merge(april, &fragments(vec![fragment("a", &[("1", true), ("2", false)])]))
        .expect("partial april");
    IncrementalMerger::persist(&store, &partial.batch);

    let retry = merger(&["a", "b"])
        .merge(
            april,
            &fragments(vec![
                fragment("a", &[("1", false), ("2", true)]),
                fragment("b", &[("1", false), ("2", true)]),
            ]),
        )
        .expect("retry april");
    let PersistOutcome::Applied(summary) = IncrementalMerger::persist(&store, &retry.batch) else {
        panic!("retry persist failed");
    };
    assert_eq!(summary.filled_cells, 2);
    assert_eq!(summary.appended_rows, 0);

    let table = store.read_table().expect("read").expect("store exists");
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.value(&RowKey::new("1", april), "flag_b"), Some(Some(false)));
    assert_eq!(table.value(&RowKey::new("2", april), "flag_b"), Some(Some(true)));
    assert_eq!(
        table.value(&RowKey::new("1", april), "flag_a"),
        Some(Some(true)),
        "stored values are never overwritten"
    );
}
