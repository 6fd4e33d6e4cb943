//! Window selection and flag values, driven through the product worker the
//! same way a run drives them.

use flag_activity_core::{
    error::FailureKind,
    fragment::Fragment,
    profit_table::ProfitTable,
    types::Product,
    window::{parse_date, WindowSpec},
    worker::{InProcessTransport, ProductWorker, WorkerOutcome},
};

const PROFIT: &str = "\
id,date,sum_a,count_a,sum_b,count_b,sum_c,count_c
1,2024-01-01,10.5,2,0,0,5,1
1,2024-04-01,0,0,0,0,-5,1
2,2024-02-01,30,3,12,1,0,0
2,2024-05-01,0,0,0,0,7,2
3,2023-12-01,50,4,9,1,3,1
3,2024-03-01,0,2,0,0,0,0
4,2024-03-15,8,1,8,1,8,1
";

fn p(tag: &str) -> Product {
    Product::parse(tag).expect("valid product tag")
}

fn fragment_for(csv: &str, tag: &str, target: &str) -> Fragment {
    let table = ProfitTable::from_csv(csv).expect("profit table");
    let worker = ProductWorker::new(
        &InProcessTransport,
        parse_date(target).expect("target date"),
        WindowSpec::default(),
    );
    match worker.process(&table, &p(tag)) {
        WorkerOutcome::Success(fragment) => fragment,
        WorkerOutcome::Failure(f) => panic!("product {tag} failed: {}", f.reason),
    }
}

fn flag(fragment: &Fragment, id: &str) -> Option<bool> {
    fragment.lookup().get(id).copied()
}

#[test]
fn nonzero_sum_and_count_inside_window_is_active() {
    let a = fragment_for(PROFIT, "a", "2024-03-01");
    assert_eq!(flag(&a, "1"), Some(true));
    assert_eq!(flag(&a, "2"), Some(true));
}

#[test]
fn count_without_net_movement_is_inactive() {
    let a = fragment_for(PROFIT, "a", "2024-03-01");
    assert_eq!(flag(&a, "3"), Some(false), "count 2 with sum 0 must not flag");
}

#[test]
fn offsetting_months_net_to_inactive() {
    let c = fragment_for(PROFIT, "c", "2024-03-01");
    assert_eq!(flag(&c, "1"), Some(false), "+5 in January and -5 in April cancel out");
}

#[test]
fn activity_outside_window_is_ignored() {
    // December 2023 and May 2024 both fall outside Jan..=Apr 2024.
    let b = fragment_for(PROFIT, "b", "2024-03-01");
    assert_eq!(flag(&b, "3"), Some(false));
    let c = fragment_for(PROFIT, "c", "2024-03-01");
    assert_eq!(flag(&c, "2"), Some(false));
}

#[test]
fn window_includes_month_after_target() {
    let c = fragment_for(PROFIT, "c", "2024-04-01");
    // Window Feb..=May: id 2 now sees its May activity; id 1 only sees -5.
    assert_eq!(flag(&c, "2"), Some(true));
    assert_eq!(flag(&c, "1"), Some(true));
}

#[test]
fn mid_month_dates_never_match_a_window_month() {
    let a = fragment_for(PROFIT, "a", "2024-03-01");
    assert_eq!(flag(&a, "4"), None);
    assert_eq!(a.len(), 3);
}

#[test]
fn odd_date_spellings_are_left_out_of_the_window() {
    for odd in ["2024-03", "2024-03-01 00:00:00", "2024-03-01T00:00:00"] {
        let csv = format!("id,date,sum_a,count_a\n1,2024-02-01,5,1\n2,{odd},7,1\n");
        let a = fragment_for(&csv, "a", "2024-03-01");
        assert_eq!(flag(&a, "1"), Some(true), "date '{odd}'");
        assert_eq!(flag(&a, "2"), None, "date '{odd}' must not match any window month");
    }
}

#[test]
fn odd_date_in_base_product_does_not_sink_the_slice() {
    let csv = "id,date,sum_a,count_a\n1,2024-03-01,5,1\n2,03/01/2024,7,1\n";
    let a = fragment_for(csv, "a", "2024-03-01");
    assert_eq!(a.len(), 1);
}

#[test]
fn one_row_per_identifier() {
    let a = fragment_for(PROFIT, "a", "2024-03-01");
    let ids: Vec<&str> = a.flags().iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[test]
fn missing_product_columns_degrade_to_absent() {
    let table = ProfitTable::from_csv(PROFIT).expect("profit table");
    let worker = ProductWorker::new(
        &InProcessTransport,
        parse_date("2024-03-01").expect("target date"),
        WindowSpec::default(),
    );
    match worker.process(&table, &p("z")) {
        WorkerOutcome::Failure(f) => {
            assert_eq!(f.product, p("z"));
            assert_eq!(f.kind, FailureKind::InputSchema);
        }
        WorkerOutcome::Success(_) => panic!("product z has no columns and must not succeed"),
    }
}

#[test]
fn malformed_numbers_are_parse_failures() {
    let csv = "id,date,sum_a,count_a\n1,2024-03-01,ten,1\n";
    let table = ProfitTable::from_csv(csv).expect("profit table");
    let worker = ProductWorker::new(
        &InProcessTransport,
        parse_date("2024-03-01").expect("target date"),
        WindowSpec::default(),
    );
    match worker.process(&table, &p("a")) {
        WorkerOutcome::Failure(f) => assert_eq!(f.kind, FailureKind::Parse),
        WorkerOutcome::Success(_) => panic!("non-numeric sum must fail"),
    }
}
