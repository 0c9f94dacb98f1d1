//! Stage/commit pipeline against a file-backed store

use pulse_matrix::matrix::{
    CompletenessReport, MatrixGrid, MatrixPipeline, MatrixStore, MetricType, SqliteMatrixStore,
};
use pulse_matrix::prices::PriceSnapshot;

fn coins(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_three_coins_four_staged() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = MatrixPipeline::new(
        SqliteMatrixStore::open(dir.path().join("matrix.db")).unwrap(),
        vec![MetricType::Pct24h],
    );
    let universe = coins(&["BTC", "ETH", "SOL"]);

    let mut grid = MatrixGrid::new();
    grid.set("BTC", "ETH", Some(0.01));
    grid.set("ETH", "BTC", Some(-0.01));
    grid.set("BTC", "SOL", Some(0.02));
    grid.set("SOL", "ETH", Some(0.03));

    let staged = pipeline
        .stage("s1", MetricType::Pct24h, 60_000, &universe, &grid)
        .unwrap();
    let again = pipeline
        .stage("s1", MetricType::Pct24h, 60_000, &universe, &grid)
        .unwrap();
    assert_eq!((staged, again), (4, 4));

    let report = pipeline
        .commit("s1", MetricType::Pct24h, 60_000, Some(&universe))
        .unwrap();
    assert_eq!(
        report,
        CompletenessReport {
            expected_cells: 6,
            staged_cells: 4,
            missing_count: 2,
            complete: false,
        }
    );
}

#[test]
fn test_committed_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matrix.db");
    let universe = coins(&["BTC", "ETH"]);
    let snapshot = PriceSnapshot::new("USDT")
        .with_symbol("BTC", "USDT", 60_000.0, Some(60_000.0))
        .with_symbol("ETH", "USDT", 3_000.0, Some(3_000.0));

    {
        let pipeline = MatrixPipeline::new(
            SqliteMatrixStore::open(&path).unwrap(),
            vec![MetricType::Benchmark],
        );
        let report = pipeline
            .run_cycle("s1", 60_000, &universe, &snapshot)
            .unwrap();
        assert!(report.is_complete());
    }

    let store = SqliteMatrixStore::open(&path).unwrap();
    let cells = store.committed_rows(MetricType::Benchmark, 60_000).unwrap();
    assert_eq!(cells.len(), 2);
    let btc_eth = cells.iter().find(|c| c.base == "BTC").unwrap();
    assert_eq!(btc_eth.value, Some(20.0));
    assert_eq!(
        store
            .latest_before(MetricType::Benchmark, "BTC", "ETH", 120_000)
            .unwrap(),
        Some(20.0)
    );
}

#[test]
fn test_later_stage_supersedes_before_commit() {
    let pipeline = MatrixPipeline::new(
        SqliteMatrixStore::open_in_memory().unwrap(),
        vec![MetricType::Delta],
    );
    let universe = coins(&["BTC", "ETH"]);

    let mut first = MatrixGrid::new();
    first.set("BTC", "ETH", Some(1.0));
    first.set("ETH", "BTC", Some(-1.0));
    pipeline
        .stage("s1", MetricType::Delta, 60_000, &universe, &first)
        .unwrap();

    let mut second = MatrixGrid::new();
    second.set("BTC", "ETH", Some(2.0));
    pipeline
        .stage("s2", MetricType::Delta, 60_000, &universe, &second)
        .unwrap();

    let report = pipeline
        .commit("s2", MetricType::Delta, 60_000, Some(&universe))
        .unwrap();
    assert_eq!(report.expected_cells, 2);
    assert_eq!(report.staged_cells, 1);
    assert_eq!(report.missing_count, 1);
    assert!(!report.complete);

    let cells = pipeline
        .store()
        .committed_rows(MetricType::Delta, 60_000)
        .unwrap();
    assert_eq!(cells.len(), 1);
    let btc_eth = &cells[0];
    assert_eq!(btc_eth.base, "BTC");
    assert_eq!(btc_eth.value, Some(2.0));
}
