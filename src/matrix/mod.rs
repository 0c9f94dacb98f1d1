//! Matrix snapshot pipeline
//!
//! Turns a price snapshot into N×N metric grids, stages them, then commits
//! the staged rows transactionally with a completeness check.

mod compute;
mod pipeline;
mod store;
mod types;

pub use compute::{id_pct, id_pct_grid, pair_open, pair_price, snapshot_grid, ID_PCT_MIN_DENOMINATOR};
pub use pipeline::MatrixPipeline;
pub use store::{MatrixStore, SqliteMatrixStore, StoreError, StoreTx};
pub use types::{
    CompletenessReport, CycleReport, MatrixCell, MatrixGrid, MetricReport, MetricType, StagedRow,
};
