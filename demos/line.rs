//! Cluster two noisy lines spread over three blocks.
//!
//! ```text
//! cargo run --example line
//! ```

use halo_dbscan::{Dbscan, DistributedDbscan, PointSet, ResultsToCompute, NOISE};
use ndarray::Array2;

fn main() -> halo_dbscan::Result<()> {
    // Two horizontal lines of 30 points each, plus two outliers.
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for i in 0..30 {
        rows.push(vec![i as f64 * 0.5, 0.0]);
        rows.push(vec![i as f64 * 0.5, 5.0]);
    }
    rows.push(vec![7.0, 2.5]);
    rows.push(vec![40.0, 40.0]);
    let data = PointSet::from_rows(&rows)?;

    let batch = Dbscan::new(0.75, 3).fit(&data)?;
    println!(
        "batch: {} clusters, {} noise, sizes {:?}",
        batch.n_clusters,
        batch.n_noise(),
        batch.cluster_sizes()
    );

    let n = data.n_rows();
    let blocks: Vec<PointSet<f64>> = (0..3)
        .map(|b| data.slice_rows(b * n / 3, (b + 1) * n / 3))
        .collect();
    let result = DistributedDbscan::new(0.75, 3)
        .with_results(ResultsToCompute::all())
        .run(&blocks)?;
    println!(
        "distributed: {} clusters after {} merge and {} resolve rounds",
        result.n_clusters, result.merge_rounds, result.resolve_rounds
    );
    for (b, labels) in result.assignments.iter().enumerate() {
        let noise = labels.iter().filter(|&&l| l == NOISE).count();
        println!("  block {b}: {} rows, {noise} noise", labels.len());
    }

    let cores: Vec<Array2<f64>> = result.core_observations.unwrap_or_default();
    println!(
        "  core rows per block: {:?}",
        cores.iter().map(|c| c.nrows()).collect::<Vec<_>>()
    );
    Ok(())
}
