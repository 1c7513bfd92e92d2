use halo_dbscan::distributed::{
    route, step1, step5, BlockData, BoundingBox, HaloData, HaloSet, LocalClusters, Query,
};
use halo_dbscan::{
    Clustering, Dbscan, DbscanParams, DistributedDbscan, Error, PointSet, ResultsToCompute, NOISE,
};
use ndarray::{array, Array1, Array2};
use rand::prelude::*;

fn line(start: usize, end: usize) -> PointSet<f64> {
    PointSet::new(Array2::from_shape_fn((end - start, 1), |(i, _)| (start + i) as f64))
}

/// Same noise set, and core points grouped the same way.
fn same_partition(a: &[i32], b: &[i32], cores: &[usize]) -> bool {
    a.len() == b.len()
        && (0..a.len()).all(|i| (a[i] == NOISE) == (b[i] == NOISE))
        && cores
            .iter()
            .all(|&i| cores.iter().all(|&j| (a[i] == a[j]) == (b[i] == b[j])))
}

#[test]
fn line_across_two_blocks_is_one_cluster() {
    let result = DistributedDbscan::new(1.5, 2)
        .run(&[line(0, 5), line(5, 10)])
        .unwrap();
    assert_eq!(result.n_clusters, 1);
    assert_eq!(result.assignments, vec![vec![0; 5], vec![0; 5]]);
    assert!(result.merge_rounds >= 1);

    let batch = Dbscan::new(1.5, 2).fit(&line(0, 10)).unwrap();
    assert_eq!(batch.assignments, vec![0; 10]);
}

#[test]
fn long_line_converges_within_block_bound() {
    let data = line(0, 640);
    for n_blocks in [2, 4, 8, 16, 32] {
        let blocks: Vec<PointSet<f64>> = (0..n_blocks)
            .map(|b| data.slice_rows(b * 640 / n_blocks, (b + 1) * 640 / n_blocks))
            .collect();
        let result = DistributedDbscan::new(1.5, 2).run(&blocks).unwrap();
        assert_eq!(result.n_clusters, 1, "{n_blocks} blocks");
        assert!(result.concatenated().iter().all(|&l| l == 0));
        assert!(
            result.merge_rounds <= n_blocks + 1,
            "{} merge rounds for {n_blocks} blocks",
            result.merge_rounds
        );
        assert!(
            result.resolve_rounds <= 2,
            "{} resolve rounds for {n_blocks} blocks",
            result.resolve_rounds
        );
    }
}

#[test]
fn isolated_point_is_noise() {
    let a = PointSet::new(array![[0.0], [0.5]]);
    let b = PointSet::new(array![[10.0]]);
    let result = DistributedDbscan::new(1.0, 2).run(&[a, b]).unwrap();
    assert_eq!(result.assignments, vec![vec![0, 0], vec![NOISE]]);

    let batch = Dbscan::new(1.0, 2)
        .fit(&PointSet::new(array![[0.0], [0.5], [10.0]]))
        .unwrap();
    assert_eq!(batch.assignments, vec![0, 0, NOISE]);
}

#[test]
fn points_exactly_epsilon_apart_join_across_blocks() {
    let a = PointSet::new(array![[0.0], [0.25]]);
    let b = PointSet::new(array![[1.25], [1.5]]);
    let result = DistributedDbscan::new(1.0, 2).run(&[a, b]).unwrap();
    assert_eq!(result.n_clusters, 1);
    assert_eq!(result.concatenated(), vec![0, 0, 0, 0]);
}

#[test]
fn border_point_claimed_from_another_block() {
    // 1.75 ends up alone with noise in its block; its only core neighbor is 1.0.
    let a = PointSet::new(array![[0.0], [0.5], [1.0]]);
    let b = PointSet::new(array![[1.75], [20.0], [21.0]]);
    let result = DistributedDbscan::new(1.0, 3)
        .with_results(ResultsToCompute::all())
        .run(&[a, b])
        .unwrap();
    assert_eq!(result.assignments, vec![vec![0, 0, 0], vec![0, NOISE, NOISE]]);
    assert_eq!(result.core_indices, Some(vec![vec![0, 1, 2], vec![]]));
}

fn blobs(n_per_blob: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = [[0.0, 0.0], [6.0, 0.0], [0.0, 6.0], [6.0, 6.0]];
    let mut rows = Vec::new();
    for center in &centers {
        for _ in 0..n_per_blob {
            rows.push(vec![
                center[0] + rng.random_range(-1.0..1.0),
                center[1] + rng.random_range(-1.0..1.0),
            ]);
        }
    }
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.shuffle(&mut rng);
    (rows, order)
}

#[test]
fn many_shuffled_blocks_match_batch() {
    let (rows, order) = blobs(60, 7);
    let shuffled: Vec<Vec<f64>> = order.iter().map(|&i| rows[i].clone()).collect();
    let data = PointSet::from_rows(&shuffled).unwrap();

    let batch = Dbscan::new(0.6, 4)
        .with_results(ResultsToCompute {
            core_indices: true,
            core_observations: false,
        })
        .fit(&data)
        .unwrap();
    let cores = batch.core_indices.clone().unwrap();
    for n_blocks in [1, 2, 3, 7, 16] {
        let model = DistributedDbscan::new(0.6, 4).with_blocks(n_blocks);
        let labels = model.fit_predict(&data).unwrap();
        assert!(
            same_partition(&labels, &batch.assignments, &cores),
            "{n_blocks} blocks disagree with the batch run"
        );
        assert_eq!(
            model.run(&[data.clone()]).unwrap().n_clusters,
            batch.n_clusters
        );
    }
}

#[test]
fn memory_saving_distributed_run() {
    let (rows, _) = blobs(30, 11);
    let data = PointSet::from_rows(&rows).unwrap();
    let cached = DistributedDbscan::new(0.5, 3).with_blocks(5);
    let saving = cached.clone().with_memory_saving(true);
    assert_eq!(
        cached.fit_predict(&data).unwrap(),
        saving.fit_predict(&data).unwrap()
    );
}

#[test]
fn empty_blocks_are_legal() {
    let data = PointSet::new(array![[0.0, 0.0], [0.1, 0.0], [5.0, 5.0]]);
    let result = DistributedDbscan::new(0.5, 2)
        .run(&[PointSet::empty(2), data, PointSet::empty(2)])
        .unwrap();
    assert_eq!(
        result.assignments,
        vec![vec![], vec![0, 0, NOISE], vec![]]
    );

    let nothing = DistributedDbscan::new(0.5, 2)
        .run(&[PointSet::<f32>::empty(3), PointSet::empty(3)])
        .unwrap();
    assert_eq!(nothing.n_clusters, 0);
    assert_eq!(nothing.concatenated(), Vec::<i32>::new());
}

#[test]
fn core_outputs_per_original_block() {
    let a = PointSet::new(array![[0.0, 0.0], [0.2, 0.0], [9.0, 9.0]]);
    let b = PointSet::new(array![[0.4, 0.0], [20.0, 20.0]]);
    let result = DistributedDbscan::new(0.25, 2)
        .with_results(ResultsToCompute::all())
        .run(&[a, b])
        .unwrap();
    assert_eq!(result.core_indices, Some(vec![vec![0, 1], vec![0]]));
    let observations = result.core_observations.unwrap();
    assert_eq!(observations[0], array![[0.0, 0.0], [0.2, 0.0]]);
    assert_eq!(observations[1], array![[0.4, 0.0]]);
}

#[test]
fn weights_count_towards_core_status() {
    let heavy = PointSet::with_weights(array![[0.0], [8.0]], Array1::from(vec![3.0, 1.0])).unwrap();
    let light = PointSet::new(array![[0.8]]);
    let result = DistributedDbscan::new(1.0, 3).run(&[heavy, light]).unwrap();
    assert_eq!(result.assignments, vec![vec![0, NOISE], vec![0]]);
}

#[test]
fn single_precision_blocks() {
    let a = PointSet::new(array![[0.0f32, 0.0], [0.5, 0.0]]);
    let b = PointSet::new(array![[1.0f32, 0.0], [30.0, 0.0]]);
    let result = DistributedDbscan::new(0.5, 2).run(&[a, b]).unwrap();
    assert_eq!(result.concatenated(), vec![0, 0, 0, NOISE]);
}

#[test]
fn round_cap_stops_the_merge_loop() {
    let err = DistributedDbscan::new(1.5, 2)
        .with_max_rounds(0)
        .run(&[line(0, 5), line(5, 10)])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::NotConverged {
            loop_name: "merge",
            rounds: 0
        }
    ));
}

#[test]
fn invalid_inputs_are_rejected() {
    let model = DistributedDbscan::new(1.0, 2);
    assert!(matches!(
        model.run::<f64>(&[]),
        Err(Error::InvalidParameter { name: "blocks", .. })
    ));
    assert!(matches!(
        model.run(&[PointSet::<f64>::empty(2), PointSet::empty(3)]),
        Err(Error::DimensionMismatch { expected: 2, found: 3 })
    ));
    assert!(DistributedDbscan::new(-1.0, 2).run(&[line(0, 3)]).is_err());
    assert!(DistributedDbscan::new(1.0, 0).run(&[line(0, 3)]).is_err());
}

#[test]
fn queries_survive_a_serializing_channel() {
    let params = DbscanParams::new(1.5, 2);
    let blocks = [line(0, 5), line(5, 10)];
    let parts: Vec<BlockData<f64>> = blocks
        .iter()
        .enumerate()
        .map(|(b, p)| BlockData::new(p.clone(), step1(b, p.n_rows())).unwrap())
        .collect();
    let boxes: Vec<Option<BoundingBox<f64>>> =
        parts.iter().map(|p| BoundingBox::of(&p.points)).collect();

    let wire: Vec<Vec<String>> = parts
        .iter()
        .enumerate()
        .map(|(b, p)| {
            step5(b, &p.points, &boxes, &params)
                .unwrap()
                .iter()
                .map(|h| serde_json::to_string(h).unwrap())
                .collect()
        })
        .collect();

    let engine = halo_dbscan::TiledEngine::new();
    let mut states = Vec::new();
    let mut outgoing = Vec::new();
    for (dst, part) in parts.iter().enumerate() {
        let incoming: Vec<(usize, HaloData<f64>)> = (0..parts.len())
            .map(|src| (src, serde_json::from_str(&wire[src][dst]).unwrap()))
            .collect();
        let halo = HaloSet::gather(1, incoming).unwrap();
        let (state, out) =
            LocalClusters::step6(&engine, dst, &part.points, &halo, &params).unwrap();
        states.push(state);
        outgoing.extend(out.queries);
    }

    let json = serde_json::to_string(&outgoing).unwrap();
    let received: Vec<Query> = serde_json::from_str(&json).unwrap();
    assert_eq!(received, outgoing);

    let inboxes = route(received, 2).unwrap();
    for (state, inbox) in states.iter_mut().zip(&inboxes) {
        state.step8(inbox).unwrap();
    }
    assert_eq!(states[0].cluster_count() + states[1].cluster_count(), 1);
}
