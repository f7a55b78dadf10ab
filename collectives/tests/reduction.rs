mod common;

use std::sync::Arc;

use collectives::{allreduce, reduce, reference, CollectiveOptimizer};
use common::run_group;
use litecomm::{pack_f64, unpack_f64, Communicator, DataType, ReduceOp};
use netchar::{NetworkModel, TopoSpec};

const OPS: [ReduceOp; 4] = [ReduceOp::Sum, ReduceOp::Max, ReduceOp::Min, ReduceOp::Prod];

fn seeded(count: usize, rank: usize) -> Vec<f64> {
    let mut vals = vec![0.0; count];
    reference::initialize_sequential(&mut vals, rank);
    vals
}

// op folded over every rank's seed pattern, computed locally
fn expected(count: usize, n: usize, op: ReduceOp) -> Vec<f64> {
    let mut acc = seeded(count, 0);
    for r in 1..n {
        let contrib = seeded(count, r);
        for (a, c) in acc.iter_mut().zip(contrib) {
            *a = match op {
                ReduceOp::Sum => *a + c,
                ReduceOp::Max => a.max(c),
                ReduceOp::Min => a.min(c),
                ReduceOp::Prod => *a * c,
            };
        }
    }
    acc
}

#[test]
fn tree_reduce_all_ops_and_roots() {
    let n = 5;
    for &op in &OPS {
        for &root in &[0usize, n - 1] {
            let results = run_group(n, move |comm| {
                let mut buf = pack_f64(&seeded(16, comm.rank()));
                reduce::binomial_tree(&comm, &mut buf, 16, DataType::Double, op, root).unwrap();
                (comm.rank(), unpack_f64(&buf))
            });
            let expect = expected(16, n, op);
            for (rank, vals) in results {
                if rank == root {
                    let diff = reference::max_abs_diff(&vals, &expect);
                    match op {
                        ReduceOp::Max | ReduceOp::Min => assert_eq!(vals, expect),
                        _ => assert!(diff <= 1e-9, "op {:?} deviates by {}", op, diff),
                    }
                }
            }
        }
    }
}

#[test]
fn reduce_scatter_gather_matches_tree() {
    let n = 6;
    let count = 64;
    let results = run_group(n, move |comm| {
        let model = NetworkModel::new(TopoSpec::Flat { nhosts: 6 }).unwrap();
        let mut buf = pack_f64(&seeded(count, comm.rank()));
        reduce::reduce_scatter_gather(
            &comm,
            &mut buf,
            count,
            DataType::Double,
            ReduceOp::Sum,
            3,
            &model,
        )
        .unwrap();
        (comm.rank(), unpack_f64(&buf))
    });
    let expect = expected(count, n, ReduceOp::Sum);
    for (rank, vals) in results {
        if rank == 3 {
            assert!(reference::max_abs_diff(&vals, &expect) <= 1e-9);
        }
    }
}

#[test]
fn recursive_doubling_allreduce() {
    let results = run_group(8, |comm| {
        let mut buf = pack_f64(&seeded(33, comm.rank()));
        allreduce::recursive_doubling(&comm, &mut buf, 33, DataType::Double, ReduceOp::Sum)
            .unwrap();
        unpack_f64(&buf)
    });
    let expect = expected(33, 8, ReduceOp::Sum);
    for vals in results {
        assert!(reference::max_abs_diff(&vals, &expect) <= 1e-9);
    }
}

#[test]
fn halving_doubling_power_of_two() {
    let results = run_group(4, |comm| {
        let mut buf = pack_f64(&seeded(40, comm.rank()));
        allreduce::halving_doubling(&comm, &mut buf, 40, DataType::Double, ReduceOp::Sum).unwrap();
        unpack_f64(&buf)
    });
    let expect = expected(40, 4, ReduceOp::Sum);
    for vals in results {
        assert!(reference::max_abs_diff(&vals, &expect) <= 1e-9);
    }
}

#[test]
fn halving_doubling_folds_odd_groups() {
    // 6 ranks: two get folded into partners before the core runs
    for &count in &[1usize, 7, 40] {
        let results = run_group(6, move |comm| {
            let mut buf = pack_f64(&seeded(count, comm.rank()));
            allreduce::halving_doubling(&comm, &mut buf, count, DataType::Double, ReduceOp::Max)
                .unwrap();
            unpack_f64(&buf)
        });
        let expect = expected(count, 6, ReduceOp::Max);
        for vals in results {
            assert_eq!(vals, expect, "count={}", count);
        }
    }
}

#[test]
fn ring_allreduce_on_torus() {
    let results = run_group(16, |comm| {
        let model = NetworkModel::new(TopoSpec::Torus2d { x: 4, y: 4 }).unwrap();
        let mut buf = pack_f64(&seeded(50, comm.rank()));
        allreduce::ring(&comm, &mut buf, 50, DataType::Double, ReduceOp::Sum, &model).unwrap();
        unpack_f64(&buf)
    });
    let expect = expected(50, 16, ReduceOp::Sum);
    for vals in results {
        assert!(reference::max_abs_diff(&vals, &expect) <= 1e-9);
    }
}

#[test]
fn ring_allreduce_fewer_elements_than_ranks() {
    let results = run_group(5, |comm| {
        let model = NetworkModel::new(TopoSpec::Flat { nhosts: 5 }).unwrap();
        let mut buf = pack_f64(&seeded(3, comm.rank()));
        allreduce::ring(&comm, &mut buf, 3, DataType::Double, ReduceOp::Sum, &model).unwrap();
        unpack_f64(&buf)
    });
    let expect = expected(3, 5, ReduceOp::Sum);
    for vals in results {
        assert!(reference::max_abs_diff(&vals, &expect) <= 1e-9);
    }
}

#[test]
fn four_rank_sum_pairs() {
    // ranks contribute [r+1, r+2]; the sum is [10, 14] everywhere
    let results = run_group(4, |comm| {
        let r = comm.rank() as f64;
        let mut buf = pack_f64(&[r + 1.0, r + 2.0]);
        allreduce::recursive_doubling(&comm, &mut buf, 2, DataType::Double, ReduceOp::Sum)
            .unwrap();
        unpack_f64(&buf)
    });
    for vals in results {
        assert_eq!(vals, vec![10.0, 14.0]);
    }
}

#[test]
fn four_rank_max_single_element() {
    let results = run_group(4, |comm| {
        let mut buf = pack_f64(&[comm.rank() as f64]);
        allreduce::halving_doubling(&comm, &mut buf, 1, DataType::Double, ReduceOp::Max).unwrap();
        unpack_f64(&buf)
    });
    for vals in results {
        assert_eq!(vals, vec![3.0]);
    }
}

#[test]
fn optimized_allreduce_against_reference_twin() {
    // non-power-of-two group, sizes straddling both thresholds
    for &count in &[4usize, 1024, 40_000] {
        let results = run_group(6, move |comm| {
            let model = Arc::new(NetworkModel::new(TopoSpec::Flat { nhosts: 6 }).unwrap());
            let optimizer = CollectiveOptimizer::new(model);
            let sendbuf = pack_f64(&seeded(count, comm.rank()));
            let mut opt_recv = vec![0u8; sendbuf.len()];
            let mut ref_recv = vec![0u8; sendbuf.len()];
            optimizer
                .optimize_allreduce(
                    &comm,
                    &sendbuf,
                    &mut opt_recv,
                    count,
                    DataType::Double,
                    ReduceOp::Sum,
                )
                .unwrap();
            reference::allreduce(
                &comm,
                &sendbuf,
                &mut ref_recv,
                count,
                DataType::Double,
                ReduceOp::Sum,
            )
            .unwrap();
            reference::max_abs_diff(&unpack_f64(&opt_recv), &unpack_f64(&ref_recv))
        });
        for diff in results {
            assert!(diff <= 1e-9, "count={} deviation={}", count, diff);
        }
    }
}

#[test]
fn optimized_reduce_against_reference_twin() {
    // small count takes the tree, large count takes reduce-scatter+gather;
    // products stay on small vectors so both paths are exact in f64
    for &(count, op) in &[(16usize, ReduceOp::Prod), (50_000, ReduceOp::Sum)] {
        let results = run_group(4, move |comm| {
            let model = Arc::new(NetworkModel::new(TopoSpec::Flat { nhosts: 4 }).unwrap());
            let optimizer = CollectiveOptimizer::new(model);
            let sendbuf = pack_f64(&seeded(count, comm.rank()));
            let mut opt_recv = vec![0u8; sendbuf.len()];
            let mut ref_recv = vec![0u8; sendbuf.len()];
            optimizer
                .optimize_reduce(
                    &comm,
                    &sendbuf,
                    &mut opt_recv,
                    count,
                    DataType::Double,
                    op,
                    0,
                )
                .unwrap();
            reference::reduce(
                &comm,
                &sendbuf,
                &mut ref_recv,
                count,
                DataType::Double,
                op,
                0,
            )
            .unwrap();
            (
                comm.rank(),
                reference::max_abs_diff(&unpack_f64(&opt_recv), &unpack_f64(&ref_recv)),
            )
        });
        for (rank, diff) in results {
            if rank == 0 {
                assert!(diff <= 1e-9, "count={} deviation={}", count, diff);
            }
        }
    }
}

#[test]
fn count_zero_touches_nothing() {
    let results = run_group(2, |comm| {
        let model = Arc::new(NetworkModel::new(TopoSpec::Flat { nhosts: 2 }).unwrap());
        let optimizer = CollectiveOptimizer::new(model);
        let sendbuf: Vec<u8> = Vec::new();
        let mut recvbuf: Vec<u8> = Vec::new();
        optimizer
            .optimize_allreduce(
                &comm,
                &sendbuf,
                &mut recvbuf,
                0,
                DataType::Double,
                ReduceOp::Sum,
            )
            .unwrap();
        true
    });
    assert_eq!(results, vec![true, true]);
}
