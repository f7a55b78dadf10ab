mod common;

use std::sync::Arc;

use collectives::{broadcast, reference, CollectiveOptimizer};
use common::run_group;
use litecomm::{pack_f64, unpack_f64, Communicator, DataType};
use netchar::{NetworkModel, TopoSpec};

fn payload(count: usize, root: usize) -> Vec<u8> {
    let mut vals = vec![0.0; count];
    reference::initialize_sequential(&mut vals, root);
    pack_f64(&vals)
}

#[test]
fn binomial_tree_on_various_groups() {
    for &n in &[2usize, 3, 5, 8] {
        for &root in &[0usize, n - 1] {
            let results = run_group(n, move |comm| {
                let mut buf = if comm.rank() == root {
                    payload(17, root)
                } else {
                    vec![0u8; 17 * 8]
                };
                broadcast::binomial_tree(&comm, &mut buf, root).unwrap();
                buf
            });
            let expect = payload(17, root);
            for (rank, buf) in results.iter().enumerate() {
                assert_eq!(buf, &expect, "n={} root={} rank={}", n, root, rank);
                assert!(reference::verify_sequential(&unpack_f64(buf), root));
            }
        }
    }
}

#[test]
fn four_rank_broadcast_delivers_root_values() {
    let results = run_group(4, |comm| {
        let mut buf = if comm.rank() == 0 {
            pack_f64(&[1.0, 2.0, 3.0, 4.0])
        } else {
            vec![0u8; 32]
        };
        broadcast::binomial_tree(&comm, &mut buf, 0).unwrap();
        unpack_f64(&buf)
    });
    for vals in results {
        assert_eq!(vals, vec![1.0, 2.0, 3.0, 4.0]);
    }
}

#[test]
fn scatter_allgather_uneven_chunks() {
    // 10 elements over 6 ranks exercises the remainder chunks
    let results = run_group(6, |comm| {
        let root = 2;
        let mut buf = if comm.rank() == root {
            payload(10, root)
        } else {
            vec![0u8; 10 * 8]
        };
        broadcast::scatter_allgather(&comm, &mut buf, 10, DataType::Double, root).unwrap();
        buf
    });
    let expect = payload(10, 2);
    for buf in results {
        assert_eq!(buf, expect);
    }
}

#[test]
fn scatter_allgather_fewer_elements_than_ranks() {
    let results = run_group(8, |comm| {
        let mut buf = if comm.rank() == 0 {
            payload(3, 0)
        } else {
            vec![0u8; 3 * 8]
        };
        broadcast::scatter_allgather(&comm, &mut buf, 3, DataType::Double, 0).unwrap();
        buf
    });
    let expect = payload(3, 0);
    for buf in results {
        assert_eq!(buf, expect);
    }
}

#[test]
fn pipeline_streams_down_the_torus_chain() {
    let results = run_group(16, |comm| {
        let model = NetworkModel::new(TopoSpec::Torus2d { x: 4, y: 4 }).unwrap();
        let root = 5;
        let mut buf = if comm.rank() == root {
            payload(100, root)
        } else {
            vec![0u8; 100 * 8]
        };
        broadcast::pipeline(&comm, &mut buf, 100, DataType::Double, root, &model, 7).unwrap();
        buf
    });
    let expect = payload(100, 5);
    for buf in results {
        assert_eq!(buf, expect);
    }
}

#[test]
fn single_rank_is_a_noop() {
    let results = run_group(1, |comm| {
        let mut buf = pack_f64(&[9.0, 8.0]);
        broadcast::binomial_tree(&comm, &mut buf, 0).unwrap();
        broadcast::scatter_allgather(&comm, &mut buf, 2, DataType::Double, 0).unwrap();
        unpack_f64(&buf)
    });
    assert_eq!(results[0], vec![9.0, 8.0]);
}

#[test]
fn large_fat_tree_broadcast_selects_scatter_allgather() {
    // 1 MiB from root 0 on a k=4 fat-tree; the oracle twin runs on its
    // own buffer and must match bit-exactly
    let count = (1 << 20) / 8;
    let results = run_group(16, move |comm| {
        let model = Arc::new(NetworkModel::new(TopoSpec::FatTree { k: 4 }).unwrap());
        let optimizer = if comm.rank() == 0 {
            CollectiveOptimizer::new(model).with_reporting()
        } else {
            CollectiveOptimizer::new(model)
        };

        let mut opt_buf = if comm.rank() == 0 {
            payload(count, 0)
        } else {
            vec![0u8; count * 8]
        };
        let mut ref_buf = opt_buf.clone();

        optimizer
            .optimize_broadcast(&comm, &mut opt_buf, count, DataType::Double, 0)
            .unwrap();
        reference::broadcast(&comm, &mut ref_buf, 0).unwrap();
        assert_eq!(opt_buf, ref_buf);

        optimizer.take_report().map(|r| {
            assert_eq!(r.len(), 1);
            r.records()[0].algorithm.to_string()
        })
    });
    assert_eq!(results[0].as_deref(), Some("scatter_allgather"));
}
