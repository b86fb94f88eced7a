use ochre_core::{Csr, Triplet};
use ochre_kernels::{CsrMatrix, Kernel, Options, OrderingHeuristic, SymStrategy, Tuning};

const EPS: f64 = 1e-8;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPS * b.abs().max(1.0)
}

fn assert_close(y: &[f64], expected: &[f64]) {
    assert_eq!(y.len(), expected.len());
    for (i, (&a, &b)) in y.iter().zip(expected).enumerate() {
        assert!(approx_eq(a, b), "y[{i}] = {a}, expected {b}");
    }
}

/// Dense reference product from the full (already symmetrized) triplets.
fn reference(nrows: usize, triplets: &[Triplet<f64, i64>], x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; nrows];
    for t in triplets {
        y[t.row as usize] += t.value * x[t.col as usize];
    }
    y
}

fn csr_of(nrows: usize, triplets: &[Triplet<f64, i64>]) -> Csr<f64, i64> {
    let mut sorted = triplets.to_vec();
    sorted.sort_by_key(|t| (t.row, t.col));
    Csr::from_triplets(nrows, nrows, &sorted).unwrap()
}

fn sym_options(nthreads: usize) -> Options {
    Options {
        nthreads: Some(nthreads),
        symmetric: true,
        ..Options::default()
    }
}

/// Both halves of a symmetric matrix given its lower triangle.
fn symmetrize(lower: &[(i64, i64, f64)]) -> Vec<Triplet<f64, i64>> {
    let mut t = Vec::new();
    for &(row, col, value) in lower {
        t.push(Triplet::new(row, col, value));
        if row != col {
            t.push(Triplet::new(col, row, value));
        }
    }
    t
}

fn deterministic_x(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + (i % 7) as f64 * 0.25).collect()
}

/// Pseudo-random symmetric band matrix, deterministic across runs.
fn scrambled_band(n: i64, bandwidth: i64) -> Vec<Triplet<f64, i64>> {
    let mut lower = Vec::new();
    let mut state = 0x2545f491u64;
    for i in 0..n {
        lower.push((i, i, 4.0 + (i % 3) as f64));
        for j in (i - bandwidth).max(0)..i {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if state >> 33 & 3 != 0 {
                let value = ((state >> 40) as f64 / 1e7) - 0.5;
                lower.push((i, j, value));
            }
        }
    }
    symmetrize(&lower)
}

#[test]
fn scenario_diagonal_matrix() {
    let triplets = symmetrize(&[(0, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0), (3, 3, 4.0)]);
    let mut m = CsrMatrix::from_csr(csr_of(4, &triplets), sym_options(2)).unwrap();
    assert!(m.tune(Kernel::SpMV, Tuning::Aggressive));
    let x = vec![1.0; 4];
    let mut y = vec![0.0; 4];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &[1.0, 2.0, 3.0, 4.0]);
    // The conflict graph is edgeless.
    assert_eq!(m.ncolors(), 1);
}

#[test]
fn scenario_tridiagonal_matrix() {
    let mut lower = vec![];
    for i in 0..5i64 {
        lower.push((i, i, 2.0));
        if i > 0 {
            lower.push((i, i - 1, -1.0));
        }
    }
    let triplets = symmetrize(&lower);
    let mut m = CsrMatrix::from_csr(csr_of(5, &triplets), sym_options(2)).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let x = vec![1.0; 5];
    let mut y = vec![0.0; 5];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &[1.0, 0.0, 0.0, 0.0, 1.0]);
    assert!((2..=3).contains(&m.ncolors()), "ncolors = {}", m.ncolors());
}

#[test]
fn scenario_arrowhead_matrix() {
    let mut lower = vec![(0, 0, 2.0)];
    for i in 1..4i64 {
        lower.push((i, 0, 1.0));
        lower.push((i, i, 2.0));
    }
    let triplets = symmetrize(&lower);
    let mut m = CsrMatrix::from_csr(csr_of(4, &triplets), sym_options(3)).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let x = vec![1.0; 4];
    let mut y = vec![0.0; 4];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &[5.0, 3.0, 3.0, 3.0]);
    // Column 0 is shared by three threads: the cross-thread conflicts form
    // a triangle, forcing at least three colors.
    assert!(m.ncolors() >= 3, "ncolors = {}", m.ncolors());
}

#[test]
fn scenario_block_diagonal_matrix() {
    let lower = vec![
        (0, 0, 2.0),
        (1, 0, 1.0),
        (1, 1, 3.0),
        (2, 2, 4.0),
        (3, 2, 1.5),
        (3, 3, 5.0),
    ];
    let triplets = symmetrize(&lower);
    let x = vec![1.0; 4];
    let expected = reference(4, &triplets, &x);
    let mut m = CsrMatrix::from_csr(csr_of(4, &triplets), sym_options(2)).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y = vec![0.0; 4];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);
    // Independent blocks on matched partitions conflict with nobody.
    assert_eq!(m.ncolors(), 1);
}

#[test]
fn scenario_hybrid_band_with_far_entries() {
    let n = 8000i64;
    let mut lower = vec![];
    for i in 0..n {
        lower.push((i, i, 2.0));
        if i > 0 {
            lower.push((i, i - 1, -1.0));
        }
    }
    // A few far-off-diagonal couplings at |col - row| = 7000.
    for k in 0..5i64 {
        lower.push((7000 + k, k, 0.5));
    }
    let triplets = symmetrize(&lower);
    let x = deterministic_x(n as usize);
    let expected = reference(n as usize, &triplets, &x);

    let mut options = sym_options(4);
    options.hybrid = true;
    let mut m = CsrMatrix::from_csr(csr_of(n as usize, &triplets), options).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y = vec![0.0; n as usize];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);

    // Same matrix without the hybrid split must agree.
    let mut plain = CsrMatrix::from_csr(csr_of(n as usize, &triplets), sym_options(4)).unwrap();
    plain.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y2 = vec![0.0; n as usize];
    plain.dense_vector_multiply(&mut y2, &x);
    assert_close(&y2, &y);
}

#[test]
fn conflict_free_matches_reference_across_configurations() {
    let triplets = scrambled_band(300, 9);
    let csr = csr_of(300, &triplets);
    let x = deterministic_x(300);
    let expected = reference(300, &triplets, &x);

    for nthreads in [1usize, 2, 3, 5] {
        for hybrid in [false, true] {
            for ordering in [
                None,
                Some(OrderingHeuristic::FirstFitRoundRobin),
                Some(OrderingHeuristic::ShortestRowRoundRobin),
                Some(OrderingHeuristic::LongestRow),
            ] {
                let options = Options {
                    nthreads: Some(nthreads),
                    symmetric: true,
                    hybrid,
                    ordering,
                    ..Options::default()
                };
                let mut m = CsrMatrix::from_csr(csr.clone(), options).unwrap();
                m.tune(Kernel::SpMV, Tuning::Aggressive);
                let mut y = vec![0.0; 300];
                m.dense_vector_multiply(&mut y, &x);
                assert_close(&y, &expected);
            }
        }
    }
}

#[test]
fn barrier_and_dependency_executors_agree() {
    let triplets = scrambled_band(200, 6);
    let csr = csr_of(200, &triplets);
    let x = deterministic_x(200);
    let expected = reference(200, &triplets, &x);

    for barriers in [false, true] {
        let options = Options {
            nthreads: Some(4),
            symmetric: true,
            barriers,
            ..Options::default()
        };
        let mut m = CsrMatrix::from_csr(csr.clone(), options).unwrap();
        m.tune(Kernel::SpMV, Tuning::Aggressive);
        let mut y = vec![0.0; 200];
        m.dense_vector_multiply(&mut y, &x);
        assert_close(&y, &expected);
    }
}

#[test]
fn speculative_coloring_matches_reference() {
    let triplets = scrambled_band(150, 5);
    let x = deterministic_x(150);
    let expected = reference(150, &triplets, &x);
    let options = Options {
        nthreads: Some(4),
        symmetric: true,
        parallel_coloring: true,
        ..Options::default()
    };
    let mut m = CsrMatrix::from_csr(csr_of(150, &triplets), options).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y = vec![0.0; 150];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);
}

#[test]
fn sibling_strategies_match_reference() {
    let triplets = scrambled_band(120, 4);
    let csr = csr_of(120, &triplets);
    let x = deterministic_x(120);
    let expected = reference(120, &triplets, &x);

    for strategy in [
        SymStrategy::Atomics,
        SymStrategy::EffectiveRanges,
        SymStrategy::LocalVectors,
    ] {
        let options = Options {
            nthreads: Some(3),
            symmetric: true,
            strategy,
            ..Options::default()
        };
        let mut m = CsrMatrix::from_csr(csr.clone(), options).unwrap();
        m.tune(Kernel::SpMV, Tuning::Aggressive);
        let mut y = vec![0.0; 120];
        m.dense_vector_multiply(&mut y, &x);
        assert_close(&y, &expected);

        // Local vectors must be left clean for the next call.
        let mut y2 = vec![0.0; 120];
        m.dense_vector_multiply(&mut y2, &x);
        assert_close(&y2, &expected);
    }
}

#[test]
fn result_is_invariant_under_thread_count() {
    let triplets = scrambled_band(250, 7);
    let csr = csr_of(250, &triplets);
    let x = deterministic_x(250);

    let mut single = CsrMatrix::from_csr(csr.clone(), sym_options(1)).unwrap();
    single.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y1 = vec![0.0; 250];
    single.dense_vector_multiply(&mut y1, &x);

    for nthreads in 2..=6 {
        let mut m = CsrMatrix::from_csr(csr.clone(), sym_options(nthreads)).unwrap();
        m.tune(Kernel::SpMV, Tuning::Aggressive);
        let mut y = vec![0.0; 250];
        m.dense_vector_multiply(&mut y, &x);
        assert_close(&y, &y1);
    }
}

#[test]
fn tuning_twice_yields_identical_results() {
    let triplets = scrambled_band(180, 5);
    let x = deterministic_x(180);
    let mut m = CsrMatrix::from_csr(csr_of(180, &triplets), sym_options(3)).unwrap();

    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y1 = vec![0.0; 180];
    m.dense_vector_multiply(&mut y1, &x);

    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y2 = vec![0.0; 180];
    m.dense_vector_multiply(&mut y2, &x);

    // Same tuning, same schedule, bit-identical summation order.
    assert_eq!(y1, y2);
}

#[test]
fn tune_none_installs_the_vanilla_kernel() {
    let triplets = scrambled_band(90, 4);
    let x = deterministic_x(90);
    let expected = reference(90, &triplets, &x);
    let mut m = CsrMatrix::from_csr(csr_of(90, &triplets), sym_options(2)).unwrap();

    assert!(!m.tune(Kernel::SpMV, Tuning::None));
    let mut y = vec![0.0; 90];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);

    // Aggressive then back to None: the compressed representation is
    // discarded and the vanilla kernel still works.
    assert!(m.tune(Kernel::SpMV, Tuning::Aggressive));
    assert!(!m.tune(Kernel::SpMV, Tuning::None));
    assert_eq!(m.ncolors(), 0);
    let mut y2 = vec![0.0; 90];
    m.dense_vector_multiply(&mut y2, &x);
    assert_close(&y2, &expected);
}

#[test]
fn non_symmetric_matrices_use_the_row_split_kernel() {
    // Deliberately unsymmetric.
    let triplets = vec![
        Triplet::new(0i64, 1i64, 3.0),
        Triplet::new(1, 0, -2.0),
        Triplet::new(1, 2, 5.0),
        Triplet::new(2, 2, 1.0),
    ];
    let x = vec![1.0, 2.0, 3.0];
    let expected = reference(3, &triplets, &x);
    let options = Options {
        nthreads: Some(2),
        symmetric: false,
        ..Options::default()
    };
    let mut m = CsrMatrix::from_csr(csr_of(3, &triplets), options).unwrap();
    assert!(!m.symmetric());
    assert!(m.tune(Kernel::SpMV, Tuning::Aggressive));
    let mut y = vec![0.0; 3];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);
}

#[test]
fn borrowed_csr_arrays_are_supported() {
    let triplets = symmetrize(&[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 2.0)]);
    let csr = csr_of(2, &triplets);
    let x = vec![1.0, 2.0];
    let expected = reference(2, &triplets, &x);

    let mut m = CsrMatrix::from_raw_parts(
        2,
        2,
        &csr.rowptr,
        &csr.colind,
        &csr.values,
        sym_options(2),
    )
    .unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut y = vec![0.0; 2];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &expected);
    assert!(m.size() > 0);
}

#[test]
fn repeated_multiplications_are_stable() {
    let triplets = scrambled_band(140, 6);
    let x = deterministic_x(140);
    let mut m = CsrMatrix::from_csr(csr_of(140, &triplets), sym_options(4)).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let mut first = vec![0.0; 140];
    m.dense_vector_multiply(&mut first, &x);
    for _ in 0..10 {
        let mut y = vec![0.0; 140];
        m.dense_vector_multiply(&mut y, &x);
        assert_eq!(first, y);
    }
}

#[test]
fn file_construction_round_trip() {
    let text = "\
%%MatrixMarket matrix coordinate real symmetric
4 4 7
1 1 2.0
2 1 -1.0
2 2 2.0
3 2 -1.0
3 3 2.0
4 3 -1.0
4 4 2.0
";
    let path = std::env::temp_dir().join("ochre_engine_roundtrip.mtx");
    std::fs::write(&path, text).unwrap();
    let mut m: CsrMatrix<f64, i64> = CsrMatrix::from_file(&path, sym_options(2)).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(m.nrows(), 4);
    assert!(m.symmetric());
    // Both halves are staged.
    assert_eq!(m.nnz(), 10);
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let x = vec![1.0; 4];
    let mut y = vec![0.0; 4];
    m.dense_vector_multiply(&mut y, &x);
    assert_close(&y, &[1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn works_at_f32_and_i32_widths() {
    let triplets = vec![
        Triplet::new(0i32, 0i32, 2.0f32),
        Triplet::new(0, 1, 1.0),
        Triplet::new(1, 0, 1.0),
        Triplet::new(1, 1, 2.0),
    ];
    let csr = Csr::from_triplets(2, 2, &triplets).unwrap();
    let options = Options {
        nthreads: Some(2),
        symmetric: true,
        ..Options::default()
    };
    let mut m = CsrMatrix::from_csr(csr, options).unwrap();
    m.tune(Kernel::SpMV, Tuning::Aggressive);
    let x = vec![1.0f32, 1.0];
    let mut y = vec![0.0f32; 2];
    m.dense_vector_multiply(&mut y, &x);
    assert!((y[0] - 3.0).abs() < 1e-5);
    assert!((y[1] - 3.0).abs() < 1e-5);
}

#[test]
fn zero_thread_configuration_is_rejected() {
    let triplets = symmetrize(&[(0, 0, 1.0)]);
    let options = Options {
        nthreads: Some(0),
        symmetric: true,
        ..Options::default()
    };
    let err = CsrMatrix::from_csr(csr_of(1, &triplets), options).unwrap_err();
    assert!(err.to_string().contains("nonzero"));
}
