use ochre_core::{Csr, Triplet};

#[test]
fn from_parts_ok() {
    let nrows = 2usize;
    let ncols = 3usize;
    let rowptr = vec![0i64, 2, 3];
    let colind = vec![0i64, 2, 1];
    let values = vec![1.0f64, 2.0, 3.0];
    let csr = Csr::from_parts(nrows, ncols, rowptr, colind, values, true).unwrap();
    assert_eq!(csr.nnz(), 3);
    assert_eq!(csr.shape(), (2, 3));
}

#[test]
fn rowptr_first_must_be_zero() {
    let rowptr = vec![1i64, 1]; // first element not zero, length 2, last == 1 == nnz
    let colind = vec![0i64];
    let values = vec![1.0f64];
    let err = Csr::from_parts(1, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("must be 0"));
}

#[test]
fn nnz_and_lengths_must_match() {
    let rowptr = vec![0i64, 2];
    let colind = vec![0i64, 1];
    let values = vec![1.0f64];
    let err = Csr::from_parts(1, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("colind and values"));
}

#[test]
fn last_element_must_equal_nnz() {
    let rowptr = vec![0i64, 1];
    let colind = vec![0i64, 1];
    let values = vec![1.0f64, 2.0];
    let err = Csr::from_parts(1, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("last element"));
}

#[test]
fn rowptr_must_be_non_decreasing() {
    let rowptr = vec![0i64, 2, 1]; // decreasing at the last step; last element 1 == nnz
    let colind = vec![0i64];
    let values = vec![1.0f64];
    let err = Csr::from_parts(2, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("non-decreasing"));
}

#[test]
fn column_indices_must_be_in_bounds() {
    let rowptr = vec![0i64, 1];
    let colind = vec![5i64];
    let values = vec![1.0f64];
    let err = Csr::from_parts(1, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("out of bounds"));
}

#[test]
fn column_indices_must_be_strictly_increasing() {
    let rowptr = vec![0i64, 2];
    let colind = vec![1i64, 1];
    let values = vec![1.0f64, 2.0];
    let err = Csr::from_parts(1, 3, rowptr, colind, values, true).unwrap_err();
    assert!(err.to_string().contains("strictly increasing"));
}

#[test]
fn from_triplets_builds_rows_with_gaps() {
    // Rows 0 and 3 have entries; 1 and 2 are empty.
    let t = vec![
        Triplet::new(0i64, 1i64, 1.5f64),
        Triplet::new(3, 0, 2.5),
        Triplet::new(3, 2, 3.5),
    ];
    let csr = Csr::from_triplets(4, 3, &t).unwrap();
    assert_eq!(csr.rowptr, vec![0, 1, 1, 1, 3]);
    assert_eq!(csr.colind, vec![1, 0, 2]);
    assert_eq!(csr.values, vec![1.5, 2.5, 3.5]);
}

#[test]
fn from_triplets_rejects_duplicates() {
    let t = vec![
        Triplet::new(0i64, 1i64, 1.0f64),
        Triplet::new(0, 1, 2.0),
    ];
    let err = Csr::from_triplets(2, 2, &t).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn from_triplets_rejects_unsorted_rows() {
    let t = vec![
        Triplet::new(1i64, 0i64, 1.0f64),
        Triplet::new(0, 0, 2.0),
    ];
    let err = Csr::from_triplets(2, 2, &t).unwrap_err();
    assert!(err.to_string().contains("non-decreasing"));
}

#[test]
fn from_triplets_rejects_out_of_bounds() {
    let t = vec![Triplet::new(0i64, 9i64, 1.0f64)];
    let err = Csr::from_triplets(2, 2, &t).unwrap_err();
    assert!(err.to_string().contains("out of bounds"));
}

#[test]
fn works_at_32_bit_widths() {
    let t = vec![
        Triplet::new(0i32, 0i32, 1.0f32),
        Triplet::new(1, 1, 2.0),
    ];
    let csr = Csr::from_triplets(2, 2, &t).unwrap();
    assert_eq!(csr.nnz(), 2);
    assert_eq!(csr.rowptr, vec![0i32, 1, 2]);
}
