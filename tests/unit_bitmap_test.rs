use latticed::core::Bitmap;

#[test]
fn test_width_spans_words() {
    let mut b = Bitmap::new(200);
    b.set(0);
    b.set(63);
    b.set(64);
    b.set(199);
    assert_eq!(b.count(), 4);
    assert_eq!(b.iter_set().collect::<Vec<_>>(), vec![0, 63, 64, 199]);
}

#[test]
fn test_out_of_range_set_is_ignored_in_release() {
    let mut b = Bitmap::new(8);
    assert!(!b.test(100));
    b.clear(100);
    assert_eq!(b.count(), 0);
}

#[test]
fn test_and_or_and_not() {
    let mut a = Bitmap::from_indices(16, &[1, 2, 3, 8]);
    let b = Bitmap::from_indices(16, &[2, 3, 4]);
    let mut union = a.clone();
    union.or(&b);
    assert_eq!(union.iter_set().collect::<Vec<_>>(), vec![1, 2, 3, 4, 8]);
    a.and(&b);
    assert_eq!(a.iter_set().collect::<Vec<_>>(), vec![2, 3]);
    let mut diff = union.clone();
    diff.and_not(&b);
    assert_eq!(diff.iter_set().collect::<Vec<_>>(), vec![1, 8]);
}

#[test]
fn test_superset_reflexive_and_strict() {
    let a = Bitmap::from_indices(8, &[0, 1, 2]);
    assert!(a.is_superset_of(&a));
    let empty = Bitmap::new(8);
    assert!(a.is_superset_of(&empty));
    assert!(!empty.is_superset_of(&a));
}

#[test]
fn test_hex_dump_is_stable() {
    let mut b = Bitmap::new(8);
    b.set(0);
    b.set(4);
    let hex = b.to_hex();
    assert!(hex.starts_with("0x"));
    assert!(hex.ends_with("11"), "low byte should be 0x11, got {hex}");
}

#[test]
fn test_contiguous_run_search() {
    let b = Bitmap::from_indices(10, &[0, 1, 3, 4, 5, 6, 9]);
    assert_eq!(b.find_contiguous_run(1), Some(0));
    assert_eq!(b.find_contiguous_run(3), Some(3));
    assert_eq!(b.find_contiguous_run(4), Some(3));
    assert_eq!(b.find_contiguous_run(5), None);
}

#[test]
fn test_filled_and_clear_all() {
    let mut b = Bitmap::filled(70);
    assert_eq!(b.count(), 70);
    b.clear_all();
    assert!(b.is_empty());
}
