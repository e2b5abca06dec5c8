use split_borrow::Grid;

#[test]
fn disjoint_rows_are_independent() {
    let mut grid = Grid::new(4, 3);
    {
        let (first, last) = grid.row_pair_mut(0, 3).unwrap();
        first[0] = 1;
        last[2] = 9;
    }
    assert_eq!(grid.row(0).unwrap(), &[1, 0, 0]);
    assert_eq!(grid.row(3).unwrap(), &[0, 0, 9]);
}

#[test]
fn reversed_order_works() {
    let mut grid = Grid::new(4, 2);
    let (high, low) = grid.row_pair_mut(3, 1).unwrap();
    high[0] = 7;
    low[1] = 5;
    assert_eq!(grid.row(3).unwrap(), &[7, 0]);
    assert_eq!(grid.row(1).unwrap(), &[0, 5]);
}

#[test]
fn equal_or_out_of_range_is_none() {
    let mut grid = Grid::new(2, 2);
    assert!(grid.row_pair_mut(1, 1).is_none());
    assert!(grid.row_pair_mut(0, 2).is_none());
    assert!(grid.row_pair_mut(5, 0).is_none());
}
