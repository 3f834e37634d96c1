use proptest::prelude::*;

use super::*;

fn close(a: f32, b: f32, scale: f32) -> bool {
    (a - b).abs() <= 1e-4 * scale.max(1.0)
}

#[test]
fn test_horizontal_sum_folds_all_lanes() {
    let x: Lanes = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    assert_eq!(horizontal_sum(&x), 36.0);
}

#[test]
fn test_horizontal_max_finds_any_lane() {
    for hot in 0..LANE_WIDTH {
        let mut x: Lanes = [-1.0; LANE_WIDTH];
        x[hot] = 4.0;
        assert_eq!(horizontal_max(&x), 4.0, "lane {hot}");
    }
}

#[test]
fn test_horizontal_max_all_negative_infinity() {
    let x: Lanes = [f32::NEG_INFINITY; LANE_WIDTH];
    assert_eq!(horizontal_max(&x), f32::NEG_INFINITY);
}

#[test]
fn test_inner_product_basic() {
    let a: Vec<f32> = (0..32).map(|i| i as f32).collect();
    let b = vec![2.0f32; 32];
    assert_eq!(inner_product(&a, &b), 992.0);
}

#[test]
fn test_inner_product_empty_and_mismatched() {
    assert_eq!(inner_product(&[], &[]), 0.0);
    assert_eq!(inner_product(&[1.0, 2.0], &[]), 0.0);
    assert_eq!(inner_product(&[1.0, 2.0, 3.0], &[1.0, 1.0]), 3.0);
}

#[test]
fn test_inner_product_remainder_lengths() {
    for n in 1..40 {
        let a: Vec<f32> = (0..n).map(|i| (i as f32) * 0.5).collect();
        let b: Vec<f32> = (0..n).map(|i| 1.0 - (i as f32) * 0.25).collect();
        let expected = portable::inner_product(&a, &b);
        assert!(close(inner_product(&a, &b), expected, expected.abs()), "n={n}");
    }
}

#[test]
fn test_subtract_into_with_tail() {
    let mut dst: Vec<f32> = (0..19).map(|i| i as f32).collect();
    let src = vec![1.0f32; 19];
    subtract_into(&mut dst, &src);
    let expected: Vec<f32> = (0..19).map(|i| i as f32 - 1.0).collect();
    assert_eq!(dst, expected);
}

#[test]
fn test_subtract_into_stops_at_shorter_input() {
    let mut dst = vec![5.0f32; 10];
    subtract_into(&mut dst, &[1.0; 3]);
    assert_eq!(&dst[..3], &[4.0; 3]);
    assert_eq!(&dst[3..], &[5.0; 7]);
}

#[test]
fn test_exp_sum_matches_definition() {
    let row = [0.0f32, 1.0, -1.0, 2.0, 0.5, 0.25, -3.0, 1.5, 0.75];
    let expected: f32 = row.iter().map(|x| x.exp()).sum();
    assert!(close(exp_sum(&row), expected, expected));
}

#[test]
fn test_exp_sum_overflows_without_shift() {
    let row = [100.0f32; 16];
    assert!(exp_sum(&row).is_infinite());
    assert!(close(exp_sum_shifted(&row, 100.0), 16.0, 16.0));
}

#[test]
fn test_exp_sum_matches_libm_across_range() {
    let mut x = -87.0f32;
    while x < 86.0 {
        let row = [x; LANE_WIDTH];
        let expected = x.exp() * LANE_WIDTH as f32;
        let got = exp_sum(&row);
        assert!(
            (got - expected).abs() <= 1e-5 * expected,
            "x={x} got={got} expected={expected}"
        );
        x += 0.37;
    }
}

#[test]
fn test_exp_sum_special_values() {
    assert_eq!(exp_sum(&[f32::NEG_INFINITY; 16]), 0.0);
    assert!(exp_sum(&[-100.0; 16]) < 1e-37);
    assert!(exp_sum(&[89.0; 16]).is_infinite());
    assert!(exp_sum(&[f32::INFINITY; 8]).is_infinite());

    let mut row = [0.0f32; 16];
    row[5] = f32::NAN;
    assert!(exp_sum(&row).is_nan());

    // -inf padding next to finite lanes contributes nothing
    let mut row = [f32::NEG_INFINITY; 8];
    row[0] = 0.0;
    assert_eq!(exp_sum(&row), 1.0);
}

#[test]
fn test_exp_sum_shifted_zero_is_exact() {
    assert_eq!(exp_sum_shifted(&[3.5; 24], 3.5), 24.0);
}

#[test]
fn test_max_value_empty_and_tail() {
    assert_eq!(max_value(&[]), f32::NEG_INFINITY);
    let mut row = vec![0.0f32; 17];
    row[16] = 9.0;
    assert_eq!(max_value(&row), 9.0);
}

#[test]
fn test_portable_argmax_first_occurrence() {
    assert_eq!(portable::argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
    assert_eq!(portable::argmax(&[2.0; 5]), Some(0));
    assert_eq!(portable::argmax(&[]), None);
}

fn vec_pair(max_len: usize) -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
    (0..max_len).prop_flat_map(|n| {
        (
            prop::collection::vec(-10.0f32..10.0, n),
            prop::collection::vec(-10.0f32..10.0, n),
        )
    })
}

proptest! {
    #[test]
    fn inner_product_agrees_with_scalar((a, b) in vec_pair(300)) {
        let scale: f32 = a.iter().zip(&b).map(|(x, y)| (x * y).abs()).sum();
        let fast = inner_product(&a, &b);
        let slow = portable::inner_product(&a, &b);
        prop_assert!(close(fast, slow, scale), "fast={fast} slow={slow}");
    }

    #[test]
    fn subtract_into_agrees_with_scalar((a, b) in vec_pair(200)) {
        let mut fast = a.clone();
        let mut slow = a;
        subtract_into(&mut fast, &b);
        portable::subtract_into(&mut slow, &b);
        prop_assert_eq!(fast, slow);
    }

    #[test]
    fn exp_sum_agrees_with_scalar(row in prop::collection::vec(-20.0f32..20.0, 0..300)) {
        let fast = exp_sum(&row);
        let slow = portable::exp_sum(&row);
        prop_assert!(close(fast, slow, slow), "fast={fast} slow={slow}");
    }

    #[test]
    fn exp_sum_shifted_agrees_with_scalar(
        row in prop::collection::vec(-60.0f32..60.0, 0..300),
        shift in -10.0f32..10.0,
    ) {
        let shifted: Vec<f32> = row.iter().map(|x| x - shift).collect();
        let fast = exp_sum_shifted(&row, shift);
        let slow = portable::exp_sum(&shifted);
        prop_assert!(close(fast, slow, slow), "fast={fast} slow={slow}");
    }

    #[test]
    fn max_value_agrees_with_scalar(row in prop::collection::vec(-1e6f32..1e6, 0..100)) {
        prop_assert_eq!(max_value(&row), portable::max_value(&row));
    }
}
