//! Scalar reference implementations.
//!
//! The SIMD and lane-accumulator kernels are tested against these.

#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn subtract_into(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d -= s;
    }
}

#[inline]
#[must_use]
pub fn exp_sum(row: &[f32]) -> f32 {
    row.iter().map(|x| x.exp()).sum()
}

#[inline]
#[must_use]
pub fn max_value(row: &[f32]) -> f32 {
    row.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// First index of the largest value, by linear scan.
#[must_use]
pub fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
