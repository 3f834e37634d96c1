//! Reduction kernels over `f32` slices.
//!
//! `inner_product`, `subtract_into` and the exponential sums dispatch at
//! runtime:
//! - AVX2+FMA on `x86_64` (runtime detection)
//! - NEON on `aarch64`
//! - scalar or lane-accumulator loops otherwise
//!
//! The vector exponential reduces `x = n*ln2 + r` and evaluates a degree-7
//! polynomial in `r`. Inputs above `ln(f32::MAX)` give `inf` and inputs below
//! `ln(f32::MIN_POSITIVE)` give 0, so the unshifted sum still overflows where
//! libm would. Slice lengths need not be multiples of the lane width; the tail
//! is always handled by a scalar loop.
//!
//! None of these functions allocate.

#[cfg(target_arch = "aarch64")]
mod aarch64;
pub mod portable;
#[cfg(test)]
mod tests;
#[cfg(target_arch = "x86_64")]
mod x86_64;

/// Number of `f32` values processed together (one AVX register).
pub const LANE_WIDTH: usize = 8;

/// A lane-width accumulator.
pub type Lanes = [f32; LANE_WIDTH];

/// Largest input whose exponential is finite.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const EXP_HI: f32 = 88.722_83;
/// Smallest input whose exponential is a normal `f32`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const EXP_LO: f32 = -87.336_55;
/// `ln 2` split so that `n * LN2_HI` is exact for `|n| <= 127`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const LN2_HI: f32 = 0.693_359_4;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const LN2_LO: f32 = -2.121_944_4e-4;
/// Taylor coefficients of `exp(r)`, highest degree first.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const EXP_POLY: [f32; 8] = [
    1.0 / 5040.0,
    1.0 / 720.0,
    1.0 / 120.0,
    1.0 / 24.0,
    1.0 / 6.0,
    0.5,
    1.0,
    1.0,
];

/// Collapse a lane accumulator into one value by pairwise folding
/// (`log2(LANE_WIDTH)` steps: upper half onto lower half).
#[inline]
pub fn horizontal_sum(x: &Lanes) -> f32 {
    fold_lanes(x, |a, b| a + b)
}

/// Same folding as [`horizontal_sum`] with `max` instead of `+`.
#[inline]
pub fn horizontal_max(x: &Lanes) -> f32 {
    fold_lanes(x, f32::max)
}

#[inline]
fn fold_lanes(x: &Lanes, op: impl Fn(f32, f32) -> f32) -> f32 {
    let mut v = *x;
    let mut width = LANE_WIDTH;
    while width > 1 {
        width /= 2;
        for i in 0..width {
            v[i] = op(v[i], v[i + width]);
        }
    }
    v[0]
}

/// Copy one lane-width chunk into a register image.
#[inline]
pub(crate) fn load_lanes(chunk: &[f32]) -> Lanes {
    let mut lanes = [0.0; LANE_WIDTH];
    lanes.copy_from_slice(&chunk[..LANE_WIDTH]);
    lanes
}

/// `sum(a[i] * b[i])` over the common length of `a` and `b`.
///
/// Returns 0.0 for empty input.
#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            // SAFETY: AVX2 and FMA availability verified at runtime; the kernel
            // bounds every access by min(a.len(), b.len()).
            return unsafe { x86_64::inner_product_avx2(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: NEON is always available on aarch64.
        return unsafe { aarch64::inner_product_neon(a, b) };
    }
    #[allow(unreachable_code)]
    portable::inner_product(a, b)
}

/// `dst[i] -= src[i]` in place over the common length.
#[inline]
pub fn subtract_into(dst: &mut [f32], src: &[f32]) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 availability verified at runtime; accesses are bounded
            // by min(dst.len(), src.len()).
            unsafe { x86_64::subtract_into_avx2(dst, src) };
            return;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: NEON is always available on aarch64.
        unsafe { aarch64::subtract_into_neon(dst, src) };
        return;
    }
    #[allow(unreachable_code)]
    portable::subtract_into(dst, src)
}

/// `sum(exp(x))` over `row`, without any max subtraction.
///
/// Large positive scores overflow to `inf`; see [`crate::probability`].
#[inline]
#[must_use]
pub fn exp_sum(row: &[f32]) -> f32 {
    exp_sum_shifted(row, 0.0)
}

/// `sum(exp(x - shift))` over `row`.
#[inline]
#[must_use]
pub fn exp_sum_shifted(row: &[f32], shift: f32) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            // SAFETY: AVX2 and FMA availability verified at runtime; the kernel
            // bounds every access by row.len().
            return unsafe { x86_64::exp_sum_avx2(row, shift) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: NEON is always available on aarch64.
        return unsafe { aarch64::exp_sum_neon(row, shift) };
    }
    #[allow(unreachable_code)]
    lanes_exp_sum(row, shift)
}

fn lanes_exp_sum(row: &[f32], shift: f32) -> f32 {
    let mut acc: Lanes = [0.0; LANE_WIDTH];
    let chunks = row.chunks_exact(LANE_WIDTH);
    let tail = chunks.remainder();
    for chunk in chunks {
        for (a, &x) in acc.iter_mut().zip(chunk) {
            *a += (x - shift).exp();
        }
    }
    let mut sum = horizontal_sum(&acc);
    for &x in tail {
        sum += (x - shift).exp();
    }
    sum
}

/// Largest value in `row`; `-inf` for an empty row. NaNs are ignored.
#[inline]
#[must_use]
pub fn max_value(row: &[f32]) -> f32 {
    let mut acc: Lanes = [f32::NEG_INFINITY; LANE_WIDTH];
    let chunks = row.chunks_exact(LANE_WIDTH);
    let tail = chunks.remainder();
    for chunk in chunks {
        for (a, &x) in acc.iter_mut().zip(chunk) {
            *a = a.max(x);
        }
    }
    tail.iter().fold(horizontal_max(&acc), |m, &x| m.max(x))
}
