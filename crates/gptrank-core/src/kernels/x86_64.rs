use std::arch::x86_64::{
    __m256, _mm256_add_epi32, _mm256_add_ps, _mm256_blendv_ps, _mm256_castps256_ps128,
    _mm256_castsi256_ps, _mm256_cmp_ps, _mm256_cvtps_epi32, _mm256_extractf128_ps,
    _mm256_fmadd_ps, _mm256_fnmadd_ps, _mm256_loadu_ps, _mm256_max_ps, _mm256_min_ps,
    _mm256_mul_ps, _mm256_round_ps, _mm256_set1_epi32, _mm256_set1_ps, _mm256_setzero_ps,
    _mm256_slli_epi32, _mm256_storeu_ps, _mm256_sub_ps, _mm_add_ps, _mm_add_ss, _mm_cvtss_f32,
    _mm_movehl_ps, _mm_shuffle_ps, _CMP_GT_OQ, _CMP_LT_OQ, _CMP_UNORD_Q, _MM_FROUND_NO_EXC,
    _MM_FROUND_TO_NEAREST_INT,
};
use std::f32::consts::LOG2_E;

use super::{EXP_HI, EXP_LO, EXP_POLY, LANE_WIDTH, LN2_HI, LN2_LO};

/// Reduce the 8 lanes of `x` to one sum: high quad onto low quad, then pairs.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum256(x: __m256) -> f32 {
    let hi = _mm256_extractf128_ps(x, 1);
    let lo = _mm256_castps256_ps128(x);
    let quad = _mm_add_ps(lo, hi);
    let dual = _mm_add_ps(quad, _mm_movehl_ps(quad, quad));
    let single = _mm_add_ss(dual, _mm_shuffle_ps(dual, dual, 1));
    _mm_cvtss_f32(single)
}

#[target_feature(enable = "avx2", enable = "fma")]
pub(super) unsafe fn inner_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let chunks = n / LANE_WIDTH;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // Two independent accumulators hide the FMA latency.
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut i = 0;
    // SAFETY: every offset + LANE_WIDTH <= chunks * LANE_WIDTH <= n.
    while i + 1 < chunks {
        let off = i * LANE_WIDTH;
        acc0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(off)),
            _mm256_loadu_ps(b_ptr.add(off)),
            acc0,
        );
        acc1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(off + LANE_WIDTH)),
            _mm256_loadu_ps(b_ptr.add(off + LANE_WIDTH)),
            acc1,
        );
        i += 2;
    }
    if i < chunks {
        let off = i * LANE_WIDTH;
        acc0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(off)),
            _mm256_loadu_ps(b_ptr.add(off)),
            acc0,
        );
    }

    let mut result = hsum256(_mm256_add_ps(acc0, acc1));
    for j in chunks * LANE_WIDTH..n {
        result += a[j] * b[j];
    }
    result
}

#[target_feature(enable = "avx2")]
pub(super) unsafe fn subtract_into_avx2(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    let chunks = n / LANE_WIDTH;
    let d_ptr = dst.as_mut_ptr();
    let s_ptr = src.as_ptr();

    // SAFETY: every offset + LANE_WIDTH <= n.
    for i in 0..chunks {
        let off = i * LANE_WIDTH;
        let d = _mm256_loadu_ps(d_ptr.add(off));
        let s = _mm256_loadu_ps(s_ptr.add(off));
        _mm256_storeu_ps(d_ptr.add(off), _mm256_sub_ps(d, s));
    }
    for j in chunks * LANE_WIDTH..n {
        dst[j] -= src[j];
    }
}

/// `exp` of every lane. Lanes above `EXP_HI` become `inf`, lanes below
/// `EXP_LO` become 0, NaN lanes stay NaN.
#[inline]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn exp256(x: __m256) -> __m256 {
    let hi = _mm256_set1_ps(EXP_HI);
    let lo = _mm256_set1_ps(EXP_LO);
    let xc = _mm256_min_ps(_mm256_max_ps(x, lo), hi);
    let t = _mm256_mul_ps(xc, _mm256_set1_ps(LOG2_E));
    let n = _mm256_round_ps::<{ _MM_FROUND_TO_NEAREST_INT | _MM_FROUND_NO_EXC }>(t);
    // keep 2^n a normal float
    let n_min = _mm256_set1_ps(-126.0);
    let n_max = _mm256_set1_ps(127.0);
    let n = _mm256_min_ps(_mm256_max_ps(n, n_min), n_max);
    let r = _mm256_fnmadd_ps(n, _mm256_set1_ps(LN2_HI), xc);
    let r = _mm256_fnmadd_ps(n, _mm256_set1_ps(LN2_LO), r);

    let mut p = _mm256_set1_ps(EXP_POLY[0]);
    for &c in &EXP_POLY[1..] {
        p = _mm256_fmadd_ps(p, r, _mm256_set1_ps(c));
    }
    let biased = _mm256_add_epi32(_mm256_cvtps_epi32(n), _mm256_set1_epi32(127));
    let bits = _mm256_slli_epi32::<23>(biased);
    let y = _mm256_mul_ps(p, _mm256_castsi256_ps(bits));

    let over = _mm256_cmp_ps::<_CMP_GT_OQ>(x, hi);
    let under = _mm256_cmp_ps::<_CMP_LT_OQ>(x, lo);
    let nan = _mm256_cmp_ps::<_CMP_UNORD_Q>(x, x);
    let y = _mm256_blendv_ps(y, _mm256_set1_ps(f32::INFINITY), over);
    let y = _mm256_blendv_ps(y, _mm256_setzero_ps(), under);
    _mm256_blendv_ps(y, x, nan)
}

#[target_feature(enable = "avx2", enable = "fma")]
pub(super) unsafe fn exp_sum_avx2(row: &[f32], shift: f32) -> f32 {
    let n = row.len();
    let chunks = n / LANE_WIDTH;
    let ptr = row.as_ptr();
    let s = _mm256_set1_ps(shift);

    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut i = 0;
    // SAFETY: every offset + LANE_WIDTH <= chunks * LANE_WIDTH <= n.
    while i + 1 < chunks {
        let off = i * LANE_WIDTH;
        let x0 = _mm256_sub_ps(_mm256_loadu_ps(ptr.add(off)), s);
        let x1 = _mm256_sub_ps(_mm256_loadu_ps(ptr.add(off + LANE_WIDTH)), s);
        acc0 = _mm256_add_ps(acc0, exp256(x0));
        acc1 = _mm256_add_ps(acc1, exp256(x1));
        i += 2;
    }
    if i < chunks {
        let x0 = _mm256_sub_ps(_mm256_loadu_ps(ptr.add(i * LANE_WIDTH)), s);
        acc0 = _mm256_add_ps(acc0, exp256(x0));
    }

    let mut result = hsum256(_mm256_add_ps(acc0, acc1));
    for &x in &row[chunks * LANE_WIDTH..] {
        result += (x - shift).exp();
    }
    result
}
