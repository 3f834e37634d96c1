use std::arch::aarch64::{
    float32x4_t, vaddq_f32, vaddq_s32, vaddvq_f32, vbslq_f32, vceqq_f32, vcgtq_f32, vcltq_f32,
    vcvtq_s32_f32, vdupq_n_f32, vdupq_n_s32, vfmaq_f32, vfmsq_f32, vld1q_f32, vmaxq_f32,
    vminq_f32, vmulq_f32, vreinterpretq_f32_s32, vrndnq_f32, vshlq_n_s32, vst1q_f32, vsubq_f32,
};
use std::f32::consts::LOG2_E;

use super::{EXP_HI, EXP_LO, EXP_POLY, LN2_HI, LN2_LO};

/// NEON register width in `f32` lanes.
const NEON_WIDTH: usize = 4;

#[target_feature(enable = "neon")]
pub(super) unsafe fn inner_product_neon(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    // Two 4-lane accumulators cover one LANE_WIDTH chunk per step.
    let chunks = n / (2 * NEON_WIDTH);
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut acc0 = vdupq_n_f32(0.0);
    let mut acc1 = vdupq_n_f32(0.0);

    // SAFETY: every offset + 2 * NEON_WIDTH <= chunks * 2 * NEON_WIDTH <= n.
    for i in 0..chunks {
        let off = i * 2 * NEON_WIDTH;
        acc0 = vfmaq_f32(acc0, vld1q_f32(a_ptr.add(off)), vld1q_f32(b_ptr.add(off)));
        acc1 = vfmaq_f32(
            acc1,
            vld1q_f32(a_ptr.add(off + NEON_WIDTH)),
            vld1q_f32(b_ptr.add(off + NEON_WIDTH)),
        );
    }

    let mut result = vaddvq_f32(vaddq_f32(acc0, acc1));
    for j in chunks * 2 * NEON_WIDTH..n {
        result += a[j] * b[j];
    }
    result
}

#[target_feature(enable = "neon")]
pub(super) unsafe fn subtract_into_neon(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    let chunks = n / NEON_WIDTH;
    let d_ptr = dst.as_mut_ptr();
    let s_ptr = src.as_ptr();

    // SAFETY: every offset + NEON_WIDTH <= n.
    for i in 0..chunks {
        let off = i * NEON_WIDTH;
        let d = vld1q_f32(d_ptr.add(off));
        vst1q_f32(d_ptr.add(off), vsubq_f32(d, vld1q_f32(s_ptr.add(off))));
    }
    for j in chunks * NEON_WIDTH..n {
        dst[j] -= src[j];
    }
}

/// `exp` of every lane; same reduction and limits as the AVX2 kernel.
#[inline]
#[target_feature(enable = "neon")]
unsafe fn exp_neon(x: float32x4_t) -> float32x4_t {
    let hi = vdupq_n_f32(EXP_HI);
    let lo = vdupq_n_f32(EXP_LO);
    let xc = vminq_f32(vmaxq_f32(x, lo), hi);
    let n = vrndnq_f32(vmulq_f32(xc, vdupq_n_f32(LOG2_E)));
    let n = vminq_f32(vmaxq_f32(n, vdupq_n_f32(-126.0)), vdupq_n_f32(127.0));
    let r = vfmsq_f32(xc, n, vdupq_n_f32(LN2_HI));
    let r = vfmsq_f32(r, n, vdupq_n_f32(LN2_LO));

    let mut p = vdupq_n_f32(EXP_POLY[0]);
    for &c in &EXP_POLY[1..] {
        p = vfmaq_f32(vdupq_n_f32(c), p, r);
    }
    let biased = vaddq_s32(vcvtq_s32_f32(n), vdupq_n_s32(127));
    let y = vmulq_f32(p, vreinterpretq_f32_s32(vshlq_n_s32::<23>(biased)));

    let y = vbslq_f32(vcgtq_f32(x, hi), vdupq_n_f32(f32::INFINITY), y);
    let y = vbslq_f32(vcltq_f32(x, lo), vdupq_n_f32(0.0), y);
    vbslq_f32(vceqq_f32(x, x), y, x)
}

#[target_feature(enable = "neon")]
pub(super) unsafe fn exp_sum_neon(row: &[f32], shift: f32) -> f32 {
    let n = row.len();
    let chunks = n / (2 * NEON_WIDTH);
    let ptr = row.as_ptr();
    let s = vdupq_n_f32(shift);
    let mut acc0 = vdupq_n_f32(0.0);
    let mut acc1 = vdupq_n_f32(0.0);

    // SAFETY: every offset + 2 * NEON_WIDTH <= n.
    for i in 0..chunks {
        let off = i * 2 * NEON_WIDTH;
        let x0 = vsubq_f32(vld1q_f32(ptr.add(off)), s);
        let x1 = vsubq_f32(vld1q_f32(ptr.add(off + NEON_WIDTH)), s);
        acc0 = vaddq_f32(acc0, exp_neon(x0));
        acc1 = vaddq_f32(acc1, exp_neon(x1));
    }

    let mut result = vaddvq_f32(vaddq_f32(acc0, acc1));
    for &x in &row[chunks * 2 * NEON_WIDTH..] {
        result += (x - shift).exp();
    }
    result
}
