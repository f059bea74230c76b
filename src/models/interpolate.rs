//! Bilinear logit upsampling
//!
//! Evaluation compares logits against full-resolution labels, so logits are
//! resized with the segmentor's fixed `align_corners` flag before the
//! per-pixel argmax.

use ndarray::Array4;

/// Resize `[B, K, H, W]` logits to `(out_h, out_w)` with bilinear sampling
pub fn resize_bilinear(
    logits: &Array4<f32>,
    out_h: usize,
    out_w: usize,
    align_corners: bool,
) -> Array4<f32> {
    let (b, k, in_h, in_w) = logits.dim();
    if in_h == out_h && in_w == out_w {
        return logits.clone();
    }
    let mut out = Array4::<f32>::zeros((b, k, out_h, out_w));
    for oy in 0..out_h {
        let (y0, y1, wy) = source_span(oy, in_h, out_h, align_corners);
        for ox in 0..out_w {
            let (x0, x1, wx) = source_span(ox, in_w, out_w, align_corners);
            for bi in 0..b {
                for ki in 0..k {
                    let top = logits[[bi, ki, y0, x0]] * (1.0 - wx) + logits[[bi, ki, y0, x1]] * wx;
                    let bot = logits[[bi, ki, y1, x0]] * (1.0 - wx) + logits[[bi, ki, y1, x1]] * wx;
                    out[[bi, ki, oy, ox]] = top * (1.0 - wy) + bot * wy;
                }
            }
        }
    }
    out
}

/// Map an output coordinate to its two source indices and blend weight
fn source_span(out_idx: usize, in_len: usize, out_len: usize, align_corners: bool) -> (usize, usize, f32) {
    if in_len == 1 {
        return (0, 0, 0.0);
    }
    let src = if align_corners {
        out_idx as f32 * (in_len - 1) as f32 / (out_len - 1).max(1) as f32
    } else {
        ((out_idx as f32 + 0.5) * in_len as f32 / out_len as f32 - 0.5).max(0.0)
    };
    let lo = (src.floor() as usize).min(in_len - 1);
    let hi = (lo + 1).min(in_len - 1);
    (lo, hi, src - lo as f32)
}
