//! Post-processing filters for presented frames.
//!
//! Contrast-adaptive sharpening (CAS-style: per-pixel weight from the local
//! min/max so edges don't halo) recovers detail that blending smears, and
//! Lanczos resampling provides the quality path for present-side scaling.
//! Both operate on tightly-packed RGBA8 buffers.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::{PipelineError, Result};

/// Sharpen `data` in place. `sharpness` in [0, 1]; 0 is a no-op.
pub fn sharpen_cas(data: &mut [u8], width: u32, height: u32, sharpness: f32) {
    if sharpness <= 0.0 {
        return;
    }
    let w = width as usize;
    let h = height as usize;
    if data.len() < w * h * 4 || w < 3 || h < 3 {
        return;
    }

    let src = data.to_vec();
    let gain = sharpness.min(1.0) * 0.5;
    let at = |x: usize, y: usize, c: usize| src[(y * w + x) * 4 + c] as f32 / 255.0;

    for y in 0..h {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(h - 1);
        for x in 0..w {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(w - 1);
            for c in 0..3 {
                let center = at(x, y, c);
                let n = at(x, up, c);
                let s = at(x, down, c);
                let e = at(right, y, c);
                let wst = at(left, y, c);

                let mut lo = center.min(n).min(s).min(e).min(wst);
                let mut hi = center.max(n).max(s).max(e).max(wst);
                for &(cx, cy) in &[(left, up), (right, up), (left, down), (right, down)] {
                    let v = at(cx, cy, c);
                    lo = lo.min(v);
                    hi = hi.max(v);
                }

                // Weight collapses toward zero at hard edges, which is what
                // keeps the kernel from ringing.
                let hi_clamped = hi.max(1e-5);
                let weight = (lo.min(1.0 - hi) / hi_clamped).max(0.0).sqrt() * gain;

                let detail = 4.0 * center - n - s - e - wst;
                let out = (center + detail * weight).clamp(0.0, 1.0);
                data[(y * w + x) * 4 + c] = (out * 255.0) as u8;
            }
        }
    }
}

/// Resample an RGBA8 buffer to `target` with Lanczos3, then a light sharpen
/// pass to restore edge definition lost in scaling.
pub fn upscale_lanczos(
    data: &[u8],
    width: u32,
    height: u32,
    target: (u32, u32),
) -> Result<Vec<u8>> {
    let (tw, th) = target;
    if (tw, th) == (width, height) {
        return Ok(data.to_vec());
    }
    let img = RgbaImage::from_raw(width, height, data.to_vec()).ok_or(
        PipelineError::Config("buffer length does not match frame geometry".into()),
    )?;
    let resized = imageops::resize(&img, tw, th, FilterType::Lanczos3);
    let mut out = resized.into_raw();
    sharpen_cas(&mut out, tw, th, 0.3);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_regions_are_left_alone() {
        let mut data = vec![128u8; 8 * 8 * 4];
        let before = data.clone();
        sharpen_cas(&mut data, 8, 8, 0.8);
        assert_eq!(data, before);
    }

    #[test]
    fn zero_sharpness_is_identity() {
        let mut data: Vec<u8> = (0..8 * 8 * 4).map(|i| (i % 251) as u8).collect();
        let before = data.clone();
        sharpen_cas(&mut data, 8, 8, 0.0);
        assert_eq!(data, before);
    }

    #[test]
    fn sharpening_increases_edge_contrast() {
        // Vertical step edge, gray levels 64 | 192.
        let (w, h) = (8usize, 8usize);
        let mut data = vec![0u8; w * h * 4];
        for y in 0..h {
            for x in 0..w {
                let level = if x < w / 2 { 64 } else { 192 };
                let idx = (y * w + x) * 4;
                data[idx..idx + 3].fill(level);
                data[idx + 3] = 255;
            }
        }
        let before = data.clone();
        sharpen_cas(&mut data, w as u32, h as u32, 0.8);

        // Pixels adjacent to the edge move apart; alpha is untouched.
        let edge_lo = (3 * w + w / 2 - 1) * 4;
        let edge_hi = (3 * w + w / 2) * 4;
        assert!(data[edge_lo] <= before[edge_lo]);
        assert!(data[edge_hi] >= before[edge_hi]);
        assert!(data.iter().skip(3).step_by(4).all(|&a| a == 255));
    }

    #[test]
    fn upscale_produces_target_geometry() {
        let data = vec![200u8; 4 * 4 * 4];
        let out = upscale_lanczos(&data, 4, 4, (8, 6)).expect("upscale");
        assert_eq!(out.len(), 8 * 6 * 4);
    }

    #[test]
    fn upscale_rejects_bad_geometry() {
        let data = vec![0u8; 10];
        assert!(upscale_lanczos(&data, 4, 4, (8, 8)).is_err());
    }
}
