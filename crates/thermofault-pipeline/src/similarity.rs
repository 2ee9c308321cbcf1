//! Whole-image similarity scores used by the threshold controller.
//!
//! [`ssim`] measures structural agreement of the registered grayscale
//! pair; [`histogram_correlation`] compares their tonal distributions to
//! detect a palette or range change between visits.

use image::GrayImage;

const DATA_RANGE: f64 = 255.0;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Summed-area table over `f(pixel)` with a zero guard row and column.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn new(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f64) -> Self {
        let stride = width as usize + 1;
        let mut sums = vec![0.0; stride * (height as usize + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += f(x, y);
                let i = (y as usize + 1) * stride + x as usize + 1;
                sums[i] = sums[i - stride] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over the half-open box `[x0, x1) x [y0, y1)`.
    fn sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let at = |x: u32, y: u32| self.sums[y as usize * self.stride + x as usize];
        at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0)
    }
}

/// Mean structural similarity between two grayscale images of equal
/// size, using a `window x window` uniform window and sample
/// covariances. Only windows lying fully inside the image contribute.
///
/// The window shrinks to the smaller image side when the image is
/// smaller than `window`. Returns 1.0 for identical inputs and for
/// empty or mismatched inputs returns 0.0.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::similar_names)]
pub fn ssim(a: &GrayImage, b: &GrayImage, window: u32) -> f64 {
    let (w, h) = a.dimensions();
    if (w, h) != b.dimensions() || w == 0 || h == 0 {
        return 0.0;
    }
    let mut win = window.min(w).min(h);
    if win % 2 == 0 {
        win -= 1;
    }
    if win < 2 {
        return if a == b { 1.0 } else { 0.0 };
    }

    let va = |x: u32, y: u32| f64::from(a.get_pixel(x, y).0[0]);
    let vb = |x: u32, y: u32| f64::from(b.get_pixel(x, y).0[0]);
    let sa = Integral::new(w, h, va);
    let sb = Integral::new(w, h, vb);
    let saa = Integral::new(w, h, |x, y| va(x, y) * va(x, y));
    let sbb = Integral::new(w, h, |x, y| vb(x, y) * vb(x, y));
    let sab = Integral::new(w, h, |x, y| va(x, y) * vb(x, y));

    let n = f64::from(win * win);
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut windows = 0u64;
    for y0 in 0..=(h - win) {
        for x0 in 0..=(w - win) {
            let (x1, y1) = (x0 + win, y0 + win);
            let ux = sa.sum(x0, y0, x1, y1) / n;
            let uy = sb.sum(x0, y0, x1, y1) / n;
            let vx = cov_norm * ux.mul_add(-ux, saa.sum(x0, y0, x1, y1) / n);
            let vy = cov_norm * uy.mul_add(-uy, sbb.sum(x0, y0, x1, y1) / n);
            let vxy = cov_norm * ux.mul_add(-uy, sab.sum(x0, y0, x1, y1) / n);

            let num = (2.0 * ux).mul_add(uy, c1) * 2.0f64.mul_add(vxy, c2);
            let den = ux.mul_add(ux, uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            windows += 1;
        }
    }
    total / windows as f64
}

/// Pearson correlation of the normalized `bins`-bin intensity
/// histograms of two images.
///
/// Returns 1.0 when either histogram is flat (zero variance), and 0.0
/// for an empty image or zero bins.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn histogram_correlation(a: &GrayImage, b: &GrayImage, bins: usize) -> f64 {
    if bins == 0 || a.as_raw().is_empty() || b.as_raw().is_empty() {
        return 0.0;
    }
    let ha = coarse_histogram(a, bins);
    let hb = coarse_histogram(b, bins);

    let mean_a = ha.iter().sum::<f64>() / bins as f64;
    let mean_b = hb.iter().sum::<f64>() / bins as f64;
    let (mut num, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (pa, pb) in ha.iter().zip(&hb) {
        let da = pa - mean_a;
        let db = pb - mean_b;
        num += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let den = (var_a * var_b).sqrt();
    if den <= f64::EPSILON {
        return 1.0;
    }
    num / den
}

/// Histogram with `bins` equal-width bins over 0..=255, normalized to
/// sum to one.
#[allow(clippy::cast_precision_loss)]
fn coarse_histogram(image: &GrayImage, bins: usize) -> Vec<f64> {
    let full = imageproc::stats::histogram(image);
    let mut coarse = vec![0.0; bins];
    let Some(channel) = full.channels.first() else {
        return coarse;
    };
    for (value, &count) in channel.iter().enumerate() {
        let bin = (value * bins / 256).min(bins - 1);
        coarse[bin] += f64::from(count);
    }
    let total: f64 = coarse.iter().sum();
    if total > 0.0 {
        for c in &mut coarse {
            *c /= total;
        }
    }
    coarse
}
