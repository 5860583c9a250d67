//! Kernelized cross-correlation distance (spec 4.7).
//!
//! Grounded exactly on `original_source/procs/_corr.py` (`stand`, `ccor`,
//! `kernel_corr`) and `procs/corr.py`'s `proc_main`: standardize both
//! series, cross-correlate via FFT, and fold the cross-correlation through
//! an exponential kernel normalized by each series' self-kernel so that a
//! series' distance to itself is exactly zero.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::types::TimeSeries;

/// `mult` in the reference implementation's `kernel_corr`; `procs/corr.py`
/// always calls it with `5`.
const ALPHA: f64 = 5.0;

/// Cross-correlation of two equal-length standardized series via FFT:
/// `ifft(fft(a) * conj(fft(b))) / len`.
fn ccor(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut fa: Vec<Complex64> = a.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    let mut fb: Vec<Complex64> = b.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    fft.process(&mut fa);
    fft.process(&mut fb);

    let mut prod: Vec<Complex64> = fa.iter().zip(fb.iter()).map(|(x, y)| x * y.conj()).collect();
    ifft.process(&mut prod);

    prod.iter().map(|c| c.re / n as f64).collect()
}

/// Normalized kernelized correlation: `sum(exp(alpha*ccor(x,y))) /
/// sqrt(sum(exp(alpha*ccor(x,x))) * sum(exp(alpha*ccor(y,y))))`.
fn kernel_corr(x: &[f64], y: &[f64]) -> f64 {
    let cxy = ccor(x, y);
    let cxx = ccor(x, x);
    let cyy = ccor(y, y);

    let num: f64 = cxy.iter().map(|c| (ALPHA * c).exp()).sum();
    let denom_x: f64 = cxx.iter().map(|c| (ALPHA * c).exp()).sum();
    let denom_y: f64 = cyy.iter().map(|c| (ALPHA * c).exp()).sum();
    num / (denom_x * denom_y).sqrt()
}

/// Distance between two equal-length series: `sqrt(2*(1-K))`, where `K` is
/// the normalized kernelized cross-correlation of their standardized forms.
pub fn distance(a: &TimeSeries, b: &TimeSeries) -> f64 {
    let sa = a.standardized();
    let sb = b.standardized();
    let k = kernel_corr(&sa, &sb);
    (2.0 * (1.0 - k)).max(0.0).sqrt()
}
