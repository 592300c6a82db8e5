//! # Peak detection and anchor interpolation
//!
//! Minimal replacements for the scientific-library routines the grid logic
//! needs: a local-maximum peak finder with minimum-distance and
//! minimum-width filters, and polynomial interpolation through a sparse set
//! of anchor points (natural cubic spline for four or more anchors, the
//! unique parabola for three, linear for two).

/// Indices of peaks in `values`, in ascending order.
///
/// A candidate is a strict local maximum (plateaus count once, at their
/// midpoint). Candidates closer than `min_distance` to a taller kept peak
/// are discarded, as are peaks whose extent at half prominence is narrower
/// than `min_width` samples.
pub fn find_peaks(values: &[f64], min_distance: usize, min_width: usize) -> Vec<usize> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }

    // strict local maxima, plateaus collapsed to their midpoint
    let mut candidates = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if values[i] > values[i - 1] {
            let mut j = i;
            while j < n - 1 && values[j + 1] == values[i] {
                j += 1;
            }
            if j < n - 1 && values[j + 1] < values[i] {
                candidates.push((i + j) / 2);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }

    // distance filter: taller peaks silence smaller neighbours
    let mut keep = vec![true; candidates.len()];
    let mut by_height: Vec<usize> = (0..candidates.len()).collect();
    by_height.sort_by(|&a, &b| values[candidates[b]].total_cmp(&values[candidates[a]]));
    for &tallest in &by_height {
        if !keep[tallest] {
            continue;
        }
        for other in 0..candidates.len() {
            if other != tallest
                && keep[other]
                && candidates[tallest].abs_diff(candidates[other]) < min_distance
            {
                keep[other] = false;
            }
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter(|&(_, kept)| kept)
        .map(|(peak, _)| peak)
        .filter(|&peak| width_at_half_prominence(values, peak) >= min_width)
        .collect()
}

/// Number of consecutive samples around `peak` that stay above the half
/// prominence level.
fn width_at_half_prominence(values: &[f64], peak: usize) -> usize {
    let height = values[peak];

    // prominence base: the higher of the two valley minima flanking the peak,
    // each searched until the terrain rises above the peak again
    let mut left_base = height;
    let mut i = peak;
    while i > 0 && values[i - 1] <= height {
        i -= 1;
        left_base = left_base.min(values[i]);
    }
    let mut right_base = height;
    let mut i = peak;
    while i + 1 < values.len() && values[i + 1] <= height {
        i += 1;
        right_base = right_base.min(values[i]);
    }

    let prominence = height - left_base.max(right_base);
    let threshold = height - prominence / 2.0;

    let mut lo = peak;
    while lo > 0 && values[lo - 1] >= threshold {
        lo -= 1;
    }
    let mut hi = peak;
    while hi + 1 < values.len() && values[hi + 1] >= threshold {
        hi += 1;
    }
    hi - lo + 1
}

/// Interpolates through the anchor points `(xs[i], ys[i])` and evaluates the
/// curve at every integer in `[0, len)`. Anchor x values must be strictly
/// ascending; queries outside the anchor range extend the boundary segment.
pub fn interpolate_anchors(xs: &[usize], ys: &[f64], len: usize) -> Vec<f64> {
    match xs.len() {
        0 => vec![0.0; len],
        1 => vec![ys[0]; len],
        2 => {
            let (x0, x1) = (xs[0] as f64, xs[1] as f64);
            (0..len)
                .map(|t| {
                    let r = (t as f64 - x0) / (x1 - x0);
                    ys[0] * (1.0 - r) + ys[1] * r
                })
                .collect()
        }
        3 => {
            // the unique parabola through three points (Lagrange form)
            let (x0, x1, x2) = (xs[0] as f64, xs[1] as f64, xs[2] as f64);
            (0..len)
                .map(|t| {
                    let t = t as f64;
                    ys[0] * (t - x1) * (t - x2) / ((x0 - x1) * (x0 - x2))
                        + ys[1] * (t - x0) * (t - x2) / ((x1 - x0) * (x1 - x2))
                        + ys[2] * (t - x0) * (t - x1) / ((x2 - x0) * (x2 - x1))
                })
                .collect()
        }
        _ => cubic_spline(xs, ys, len),
    }
}

/// Natural cubic spline through the anchors, evaluated at `0..len`.
fn cubic_spline(xs: &[usize], ys: &[f64], len: usize) -> Vec<f64> {
    let m = xs.len();
    let x: Vec<f64> = xs.iter().map(|&v| v as f64).collect();
    let h: Vec<f64> = (0..m - 1).map(|i| x[i + 1] - x[i]).collect();

    // solve the tridiagonal system for the second derivatives, natural
    // boundary conditions (second derivative zero at both ends)
    let mut sub = vec![0.0; m];
    let mut diag = vec![1.0; m];
    let mut sup = vec![0.0; m];
    let mut rhs = vec![0.0; m];
    for i in 1..m - 1 {
        sub[i] = h[i - 1];
        diag[i] = 2.0 * (h[i - 1] + h[i]);
        sup[i] = h[i];
        rhs[i] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
    }

    // Thomas algorithm
    let mut second = vec![0.0; m];
    let mut sup_prime = vec![0.0; m];
    let mut rhs_prime = vec![0.0; m];
    sup_prime[0] = sup[0] / diag[0];
    rhs_prime[0] = rhs[0] / diag[0];
    for i in 1..m {
        let denom = diag[i] - sub[i] * sup_prime[i - 1];
        sup_prime[i] = sup[i] / denom;
        rhs_prime[i] = (rhs[i] - sub[i] * rhs_prime[i - 1]) / denom;
    }
    second[m - 1] = rhs_prime[m - 1];
    for i in (0..m - 1).rev() {
        second[i] = rhs_prime[i] - sup_prime[i] * second[i + 1];
    }

    let mut out = Vec::with_capacity(len);
    let mut segment = 0;
    for t in 0..len {
        let t = t as f64;
        while segment + 2 < m && t > x[segment + 1] {
            segment += 1;
        }
        let (xa, xb) = (x[segment], x[segment + 1]);
        let hs = h[segment];
        let (ma, mb) = (second[segment], second[segment + 1]);
        let (ya, yb) = (ys[segment], ys[segment + 1]);
        let a = (xb - t) / hs;
        let b = (t - xa) / hs;
        out.push(
            ma * (xb - t).powi(3) / (6.0 * hs)
                + mb * (t - xa).powi(3) / (6.0 * hs)
                + (ya - ma * hs * hs / 6.0) * a
                + (yb - mb * hs * hs / 6.0) * b,
        );
    }
    out
}
