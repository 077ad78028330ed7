#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Ordinary least squares fit of `y = intercept + slope * x`.
///
/// A single point (or points sharing one `x`) yields a flat line through
/// the mean of `y`.
pub(crate) fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let x_mean = mean(&xs)?;
    let y_mean = mean(&ys)?;

    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return Some((0.0, y_mean));
    }

    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}

/// Pearson correlation; `None` with fewer than two pairs or zero variance.
pub(crate) fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }

    let xs: Vec<f64> = pairs.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, y)| *y).collect();
    let x_mean = mean(&xs)?;
    let y_mean = mean(&ys)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in pairs {
        sxy += (x - x_mean) * (y - y_mean);
        sxx += (x - x_mean).powi(2);
        syy += (y - y_mean).powi(2);
    }

    let denominator = (sxx * syy).sqrt();
    if denominator == 0.0 {
        return None;
    }
    Some((sxy / denominator).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    #[test]
    fn linear_fit_recovers_exact_line() {
        let points = [(2011.0, 14.0), (2014.0, 20.0), (2017.0, 26.0)];
        let (slope, intercept) = must_some(linear_fit(&points));
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept + slope * 2020.0 - 32.0).abs() < 1e-6);
    }

    #[test]
    fn linear_fit_single_point_is_flat() {
        let (slope, intercept) = must_some(linear_fit(&[(2021.0, 46.0)]));
        assert_eq!(slope, 0.0);
        assert_eq!(intercept, 46.0);
        assert!(linear_fit(&[]).is_none());
    }

    #[test]
    fn pearson_detects_perfect_and_inverse_relationships() {
        let up = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        let down = [(1.0, 6.0), (2.0, 4.0), (3.0, 2.0)];
        assert!((must_some(pearson(&up)) - 1.0).abs() < 1e-12);
        assert!((must_some(pearson(&down)) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_needs_variance_and_two_points() {
        assert!(pearson(&[(1.0, 2.0)]).is_none());
        assert!(pearson(&[(1.0, 2.0), (1.0, 3.0)]).is_none());
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert!(mean(&[]).is_none());
        assert!((must_some(mean(&[4.7, 9.45])) - 7.075).abs() < 1e-12);
    }
}
