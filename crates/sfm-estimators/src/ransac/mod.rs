//! Generic sample-consensus driver (RANSAC) with an optional locally
//! optimized variant (LO-RANSAC).
//!
//! The engine is written once against the [`Estimator`] contract and
//! instantiated per model type. It performs no I/O and holds no state across
//! calls; each call is reentrant and safe to run concurrently on independent
//! correspondence sets.

mod sampler;

pub use sampler::RandomSampler;

use std::marker::PhantomData;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::estimator::Estimator;
use crate::random::derived_rng;

/// Configuration for a consensus run.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Inlier threshold, in the same units as the solver's residuals
    /// (typically a squared distance).
    pub max_error: f64,
    /// A-priori lower bound on the inlier ratio, used to seed the adaptive
    /// trial bound before the first model is found.
    pub min_inlier_ratio: f64,
    /// Target probability that at least one all-inlier sample is drawn.
    pub confidence: f64,
    /// Minimum number of trials, regardless of the adaptive bound.
    pub min_num_trials: usize,
    /// Hard cap on the number of trials.
    pub max_num_trials: usize,
    /// Optional seed overriding the thread-local generator for this run.
    pub random_seed: Option<u64>,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_error: 0.0,
            min_inlier_ratio: 0.1,
            confidence: 0.99,
            min_num_trials: 0,
            max_num_trials: 10_000,
            random_seed: None,
        }
    }
}

impl RansacOptions {
    /// Options with the given inlier threshold and defaults elsewhere.
    pub fn with_max_error(max_error: f64) -> Self {
        Self {
            max_error,
            ..Self::default()
        }
    }

    fn validate(&self) {
        assert!(self.max_error > 0.0, "max_error must be positive");
        assert!(self.min_inlier_ratio >= 0.0 && self.min_inlier_ratio <= 1.0);
        assert!(self.confidence > 0.0 && self.confidence <= 1.0);
        assert!(self.min_num_trials <= self.max_num_trials);
    }
}

/// Measured support of a candidate model.
#[derive(Debug, Clone, Copy)]
pub struct Support {
    /// Number of correspondences with residual at or below the threshold.
    pub num_inliers: usize,
    /// Sum of the inlier residuals.
    pub residual_sum: f64,
}

impl Support {
    fn none() -> Self {
        Self {
            num_inliers: 0,
            residual_sum: f64::MAX,
        }
    }

    /// Strictly more inliers wins; ties break toward the tighter fit.
    pub fn is_better_than(&self, other: &Support) -> bool {
        self.num_inliers > other.num_inliers
            || (self.num_inliers == other.num_inliers && self.residual_sum < other.residual_sum)
    }

    fn measure(residuals: &[f64], max_error: f64) -> Self {
        let mut num_inliers = 0;
        let mut residual_sum = 0.0;
        for &r in residuals {
            if r <= max_error {
                num_inliers += 1;
                residual_sum += r;
            }
        }
        Self {
            num_inliers,
            residual_sum,
        }
    }
}

/// Outcome of one consensus run. Immutable after return and owned by the
/// caller; nothing else survives the call.
#[derive(Debug, Clone)]
pub struct RansacReport<M> {
    /// Whether the best model reached the minimum inlier count.
    pub success: bool,
    /// Number of trials executed.
    pub num_trials: usize,
    /// Support of the best model.
    pub support: Support,
    /// One flag per input correspondence (empty on failure).
    pub inlier_mask: Vec<bool>,
    /// The best model, if any trial produced a supported candidate.
    pub model: Option<M>,
}

impl<M> RansacReport<M> {
    fn failure() -> Self {
        Self {
            success: false,
            num_trials: 0,
            support: Support::none(),
            inlier_mask: Vec::new(),
            model: None,
        }
    }
}

/// Adaptive bound on the number of trials needed to draw at least one
/// all-inlier minimal sample with the requested confidence.
fn compute_num_trials(
    num_inliers: usize,
    num_samples: usize,
    confidence: f64,
    min_samples: usize,
) -> usize {
    if num_samples == 0 {
        return usize::MAX;
    }
    let inlier_ratio = num_inliers as f64 / num_samples as f64;
    let nom = 1.0 - confidence;
    if nom <= 0.0 {
        return usize::MAX;
    }
    let denom = 1.0 - inlier_ratio.powi(min_samples as i32);
    if denom <= 0.0 {
        // All correspondences are inliers; a single trial suffices.
        return 1;
    }
    let trials = (nom.ln() / denom.ln()).ceil();
    if !trials.is_finite() || trials >= usize::MAX as f64 {
        usize::MAX
    } else {
        trials as usize
    }
}

fn run_rng(options: &RansacOptions) -> StdRng {
    match options.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => derived_rng(),
    }
}

/// Random sample consensus over an [`Estimator`].
pub struct Ransac<E: Estimator> {
    options: RansacOptions,
    _estimator: PhantomData<E>,
}

impl<E: Estimator> Ransac<E>
where
    E::PointA: Clone,
    E::PointB: Clone,
{
    /// Create an engine with the given options.
    ///
    /// # Panics
    ///
    /// Panics if `options.max_error` is not positive or other option fields
    /// are out of range.
    pub fn new(options: RansacOptions) -> Self {
        options.validate();
        Self {
            options,
            _estimator: PhantomData,
        }
    }

    /// Robustly estimate a model from the full correspondence set.
    ///
    /// Returns a failure report (no panic) when fewer than
    /// `E::MIN_SAMPLES` correspondences are supplied or no candidate ever
    /// reaches `E::MIN_SAMPLES` inliers.
    pub fn estimate(
        &self,
        points_a: &[E::PointA],
        points_b: &[E::PointB],
    ) -> RansacReport<E::Model> {
        assert_eq!(points_a.len(), points_b.len());
        let num_samples = points_a.len();

        let mut report = RansacReport::failure();
        if num_samples < E::MIN_SAMPLES {
            return report;
        }

        let mut rng = run_rng(&self.options);
        let mut sampler = RandomSampler::new(E::MIN_SAMPLES, num_samples);
        let mut sample_a: Vec<E::PointA> = Vec::with_capacity(E::MIN_SAMPLES);
        let mut sample_b: Vec<E::PointB> = Vec::with_capacity(E::MIN_SAMPLES);

        let mut best_support = Support::none();
        let mut best_model: Option<E::Model> = None;

        // Seed the adaptive bound from the a-priori inlier ratio; it only
        // shrinks from here on.
        let mut dyn_max_num_trials = self.options.max_num_trials.min(compute_num_trials(
            (self.options.min_inlier_ratio * num_samples as f64) as usize,
            num_samples,
            self.options.confidence,
            E::MIN_SAMPLES,
        ));

        while report.num_trials < self.options.max_num_trials {
            if report.num_trials >= dyn_max_num_trials
                && report.num_trials >= self.options.min_num_trials
            {
                break;
            }
            report.num_trials += 1;

            sample_a.clear();
            sample_b.clear();
            for &idx in sampler.sample(&mut rng) {
                sample_a.push(points_a[idx].clone());
                sample_b.push(points_b[idx].clone());
            }

            // A degenerate sample yields no candidates; skip the trial.
            for model in E::estimate(&sample_a, &sample_b) {
                let residuals = E::residuals(points_a, points_b, &model);
                let support = Support::measure(&residuals, self.options.max_error);

                if support.is_better_than(&best_support) {
                    best_support = support;
                    best_model = Some(model);
                    dyn_max_num_trials = dyn_max_num_trials.min(
                        compute_num_trials(
                            support.num_inliers,
                            num_samples,
                            self.options.confidence,
                            E::MIN_SAMPLES,
                        )
                        .max(self.options.min_num_trials),
                    );
                }
            }
        }

        finalize_report::<E>(
            report,
            best_support,
            best_model,
            points_a,
            points_b,
            self.options.max_error,
        )
    }
}

/// LO-RANSAC: plain consensus plus a local refit on the current inlier set.
///
/// `L` is the local estimator used for the over-determined refit; it must
/// accept at least `L::MIN_SAMPLES` correspondences and share the model type
/// with `E`. The refit is adopted only when its support is not worse than
/// the support of the minimal-sample candidate that triggered it.
pub struct LoRansac<E, L>
where
    E: Estimator,
    L: Estimator<PointA = E::PointA, PointB = E::PointB, Model = E::Model>,
{
    options: RansacOptions,
    _estimator: PhantomData<E>,
    _local_estimator: PhantomData<L>,
}

impl<E, L> LoRansac<E, L>
where
    E: Estimator,
    E::PointA: Clone,
    E::PointB: Clone,
    L: Estimator<PointA = E::PointA, PointB = E::PointB, Model = E::Model>,
{
    /// Create an engine with the given options.
    pub fn new(options: RansacOptions) -> Self {
        options.validate();
        Self {
            options,
            _estimator: PhantomData,
            _local_estimator: PhantomData,
        }
    }

    /// Robustly estimate a model, locally optimizing each new best candidate
    /// by refitting on all of its inliers.
    pub fn estimate(
        &self,
        points_a: &[E::PointA],
        points_b: &[E::PointB],
    ) -> RansacReport<E::Model> {
        assert_eq!(points_a.len(), points_b.len());
        let num_samples = points_a.len();

        let mut report = RansacReport::failure();
        if num_samples < E::MIN_SAMPLES {
            return report;
        }

        let mut rng = run_rng(&self.options);
        let mut sampler = RandomSampler::new(E::MIN_SAMPLES, num_samples);
        let mut sample_a: Vec<E::PointA> = Vec::with_capacity(E::MIN_SAMPLES);
        let mut sample_b: Vec<E::PointB> = Vec::with_capacity(E::MIN_SAMPLES);

        let mut best_support = Support::none();
        let mut best_model: Option<E::Model> = None;

        let mut dyn_max_num_trials = self.options.max_num_trials.min(compute_num_trials(
            (self.options.min_inlier_ratio * num_samples as f64) as usize,
            num_samples,
            self.options.confidence,
            E::MIN_SAMPLES,
        ));

        while report.num_trials < self.options.max_num_trials {
            if report.num_trials >= dyn_max_num_trials
                && report.num_trials >= self.options.min_num_trials
            {
                break;
            }
            report.num_trials += 1;

            sample_a.clear();
            sample_b.clear();
            for &idx in sampler.sample(&mut rng) {
                sample_a.push(points_a[idx].clone());
                sample_b.push(points_b[idx].clone());
            }

            for model in E::estimate(&sample_a, &sample_b) {
                let residuals = E::residuals(points_a, points_b, &model);
                let mut support = Support::measure(&residuals, self.options.max_error);
                let mut model = model;

                if support.is_better_than(&best_support) {
                    // Local optimization: refit on the full inlier set.
                    if support.num_inliers >= L::MIN_SAMPLES
                        && support.num_inliers > E::MIN_SAMPLES
                    {
                        if let Some((refit_model, refit_support)) = self.local_refit(
                            points_a, points_b, &residuals,
                        ) {
                            if !support.is_better_than(&refit_support) {
                                log::trace!(
                                    "local refit improved support: {} -> {} inliers",
                                    support.num_inliers,
                                    refit_support.num_inliers
                                );
                                model = refit_model;
                                support = refit_support;
                            }
                        }
                    }

                    best_support = support;
                    best_model = Some(model);
                    dyn_max_num_trials = dyn_max_num_trials.min(
                        compute_num_trials(
                            support.num_inliers,
                            num_samples,
                            self.options.confidence,
                            E::MIN_SAMPLES,
                        )
                        .max(self.options.min_num_trials),
                    );
                }
            }
        }

        finalize_report::<E>(
            report,
            best_support,
            best_model,
            points_a,
            points_b,
            self.options.max_error,
        )
    }

    fn local_refit(
        &self,
        points_a: &[E::PointA],
        points_b: &[E::PointB],
        residuals: &[f64],
    ) -> Option<(E::Model, Support)> {
        let mut inlier_a = Vec::new();
        let mut inlier_b = Vec::new();
        for (i, &r) in residuals.iter().enumerate() {
            if r <= self.options.max_error {
                inlier_a.push(points_a[i].clone());
                inlier_b.push(points_b[i].clone());
            }
        }

        let mut best: Option<(E::Model, Support)> = None;
        for model in L::estimate(&inlier_a, &inlier_b) {
            let refit_residuals = L::residuals(points_a, points_b, &model);
            let support = Support::measure(&refit_residuals, self.options.max_error);
            let better = match &best {
                Some((_, best_support)) => support.is_better_than(best_support),
                None => true,
            };
            if better {
                best = Some((model, support));
            }
        }
        best
    }
}

fn finalize_report<E: Estimator>(
    mut report: RansacReport<E::Model>,
    best_support: Support,
    best_model: Option<E::Model>,
    points_a: &[E::PointA],
    points_b: &[E::PointB],
    max_error: f64,
) -> RansacReport<E::Model> {
    let model = match best_model {
        Some(model) if best_support.num_inliers >= E::MIN_SAMPLES => model,
        _ => return report,
    };

    let residuals = E::residuals(points_a, points_b, &model);
    report.inlier_mask = residuals.iter().map(|&r| r <= max_error).collect();
    report.support = best_support;
    report.model = Some(model);
    report.success = true;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Minimal 2D line estimator (y = a*x + b) used to exercise the engine.
    struct LineEstimator;

    impl Estimator for LineEstimator {
        type PointA = Vector2<f64>;
        type PointB = ();
        type Model = (f64, f64);

        const MIN_SAMPLES: usize = 2;

        fn estimate(points: &[Vector2<f64>], _: &[()]) -> Vec<(f64, f64)> {
            let dx = points[1].x - points[0].x;
            if dx.abs() < 1e-12 {
                return Vec::new();
            }
            let a = (points[1].y - points[0].y) / dx;
            let b = points[0].y - a * points[0].x;
            vec![(a, b)]
        }

        fn residuals(points: &[Vector2<f64>], _: &[()], model: &(f64, f64)) -> Vec<f64> {
            points
                .iter()
                .map(|p| {
                    let d = p.y - (model.0 * p.x + model.1);
                    d * d
                })
                .collect()
        }
    }

    /// Least-squares line fit over all points, for the LO refit path.
    struct LineLsqEstimator;

    impl Estimator for LineLsqEstimator {
        type PointA = Vector2<f64>;
        type PointB = ();
        type Model = (f64, f64);

        const MIN_SAMPLES: usize = 2;

        fn estimate(points: &[Vector2<f64>], _: &[()]) -> Vec<(f64, f64)> {
            let n = points.len() as f64;
            let sx: f64 = points.iter().map(|p| p.x).sum();
            let sy: f64 = points.iter().map(|p| p.y).sum();
            let sxx: f64 = points.iter().map(|p| p.x * p.x).sum();
            let sxy: f64 = points.iter().map(|p| p.x * p.y).sum();
            let denom = n * sxx - sx * sx;
            if denom.abs() < 1e-12 {
                return Vec::new();
            }
            let a = (n * sxy - sx * sy) / denom;
            let b = (sy - a * sx) / n;
            vec![(a, b)]
        }

        fn residuals(points: &[Vector2<f64>], y: &[()], model: &(f64, f64)) -> Vec<f64> {
            LineEstimator::residuals(points, y, model)
        }
    }

    fn contaminated_line_data(
        a: f64,
        b: f64,
        num_inliers: usize,
        num_outliers: usize,
        noise: f64,
        seed: u64,
    ) -> Vec<Vector2<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::new();
        for i in 0..num_inliers {
            let x = i as f64 * 0.1;
            let eps: f64 = rng.random_range(-noise..=noise);
            points.push(Vector2::new(x, a * x + b + eps));
        }
        for _ in 0..num_outliers {
            points.push(Vector2::new(
                rng.random_range(-10.0..10.0),
                rng.random_range(-50.0..50.0),
            ));
        }
        points
    }

    #[test]
    fn test_recovers_line_under_contamination() {
        let points = contaminated_line_data(2.0, -1.0, 60, 40, 1e-3, 11);
        let dummy = vec![(); points.len()];

        let options = RansacOptions {
            max_error: 1e-4,
            random_seed: Some(5),
            ..RansacOptions::default()
        };
        let report = Ransac::<LineEstimator>::new(options).estimate(&points, &dummy);

        assert!(report.success);
        let (a, b) = report.model.unwrap();
        assert!((a - 2.0).abs() < 0.05, "slope {a}");
        assert!((b + 1.0).abs() < 0.05, "intercept {b}");
        // All 60 true inliers found, give or take boundary noise.
        assert!(report.support.num_inliers >= 55);
        assert!(report.support.num_inliers <= 65);
        assert_eq!(report.inlier_mask.len(), points.len());
        assert_eq!(
            report.inlier_mask.iter().filter(|&&m| m).count(),
            report.support.num_inliers
        );
    }

    #[test]
    fn test_inlier_count_monotone_in_threshold() {
        let points = contaminated_line_data(0.5, 3.0, 50, 50, 0.01, 2);
        let dummy = vec![(); points.len()];

        let mut previous = 0;
        for max_error in [1e-6, 1e-4, 1e-2, 1.0, 100.0] {
            let options = RansacOptions {
                max_error,
                random_seed: Some(9),
                ..RansacOptions::default()
            };
            let report = Ransac::<LineEstimator>::new(options).estimate(&points, &dummy);
            assert!(
                report.support.num_inliers >= previous,
                "inlier count decreased when threshold grew to {max_error}"
            );
            previous = report.support.num_inliers;
        }
    }

    #[test]
    fn test_insufficient_correspondences_fail_gracefully() {
        let points = vec![Vector2::new(0.0, 0.0)];
        let dummy = vec![()];
        let report = Ransac::<LineEstimator>::new(RansacOptions::with_max_error(1.0))
            .estimate(&points, &dummy);
        assert!(!report.success);
        assert!(report.model.is_none());
        assert_eq!(report.num_trials, 0);
    }

    #[test]
    fn test_degenerate_samples_are_skipped() {
        // All points share one x coordinate: every minimal sample is
        // degenerate, so no model can ever be estimated.
        let points: Vec<Vector2<f64>> =
            (0..10).map(|i| Vector2::new(1.0, i as f64)).collect();
        let dummy = vec![(); points.len()];
        let options = RansacOptions {
            max_error: 1.0,
            max_num_trials: 50,
            random_seed: Some(1),
            ..RansacOptions::default()
        };
        let report = Ransac::<LineEstimator>::new(options).estimate(&points, &dummy);
        assert!(!report.success);
        assert!(report.model.is_none());
    }

    #[test]
    fn test_adaptive_bound_stops_early_on_clean_data() {
        let points = contaminated_line_data(1.0, 0.0, 100, 0, 0.0, 4);
        let dummy = vec![(); points.len()];
        let options = RansacOptions {
            max_error: 1e-9,
            random_seed: Some(8),
            ..RansacOptions::default()
        };
        let report = Ransac::<LineEstimator>::new(options).estimate(&points, &dummy);
        assert!(report.success);
        assert!(report.num_trials < 100);
    }

    #[test]
    fn test_local_optimization_does_not_lose_inliers() {
        let points = contaminated_line_data(-1.5, 2.0, 70, 30, 5e-3, 21);
        let dummy = vec![(); points.len()];

        let options = RansacOptions {
            max_error: 1e-3,
            random_seed: Some(13),
            ..RansacOptions::default()
        };
        let plain = Ransac::<LineEstimator>::new(options.clone()).estimate(&points, &dummy);
        let lo =
            LoRansac::<LineEstimator, LineLsqEstimator>::new(options).estimate(&points, &dummy);

        assert!(plain.success && lo.success);
        assert!(lo.support.num_inliers >= plain.support.num_inliers);
    }

    #[test]
    fn test_support_comparison() {
        let a = Support {
            num_inliers: 10,
            residual_sum: 5.0,
        };
        let b = Support {
            num_inliers: 10,
            residual_sum: 4.0,
        };
        let c = Support {
            num_inliers: 11,
            residual_sum: 100.0,
        };
        assert!(b.is_better_than(&a));
        assert!(!a.is_better_than(&b));
        assert!(c.is_better_than(&b));
    }

    #[test]
    fn test_compute_num_trials() {
        // Perfect data needs a single trial.
        assert_eq!(compute_num_trials(100, 100, 0.99, 2), 1);
        // Half inliers, sample size 2: ceil(ln(0.01)/ln(0.75)) = 17.
        assert_eq!(compute_num_trials(50, 100, 0.99, 2), 17);
        // No inliers yet: unbounded.
        assert_eq!(compute_num_trials(0, 100, 0.99, 2), usize::MAX);
    }
}
