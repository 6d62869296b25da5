//! Hyperparameter resampling.
//!
//! `theta`/`d` of every HPYLM depth are drawn with the auxiliary variable
//! scheme of Teh (2006); the character model's stop/pass Beta prior
//! (`alpha`/`beta`) is slice sampled on its Beta-Binomial marginal.

use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma};

use crate::restaurant::Restaurant;

/// Smallest discount / strength we let a draw collapse to.
const MIN_PARAM: f64 = 1e-6;

/// Gamma prior on theta and Beta prior on d for one depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthPrior {
    pub gamma_a: f64,
    pub gamma_b: f64,
    pub beta_a: f64,
    pub beta_b: f64,
}

/// Draw a new `(theta, d)` for one depth given every restaurant at that depth.
pub fn sample_theta_d<'a, R, I>(
    theta: f64,
    d: f64,
    prior: DepthPrior,
    restaurants: I,
    rng: &mut R,
) -> (f64, f64)
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = &'a Restaurant>,
{
    let mut a_theta = prior.gamma_a;
    let mut b_theta = prior.gamma_b;
    let mut a_d = prior.beta_a;
    let mut b_d = prior.beta_b;

    for rst in restaurants {
        let tables = rst.total_tables();
        if tables < 2 {
            continue;
        }
        let customers = rst.total_customers() as f64;
        if let Ok(beta) = Beta::new(theta + 1.0, customers - 1.0) {
            let x: f64 = beta.sample(rng);
            if x > 0.0 {
                b_theta -= x.ln();
            }
        }
        for t in 1..tables {
            let y = rng.gen_bool(theta / (theta + d * t as f64));
            if y {
                a_theta += 1.0;
            } else {
                a_d += 1.0;
            }
        }
        // Sorted so a seeded run does not depend on hash map order.
        let mut sizes: Vec<u32> = rst
            .dishes()
            .flat_map(|(_, counts)| counts.iter().copied())
            .filter(|&c| c >= 2)
            .collect();
        sizes.sort_unstable();
        for c in sizes {
            for j in 1..c {
                let j = j as f64;
                let z = rng.gen_bool(((j - 1.0) / (j - d)).clamp(0.0, 1.0));
                if !z {
                    b_d += 1.0;
                }
            }
        }
    }

    let new_theta = Gamma::new(a_theta, 1.0 / b_theta)
        .map(|g| g.sample(rng))
        .unwrap_or(theta)
        .max(MIN_PARAM);
    let new_d = Beta::new(a_d, b_d)
        .map(|b| b.sample(rng))
        .unwrap_or(d)
        .clamp(MIN_PARAM, 1.0 - MIN_PARAM);
    (new_theta, new_d)
}

/// Log posterior of the character model's stop prior under Gamma(1, 1) priors
/// on `alpha` and `beta`, given the `(stop, pass)` counts of every node.
pub fn stop_prior_log_posterior(alpha: f64, beta: f64, counts: &[(u32, u32)]) -> f64 {
    if alpha <= 0.0 || beta <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let mut lp = -alpha - beta;
    for &(stop, pass) in counts {
        for i in 0..stop {
            lp += (alpha + i as f64).ln();
        }
        for j in 0..pass {
            lp += (beta + j as f64).ln();
        }
        for k in 0..stop + pass {
            lp -= (alpha + beta + k as f64).ln();
        }
    }
    lp
}

/// One sweep of univariate slice sampling over `alpha` then `beta`.
pub fn sample_stop_prior<R: Rng + ?Sized>(
    alpha: f64,
    beta: f64,
    counts: &[(u32, u32)],
    rng: &mut R,
) -> (f64, f64) {
    if counts.iter().all(|&(s, p)| s + p == 0) {
        return (alpha, beta);
    }
    let alpha = slice_sample(alpha, |a| stop_prior_log_posterior(a, beta, counts), rng);
    let beta = slice_sample(beta, |b| stop_prior_log_posterior(alpha, b, counts), rng);
    (alpha, beta)
}

/// Stepping-out / shrinkage slice sampler (Neal 2003) on the positive reals.
fn slice_sample<R, F>(x0: f64, log_f: F, rng: &mut R) -> f64
where
    R: Rng + ?Sized,
    F: Fn(f64) -> f64,
{
    const WIDTH: f64 = 1.0;
    const MAX_STEPS: usize = 32;
    const MAX_SHRINK: usize = 200;

    let f0 = log_f(x0);
    if !f0.is_finite() {
        return x0;
    }
    let level = f0 + rng.gen::<f64>().max(f64::MIN_POSITIVE).ln();

    let mut left = x0 - WIDTH * rng.gen::<f64>();
    let mut right = left + WIDTH;
    let mut steps = 0;
    while left > 0.0 && log_f(left) > level && steps < MAX_STEPS {
        left -= WIDTH;
        steps += 1;
    }
    steps = 0;
    while log_f(right) > level && steps < MAX_STEPS {
        right += WIDTH;
        steps += 1;
    }
    left = left.max(0.0);

    for _ in 0..MAX_SHRINK {
        let x1 = left + rng.gen::<f64>() * (right - left);
        if x1 > 0.0 && log_f(x1) > level {
            return x1;
        }
        if x1 < x0 {
            left = x1;
        } else {
            right = x1;
        }
    }
    x0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn prior() -> DepthPrior {
        DepthPrior {
            gamma_a: 1.0,
            gamma_b: 1.0,
            beta_a: 1.0,
            beta_b: 1.0,
        }
    }

    fn busy_restaurant(rng: &mut StdRng) -> Restaurant {
        let mut rst = Restaurant::new();
        for i in 0..200u32 {
            let dish = Token::tag((i % 7) as usize);
            rst.add_customer(&dish, 0.05, 2.0, 0.5, rng);
        }
        rst
    }

    #[test]
    fn test_theta_d_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let rsts: Vec<Restaurant> = (0..5).map(|_| busy_restaurant(&mut rng)).collect();
        let (mut theta, mut d) = (2.0, 0.5);
        for _ in 0..50 {
            (theta, d) = sample_theta_d(theta, d, prior(), rsts.iter(), &mut rng);
            assert!(theta > 0.0 && theta.is_finite());
            assert!(d > 0.0 && d < 1.0);
        }
    }

    #[test]
    fn test_no_restaurants_draws_from_prior() {
        let mut rng = StdRng::seed_from_u64(12);
        let (theta, d) = sample_theta_d(2.0, 0.5, prior(), std::iter::empty(), &mut rng);
        assert!(theta > 0.0);
        assert!(d > 0.0 && d < 1.0);
    }

    #[test]
    fn test_log_posterior_matches_beta_binomial() {
        // B(a+s, b+p)/B(a, b) for a=b=1, s=1, p=1 is 1/6; prior exp(-2).
        let lp = stop_prior_log_posterior(1.0, 1.0, &[(1, 1)]);
        assert!((lp - ((1.0f64 / 6.0).ln() - 2.0)).abs() < 1e-12);
        assert_eq!(stop_prior_log_posterior(-1.0, 1.0, &[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_stop_prior_follows_counts() {
        let mut rng = StdRng::seed_from_u64(13);
        // Mostly stops: alpha should end up well above beta on average.
        let counts = vec![(90u32, 10u32); 20];
        let (mut alpha, mut beta) = (1.0, 1.0);
        let mut ratio = 0.0;
        for _ in 0..200 {
            (alpha, beta) = sample_stop_prior(alpha, beta, &counts, &mut rng);
            assert!(alpha > 0.0 && beta > 0.0);
            ratio += alpha / (alpha + beta);
        }
        assert!(ratio / 200.0 > 0.6);
    }

    #[test]
    fn test_stop_prior_without_counts_is_unchanged() {
        let mut rng = StdRng::seed_from_u64(14);
        assert_eq!(sample_stop_prior(1.5, 2.5, &[], &mut rng), (1.5, 2.5));
    }
}
