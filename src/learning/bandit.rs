//! Local Thompson-sampling selector
//!
//! Runs when the sidecar is unavailable and selection cannot be deferred.
//! Each arm's Beta posterior is sampled via two Gamma draws
//! (`x/(x+y)`, shapes α and β); `rand_distr`'s Gamma is Marsaglia–Tsang
//! with the `U^{1/α}` boost for shapes below 1. Under-explored arms are
//! forced up so the knapsack sees them early.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use tracing::debug;

use crate::types::{Arm, Posterior, Selection};

/// Sample floor applied to seeded and under-pulled arms.
const EXPLORATION_FLOOR: f64 = 0.75;

/// Selector tunables, usually derived from `LearningConfig`.
#[derive(Debug, Clone, Default)]
pub struct ThompsonSettings {
    /// 0 means unbounded.
    pub token_budget: u32,
    /// Probability of a deliberate baseline selection.
    pub baseline_rate: f64,
    /// Arms with fewer pulls are exploration-boosted.
    pub min_pulls: u64,
    /// Arms always exploration-boosted regardless of pull count.
    pub seed_arm_ids: HashSet<String>,
}

/// Select arms under the token budget via Thompson sampling.
pub fn select_arms<R: Rng + ?Sized>(
    arms: &[Arm],
    posteriors: &HashMap<String, Posterior>,
    settings: &ThompsonSettings,
    rng: &mut R,
) -> Selection {
    if rng.gen::<f64>() < settings.baseline_rate {
        debug!(arms = arms.len(), "Baseline selection — including all under budget");
        return first_fit(arms, settings.token_budget, true);
    }

    let mut sampled: Vec<(&Arm, f64)> = arms
        .iter()
        .map(|arm| {
            let posterior = posteriors
                .get(&arm.id)
                .copied()
                .unwrap_or_else(|| Posterior::prior_for(arm.source));
            let mut sample = beta_sample(rng, posterior.alpha, posterior.beta);
            if settings.seed_arm_ids.contains(&arm.id) || posterior.pulls < settings.min_pulls {
                sample = sample.max(EXPLORATION_FLOOR);
            }
            (arm, sample)
        })
        .collect();

    // Highest sample first; ties prefer cheaper arms, then stable ids.
    sampled.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.token_cost.cmp(&b.token_cost))
            .then_with(|| a.id.cmp(&b.id))
    });

    let scores: HashMap<String, f64> = sampled
        .iter()
        .map(|(arm, sample)| (arm.id.clone(), *sample))
        .collect();

    let mut selected = Vec::new();
    let mut excluded = Vec::new();
    let mut used_tokens = 0u32;
    for (arm, _) in &sampled {
        if fits(settings.token_budget, used_tokens, arm.token_cost) {
            used_tokens += arm.token_cost;
            selected.push(arm.id.clone());
        } else {
            excluded.push(arm.id.clone());
        }
    }

    Selection {
        selected_arms: selected,
        excluded_arms: excluded,
        is_baseline: false,
        scores,
        token_budget: settings.token_budget,
        used_tokens,
    }
}

/// Deterministic include-as-many-as-fit selection in the given order.
/// Shared by baseline mode and the learning client's offline fallback.
pub fn first_fit(arms: &[Arm], token_budget: u32, is_baseline: bool) -> Selection {
    let mut selected = Vec::new();
    let mut excluded = Vec::new();
    let mut used_tokens = 0u32;
    for arm in arms {
        if fits(token_budget, used_tokens, arm.token_cost) {
            used_tokens += arm.token_cost;
            selected.push(arm.id.clone());
        } else {
            excluded.push(arm.id.clone());
        }
    }
    Selection {
        selected_arms: selected,
        excluded_arms: excluded,
        is_baseline,
        scores: HashMap::new(),
        token_budget,
        used_tokens,
    }
}

/// A budget of 0 means unbounded.
fn fits(budget: u32, used: u32, cost: u32) -> bool {
    budget == 0 || used.saturating_add(cost) <= budget
}

/// One Beta(α, β) draw from two Gamma(shape, 1) draws.
fn beta_sample<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let x = gamma_sample(rng, alpha);
    let y = gamma_sample(rng, beta);
    if x + y <= 0.0 {
        return 0.5;
    }
    x / (x + y)
}

fn gamma_sample<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    match Gamma::new(shape, 1.0) {
        Ok(gamma) => gamma.sample(rng),
        // Only reachable with a non-positive or NaN shape, which the
        // posterior update rules never produce.
        Err(_) => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::types::{ArmSource, ArmType};

    fn arm(label: &str, cost: u32) -> Arm {
        Arm::new(ArmType::Skill, "test", label, cost)
    }

    fn posterior(alpha: f64, beta: f64, pulls: u64) -> Posterior {
        Posterior {
            alpha,
            beta,
            pulls,
            last_updated: 0,
        }
    }

    #[test]
    fn baseline_rate_one_always_first_fit() {
        let arms = vec![arm("a", 100), arm("b", 200), arm("c", 500)];
        let settings = ThompsonSettings {
            token_budget: 350,
            baseline_rate: 1.0,
            ..ThompsonSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let selection = select_arms(&arms, &HashMap::new(), &settings, &mut rng);
            assert!(selection.is_baseline);
            assert_eq!(
                selection.selected_arms,
                vec!["skill:test:a".to_string(), "skill:test:b".to_string()]
            );
            assert_eq!(selection.excluded_arms, vec!["skill:test:c".to_string()]);
            assert_eq!(selection.used_tokens, 300);
            assert!(selection.scores.is_empty());
        }
    }

    #[test]
    fn first_fit_with_zero_budget_includes_everything() {
        let arms = vec![arm("a", 1_000), arm("b", 100_000)];
        let selection = first_fit(&arms, 0, true);
        assert_eq!(selection.selected_arms.len(), 2);
        assert!(selection.excluded_arms.is_empty());
        assert_eq!(selection.used_tokens, 101_000);
    }

    #[test]
    fn strong_posterior_beats_weak_posterior() {
        let arms = vec![arm("strong", 100), arm("weak", 100)];
        let mut posteriors = HashMap::new();
        posteriors.insert("skill:test:strong".to_string(), posterior(80.0, 2.0, 50));
        posteriors.insert("skill:test:weak".to_string(), posterior(2.0, 80.0, 50));
        let settings = ThompsonSettings {
            token_budget: 100,
            min_pulls: 0,
            ..ThompsonSettings::default()
        };

        let mut rng = StdRng::seed_from_u64(42);
        let mut strong_wins = 0;
        for _ in 0..100 {
            let selection = select_arms(&arms, &posteriors, &settings, &mut rng);
            assert_eq!(selection.selected_arms.len(), 1, "budget fits exactly one");
            if selection.selected_arms[0] == "skill:test:strong" {
                strong_wins += 1;
            }
        }
        assert!(strong_wins > 95, "strong arm won only {strong_wins}/100");
    }

    #[test]
    fn under_pulled_arms_get_the_exploration_floor() {
        let arms = vec![arm("fresh", 100)];
        let mut posteriors = HashMap::new();
        // Terrible posterior, but too few pulls to trust it.
        posteriors.insert("skill:test:fresh".to_string(), posterior(1.0, 50.0, 2));
        let settings = ThompsonSettings {
            token_budget: 0,
            min_pulls: 5,
            ..ThompsonSettings::default()
        };

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let selection = select_arms(&arms, &posteriors, &settings, &mut rng);
            let score = selection.scores["skill:test:fresh"];
            assert!(score >= EXPLORATION_FLOOR, "sample {score} below floor");
        }
    }

    #[test]
    fn seed_arms_are_boosted_regardless_of_pulls() {
        let arms = vec![arm("seeded", 100)];
        let mut posteriors = HashMap::new();
        posteriors.insert("skill:test:seeded".to_string(), posterior(1.0, 50.0, 1_000));
        let settings = ThompsonSettings {
            token_budget: 0,
            min_pulls: 0,
            seed_arm_ids: ["skill:test:seeded".to_string()].into_iter().collect(),
            ..ThompsonSettings::default()
        };

        let mut rng = StdRng::seed_from_u64(2);
        let selection = select_arms(&arms, &posteriors, &settings, &mut rng);
        assert!(selection.scores["skill:test:seeded"] >= EXPLORATION_FLOOR);
    }

    #[test]
    fn knapsack_respects_the_budget() {
        let arms: Vec<Arm> = (0..10).map(|i| arm(&format!("a{i}"), 300)).collect();
        let settings = ThompsonSettings {
            token_budget: 1_000,
            min_pulls: 0,
            ..ThompsonSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let selection = select_arms(&arms, &HashMap::new(), &settings, &mut rng);
        assert_eq!(selection.selected_arms.len(), 3);
        assert_eq!(selection.excluded_arms.len(), 7);
        assert_eq!(selection.used_tokens, 900);
        assert_eq!(selection.scores.len(), 10, "every arm gets a score");
    }

    #[test]
    fn beta_samples_stay_in_unit_interval_and_track_the_mean() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut total = 0.0;
        for _ in 0..2_000 {
            let sample = beta_sample(&mut rng, 6.0, 2.0);
            assert!((0.0..=1.0).contains(&sample));
            total += sample;
        }
        let mean = total / 2_000.0;
        // Beta(6,2) has mean 0.75.
        assert!((mean - 0.75).abs() < 0.03, "observed mean {mean}");
    }

    #[test]
    fn shape_below_one_still_samples() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let sample = beta_sample(&mut rng, 0.5, 0.5);
            assert!((0.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn learned_arms_start_at_uniform_prior() {
        // No posterior entry: curated arms start optimistic (3,1), learned
        // arms uniform (1,1). With enough samples the curated mean is higher.
        let curated = vec![arm("c", 0)];
        let learned = vec![arm("l", 0).with_source(ArmSource::Learned)];
        let settings = ThompsonSettings {
            token_budget: 0,
            min_pulls: 0,
            ..ThompsonSettings::default()
        };

        let mut rng = StdRng::seed_from_u64(5);
        let mut curated_total = 0.0;
        let mut learned_total = 0.0;
        for _ in 0..1_000 {
            let selection = select_arms(&curated, &HashMap::new(), &settings, &mut rng);
            curated_total += selection.scores["skill:test:c"];
            let selection = select_arms(&learned, &HashMap::new(), &settings, &mut rng);
            learned_total += selection.scores["skill:test:l"];
        }
        assert!(curated_total / 1_000.0 > 0.68); // Beta(3,1) mean 0.75
        assert!((learned_total / 1_000.0 - 0.5).abs() < 0.05); // Beta(1,1) mean 0.5
    }
}
