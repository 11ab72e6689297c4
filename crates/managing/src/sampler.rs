//! Weighted miner selection for synthetic probing and organic routing.
//!
//! The sampler holds no state of its own: it filters a snapshot of
//! [`MinerView`]s, weighs the survivors with a [`WeightPolicy`] and performs a
//! cumulative-weight draw. Selection is advisory and never consumes quota.

use std::fmt::Debug;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::state::MinerView;

/// Maps a candidate's view to a non-negative sampling weight.
///
/// Non-finite or negative weights are treated as zero.
pub trait WeightPolicy: Send + Sync + Debug {
    fn weight(&self, view: &MinerView) -> f64;
}

/// Weight = remaining / capacity. Spreads probes evenly regardless of miner size.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadroomFraction;

impl WeightPolicy for HeadroomFraction {
    fn weight(&self, view: &MinerView) -> f64 {
        view.headroom()
    }
}

/// Weight = absolute remaining quota. Larger miners absorb proportionally more load.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbsoluteRemaining;

impl WeightPolicy for AbsoluteRemaining {
    fn weight(&self, view: &MinerView) -> f64 {
        view.remaining as f64
    }
}

/// Which caller workflow a sample is for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleMode {
    /// Any miner with quota left.
    Synthetic,
    /// Miners with quota left whose representative score is at least the threshold.
    /// Miners without any score never qualify.
    Organic { top_score_threshold: f64 },
}

impl SampleMode {
    pub fn organic(top_score_threshold: f64) -> Self {
        Self::Organic {
            top_score_threshold,
        }
    }

    pub fn admits(&self, view: &MinerView) -> bool {
        if view.remaining == 0 {
            return false;
        }
        match self {
            Self::Synthetic => true,
            Self::Organic {
                top_score_threshold,
            } => view
                .representative_score
                .is_some_and(|score| score >= *top_score_threshold),
        }
    }
}

/// Stateless sampler with one weighting policy per mode.
#[derive(Debug)]
pub struct Sampler {
    synthetic: Box<dyn WeightPolicy>,
    organic: Box<dyn WeightPolicy>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    /// Headroom fraction for synthetic, absolute remaining for organic.
    pub fn new() -> Self {
        Self::with_policies(HeadroomFraction, AbsoluteRemaining)
    }

    pub fn with_policies(
        synthetic: impl WeightPolicy + 'static,
        organic: impl WeightPolicy + 'static,
    ) -> Self {
        Self {
            synthetic: Box::new(synthetic),
            organic: Box::new(organic),
        }
    }

    pub fn policy(&self, mode: SampleMode) -> &dyn WeightPolicy {
        match mode {
            SampleMode::Synthetic => self.synthetic.as_ref(),
            SampleMode::Organic { .. } => self.organic.as_ref(),
        }
    }

    /// Candidates admitted by `mode`, paired with their weights.
    pub fn weighted_candidates<Id>(
        &self,
        mode: SampleMode,
        views: impl IntoIterator<Item = (Id, MinerView)>,
    ) -> (Vec<Id>, Vec<f64>) {
        let policy = self.policy(mode);
        views
            .into_iter()
            .filter(|(_, view)| mode.admits(view))
            .map(|(id, view)| (id, sanitize(policy.weight(&view))))
            .unzip()
    }

    /// Draw one miner, `None` when nothing qualifies.
    pub fn sample<Id, R: Rng + ?Sized>(
        &self,
        mode: SampleMode,
        views: impl IntoIterator<Item = (Id, MinerView)>,
        rng: &mut R,
    ) -> Option<Id> {
        let (mut ids, weights) = self.weighted_candidates(mode, views);
        let index = weighted_pick(&weights, rng)?;
        Some(ids.swap_remove(index))
    }

    /// Draw up to `n` distinct miners without replacement.
    pub fn sample_many<Id, R: Rng + ?Sized>(
        &self,
        mode: SampleMode,
        views: impl IntoIterator<Item = (Id, MinerView)>,
        n: usize,
        rng: &mut R,
    ) -> Vec<Id> {
        let (mut ids, mut weights) = self.weighted_candidates(mode, views);
        let mut picked = Vec::with_capacity(n.min(ids.len()));
        while picked.len() < n {
            let Some(index) = weighted_pick(&weights, rng) else {
                break;
            };
            weights.swap_remove(index);
            picked.push(ids.swap_remove(index));
        }
        picked
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Cumulative-weight draw, uniform over all entries if every weight is zero.
fn weighted_pick<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    match WeightedIndex::new(weights) {
        Ok(dist) => Some(dist.sample(rng)),
        Err(_) => Some(rng.random_range(0..weights.len())),
    }
}
