//! Per-rollout statistics over finished episodes.

use sr_core::EpisodeRecord;
use sr_logging::RolloutStatsV1;

/// Counts that persist across rollouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameTotals {
    pub games: u64,
    pub long_games: u64,
}

#[derive(Debug, Default)]
pub struct StatsAccumulator {
    reward: Vec<f64>,
    scorek: Vec<f64>,
    lns: Vec<f64>,
    pcs: Vec<f64>,
    short_finish: Vec<f64>,
    tot_lines: u64,
    tot_score: u64,
    episodes: u64,
}

impl StatsAccumulator {
    pub fn record(&mut self, totals: &mut GameTotals, ep: &EpisodeRecord) {
        totals.games += 1;
        self.episodes += 1;
        if ep.is_short {
            self.short_finish.push(if ep.is_over { 0.0 } else { 1.0 });
            return;
        }
        totals.long_games += 1;
        self.tot_lines += ep.lines as u64;
        self.tot_score += ep.score;
        self.reward.push(ep.reward);
        self.scorek.push(ep.score as f64 * 1e-3);
        self.lns.push(ep.lines as f64);
        self.pcs.push(ep.pieces as f64);
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    /// `max_raw_reward` is the largest raw-score step in the window.
    pub fn finish(&self, totals: &GameTotals, max_raw_reward: f32) -> RolloutStatsV1 {
        RolloutStatsV1 {
            reward: mean(&self.reward),
            scorek: mean(&self.scorek),
            lns: mean(&self.lns),
            pcs: mean(&self.pcs),
            short_finish: mean(&self.short_finish),
            maxk: Some(max_raw_reward as f64 / 1e-2),
            perline: (self.tot_lines > 0)
                .then(|| self.tot_score as f64 * 1e-3 / self.tot_lines as f64),
            mil_games: totals.games as f64 * 1e-6,
            long_games: totals.long_games as f64 * 1e-6,
        }
    }
}

fn mean(v: &[f64]) -> Option<f64> {
    (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
}
