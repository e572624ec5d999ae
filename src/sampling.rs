//! Weighted track sampling
//!
//! Scores every distinct track across the user's playlists by how often it
//! appears and how recently it was added, then draws tracks with a softmax over
//! the scores. Lower temperatures favour high scores; a temperature of zero or
//! less picks the top scores deterministically.

use std::collections::HashMap;
use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rand::Rng;

use crate::api::Track;

/// Occurrences at which the frequency component saturates
const FREQUENCY_CAP: f64 = 10.0;

/// Tracks older than this many days score [`SEASONAL_TOO_OLD_SCORE`]
const SEASONAL_MAX_AGE_DAYS: i64 = 730;

const SEASONAL_TOO_OLD_SCORE: f64 = -4.0;

/// Score for undated tracks under the seasonal model
const SEASONAL_UNDATED_SCORE: f64 = 0.1;

/// How a track's score is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ScoreModel {
    /// Mean of a frequency component and a one-year linear recency decay
    #[default]
    Recency,
    /// Favours tracks added around the same time of year, with a slow age penalty
    Seasonal,
}

impl ScoreModel {
    /// Score for a track last added at `added` that appears `frequency` times
    pub fn score(self, added: Option<DateTime<Utc>>, frequency: usize, now: DateTime<Utc>) -> f64 {
        match self {
            ScoreModel::Recency => {
                let freq_score = (frequency as f64 / FREQUENCY_CAP).min(1.0);
                let recency_score = match added {
                    Some(added) => {
                        let days = (now - added).num_days() as f64;
                        (1.0 - days / 365.0).max(0.0)
                    }
                    None => 0.0,
                };
                (freq_score + recency_score) / 2.0
            }
            ScoreModel::Seasonal => match added {
                Some(added) => {
                    let days = (now - added).num_days();
                    if days > SEASONAL_MAX_AGE_DAYS {
                        return SEASONAL_TOO_OLD_SCORE;
                    }
                    let days = days as f64;
                    (2.0 * PI * days / 365.0).cos() - days / 750.0
                }
                None => SEASONAL_UNDATED_SCORE,
            },
        }
    }
}

/// Per-id statistics over all occurrences of a track
struct TrackStats<'a> {
    frequency: usize,
    latest_added: Option<DateTime<Utc>>,
    /// Most recently added occurrence
    representative: &'a Track,
}

/// Draws up to `n` distinct tracks from `tracks`
///
/// Tracks without an id are ignored. Each returned track is the most recently
/// added occurrence of its id, in the order the ids were drawn.
pub fn sample_weighted<R: Rng + ?Sized>(
    tracks: &[Track],
    n: usize,
    temperature: f64,
    model: ScoreModel,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<Track> {
    if n == 0 {
        return Vec::new();
    }

    // First-seen order keeps the result reproducible for a seeded rng.
    let mut order: Vec<&str> = Vec::new();
    let mut stats: HashMap<&str, TrackStats> = HashMap::new();
    for track in tracks {
        let Some(id) = track.id.as_deref() else { continue };
        match stats.get_mut(id) {
            Some(entry) => {
                entry.frequency += 1;
                if is_later(track.added_at, entry.latest_added) {
                    entry.latest_added = track.added_at;
                    entry.representative = track;
                }
            }
            None => {
                order.push(id);
                stats.insert(
                    id,
                    TrackStats {
                        frequency: 1,
                        latest_added: track.added_at,
                        representative: track,
                    },
                );
            }
        }
    }

    if order.is_empty() {
        return Vec::new();
    }

    let scored: Vec<(&str, f64)> = order
        .iter()
        .map(|id| {
            let entry = &stats[id];
            (*id, model.score(entry.latest_added, entry.frequency, now))
        })
        .collect();

    let picked = if temperature <= 0.0 {
        top_scores(scored, n)
    } else {
        softmax_draw(scored, n, temperature, rng)
    };

    picked
        .into_iter()
        .map(|id| stats[id].representative.clone())
        .collect()
}

fn is_later(candidate: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (candidate, current) {
        (Some(c), Some(cur)) => c > cur,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn top_scores(mut scored: Vec<(&str, f64)>, n: usize) -> Vec<&str> {
    // Stable sort: equal scores keep first-seen order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(n).map(|(id, _)| id).collect()
}

fn softmax_draw<'a, R: Rng + ?Sized>(
    scored: Vec<(&'a str, f64)>,
    n: usize,
    temperature: f64,
    rng: &mut R,
) -> Vec<&'a str> {
    let scaled: Vec<f64> = scored.iter().map(|(_, s)| s / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // A temperature small enough to overflow `score / temperature` is a greedy pick.
    if !max.is_finite() {
        return top_scores(scored, n);
    }

    let mut remaining: Vec<(&str, f64, f64)> = scored
        .into_iter()
        .zip(scaled)
        .map(|((id, s), x)| (id, s, (x - max).exp()))
        .collect();

    let mut picked = Vec::with_capacity(n.min(remaining.len()));
    while picked.len() < n && !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|(_, _, w)| w).sum();
        if !(total > 0.0 && total.is_finite()) {
            // Every remaining weight underflowed; the rest goes by score.
            let rest = remaining.into_iter().map(|(id, s, _)| (id, s)).collect();
            picked.extend(top_scores(rest, n - picked.len()));
            break;
        }
        let target = rng.gen::<f64>() * total;

        let mut cumulative = 0.0;
        // Falls back to the last candidate when rounding leaves `target` uncovered.
        let mut chosen = remaining.len() - 1;
        for (idx, (_, _, weight)) in remaining.iter().enumerate() {
            cumulative += weight;
            if cumulative >= target {
                chosen = idx;
                break;
            }
        }

        picked.push(remaining.remove(chosen).0);
    }
    picked
}
