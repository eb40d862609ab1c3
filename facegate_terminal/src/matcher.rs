//! FaceGate Terminal - Match Engine
//!
//! Nearest-neighbour recognition with an acceptance threshold calibrated
//! from impostor pairs (embeddings of different identities) in the
//! currently enrolled set.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MatchConfig;
use crate::embeddings::{l2_distance, DatasetSnapshot, EmbeddingStore};

/// Where the active threshold came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ThresholdSource {
    Calibrated,
    /// Too few identities or impostor pairs to calibrate
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdEstimate {
    pub threshold: f32,
    pub source: ThresholdSource,
    pub impostor_pairs: usize,
    pub generation: u64,
}

/// Accepted match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recognition {
    pub id: String,
    pub display_name: Option<String>,
    pub distance: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Verdict {
    Match(Recognition),
    #[serde(rename_all = "camelCase")]
    Unknown { nearest_distance: Option<f32>, threshold: f32 },
    NotReady,
}

impl Verdict {
    pub fn into_recognition(self) -> Option<Recognition> {
        match self {
            Verdict::Match(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionStats {
    pub known_people: usize,
    pub embeddings: usize,
    pub dimension: usize,
    pub generation: u64,
    pub threshold: f32,
    pub threshold_source: ThresholdSource,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, PartialEq)]
struct CacheKey {
    generation: u64,
    fmr_bits: u64,
    sample_limit: usize,
}

pub struct MatchEngine {
    store: Arc<EmbeddingStore>,
    config: MatchConfig,
    cache: Mutex<Option<(CacheKey, ThresholdEstimate)>>,
}

impl MatchEngine {
    pub fn new(store: Arc<EmbeddingStore>, config: MatchConfig) -> Self {
        Self {
            store,
            config,
            cache: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECOGNITION
    // ═══════════════════════════════════════════════════════════════════════

    /// Accepted match for `query`, if any
    pub fn recognize(&self, query: &[f32]) -> Option<Recognition> {
        self.recognize_detailed(query).into_recognition()
    }

    pub fn recognize_detailed(&self, query: &[f32]) -> Verdict {
        // One snapshot so candidate and threshold agree on the generation
        let snapshot = self.store.snapshot();
        if !snapshot.is_ready() {
            return Verdict::NotReady;
        }

        let estimate = self.estimate_for(
            &snapshot,
            self.config.target_false_match_rate,
            self.config.sample_limit,
        );

        let Some(candidate) = snapshot.find_nearest(query) else {
            log::debug!(
                "no nearest record for query of dimension {} (dataset dimension {})",
                query.len(),
                snapshot.dimension()
            );
            return Verdict::Unknown {
                nearest_distance: None,
                threshold: estimate.threshold,
            };
        };

        if candidate.distance.is_nan() || candidate.distance > estimate.threshold {
            log::debug!(
                "rejected: nearest {:.4} above threshold {:.4}",
                candidate.distance,
                estimate.threshold
            );
            return Verdict::Unknown {
                nearest_distance: Some(candidate.distance),
                threshold: estimate.threshold,
            };
        }

        Verdict::Match(Recognition {
            confidence: confidence_from_distance(candidate.distance),
            id: candidate.id,
            display_name: candidate.display_name,
            distance: candidate.distance,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CALIBRATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Threshold with the configured target FMR and sample limit
    pub fn threshold(&self) -> ThresholdEstimate {
        self.calibrate(self.config.target_false_match_rate, self.config.sample_limit)
    }

    pub fn estimate_threshold_l2(&self, target_false_match_rate: f64, sample_limit: usize) -> f32 {
        self.calibrate(target_false_match_rate, sample_limit).threshold
    }

    pub fn calibrate(&self, target_false_match_rate: f64, sample_limit: usize) -> ThresholdEstimate {
        let snapshot = self.store.snapshot();
        self.estimate_for(&snapshot, target_false_match_rate, sample_limit)
    }

    fn estimate_for(
        &self,
        snapshot: &DatasetSnapshot,
        target_false_match_rate: f64,
        sample_limit: usize,
    ) -> ThresholdEstimate {
        let key = CacheKey {
            generation: snapshot.generation(),
            fmr_bits: target_false_match_rate.to_bits(),
            sample_limit,
        };

        if let Some((cached_key, estimate)) = *self.cache.lock() {
            if cached_key == key {
                return estimate;
            }
        }

        // Pure function of the snapshot; concurrent callers may both compute
        let estimate = estimate_threshold(snapshot, &self.config, target_false_match_rate, sample_limit);
        log::debug!(
            "threshold {:.4} ({:?}) from {} impostor pairs, generation {}",
            estimate.threshold,
            estimate.source,
            estimate.impostor_pairs,
            estimate.generation
        );
        *self.cache.lock() = Some((key, estimate));
        estimate
    }

    pub fn stats(&self) -> RecognitionStats {
        let snapshot = self.store.snapshot();
        let estimate = self.estimate_for(
            &snapshot,
            self.config.target_false_match_rate,
            self.config.sample_limit,
        );
        RecognitionStats {
            known_people: snapshot.people_count(),
            embeddings: snapshot.embedding_count(),
            dimension: snapshot.dimension(),
            generation: snapshot.generation(),
            threshold: estimate.threshold,
            threshold_source: estimate.source,
            last_sync: snapshot.last_sync(),
        }
    }
}

/// `cos θ = 1 - d²/2` for unit vectors, clamped into `[0, 1]`
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance * distance / 2.0).clamp(0.0, 1.0)
}

/// Impostor-pair percentile threshold over one snapshot.
///
/// Pairs are taken in index order (i < j) until `sample_limit` is reached.
pub fn estimate_threshold(
    snapshot: &DatasetSnapshot,
    config: &MatchConfig,
    target_false_match_rate: f64,
    sample_limit: usize,
) -> ThresholdEstimate {
    let fallback = |impostor_pairs| ThresholdEstimate {
        threshold: config.default_threshold,
        source: ThresholdSource::Default,
        impostor_pairs,
        generation: snapshot.generation(),
    };

    if snapshot.people_count() < config.min_identities {
        return fallback(0);
    }

    let records = snapshot.records();
    let mut distances = Vec::with_capacity(sample_limit.min(records.len() * records.len() / 2));
    'outer: for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            if distances.len() >= sample_limit {
                break 'outer;
            }
            if a.id != b.id {
                distances.push(l2_distance(&a.vector, &b.vector));
            }
        }
    }

    if distances.is_empty() || distances.len() < config.min_impostor_pairs {
        return fallback(distances.len());
    }

    distances.sort_by(f32::total_cmp);
    let n = distances.len();
    let index = ((target_false_match_rate * n as f64).ceil().max(0.0) as usize).min(n - 1);
    let threshold = distances[index].clamp(config.threshold_floor, config.threshold_ceiling);

    ThresholdEstimate {
        threshold,
        source: ThresholdSource::Calibrated,
        impostor_pairs: n,
        generation: snapshot.generation(),
    }
}
