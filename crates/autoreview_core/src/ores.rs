use serde_json::Value;

use crate::client::{OresModels, OresScores};
use crate::config::OresThresholds;
use crate::model::WikiId;

/// Damaging and goodfaith thresholds in effect for one revision. Zero disables a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedThresholds {
    pub damaging: f64,
    pub goodfaith: f64,
}

impl ResolvedThresholds {
    /// Living-person articles use the stricter variants when configured.
    pub fn resolve(thresholds: &OresThresholds, living_person: bool) -> Self {
        if !living_person {
            return Self {
                damaging: thresholds.damaging,
                goodfaith: thresholds.goodfaith,
            };
        }
        Self {
            damaging: positive_or(thresholds.damaging_living, thresholds.damaging),
            goodfaith: positive_or(thresholds.goodfaith_living, thresholds.goodfaith),
        }
    }

    pub fn models(self) -> OresModels {
        OresModels {
            damaging: self.damaging > 0.0,
            goodfaith: self.goodfaith > 0.0,
        }
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value > 0.0 { value } else { fallback }
}

pub fn scores_url(base_url: &str, wiki: &WikiId, revid: i64, models: OresModels) -> String {
    format!(
        "{}/v3/scores/{}/{}?models={}",
        base_url.trim_end_matches('/'),
        wiki.ores_context(),
        revid,
        models.query_value()
    )
}

/// Extract `true` probabilities from an ORES v3 response. A requested model
/// without a score counts as harmless: damaging 0.0, goodfaith 1.0.
pub fn parse_scores(response: &Value, wiki: &WikiId, revid: i64, models: OresModels) -> OresScores {
    let scores = &response[wiki.ores_context()]["scores"][revid.to_string()];
    let probability = |model: &str| scores[model]["score"]["probability"]["true"].as_f64();
    OresScores {
        damaging: models
            .damaging
            .then(|| probability("damaging").unwrap_or(0.0)),
        goodfaith: models
            .goodfaith
            .then(|| probability("goodfaith").unwrap_or(1.0)),
    }
}
