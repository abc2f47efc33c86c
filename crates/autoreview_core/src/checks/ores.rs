use anyhow::Result;
use tracing::{debug, warn};

use super::CheckId;
use crate::context::CheckContext;
use crate::model::{CheckResult, CheckStatus, Decision};
use crate::ores::ResolvedThresholds;

const ORES_REASON: &str = "ORES edit quality scores indicate potential issues.";

pub(super) fn ores_scores(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::OresScores;
    let configured = &context.policy.ores;
    let has_living_variant = configured.damaging_living > 0.0 || configured.goodfaith_living > 0.0;
    let living = has_living_variant && context.is_living_person();
    let thresholds = ResolvedThresholds::resolve(configured, living);
    let models = thresholds.models();
    if models.is_empty() {
        return Ok(check.result(
            CheckStatus::Skip,
            "ORES checks are disabled (thresholds set to 0).",
        ));
    }

    let scores = match context.ores_scores(models) {
        Ok(scores) if !scores.is_empty() => scores,
        Ok(_) => {
            warn!(revid = context.revision.revid, "ORES returned no scores");
            return Ok(unverified());
        }
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "ORES lookup failed");
            return Ok(unverified());
        }
    };
    debug!(
        revid = context.revision.revid,
        living,
        damaging = ?scores.damaging,
        goodfaith = ?scores.goodfaith,
        "ORES scores"
    );

    let mut evaluated = Vec::new();
    if let Some(damaging) = scores.damaging.filter(|_| models.damaging) {
        if damaging > thresholds.damaging {
            return Ok(blocked(format!(
                "ORES damaging score ({damaging:.3}) exceeds threshold ({:.3}).",
                thresholds.damaging
            )));
        }
        evaluated.push(format!("damaging: {damaging:.3}"));
    }
    if let Some(goodfaith) = scores.goodfaith.filter(|_| models.goodfaith) {
        if goodfaith < thresholds.goodfaith {
            return Ok(blocked(format!(
                "ORES goodfaith score ({goodfaith:.3}) is below threshold ({:.3}).",
                thresholds.goodfaith
            )));
        }
        evaluated.push(format!("goodfaith: {goodfaith:.3}"));
    }
    Ok(check.result(
        CheckStatus::Ok,
        format!(
            "ORES scores are within acceptable thresholds ({}).",
            evaluated.join(", ")
        ),
    ))
}

fn unverified() -> CheckResult {
    CheckResult::new(
        CheckId::OresScores.as_str(),
        "ORES edit quality check failed",
        CheckStatus::Fail,
        "Could not verify ORES edit quality scores.",
    )
    .stop_with(Decision::blocked(ORES_REASON))
}

fn blocked(message: String) -> CheckResult {
    CheckId::OresScores
        .result(CheckStatus::Fail, message)
        .stop_with(Decision::blocked(ORES_REASON))
}
