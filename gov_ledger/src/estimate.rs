use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use time::Date;
use tracing::warn;
use uuid::Uuid;

use crate::types::Tier;

/// Heuristic cost model supplied by an arena's adapter
pub trait CostEstimator: Send + Sync {
    fn estimate_credits(&self, tier: Tier, date_from: Option<Date>, date_to: Option<Date>, max_results: Option<u64>) -> anyhow::Result<i64>;
}

/// Per-arena part of a query design's collection plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaPlan {
    /// Overrides the design's default tier
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub max_results: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditEstimate {
    pub query_design_id: Uuid,
    pub total_credits: i64,
    pub per_arena: BTreeMap<String, i64>,
}

pub(crate) fn estimate_plan(
    estimators: &HashMap<String, Arc<dyn CostEstimator>>,
    query_design_id: Uuid,
    default_tier: Tier,
    arenas: &BTreeMap<String, ArenaPlan>,
    date_from: Option<Date>,
    date_to: Option<Date>,
) -> CreditEstimate {
    let per_arena: BTreeMap<String, i64> = arenas
        .iter()
        .map(|(arena, plan)| {
            let tier = plan.tier.unwrap_or(default_tier);
            let credits = match estimators.get(arena) {
                None => tier.default_cost(),
                Some(estimator) => match estimator.estimate_credits(tier, date_from, date_to, plan.max_results) {
                    Ok(credits) if credits >= 0 => credits,
                    Ok(credits) => {
                        warn!(%query_design_id, arena = %arena, credits, "Negative credit estimate, counting as 0");
                        0
                    }
                    Err(err) => {
                        warn!(%query_design_id, arena = %arena, error = %err, "Credit estimator failed, counting as 0");
                        0
                    }
                },
            };
            (arena.clone(), credits)
        })
        .collect();

    let total_credits = per_arena.values().fold(0i64, |total, credits| total.saturating_add(*credits));
    CreditEstimate { query_design_id, total_credits, per_arena }
}
