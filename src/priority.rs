use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{DAY_MS, Ms, PriorityAttrs, PriorityLevel};

pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 100;

const RUSH_BOOST: i64 = 20;
const CUSTOMER_BOOST: i64 = 10;

/// Knobs for the overdue boost. The per-day step is derived so that the
/// boost reaches `overdue_cap_points` after `overdue_step_days` days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub overdue_step_days: i64,
    pub overdue_cap_points: i64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            overdue_step_days: 4,
            overdue_cap_points: 20,
        }
    }
}

fn base(level: PriorityLevel) -> i64 {
    match level {
        PriorityLevel::Critical => 90,
        PriorityLevel::High => 75,
        PriorityLevel::Normal => 50,
        PriorityLevel::Low => 25,
    }
}

fn overdue_boost(due_date: Option<Ms>, cfg: &PriorityConfig, now: Ms) -> i64 {
    let Some(due) = due_date else { return 0 };
    if now <= due {
        return 0;
    }
    let days_overdue = (now - due) / DAY_MS;
    let step = if cfg.overdue_step_days > 0 {
        cfg.overdue_cap_points / cfg.overdue_step_days
    } else {
        cfg.overdue_cap_points
    };
    (days_overdue * step).min(cfg.overdue_cap_points)
}

/// Effective 1-100 score. Derived on every call; the overdue component
/// shifts with wall-clock time, so the result must never be cached across
/// scheduling decisions.
pub fn effective_score(attrs: &PriorityAttrs, cfg: &PriorityConfig, now: Ms) -> u8 {
    let mut score = base(attrs.level);
    if attrs.rush {
        score += RUSH_BOOST;
    }
    if attrs.customer_priority {
        score += CUSTOMER_BOOST;
    }
    score += overdue_boost(attrs.due_date, cfg, now);
    score.clamp(MIN_SCORE, MAX_SCORE) as u8
}

/// Key for deterministic ordering among scheduling candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    pub score: u8,
    pub due_date: Option<Ms>,
    pub id: Ulid,
}

/// Total order: score descending, then earliest due date (no due date
/// last), then smallest id. No two distinct entities ever tie.
pub fn rank_order(a: &Rank, b: &Rank) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}
