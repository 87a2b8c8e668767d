//! Hourly/daily spend caps checked against the append-only cost ledger
//! before a provider call is attempted (spec.md §4.K).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    /// `0` means disabled.
    pub hourly_limit_usd: f64,
    /// `0` means disabled.
    pub daily_limit_usd: f64,
    /// When true, a breached limit is a hard refusal; otherwise the
    /// decision is `allowed=true` with a logged warning.
    pub strict: bool,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            hourly_limit_usd: 0.0,
            daily_limit_usd: 0.0,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub hourly_used: f64,
    pub hourly_limit: f64,
    pub daily_used: f64,
    pub daily_limit: f64,
}

impl BudgetDecision {
    pub fn allow(hourly_used: f64, hourly_limit: f64, daily_used: f64, daily_limit: f64) -> Self {
        Self {
            allowed: true,
            reason: None,
            hourly_used,
            hourly_limit,
            daily_used,
            daily_limit,
        }
    }

    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            hourly_used: 0.0,
            hourly_limit: 0.0,
            daily_used: 0.0,
            daily_limit: 0.0,
        }
    }
}

pub fn evaluate(
    estimated_usd: f64,
    hourly_used: f64,
    daily_used: f64,
    limits: &BudgetLimits,
) -> BudgetDecision {
    if limits.hourly_limit_usd > 0.0 && hourly_used + estimated_usd > limits.hourly_limit_usd {
        return BudgetDecision {
            allowed: !limits.strict,
            reason: Some(format!(
                "hourly budget would be exceeded: {:.4} + {:.4} > {:.4}",
                hourly_used, estimated_usd, limits.hourly_limit_usd
            )),
            hourly_used,
            hourly_limit: limits.hourly_limit_usd,
            daily_used,
            daily_limit: limits.daily_limit_usd,
        };
    }

    if limits.daily_limit_usd > 0.0 && daily_used + estimated_usd > limits.daily_limit_usd {
        return BudgetDecision {
            allowed: !limits.strict,
            reason: Some(format!(
                "daily budget would be exceeded: {:.4} + {:.4} > {:.4}",
                daily_used, estimated_usd, limits.daily_limit_usd
            )),
            hourly_used,
            hourly_limit: limits.hourly_limit_usd,
            daily_used,
            daily_limit: limits.daily_limit_usd,
        };
    }

    BudgetDecision::allow(
        hourly_used,
        limits.hourly_limit_usd,
        daily_used,
        limits.daily_limit_usd,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limits_always_allow() {
        let limits = BudgetLimits::default();
        let decision = evaluate(1000.0, 999.0, 999.0, &limits);
        assert!(decision.allowed);
    }

    #[test]
    fn breaching_hourly_limit_refuses_in_strict_mode() {
        let limits = BudgetLimits {
            hourly_limit_usd: 10.0,
            daily_limit_usd: 0.0,
            strict: true,
        };
        let decision = evaluate(5.0, 8.0, 0.0, &limits);
        assert!(!decision.allowed);
        assert!(decision.reason.is_some());
    }

    #[test]
    fn breaching_daily_limit_warns_but_allows_in_non_strict_mode() {
        let limits = BudgetLimits {
            hourly_limit_usd: 0.0,
            daily_limit_usd: 10.0,
            strict: false,
        };
        let decision = evaluate(5.0, 0.0, 8.0, &limits);
        assert!(decision.allowed);
        assert!(decision.reason.is_some());
    }

    #[test]
    fn within_limits_allows_without_reason() {
        let limits = BudgetLimits {
            hourly_limit_usd: 10.0,
            daily_limit_usd: 100.0,
            strict: true,
        };
        let decision = evaluate(1.0, 2.0, 3.0, &limits);
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }
}
