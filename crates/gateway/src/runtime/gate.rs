//! Session gating: feature flags, beta access, and monthly quota.
//!
//! Every request passes through the gate before any session or model work
//! happens. A denial is a normal, typed outcome, not an error condition.

use std::sync::Arc;

use parley_domain::config::FeaturesConfig;
use parley_domain::Result;
use parley_store::UsageRepo;

/// Quota applied when no per-user override exists.
pub const DEFAULT_MONTHLY_QUOTA: u32 = 50;

/// Answers the feature questions the gate asks. Config-backed in
/// production; scripted in tests.
pub trait FeatureDecisionProvider: Send + Sync {
    fn chat_enabled(&self) -> bool;
    fn beta_period(&self) -> bool;
    fn has_beta_access(&self, user_id: &str) -> bool;
    /// A per-user quota override, if one is configured.
    fn quota_for_user(&self, user_id: &str) -> Option<u32>;
}

/// Feature decisions read straight from the loaded config.
pub struct ConfigFeatureProvider {
    features: FeaturesConfig,
}

impl ConfigFeatureProvider {
    pub fn new(features: FeaturesConfig) -> Self {
        Self { features }
    }
}

impl FeatureDecisionProvider for ConfigFeatureProvider {
    fn chat_enabled(&self) -> bool {
        self.features.chat_enabled
    }

    fn beta_period(&self) -> bool {
        self.features.beta_period
    }

    fn has_beta_access(&self, user_id: &str) -> bool {
        self.features.beta_users.iter().any(|u| u == user_id)
    }

    fn quota_for_user(&self, user_id: &str) -> Option<u32> {
        Some(
            self.features
                .per_user_quota
                .get(user_id)
                .copied()
                .unwrap_or(self.features.default_monthly_quota),
        )
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDenial {
    FeatureDisabled,
    BetaAccessRequired,
    QuotaExceeded { used: u32, limit: u32 },
}

impl GateDenial {
    /// The wire-level error type for this denial.
    pub fn error_type(&self) -> &'static str {
        match self {
            GateDenial::FeatureDisabled => "feature_disabled",
            GateDenial::BetaAccessRequired => "beta_access_required",
            GateDenial::QuotaExceeded { .. } => "rate_limit_exceeded",
        }
    }

    pub fn message(&self) -> String {
        match self {
            GateDenial::FeatureDisabled => "chat is currently disabled".into(),
            GateDenial::BetaAccessRequired => {
                "chat is in a closed beta; your account does not have access".into()
            }
            GateDenial::QuotaExceeded { used, limit } => {
                format!("monthly message quota exhausted ({used}/{limit})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(GateDenial),
}

/// The gate itself: feature checks first, quota last (the quota read hits
/// storage, the rest is in-memory).
pub struct SessionGate {
    features: Arc<dyn FeatureDecisionProvider>,
    usage: Arc<dyn UsageRepo>,
}

impl SessionGate {
    pub fn new(features: Arc<dyn FeatureDecisionProvider>, usage: Arc<dyn UsageRepo>) -> Self {
        Self { features, usage }
    }

    pub async fn check(&self, user_id: &str) -> Result<GateDecision> {
        if !self.features.chat_enabled() {
            return Ok(GateDecision::Denied(GateDenial::FeatureDisabled));
        }

        if self.features.beta_period() && !self.features.has_beta_access(user_id) {
            return Ok(GateDecision::Denied(GateDenial::BetaAccessRequired));
        }

        let limit = self
            .features
            .quota_for_user(user_id)
            .unwrap_or(DEFAULT_MONTHLY_QUOTA);
        let used = self.usage.get_monthly_usage(user_id).await?;
        if used >= limit {
            tracing::info!(user = %user_id, used, limit, "monthly quota exhausted");
            return Ok(GateDecision::Denied(GateDenial::QuotaExceeded {
                used,
                limit,
            }));
        }

        Ok(GateDecision::Allowed)
    }
}

// Gate is checked before the model call; usage is incremented per model
// call by the loop, so a request admitted at `limit - 1` completes even if
// it makes several calls.
