//! Profitability checkers gating batch proof generation.

use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ProfitabilityChecker, Result};

/// Accepts a batch when the offered collateral reaches the configured
/// minimum reward, or unconditionally once the consolidation interval has
/// elapsed since the last accepted batch.
pub struct BaseProfitabilityChecker {
    min_reward: U256,
    consolidate_anyway_after: Duration,
    last_accepted: Mutex<DateTime<Utc>>,
}

impl BaseProfitabilityChecker {
    pub fn new(min_reward: U256, consolidate_anyway_after: Duration) -> Self {
        Self {
            min_reward,
            consolidate_anyway_after,
            last_accepted: Mutex::new(Utc::now()),
        }
    }
}

#[async_trait]
impl ProfitabilityChecker for BaseProfitabilityChecker {
    async fn is_profitable(&self, collateral: U256) -> Result<bool> {
        let mut last = self.last_accepted.lock().await;
        if collateral >= self.min_reward {
            *last = Utc::now();
            return Ok(true);
        }
        if !self.consolidate_anyway_after.is_zero() {
            let elapsed = Utc::now()
                .signed_duration_since(*last)
                .to_std()
                .unwrap_or_default();
            if elapsed >= self.consolidate_anyway_after {
                *last = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Accepts every batch.
pub struct AcceptAllProfitabilityChecker;

#[async_trait]
impl ProfitabilityChecker for AcceptAllProfitabilityChecker {
    async fn is_profitable(&self, _collateral: U256) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_all_accepts_zero_collateral() {
        let checker = AcceptAllProfitabilityChecker;
        assert!(checker.is_profitable(U256::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn base_accepts_when_reward_met() {
        let checker = BaseProfitabilityChecker::new(U256::from(100), Duration::ZERO);
        assert!(checker.is_profitable(U256::from(100)).await.unwrap());
        assert!(checker.is_profitable(U256::from(101)).await.unwrap());
    }

    #[tokio::test]
    async fn base_rejects_below_reward_without_interval() {
        let checker = BaseProfitabilityChecker::new(U256::from(100), Duration::ZERO);
        assert!(!checker.is_profitable(U256::from(99)).await.unwrap());
    }

    #[tokio::test]
    async fn base_consolidates_anyway_after_interval() {
        let checker = BaseProfitabilityChecker::new(U256::from(100), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(checker.is_profitable(U256::ZERO).await.unwrap());
        // interval restarts after the forced acceptance
        assert!(!checker.is_profitable(U256::ZERO).await.unwrap());
    }
}
