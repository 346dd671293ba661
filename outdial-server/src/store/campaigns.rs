use crate::error::AppError;
use crate::model::{Campaign, CampaignStatus, StatsDelta};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct CampaignStore {
    inner: RwLock<HashMap<String, Campaign>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, campaign: Campaign) -> Campaign {
        let mut campaigns = self.inner.write();
        campaigns.insert(campaign.id.clone(), campaign.clone());
        campaign
    }

    pub fn get(&self, campaign_id: &str) -> Result<Campaign, AppError> {
        self.inner
            .read()
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| AppError::CampaignNotFound(campaign_id.to_string()))
    }

    pub fn list(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self.inner.read().values().cloned().collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        campaigns
    }

    /// Validated status transition. Re-asserting the current status is an
    /// idempotent no-op; entering `active` stamps `last_executed`.
    pub fn update_status(
        &self,
        campaign_id: &str,
        new_status: CampaignStatus,
    ) -> Result<Campaign, AppError> {
        let mut campaigns = self.inner.write();
        let campaign = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| AppError::CampaignNotFound(campaign_id.to_string()))?;

        if campaign.status == new_status {
            return Ok(campaign.clone());
        }
        if !campaign.status.can_transition_to(new_status) {
            return Err(AppError::InvalidTransition {
                from: campaign.status.to_string(),
                to: new_status.to_string(),
            });
        }

        campaign.status = new_status;
        campaign.updated_at = Utc::now();
        if new_status == CampaignStatus::Active {
            campaign.last_executed = Some(Utc::now());
        }
        Ok(campaign.clone())
    }

    pub fn update_stats(&self, campaign_id: &str, delta: StatsDelta) -> Result<Campaign, AppError> {
        let mut campaigns = self.inner.write();
        let campaign = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| AppError::CampaignNotFound(campaign_id.to_string()))?;

        campaign.stats.apply(delta);
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }

    pub fn add_contacts(
        &self,
        campaign_id: &str,
        contact_ids: &[String],
    ) -> Result<Campaign, AppError> {
        let mut campaigns = self.inner.write();
        let campaign = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| AppError::CampaignNotFound(campaign_id.to_string()))?;

        for id in contact_ids {
            if !campaign.contact_ids.contains(id) {
                campaign.contact_ids.push(id.clone());
                campaign.stats.total_contacts += 1;
            }
        }
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }
}
