use crate::error::AppError;
use crate::model::{Contact, ContactOutcome, ContactStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactCounts {
    pub pending: usize,
    pub calling: usize,
}

#[derive(Default)]
pub struct ContactStore {
    inner: RwLock<HashMap<String, Contact>>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contact: Contact) -> Contact {
        let mut contacts = self.inner.write();
        contacts.insert(contact.id.clone(), contact.clone());
        contact
    }

    pub fn get(&self, contact_id: &str) -> Result<Contact, AppError> {
        self.inner
            .read()
            .get(contact_id)
            .cloned()
            .ok_or_else(|| AppError::ContactNotFound(contact_id.to_string()))
    }

    /// Associates a contact with a campaign. When the (contact, campaign)
    /// pair is newly formed the per-campaign status resets to pending and the
    /// claim counter starts over; re-adding to the same campaign is a no-op.
    pub fn enroll(&self, contact_id: &str, campaign_id: &str) -> Result<(), AppError> {
        let mut contacts = self.inner.write();
        let contact = contacts
            .get_mut(contact_id)
            .ok_or_else(|| AppError::ContactNotFound(contact_id.to_string()))?;

        if contact.campaigns.contains_key(campaign_id) {
            return Ok(());
        }
        contact
            .campaigns
            .insert(campaign_id.to_string(), ContactStatus::Pending);
        contact.call_count = 0;
        contact.last_call_result = None;
        Ok(())
    }

    /// Claims the next dialable contact for a campaign, or `None`.
    ///
    /// The whole find-and-modify happens under one write lock, so two
    /// concurrent callers can never claim the same contact: the winner's
    /// `call_count` bump makes the row invisible to the loser's scan.
    pub fn claim_next_for_calling(&self, campaign_id: &str) -> Option<Contact> {
        let mut contacts = self.inner.write();

        let next_id = contacts
            .values()
            .filter(|c| {
                c.status_in(campaign_id) == Some(ContactStatus::Pending) && c.call_count == 0
            })
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })?
            .id
            .clone();

        let contact = contacts.get_mut(&next_id)?;
        contact
            .campaigns
            .insert(campaign_id.to_string(), ContactStatus::Calling);
        contact.call_count += 1;
        contact.last_contacted = Some(Utc::now());
        Some(contact.clone())
    }

    /// Resolves a claimed contact. Idempotent on repeated identical input.
    pub fn resolve(
        &self,
        contact_id: &str,
        campaign_id: &str,
        outcome: ContactOutcome,
        last_result: &str,
    ) -> Result<(), AppError> {
        let mut contacts = self.inner.write();
        let contact = contacts
            .get_mut(contact_id)
            .ok_or_else(|| AppError::ContactNotFound(contact_id.to_string()))?;

        let current = contact
            .status_in(campaign_id)
            .ok_or_else(|| AppError::ContactNotFound(contact_id.to_string()))?;

        let target = outcome.as_status();
        if current == target && contact.last_call_result.as_deref() == Some(last_result) {
            return Ok(());
        }
        if current != ContactStatus::Calling {
            return Err(AppError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        contact.campaigns.insert(campaign_id.to_string(), target);
        contact.last_call_result = Some(last_result.to_string());
        contact.last_call_date = Some(Utc::now());
        Ok(())
    }

    pub fn status_counts(&self, campaign_id: &str) -> ContactCounts {
        let contacts = self.inner.read();
        let mut counts = ContactCounts::default();
        for contact in contacts.values() {
            match contact.status_in(campaign_id) {
                Some(ContactStatus::Pending) => counts.pending += 1,
                Some(ContactStatus::Calling) => counts.calling += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn list_for_campaign(&self, campaign_id: &str) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .inner
            .read()
            .values()
            .filter(|c| c.campaigns.contains_key(campaign_id))
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seeded_store(n: usize, campaign_id: &str) -> Arc<ContactStore> {
        let store = Arc::new(ContactStore::new());
        for i in 0..n {
            let contact = Contact::new(
                format!("ct{i:03}"),
                format!("+1555000{i:04}"),
                format!("Contact {i}"),
                0,
            )
            .unwrap();
            store.insert(contact);
            store.enroll(&format!("ct{i:03}"), campaign_id).unwrap();
        }
        store
    }

    #[test]
    fn claim_transitions_and_counts() {
        let store = seeded_store(2, "c1");
        let claimed = store.claim_next_for_calling("c1").unwrap();
        assert_eq!(claimed.status_in("c1"), Some(ContactStatus::Calling));
        assert_eq!(claimed.call_count, 1);
        assert!(claimed.last_contacted.is_some());
        assert_eq!(store.status_counts("c1"), ContactCounts { pending: 1, calling: 1 });
    }

    #[test]
    fn claim_returns_none_when_exhausted() {
        let store = seeded_store(1, "c1");
        assert!(store.claim_next_for_calling("c1").is_some());
        assert!(store.claim_next_for_calling("c1").is_none());
    }

    #[test]
    fn claim_order_follows_creation() {
        let store = seeded_store(3, "c1");
        let first = store.claim_next_for_calling("c1").unwrap();
        let second = store.claim_next_for_calling("c1").unwrap();
        assert_eq!(first.id, "ct000");
        assert_eq!(second.id, "ct001");
    }

    #[test]
    fn concurrent_claims_never_hand_out_duplicates() {
        let store = seeded_store(8, "c1");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(contact) = store.claim_next_for_calling("c1") {
                    claimed.push(contact.id);
                }
                claimed
            }));
        }

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        let before_dedup = all.len();
        all.dedup();
        assert_eq!(before_dedup, all.len(), "a contact was claimed twice");
        assert_eq!(all.len(), 8);
        assert_eq!(store.status_counts("c1"), ContactCounts { pending: 0, calling: 8 });
    }

    #[test]
    fn resolve_is_idempotent_on_identical_input() {
        let store = seeded_store(1, "c1");
        let contact = store.claim_next_for_calling("c1").unwrap();
        store
            .resolve(&contact.id, "c1", ContactOutcome::Completed, "completed")
            .unwrap();
        store
            .resolve(&contact.id, "c1", ContactOutcome::Completed, "completed")
            .unwrap();
        let resolved = store.get(&contact.id).unwrap();
        assert_eq!(resolved.status_in("c1"), Some(ContactStatus::Completed));
        assert_eq!(resolved.call_count, 1);
    }

    #[test]
    fn resolve_rejects_unclaimed_contact() {
        let store = seeded_store(1, "c1");
        let err = store
            .resolve("ct000", "c1", ContactOutcome::Failed, "failed")
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn re_enroll_same_campaign_is_a_noop() {
        let store = seeded_store(1, "c1");
        store.claim_next_for_calling("c1").unwrap();
        store.enroll("ct000", "c1").unwrap();
        let contact = store.get("ct000").unwrap();
        assert_eq!(contact.status_in("c1"), Some(ContactStatus::Calling));
        assert_eq!(contact.call_count, 1);
    }

    #[test]
    fn enroll_into_new_campaign_resets_claimability() {
        let store = seeded_store(1, "c1");
        let contact = store.claim_next_for_calling("c1").unwrap();
        store
            .resolve(&contact.id, "c1", ContactOutcome::Completed, "completed")
            .unwrap();

        store.enroll("ct000", "c2").unwrap();
        let reclaimed = store.claim_next_for_calling("c2").unwrap();
        assert_eq!(reclaimed.id, "ct000");
        // The original campaign's resolution is untouched.
        assert_eq!(reclaimed.status_in("c1"), Some(ContactStatus::Completed));
    }
}
