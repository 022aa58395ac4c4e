//! In-memory exposure store.
//!
//! Keys are sharded by health authority. Each upsert runs under the shard's
//! write lock, which makes the whole batch atomic for that authority.
//!
//! A submission without a revision token whose keys are all stored, unchanged,
//! under a single lineage is a retry of a publish whose response was lost. It
//! is answered with that lineage so the client gets a usable token back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate};
use dashmap::DashMap;

use crate::domain::types::{
    ClientPlatform, DailyStats, ExposureKey, KeyFingerprint, KeyRejection, LineageId, Submission,
    UpsertOutcome, KEY_LENGTH, MAX_INTERVAL_COUNT, MAX_TRANSMISSION_RISK,
};
use crate::ports::outbound::{ExposureStore, StoreError, TimeSource};

/// A persisted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredExposure {
    pub key: ExposureKey,
    pub lineage: LineageId,
    pub regions: BTreeSet<String>,
    pub traveler: bool,
    pub symptom_onset_interval: Option<i32>,
    pub platform: ClientPlatform,
    pub created_at: u64,
}

#[derive(Debug, Default)]
struct AuthorityShard {
    keys: HashMap<KeyFingerprint, StoredExposure>,
    days: BTreeMap<NaiveDate, DailyStats>,
}

pub struct InMemoryExposureStore {
    shards: DashMap<String, AuthorityShard>,
    clock: Arc<dyn TimeSource>,
}

impl InMemoryExposureStore {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            shards: DashMap::new(),
            clock,
        }
    }

    /// Look up a stored key by its fingerprint.
    pub fn get(&self, authority_id: &str, fingerprint: &KeyFingerprint) -> Option<StoredExposure> {
        self.shards
            .get(authority_id)
            .and_then(|shard| shard.keys.get(fingerprint).cloned())
    }

    /// Number of keys held for an authority.
    pub fn len(&self, authority_id: &str) -> usize {
        self.shards
            .get(authority_id)
            .map(|shard| shard.keys.len())
            .unwrap_or(0)
    }

    fn today(&self) -> Result<NaiveDate, StoreError> {
        let now = i64::try_from(self.clock.now())
            .map_err(|_| StoreError::Internal("clock out of range".into()))?;
        DateTime::from_timestamp(now, 0)
            .map(|t| t.date_naive())
            .ok_or_else(|| StoreError::Internal("clock out of range".into()))
    }
}

/// Lineage that already owns every valid key of a token-less submission with
/// identical metadata, if there is exactly one.
fn replayed_lineage(shard: &AuthorityShard, submission: &Submission) -> Option<LineageId> {
    let mut lineage = None;
    for key in submission.keys.iter().filter(|k| validate_key(k).is_ok()) {
        let existing = shard.keys.get(&key.fingerprint())?;
        if existing.key != *key
            || existing.symptom_onset_interval != submission.symptom_onset_interval
            || existing.traveler != submission.traveler
        {
            return None;
        }
        match lineage {
            Some(owner) if owner != existing.lineage => return None,
            _ => lineage = Some(existing.lineage),
        }
    }
    lineage
}

/// Per-key checks. A failing key is rejected without failing the batch.
fn validate_key(key: &ExposureKey) -> Result<(), String> {
    let material = STANDARD
        .decode(&key.key)
        .map_err(|_| "key is not valid base64".to_string())?;
    if material.len() != KEY_LENGTH {
        return Err(format!(
            "key must be {} bytes, got {}",
            KEY_LENGTH,
            material.len()
        ));
    }
    if key.interval_number < 0 {
        return Err("rolling start number must not be negative".into());
    }
    if !(1..=MAX_INTERVAL_COUNT).contains(&key.interval_count) {
        return Err(format!(
            "rolling period must be between 1 and {}",
            MAX_INTERVAL_COUNT
        ));
    }
    if !(0..=MAX_TRANSMISSION_RISK).contains(&key.transmission_risk) {
        return Err(format!(
            "transmission risk must be between 0 and {}",
            MAX_TRANSMISSION_RISK
        ));
    }
    Ok(())
}

#[async_trait]
impl ExposureStore for InMemoryExposureStore {
    async fn upsert(&self, submission: Submission) -> Result<UpsertOutcome, StoreError> {
        let now = self.clock.now();
        let day = self.today()?;

        let mut shard = self
            .shards
            .entry(submission.authority_id.clone())
            .or_default();

        let lineage = match &submission.prior {
            Some(prior) => prior.lineage,
            None => replayed_lineage(&shard, &submission).unwrap_or_default(),
        };

        let mut outcome = UpsertOutcome {
            lineage,
            inserted: 0,
            revised: 0,
            accepted: BTreeSet::new(),
            rejections: Vec::new(),
        };

        for (index, key) in submission.keys.iter().enumerate() {
            if let Err(reason) = validate_key(key) {
                outcome.rejections.push(KeyRejection { index, reason });
                continue;
            }

            let fingerprint = key.fingerprint();
            match shard.keys.get_mut(&fingerprint) {
                Some(existing) if existing.lineage != lineage => {
                    let reason = if submission.prior.is_some() {
                        "exposure key already published under a different revision lineage"
                    } else {
                        "exposure key already published, a revision token is required to change it"
                    };
                    outcome.rejections.push(KeyRejection {
                        index,
                        reason: reason.into(),
                    });
                }
                Some(existing) => {
                    if existing.key != *key
                        || existing.symptom_onset_interval != submission.symptom_onset_interval
                        || existing.traveler != submission.traveler
                    {
                        existing.key = key.clone();
                        existing.symptom_onset_interval = submission.symptom_onset_interval;
                        existing.traveler = submission.traveler;
                        existing.regions = submission.regions.clone();
                        outcome.revised += 1;
                    }
                    outcome.accepted.insert(fingerprint);
                }
                None => {
                    shard.keys.insert(
                        fingerprint,
                        StoredExposure {
                            key: key.clone(),
                            lineage,
                            regions: submission.regions.clone(),
                            traveler: submission.traveler,
                            symptom_onset_interval: submission.symptom_onset_interval,
                            platform: submission.platform,
                            created_at: now,
                        },
                    );
                    outcome.inserted += 1;
                    outcome.accepted.insert(fingerprint);
                }
            }
        }

        let stats = shard
            .days
            .entry(day)
            .or_insert_with(|| DailyStats::new(day));
        stats.publish_requests.increment(submission.platform);
        stats.total_teks_published += u64::from(outcome.inserted);
        if submission.prior.is_some() {
            stats.revision_requests += 1;
        }
        if submission.traveler {
            stats.traveler_requests += 1;
        }
        if submission.symptom_onset_interval.is_none() {
            stats.missing_onset += 1;
        }

        Ok(outcome)
    }

    async fn stats(&self, authority_id: &str) -> Result<Vec<DailyStats>, StoreError> {
        Ok(self
            .shards
            .get(authority_id)
            .map(|shard| shard.days.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SubmissionLineage;

    struct FixedClock(u64);

    impl TimeSource for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    fn store() -> InMemoryExposureStore {
        // 2023-11-14
        InMemoryExposureStore::new(Arc::new(FixedClock(1_700_000_000)))
    }

    fn key(fill: u8, risk: i32) -> ExposureKey {
        ExposureKey {
            key: STANDARD.encode([fill; KEY_LENGTH]),
            interval_number: 2_700_000,
            interval_count: 144,
            transmission_risk: risk,
        }
    }

    fn submission(keys: Vec<ExposureKey>, prior: Option<SubmissionLineage>) -> Submission {
        Submission {
            authority_id: "gov.example".into(),
            keys,
            regions: BTreeSet::new(),
            traveler: false,
            symptom_onset_interval: Some(3),
            platform: ClientPlatform::Android,
            prior,
        }
    }

    fn prior_of(outcome: &UpsertOutcome) -> SubmissionLineage {
        SubmissionLineage {
            lineage: outcome.lineage,
            authority_id: "gov.example".into(),
            keys: outcome.accepted.clone(),
        }
    }

    #[tokio::test]
    async fn test_insert_new_keys() {
        let store = store();
        let outcome = store
            .upsert(submission(vec![key(1, 2), key(2, 2)], None))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.rejections.is_empty());
        assert_eq!(store.len("gov.example"), 2);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected_individually() {
        let store = store();
        let mut short = key(3, 1);
        short.key = STANDARD.encode([3u8; 8]);
        let mut long_period = key(4, 1);
        long_period.interval_count = 145;
        let risky = key(5, 9);

        let outcome = store
            .upsert(submission(vec![short, key(6, 1), long_period, risky], None))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        let indices: Vec<usize> = outcome.rejections.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_same_token_retry_is_idempotent() {
        let store = store();
        let first = store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        let prior = prior_of(&first);

        let second = store
            .upsert(submission(vec![key(1, 2)], Some(prior.clone())))
            .await
            .unwrap();
        let third = store
            .upsert(submission(vec![key(1, 2)], Some(prior)))
            .await
            .unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.revised, 0);
        assert_eq!(third.inserted, 0);
        assert_eq!(third.lineage, first.lineage);
        assert_eq!(store.len("gov.example"), 1);
    }

    #[tokio::test]
    async fn test_revision_updates_metadata() {
        let store = store();
        let first = store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        let revised = store
            .upsert(submission(vec![key(1, 6), key(2, 6)], Some(prior_of(&first))))
            .await
            .unwrap();

        assert_eq!(revised.inserted, 1);
        assert_eq!(revised.revised, 1);
        let stored = store
            .get("gov.example", &key(1, 6).fingerprint())
            .unwrap();
        assert_eq!(stored.key.transmission_risk, 6);
    }

    #[tokio::test]
    async fn test_tokenless_retry_recovers_lineage() {
        let store = store();
        let first = store
            .upsert(submission(vec![key(1, 2), key(2, 2)], None))
            .await
            .unwrap();
        let retry = store
            .upsert(submission(vec![key(2, 2), key(1, 2)], None))
            .await
            .unwrap();

        assert_eq!(retry.lineage, first.lineage);
        assert_eq!(retry.inserted, 0);
        assert_eq!(retry.revised, 0);
        assert!(retry.rejections.is_empty());
        assert_eq!(retry.accepted, first.accepted);

        let revised = store
            .upsert(submission(vec![key(1, 7)], Some(prior_of(&retry))))
            .await
            .unwrap();
        assert_eq!(revised.revised, 1);
        assert!(revised.rejections.is_empty());
    }

    #[tokio::test]
    async fn test_tokenless_change_rejected() {
        let store = store();
        store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        let changed = store
            .upsert(submission(vec![key(1, 5), key(3, 2)], None))
            .await
            .unwrap();

        assert_eq!(changed.inserted, 1);
        assert_eq!(changed.rejections.len(), 1);
        assert!(changed.rejections[0].reason.contains("revision token is required"));
        assert_eq!(
            store.get("gov.example", &key(1, 2).fingerprint()).unwrap().key.transmission_risk,
            2
        );
    }

    #[tokio::test]
    async fn test_tokenless_spanning_lineages_rejected() {
        let store = store();
        store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        store.upsert(submission(vec![key(2, 2)], None)).await.unwrap();

        let both = store
            .upsert(submission(vec![key(1, 2), key(2, 2)], None))
            .await
            .unwrap();
        assert_eq!(both.inserted, 0);
        assert_eq!(both.rejections.len(), 2);
        assert!(both.accepted.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_lineage_rejected() {
        let store = store();
        let first = store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        let second = store.upsert(submission(vec![key(2, 2)], None)).await.unwrap();

        let hijack = store
            .upsert(submission(vec![key(1, 4)], Some(prior_of(&second))))
            .await
            .unwrap();
        assert_eq!(hijack.inserted, 0);
        assert_eq!(hijack.rejections.len(), 1);
        assert!(hijack.rejections[0].reason.contains("different revision lineage"));
        assert_eq!(
            store.get("gov.example", &key(1, 2).fingerprint()).unwrap().lineage,
            first.lineage
        );
    }

    #[tokio::test]
    async fn test_daily_stats() {
        let store = store();
        let first = store.upsert(submission(vec![key(1, 2)], None)).await.unwrap();
        let mut revision = submission(vec![key(2, 2)], Some(prior_of(&first)));
        revision.traveler = true;
        revision.symptom_onset_interval = None;
        revision.platform = ClientPlatform::Ios;
        store.upsert(revision).await.unwrap();

        let days = store.stats("gov.example").await.unwrap();
        assert_eq!(days.len(), 1);
        let day = &days[0];
        assert_eq!(day.day, NaiveDate::from_ymd_opt(2023, 11, 14).unwrap());
        assert_eq!(day.publish_requests.android, 1);
        assert_eq!(day.publish_requests.ios, 1);
        assert_eq!(day.total_teks_published, 2);
        assert_eq!(day.revision_requests, 1);
        assert_eq!(day.traveler_requests, 1);
        assert_eq!(day.missing_onset, 1);

        assert!(store.stats("gov.other").await.unwrap().is_empty());
    }
}
