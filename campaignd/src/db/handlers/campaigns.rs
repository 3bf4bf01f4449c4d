//! Database repository for campaigns.
//!
//! Lifecycle changes are conditional updates (`WHERE status = ANY(...)`), so two replicas or two
//! API calls racing on the same campaign cannot both win a transition. A `None` from a transition
//! method means the campaign is missing or was not in an allowed source state.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::campaigns::{Campaign, CampaignCreateDBRequest, CampaignFilter, CampaignStatus, CampaignUpdateDBRequest},
};
use crate::types::{CampaignId, abbrev_uuid};

const EDITABLE_STATUSES: &[&str] = &["draft", "scheduled", "cancelled"];

pub struct Campaigns<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Campaigns<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Move a campaign to `to` if its current status is in `from`.
    async fn transition(
        &mut self,
        id: CampaignId,
        to: CampaignStatus,
        from: &[CampaignStatus],
        scheduled_at: Option<DateTime<Utc>>,
        pause_reason: Option<&str>,
    ) -> Result<Option<Campaign>> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns
            SET
                status = $2::text,
                scheduled_at = CASE
                    WHEN $2::text = 'scheduled' THEN $4::timestamptz
                    WHEN $2::text = 'draft' THEN NULL
                    ELSE scheduled_at
                END,
                started_at = CASE WHEN $2::text = 'sending' THEN COALESCE(started_at, now()) ELSE started_at END,
                completed_at = CASE WHEN $2::text IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END,
                pause_reason = CASE WHEN $2::text = 'paused' THEN $5::text ELSE NULL END,
                updated_at = now()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(&from)
        .bind(scheduled_at)
        .bind(pause_reason)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(campaign)
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn schedule(&mut self, id: CampaignId, at: DateTime<Utc>) -> Result<Option<Campaign>> {
        self.transition(id, CampaignStatus::Scheduled, &[CampaignStatus::Draft], Some(at), None)
            .await
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn unschedule(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        self.transition(id, CampaignStatus::Draft, &[CampaignStatus::Scheduled], None, None)
            .await
    }

    /// `draft | scheduled → sending`. Precheck skips must be applied in the same transaction.
    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn start(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        self.transition(
            id,
            CampaignStatus::Sending,
            &[CampaignStatus::Draft, CampaignStatus::Scheduled],
            None,
            None,
        )
        .await
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn pause(&mut self, id: CampaignId, reason: &str) -> Result<Option<Campaign>> {
        self.transition(id, CampaignStatus::Paused, &[CampaignStatus::Sending], None, Some(reason))
            .await
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn resume(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        self.transition(id, CampaignStatus::Sending, &[CampaignStatus::Paused], None, None)
            .await
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn cancel(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        self.transition(
            id,
            CampaignStatus::Cancelled,
            &CampaignStatus::sources_of(CampaignStatus::Cancelled),
            None,
            None,
        )
        .await
    }

    /// Ids of scheduled campaigns whose start time has passed, oldest first.
    #[instrument(skip(self), err)]
    pub async fn list_due_scheduled(&mut self, limit: i64) -> Result<Vec<CampaignId>> {
        let ids = sqlx::query_scalar::<_, CampaignId>(
            r#"
            SELECT id FROM campaigns
            WHERE status = 'scheduled' AND scheduled_at <= now()
            ORDER BY scheduled_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(ids)
    }

    /// Those of `ids` that are no longer `sending` (paused, cancelled, finished or deleted).
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn halted_among(&mut self, ids: &[CampaignId]) -> Result<Vec<CampaignId>> {
        let halted = sqlx::query_scalar::<_, CampaignId>(
            r#"
            SELECT requested.id
            FROM UNNEST($1::uuid[]) AS requested(id)
            LEFT JOIN campaigns c ON c.id = requested.id
            WHERE c.status IS DISTINCT FROM 'sending'
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(halted)
    }

    /// Recompute the denormalized counters from `campaign_contacts`.
    ///
    /// `sent` counts every message accepted by WhatsApp (sent, delivered or read), and
    /// `delivered` includes read messages.
    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    pub async fn refresh_counters(&mut self, id: CampaignId) -> Result<Campaign> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns c
            SET
                total_count = s.total,
                sent_count = s.sent,
                delivered_count = s.delivered,
                read_count = s.read,
                failed_count = s.failed,
                skipped_count = s.skipped,
                updated_at = now()
            FROM (
                SELECT
                    COUNT(*)::int AS total,
                    COUNT(*) FILTER (WHERE status IN ('sent', 'delivered', 'read'))::int AS sent,
                    COUNT(*) FILTER (WHERE status IN ('delivered', 'read'))::int AS delivered,
                    COUNT(*) FILTER (WHERE status = 'read')::int AS read,
                    COUNT(*) FILTER (WHERE status = 'failed')::int AS failed,
                    COUNT(*) FILTER (WHERE status = 'skipped')::int AS skipped
                FROM campaign_contacts
                WHERE campaign_id = $1
            ) s
            WHERE c.id = $1
            RETURNING c.*
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        campaign.ok_or(DbError::NotFound)
    }

    /// Close every sending campaign that has no pending or in-flight recipients left.
    ///
    /// A campaign whose non-skipped recipients all failed ends `failed`; anything else, including
    /// a campaign where every recipient was skipped, ends `completed`.
    #[instrument(skip(self), err)]
    pub async fn finalize_finished(&mut self) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns c
            SET
                status = CASE
                    WHEN EXISTS (
                        SELECT 1 FROM campaign_contacts r
                        WHERE r.campaign_id = c.id AND r.status <> 'skipped'
                    ) AND NOT EXISTS (
                        SELECT 1 FROM campaign_contacts r
                        WHERE r.campaign_id = c.id AND r.status NOT IN ('skipped', 'failed')
                    ) THEN 'failed'
                    ELSE 'completed'
                END,
                completed_at = now(),
                updated_at = now()
            WHERE c.status = 'sending'
              AND NOT EXISTS (
                  SELECT 1 FROM campaign_contacts r
                  WHERE r.campaign_id = c.id AND r.status IN ('pending', 'sending')
              )
            RETURNING c.*
            "#,
        )
        .fetch_all(&mut *self.db)
        .await?;

        Ok(campaigns)
    }

    fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &CampaignFilter) {
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Campaigns<'c> {
    type CreateRequest = CampaignCreateDBRequest;
    type UpdateRequest = CampaignUpdateDBRequest;
    type Response = Campaign;
    type Id = CampaignId;
    type Filter = CampaignFilter;

    #[instrument(skip(self, request), fields(template_id = %abbrev_uuid(&request.template_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (name, template_id, variable_bindings)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(request.template_id)
        .bind(&request.variable_bindings)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(campaign)
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(campaign)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new("SELECT * FROM campaigns WHERE 1=1");
        Self::push_filters(&mut query, filter);

        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let campaigns = query.build_query_as::<Campaign>().fetch_all(&mut *self.db).await?;
        Ok(campaigns)
    }

    #[instrument(skip(self, filter), err)]
    async fn count(&mut self, filter: &Self::Filter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM campaigns WHERE 1=1");
        Self::push_filters(&mut query, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    /// Only campaigns that have not started (or were cancelled) can be edited.
    /// Returns `NotFound` when the campaign is missing or not editable.
    #[instrument(skip(self, request), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns
            SET
                name = COALESCE($2, name),
                template_id = COALESCE($3, template_id),
                variable_bindings = COALESCE($4, variable_bindings),
                updated_at = now()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(request.template_id)
        .bind(&request.variable_bindings)
        .bind(EDITABLE_STATUSES)
        .fetch_optional(&mut *self.db)
        .await?;

        campaign.ok_or(DbError::NotFound)
    }

    /// Deletes only editable campaigns; recipients cascade.
    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND status = ANY($2)")
            .bind(id)
            .bind(EDITABLE_STATUSES)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::db::handlers::Recipients;
    use crate::test_utils::{create_test_campaign, create_test_contact, create_test_template};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_lifecycle_guards(pool: PgPool) {
        let template = create_test_template(&pool, "APPROVED").await;
        let campaign = create_test_campaign(&pool, template.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Campaigns::new(&mut conn);

        // Cannot pause a draft
        assert!(repo.pause(campaign.id, "manual").await.unwrap().is_none());

        let scheduled = repo.schedule(campaign.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(scheduled.campaign_status(), CampaignStatus::Scheduled);
        assert!(scheduled.scheduled_at.is_some());

        let draft = repo.unschedule(campaign.id).await.unwrap().unwrap();
        assert_eq!(draft.campaign_status(), CampaignStatus::Draft);
        assert!(draft.scheduled_at.is_none());

        let sending = repo.start(campaign.id).await.unwrap().unwrap();
        assert!(sending.started_at.is_some());

        // A second start loses
        assert!(repo.start(campaign.id).await.unwrap().is_none());

        let paused = repo.pause(campaign.id, "auth error").await.unwrap().unwrap();
        assert_eq!(paused.pause_reason.as_deref(), Some("auth error"));

        let resumed = repo.resume(campaign.id).await.unwrap().unwrap();
        assert_eq!(resumed.campaign_status(), CampaignStatus::Sending);
        assert!(resumed.pause_reason.is_none());
        assert_eq!(resumed.started_at, sending.started_at);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_edit_and_delete_only_when_editable(pool: PgPool) {
        let template = create_test_template(&pool, "APPROVED").await;
        let campaign = create_test_campaign(&pool, template.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Campaigns::new(&mut conn);

        let update = CampaignUpdateDBRequest {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.update(campaign.id, &update).await.unwrap().name, "Renamed");

        repo.start(campaign.id).await.unwrap().unwrap();
        assert!(matches!(repo.update(campaign.id, &update).await, Err(DbError::NotFound)));
        assert!(!repo.delete(campaign.id).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_finalize_outcomes(pool: PgPool) {
        let template = create_test_template(&pool, "APPROVED").await;
        let all_failed = create_test_campaign(&pool, template.id).await;
        let mixed = create_test_campaign(&pool, template.id).await;
        let a = create_test_contact(&pool, "+14155550100").await;
        let b = create_test_contact(&pool, "+14155550101").await;

        let mut conn = pool.acquire().await.unwrap();
        for campaign in [&all_failed, &mixed] {
            Recipients::new(&mut conn)
                .add_contacts(campaign.id, &[a.id, b.id])
                .await
                .unwrap();
            Campaigns::new(&mut conn).start(campaign.id).await.unwrap().unwrap();
        }

        sqlx::query("UPDATE campaign_contacts SET status = 'failed' WHERE campaign_id = $1")
            .bind(all_failed.id)
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("UPDATE campaign_contacts SET status = CASE WHEN contact_id = $2 THEN 'skipped' ELSE 'delivered' END WHERE campaign_id = $1")
            .bind(mixed.id)
            .bind(a.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        let finalized = Campaigns::new(&mut conn).finalize_finished().await.unwrap();
        assert_eq!(finalized.len(), 2);

        let mut repo = Campaigns::new(&mut conn);
        let failed = repo.refresh_counters(all_failed.id).await.unwrap();
        assert_eq!(failed.campaign_status(), CampaignStatus::Failed);
        assert_eq!(failed.failed_count, 2);

        let completed = repo.refresh_counters(mixed.id).await.unwrap();
        assert_eq!(completed.campaign_status(), CampaignStatus::Completed);
        assert_eq!(completed.sent_count, 1);
        assert_eq!(completed.delivered_count, 1);
        assert_eq!(completed.skipped_count, 1);
        assert!(completed.completed_at.is_some());

        let counts = Recipients::new(&mut conn).counts(mixed.id).await.unwrap();
        assert_eq!(counts.delivered, 1);
        assert_eq!(counts.pending + counts.sending, 0);
    }
}
