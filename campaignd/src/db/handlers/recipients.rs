//! Database repository for campaign recipients (`campaign_contacts`).
//!
//! Besides membership, this is the dispatcher's work queue: rows are claimed with
//! `FOR UPDATE SKIP LOCKED`, and the claim pushes `next_attempt_at` forward by a crash-safety
//! window so a row left in `sending` by a dead process becomes claimable again.
//!
//! Status callbacks that beat the dispatcher to recording a message id are parked in
//! `parked_status_callbacks` and taken back once the send is recorded.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::db::{
    errors::Result,
    models::recipients::{
        ClaimedRecipient, ParkedCallback, Recipient, RecipientContact, RecipientCounts, RecipientFilter, RecipientStatus,
    },
};
use crate::types::{CampaignId, ContactId, RecipientId, abbrev_uuid};

pub struct Recipients<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Recipients<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Add contacts by id. Unknown ids and existing members are ignored; returns rows inserted.
    #[instrument(skip(self, contact_ids), fields(campaign_id = %abbrev_uuid(&campaign_id), count = contact_ids.len()), err)]
    pub async fn add_contacts(&mut self, campaign_id: CampaignId, contact_ids: &[ContactId]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_contacts (campaign_id, contact_id)
            SELECT $1, c.id FROM contacts c WHERE c.id = ANY($2)
            ON CONFLICT ON CONSTRAINT campaign_contacts_campaign_contact_unique DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(contact_ids)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Add every contact carrying `tag`. Opted-out contacts are added too; precheck skips them.
    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    pub async fn add_by_tag(&mut self, campaign_id: CampaignId, tag: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_contacts (campaign_id, contact_id)
            SELECT $1, c.id FROM contacts c WHERE $2 = ANY(c.tags)
            ON CONFLICT ON CONSTRAINT campaign_contacts_campaign_contact_unique DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(tag)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    fn push_filters(query: &mut QueryBuilder<'_, Postgres>, campaign_id: CampaignId, filter: &RecipientFilter) {
        query.push(" WHERE campaign_id = ");
        query.push_bind(campaign_id);
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }
    }

    #[instrument(skip(self, filter), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    pub async fn list(&mut self, campaign_id: CampaignId, filter: &RecipientFilter) -> Result<Vec<Recipient>> {
        let mut query = QueryBuilder::new("SELECT * FROM campaign_contacts");
        Self::push_filters(&mut query, campaign_id, filter);

        query.push(" ORDER BY created_at, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let recipients = query.build_query_as::<Recipient>().fetch_all(&mut *self.db).await?;
        Ok(recipients)
    }

    #[instrument(skip(self, filter), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    pub async fn count(&mut self, campaign_id: CampaignId, filter: &RecipientFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM campaign_contacts");
        Self::push_filters(&mut query, campaign_id, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    pub async fn counts(&mut self, campaign_id: CampaignId) -> Result<RecipientCounts> {
        let counts = sqlx::query_as::<_, RecipientCounts>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sending') AS sending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                COUNT(*) FILTER (WHERE status = 'read') AS read,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'skipped') AS skipped
            FROM campaign_contacts
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(counts)
    }

    /// Every recipient of a campaign joined with its contact, in insertion order.
    ///
    /// Order matters: on duplicate phones, precheck keeps the first row.
    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    pub async fn load_with_contacts(&mut self, campaign_id: CampaignId) -> Result<Vec<RecipientContact>> {
        let rows = sqlx::query_as::<_, RecipientContact>(
            r#"
            SELECT cc.id AS recipient_id, c.*
            FROM campaign_contacts cc
            JOIN contacts c ON c.id = cc.contact_id
            WHERE cc.campaign_id = $1
            ORDER BY cc.created_at, cc.id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows)
    }

    /// Mark pending recipients as skipped with their precheck code. Returns rows updated.
    #[instrument(skip(self, skips), fields(campaign_id = %abbrev_uuid(&campaign_id), count = skips.len()), err)]
    pub async fn apply_skips(&mut self, campaign_id: CampaignId, skips: &[(RecipientId, String)]) -> Result<u64> {
        if skips.is_empty() {
            return Ok(0);
        }
        let (ids, codes): (Vec<RecipientId>, Vec<String>) = skips.iter().cloned().unzip();

        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts cc
            SET status = 'skipped', skip_code = s.code, updated_at = now()
            FROM UNNEST($2::uuid[], $3::text[]) AS s(id, code)
            WHERE cc.id = s.id AND cc.campaign_id = $1 AND cc.status = 'pending'
            "#,
        )
        .bind(campaign_id)
        .bind(&ids)
        .bind(&codes)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim up to `limit` due recipients of sending campaigns and mark them `sending`.
    ///
    /// Rows stuck in `sending` past their claim window are reclaimed. Each claim moves
    /// `next_attempt_at` to `now + claim_timeout_secs`.
    #[instrument(skip(self), err)]
    pub async fn claim(&mut self, limit: i64, claim_timeout_secs: i64) -> Result<Vec<ClaimedRecipient>> {
        let claimed = sqlx::query_as::<_, ClaimedRecipient>(
            r#"
            WITH claimable AS (
                SELECT cc.id
                FROM campaign_contacts cc
                JOIN campaigns c ON c.id = cc.campaign_id
                WHERE c.status = 'sending'
                  AND cc.status IN ('pending', 'sending')
                  AND cc.next_attempt_at <= now()
                ORDER BY cc.next_attempt_at ASC
                LIMIT $1
                FOR UPDATE OF cc SKIP LOCKED
            )
            UPDATE campaign_contacts cc
            SET
                status = 'sending',
                next_attempt_at = now() + make_interval(secs => $2),
                updated_at = now()
            FROM claimable cl, contacts ct, campaigns c, templates t
            WHERE cc.id = cl.id
              AND ct.id = cc.contact_id
              AND c.id = cc.campaign_id
              AND t.id = c.template_id
            RETURNING
                cc.id AS recipient_id,
                cc.campaign_id,
                cc.attempt_count,
                t.name AS template_name,
                t.language AS template_language,
                t.components AS template_components,
                c.variable_bindings,
                ct.id,
                ct.phone,
                ct.name,
                ct.email,
                ct.opt_in_status,
                ct.tags,
                ct.custom_fields,
                ct.created_at,
                ct.updated_at
            "#,
        )
        .bind(limit)
        .bind(claim_timeout_secs as f64)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(claimed)
    }

    /// Record an accepted send. Returns false if the row was no longer in `sending`.
    #[instrument(skip(self), fields(recipient_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_sent(&mut self, id: RecipientId, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET
                status = 'sent',
                message_id = $2,
                sent_at = now(),
                attempt_count = attempt_count + 1,
                last_error_code = NULL,
                last_error = NULL,
                updated_at = now()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(message_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a recipient back in the queue after a retryable failure.
    #[instrument(skip(self, error), fields(recipient_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_retry(&mut self, id: RecipientId, error_code: Option<i32>, error: &str, delay_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET
                status = 'pending',
                attempt_count = attempt_count + 1,
                next_attempt_at = now() + make_interval(secs => $4),
                last_error_code = $2,
                last_error = $3,
                updated_at = now()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error)
        .bind(delay_secs as f64)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal send failure.
    #[instrument(skip(self, error), fields(recipient_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(&mut self, id: RecipientId, error_code: Option<i32>, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET
                status = 'failed',
                attempt_count = attempt_count + 1,
                failed_at = now(),
                last_error_code = $2,
                last_error = $3,
                updated_at = now()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Skip a claimed recipient whose contact stopped passing precheck after the campaign started.
    #[instrument(skip(self), fields(recipient_id = %abbrev_uuid(&id)), err)]
    pub async fn skip_claimed(&mut self, id: RecipientId, skip_code: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'skipped', skip_code = $2, updated_at = now()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(skip_code)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Return a claimed recipient to `pending` without counting an attempt.
    #[instrument(skip(self), fields(recipient_id = %abbrev_uuid(&id)), err)]
    pub async fn release(&mut self, id: RecipientId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'pending', next_attempt_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fold a delivery callback onto the row carrying `message_id`.
    ///
    /// The update only applies when the current status is a valid predecessor of `status`, so
    /// duplicates and out-of-order regressions match no row. Returns the campaign id when a row
    /// changed.
    #[instrument(skip(self, error), fields(status = status.as_str()), err)]
    pub async fn apply_callback(
        &mut self,
        message_id: &str,
        campaign_id: Option<CampaignId>,
        status: RecipientStatus,
        at: DateTime<Utc>,
        error_code: Option<i32>,
        error: Option<&str>,
    ) -> Result<Option<CampaignId>> {
        let sources: Vec<String> = status.callback_sources().iter().map(|s| s.as_str().to_string()).collect();
        if sources.is_empty() {
            return Ok(None);
        }

        let updated = sqlx::query_scalar::<_, CampaignId>(
            r#"
            UPDATE campaign_contacts
            SET
                status = $2::text,
                sent_at = COALESCE(sent_at, $3),
                delivered_at = CASE WHEN $2::text IN ('delivered', 'read') THEN COALESCE(delivered_at, $3) ELSE delivered_at END,
                read_at = CASE WHEN $2::text = 'read' THEN COALESCE(read_at, $3) ELSE read_at END,
                failed_at = CASE WHEN $2::text = 'failed' THEN $3 ELSE failed_at END,
                last_error_code = CASE WHEN $2::text = 'failed' THEN $4 ELSE last_error_code END,
                last_error = CASE WHEN $2::text = 'failed' THEN $5 ELSE last_error END,
                updated_at = now()
            WHERE message_id = $1
              AND ($6::uuid IS NULL OR campaign_id = $6)
              AND status = ANY($7)
            RETURNING campaign_id
            "#,
        )
        .bind(message_id)
        .bind(status.as_str())
        .bind(at)
        .bind(error_code)
        .bind(error)
        .bind(campaign_id)
        .bind(&sources)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(updated)
    }

    /// Hold a callback whose message id no recipient carries yet. Repeats of the same
    /// message and status are kept once.
    #[instrument(skip(self, error), fields(status = status.as_str()), err)]
    pub async fn park_callback(
        &mut self,
        message_id: &str,
        campaign_id: Option<CampaignId>,
        status: RecipientStatus,
        at: DateTime<Utc>,
        error_code: Option<i32>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parked_status_callbacks (message_id, status, campaign_id, occurred_at, error_code, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (message_id, status) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(status.as_str())
        .bind(campaign_id)
        .bind(at)
        .bind(error_code)
        .bind(error)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Remove and return the parked callbacks for `message_id`, oldest event first.
    #[instrument(skip(self), err)]
    pub async fn take_parked(&mut self, message_id: &str) -> Result<Vec<ParkedCallback>> {
        let mut parked = sqlx::query_as::<_, ParkedCallback>(
            "DELETE FROM parked_status_callbacks WHERE message_id = $1 RETURNING *",
        )
        .bind(message_id)
        .fetch_all(&mut *self.db)
        .await?;

        parked.sort_by_key(|p| p.occurred_at);
        Ok(parked)
    }

    /// Message ids with parked callbacks that a recipient now carries.
    #[instrument(skip(self), err)]
    pub async fn parked_with_recipient(&mut self, limit: i64) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.message_id
            FROM parked_status_callbacks p
            JOIN campaign_contacts cc ON cc.message_id = p.message_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(ids)
    }

    /// Drop parked callbacks received more than `retention_secs` ago. Returns rows deleted.
    #[instrument(skip(self), err)]
    pub async fn prune_parked(&mut self, retention_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM parked_status_callbacks WHERE received_at < now() - make_interval(secs => $1)",
        )
        .bind(retention_secs as f64)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_message_id(&mut self, message_id: &str) -> Result<Option<Recipient>> {
        let recipient = sqlx::query_as::<_, Recipient>("SELECT * FROM campaign_contacts WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(recipient)
    }
}
