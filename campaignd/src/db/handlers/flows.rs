//! Database repository for WhatsApp Flows and their submissions.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::flows::{Flow, FlowCreateDBRequest, FlowStatus, FlowSubmission, FlowSubmissionCreateDBRequest, FlowUpdateDBRequest},
};
use crate::types::{FlowId, abbrev_uuid};

#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub skip: i64,
    pub limit: i64,
}

pub struct Flows<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Flows<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// `draft → published`. Returns `None` if the flow is missing or not a draft.
    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&id)), err)]
    pub async fn publish(&mut self, id: FlowId) -> Result<Option<Flow>> {
        let flow = sqlx::query_as::<_, Flow>(
            r#"
            UPDATE flows
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(FlowStatus::Published.as_str())
        .bind(FlowStatus::Draft.as_str())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(flow)
    }

    /// Store a submission. A redelivered webhook for the same message is a no-op returning `None`.
    #[instrument(skip(self, request), fields(message_id = %request.message_id), err)]
    pub async fn record_submission(&mut self, request: &FlowSubmissionCreateDBRequest) -> Result<Option<FlowSubmission>> {
        let submission = sqlx::query_as::<_, FlowSubmission>(
            r#"
            INSERT INTO flow_submissions (flow_id, contact_phone, flow_token, response, message_id)
            VALUES ((SELECT id FROM flows WHERE id = $1), $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT flow_submissions_message_id_unique DO NOTHING
            RETURNING *
            "#,
        )
        .bind(request.flow_id)
        .bind(&request.contact_phone)
        .bind(&request.flow_token)
        .bind(&request.response)
        .bind(&request.message_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(submission)
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&flow_id)), err)]
    pub async fn list_submissions(&mut self, flow_id: FlowId, skip: i64, limit: i64) -> Result<Vec<FlowSubmission>> {
        let submissions = sqlx::query_as::<_, FlowSubmission>(
            r#"
            SELECT * FROM flow_submissions
            WHERE flow_id = $1
            ORDER BY received_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(flow_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(submissions)
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&flow_id)), err)]
    pub async fn count_submissions(&mut self, flow_id: FlowId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flow_submissions WHERE flow_id = $1")
            .bind(flow_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Flows<'c> {
    type CreateRequest = FlowCreateDBRequest;
    type UpdateRequest = FlowUpdateDBRequest;
    type Response = Flow;
    type Id = FlowId;
    type Filter = FlowFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let flow = sqlx::query_as::<_, Flow>(
            r#"
            INSERT INTO flows (name, definition)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.definition)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(flow)
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let flow = sqlx::query_as::<_, Flow>("SELECT * FROM flows WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(flow)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let flows = sqlx::query_as::<_, Flow>("SELECT * FROM flows ORDER BY created_at DESC, id LIMIT $1 OFFSET $2")
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(flows)
    }

    #[instrument(skip(self, _filter), err)]
    async fn count(&mut self, _filter: &Self::Filter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flows")
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    /// Only drafts can change; published flows are immutable at Meta.
    /// Returns `NotFound` when the flow is missing or not a draft.
    #[instrument(skip(self, request), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let flow = sqlx::query_as::<_, Flow>(
            r#"
            UPDATE flows
            SET
                name = COALESCE($2, name),
                definition = COALESCE($3, definition),
                updated_at = now()
            WHERE id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.definition)
        .fetch_optional(&mut *self.db)
        .await?;

        flow.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_publish_then_update_rejected(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Flows::new(&mut conn);

        let flow = repo
            .create(&FlowCreateDBRequest {
                name: "signup".to_string(),
                definition: json!({"screens": [{"id": "A", "terminal": true}]}),
            })
            .await
            .unwrap();

        let published = repo.publish(flow.id).await.unwrap().unwrap();
        assert_eq!(published.flow_status(), FlowStatus::Published);
        assert!(repo.publish(flow.id).await.unwrap().is_none());

        let update = FlowUpdateDBRequest {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        assert!(matches!(repo.update(flow.id, &update).await, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_submission_dedup_and_unknown_flow(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Flows::new(&mut conn);

        let request = FlowSubmissionCreateDBRequest {
            flow_id: Some(uuid::Uuid::new_v4()),
            contact_phone: "14155550100".to_string(),
            flow_token: Some("unknown".to_string()),
            response: json!({"first_name": "Ada"}),
            message_id: "wamid.FLOW1".to_string(),
        };

        let stored = repo.record_submission(&request).await.unwrap().unwrap();
        assert_eq!(stored.flow_id, None);
        assert!(repo.record_submission(&request).await.unwrap().is_none());
    }
}
