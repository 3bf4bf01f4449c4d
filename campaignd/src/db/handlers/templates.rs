//! Database repository for message templates.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::templates::{Template, TemplateCreateDBRequest, TemplateFilter, TemplateStatus},
};
use crate::types::{TemplateId, abbrev_uuid};

/// Partial update, used when Meta reports back on a submitted template.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdateDBRequest {
    pub status: Option<TemplateStatus>,
    pub external_id: Option<String>,
    pub components: Option<serde_json::Value>,
}

pub struct Templates<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Templates<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert or refresh a template by `(name, language)`. Returns the stored row.
    #[instrument(skip(self, request), fields(name = %request.name, language = %request.language), err)]
    pub async fn upsert(&mut self, request: &TemplateCreateDBRequest) -> Result<Template> {
        let template = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (name, language, category, status, components, external_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT templates_name_language_unique DO UPDATE
            SET
                category = EXCLUDED.category,
                status = EXCLUDED.status,
                components = EXCLUDED.components,
                external_id = COALESCE(EXCLUDED.external_id, templates.external_id),
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.language)
        .bind(request.category.as_str())
        .bind(request.status.as_str())
        .bind(&request.components)
        .bind(&request.external_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(template)
    }

    /// Whether any campaign still references the template.
    #[instrument(skip(self), fields(template_id = %abbrev_uuid(&id)), err)]
    pub async fn is_in_use(&mut self, id: TemplateId) -> Result<bool> {
        let in_use: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM campaigns WHERE template_id = $1)")
            .bind(id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(in_use)
    }

    fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &TemplateFilter) {
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Templates<'c> {
    type CreateRequest = TemplateCreateDBRequest;
    type UpdateRequest = TemplateUpdateDBRequest;
    type Response = Template;
    type Id = TemplateId;
    type Filter = TemplateFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let template = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (name, language, category, status, components, external_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.language)
        .bind(request.category.as_str())
        .bind(request.status.as_str())
        .bind(&request.components)
        .bind(&request.external_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(template)
    }

    #[instrument(skip(self), fields(template_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let template = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(template)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new("SELECT * FROM templates WHERE 1=1");
        Self::push_filters(&mut query, filter);

        query.push(" ORDER BY name, language LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let templates = query.build_query_as::<Template>().fetch_all(&mut *self.db).await?;
        Ok(templates)
    }

    #[instrument(skip(self, filter), err)]
    async fn count(&mut self, filter: &Self::Filter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM templates WHERE 1=1");
        Self::push_filters(&mut query, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    #[instrument(skip(self, request), fields(template_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let template = sqlx::query_as::<_, Template>(
            r#"
            UPDATE templates
            SET
                status = COALESCE($2, status),
                external_id = COALESCE($3, external_id),
                components = COALESCE($4, components),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.status.map(|s| s.as_str()))
        .bind(&request.external_id)
        .bind(&request.components)
        .fetch_optional(&mut *self.db)
        .await?;

        template.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(template_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::db::models::templates::TemplateCategory;
    use serde_json::json;
    use sqlx::PgPool;

    fn request(status: TemplateStatus) -> TemplateCreateDBRequest {
        TemplateCreateDBRequest {
            name: "spring_sale".to_string(),
            language: "en_US".to_string(),
            category: TemplateCategory::Marketing,
            status,
            components: json!([{"type": "BODY", "text": "Hi {{1}}"}]),
            external_id: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_refreshes_existing(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Templates::new(&mut conn);

        let first = repo.create(&request(TemplateStatus::Pending)).await.unwrap();

        let mut synced = request(TemplateStatus::Approved);
        synced.external_id = Some("1234567890".to_string());
        let second = repo.upsert(&synced).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.template_status(), TemplateStatus::Approved);
        assert_eq!(second.external_id.as_deref(), Some("1234567890"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_name_language_rejected(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Templates::new(&mut conn);

        repo.create(&request(TemplateStatus::Draft)).await.unwrap();
        let err = repo.create(&request(TemplateStatus::Draft)).await.unwrap_err();

        assert!(matches!(
            err,
            DbError::UniqueViolation { constraint: Some(ref c), .. } if c == "templates_name_language_unique"
        ));
    }
}
