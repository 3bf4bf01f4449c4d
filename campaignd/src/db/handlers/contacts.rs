//! Database repository for contacts.

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::contacts::{Contact, ContactCreateDBRequest, ContactFilter, ContactUpdateDBRequest, OptInStatus},
};
use crate::types::{ContactId, abbrev_uuid};

pub struct Contacts<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Contacts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Fetch several contacts at once, keyed by id. Unknown ids are absent from the map.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn get_bulk(&mut self, ids: &[ContactId]) -> Result<HashMap<ContactId, Contact>> {
        let contacts = sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(contacts.into_iter().map(|c| (c.id, c)).collect())
    }

    #[instrument(skip(self), fields(contact_id = %abbrev_uuid(&id), status = status.as_str()), err)]
    pub async fn set_opt_in(&mut self, id: ContactId, status: OptInStatus) -> Result<Contact> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
            SET opt_in_status = $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *self.db)
        .await?;

        contact.ok_or(DbError::NotFound)
    }

    fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &ContactFilter) {
        if let Some(tag) = &filter.tag {
            query.push(" AND ");
            query.push_bind(tag.clone());
            query.push(" = ANY(tags)");
        }

        if let Some(status) = filter.opt_in_status {
            query.push(" AND opt_in_status = ");
            query.push_bind(status.as_str());
        }

        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            query.push(" AND (name ILIKE ");
            query.push_bind(pattern.clone());
            query.push(" OR phone ILIKE ");
            query.push_bind(pattern);
            query.push(")");
        }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Contacts<'c> {
    type CreateRequest = ContactCreateDBRequest;
    type UpdateRequest = ContactUpdateDBRequest;
    type Response = Contact;
    type Id = ContactId;
    type Filter = ContactFilter;

    #[instrument(skip(self, request), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (phone, name, email, opt_in_status, tags, custom_fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&request.phone)
        .bind(&request.name)
        .bind(&request.email)
        .bind(request.opt_in_status.as_str())
        .bind(&request.tags)
        .bind(serde_json::Value::Object(request.custom_fields.clone()))
        .fetch_one(&mut *self.db)
        .await?;

        Ok(contact)
    }

    #[instrument(skip(self), fields(contact_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let contact = sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(contact)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new("SELECT * FROM contacts WHERE 1=1");
        Self::push_filters(&mut query, filter);

        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let contacts = query.build_query_as::<Contact>().fetch_all(&mut *self.db).await?;
        Ok(contacts)
    }

    #[instrument(skip(self, filter), err)]
    async fn count(&mut self, filter: &Self::Filter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM contacts WHERE 1=1");
        Self::push_filters(&mut query, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    #[instrument(skip(self, request), fields(contact_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
            SET
                phone = COALESCE($2, phone),
                name = CASE WHEN $3::boolean THEN $4 ELSE name END,
                email = CASE WHEN $5::boolean THEN $6 ELSE email END,
                tags = COALESCE($7, tags),
                custom_fields = (custom_fields || $8::jsonb) - $9::text[],
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.phone)
        .bind(request.name.is_some())
        .bind(request.name.clone().flatten())
        .bind(request.email.is_some())
        .bind(request.email.clone().flatten())
        .bind(&request.tags)
        .bind(serde_json::Value::Object(request.custom_fields_set.clone()))
        .bind(&request.custom_fields_remove)
        .fetch_optional(&mut *self.db)
        .await?;

        contact.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(contact_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
