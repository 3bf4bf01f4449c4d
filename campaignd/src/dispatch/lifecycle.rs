//! Campaign start: precheck, skip, transition.
//!
//! Starting is shared by the API (`POST /campaigns/{id}/start`) and the dispatcher's promotion of
//! due scheduled campaigns. Both go through [`start_campaign`], which runs in one transaction so
//! the skips and the status change land together or not at all.

use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::handlers::{Campaigns, Recipients, Repository, Templates};
use crate::db::models::campaigns::{Campaign, CampaignStatus};
use crate::db::models::templates::Template;
use crate::errors::{Error, Result};
use crate::precheck::{self, Candidate, PrecheckReport};
use crate::types::{CampaignId, abbrev_uuid};

pub async fn load_campaign(conn: &mut PgConnection, id: CampaignId) -> Result<Campaign> {
    Campaigns::new(conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Campaign".to_string(),
        id: id.to_string(),
    })
}

/// 409 for a transition the campaign's current status does not allow.
pub fn conflict(campaign: &Campaign, action: &str) -> Error {
    Error::Conflict {
        message: format!("Cannot {action} campaign {} while it is {}", campaign.id, campaign.status),
    }
}

/// Precheck every recipient of a campaign. Read-only.
///
/// Fails with 400 when the template is not approved or the stored bindings are invalid.
#[instrument(skip(conn, campaign), fields(campaign_id = %abbrev_uuid(&campaign.id)), err)]
pub async fn precheck_campaign(
    conn: &mut PgConnection,
    campaign: &Campaign,
    default_country_code: Option<&str>,
) -> Result<(Template, PrecheckReport)> {
    let template = Templates::new(conn)
        .get_by_id(campaign.template_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Template".to_string(),
            id: campaign.template_id.to_string(),
        })?;
    precheck::ensure_sendable(&template).map_err(|message| Error::BadRequest { message })?;

    let bindings = precheck::parse_bindings(&campaign.variable_bindings).map_err(|e| Error::BadRequest {
        message: format!("Campaign variable bindings are invalid: {e}"),
    })?;
    precheck::validate_bindings(&bindings).map_err(|message| Error::BadRequest { message })?;

    let rows = Recipients::new(conn).load_with_contacts(campaign.id).await?;
    let candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| Candidate::from_contact(&row.contact, Some(row.recipient_id)))
        .collect();

    let report = precheck::evaluate(&template.components, &bindings, &candidates, default_country_code);
    Ok((template, report))
}

/// `draft | scheduled → sending`, after marking every failing recipient `skipped`.
#[instrument(skip(pool), fields(campaign_id = %abbrev_uuid(&id)), err)]
pub async fn start_campaign(pool: &PgPool, id: CampaignId, default_country_code: Option<&str>) -> Result<Campaign> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let campaign = load_campaign(&mut tx, id).await?;
    let status: CampaignStatus = campaign.campaign_status();
    if !status.can_transition_to(CampaignStatus::Sending) || status == CampaignStatus::Paused {
        return Err(conflict(&campaign, "start"));
    }

    let (_, report) = precheck_campaign(&mut tx, &campaign, default_country_code).await?;
    let skipped = Recipients::new(&mut tx).apply_skips(id, &report.skips()).await?;

    // Lost a race with another start or a cancel; rolling back undoes the skips
    let Some(_) = Campaigns::new(&mut tx).start(id).await? else {
        return Err(conflict(&campaign, "start"));
    };
    let campaign = Campaigns::new(&mut tx).refresh_counters(id).await?;

    tx.commit().await.map_err(DbError::from)?;

    tracing::info!(
        campaign_id = %id,
        total = report.summary.total,
        valid = report.summary.valid,
        skipped,
        "Campaign started"
    );
    Ok(campaign)
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::db::models::recipients::{RecipientFilter, RecipientStatus};
    use crate::test_utils::{create_test_campaign, create_test_contact, create_test_template};
    use serde_json::json;

    async fn campaign_with_recipients(pool: &PgPool, template_status: &str) -> (Campaign, usize) {
        let template = create_test_template(pool, template_status).await;
        let campaign = create_test_campaign(pool, template.id).await;
        let good = create_test_contact(pool, "+14155550100").await;
        let bad = create_test_contact(pool, "12").await;
        let dup = create_test_contact(pool, "+1 415 555 0100").await;

        let mut conn = pool.acquire().await.unwrap();
        Recipients::new(&mut conn)
            .add_contacts(campaign.id, &[good.id, bad.id, dup.id])
            .await
            .unwrap();
        (campaign, 3)
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_start_applies_skips_and_counts(pool: PgPool) {
        let (campaign, total) = campaign_with_recipients(&pool, "APPROVED").await;

        let started = start_campaign(&pool, campaign.id, None).await.unwrap();
        assert_eq!(started.campaign_status(), CampaignStatus::Sending);
        assert!(started.started_at.is_some());
        assert_eq!(started.total_count as usize, total);
        assert_eq!(started.skipped_count, 2);

        let mut conn = pool.acquire().await.unwrap();
        let skipped = Recipients::new(&mut conn)
            .list(
                campaign.id,
                &RecipientFilter {
                    skip: 0,
                    limit: 10,
                    status: Some(RecipientStatus::Skipped),
                },
            )
            .await
            .unwrap();
        let mut codes: Vec<_> = skipped.iter().filter_map(|r| r.skip_code.clone()).collect();
        codes.sort();
        assert_eq!(codes, vec!["duplicate_phone", "invalid_phone"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_start_twice_conflicts(pool: PgPool) {
        let (campaign, _) = campaign_with_recipients(&pool, "APPROVED").await;

        start_campaign(&pool, campaign.id, None).await.unwrap();
        let err = start_campaign(&pool, campaign.id, None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_start_requires_approved_template(pool: PgPool) {
        let (campaign, _) = campaign_with_recipients(&pool, "PENDING").await;

        let err = start_campaign(&pool, campaign.id, None).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        // Nothing was skipped or started
        let mut conn = pool.acquire().await.unwrap();
        let reloaded = load_campaign(&mut conn, campaign.id).await.unwrap();
        assert_eq!(reloaded.campaign_status(), CampaignStatus::Draft);
        assert_eq!(Recipients::new(&mut conn).counts(campaign.id).await.unwrap().skipped, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_bindings_rejected(pool: PgPool) {
        let (campaign, _) = campaign_with_recipients(&pool, "APPROVED").await;
        sqlx::query("UPDATE campaigns SET variable_bindings = $2 WHERE id = $1")
            .bind(campaign.id)
            .bind(json!({"body.1": {"source": "contact_field", "value": "nickname"}}))
            .execute(&pool)
            .await
            .unwrap();

        let err = start_campaign(&pool, campaign.id, None).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
