//! OpenAPI document for the `/api/v1` management API and the WhatsApp webhook.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`. Handler paths
//! are declared relative to the router they are mounted on; [`api_doc`] nests them accordingly.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("API Key")
                    .description(Some(
                        "One of the keys configured under `auth.api_keys`:\n\n\
                        ```\nAuthorization: Bearer YOUR_API_KEY\n```",
                    ))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "campaignd",
        description = "WhatsApp campaign management: contacts, templates, campaigns, precheck and flows. \
                       Delivery statuses arrive through the WhatsApp webhook."
    ),
    paths(
        api::handlers::whatsapp_webhook::verify_webhook,
        api::handlers::whatsapp_webhook::receive_webhook,
    ),
    tags((name = "webhooks", description = "WhatsApp Cloud API callbacks"))
)]
struct RootApiDoc;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::contacts::list_contacts,
        api::handlers::contacts::create_contact,
        api::handlers::contacts::get_contact,
        api::handlers::contacts::update_contact,
        api::handlers::contacts::delete_contact,
        api::handlers::contacts::opt_out_contact,
        api::handlers::contacts::opt_in_contact,
        api::handlers::templates::list_templates,
        api::handlers::templates::create_template,
        api::handlers::templates::get_template,
        api::handlers::templates::delete_template,
        api::handlers::templates::sync_templates,
        api::handlers::templates::submit_template,
        api::handlers::campaigns::list_campaigns,
        api::handlers::campaigns::create_campaign,
        api::handlers::campaigns::get_campaign,
        api::handlers::campaigns::update_campaign,
        api::handlers::campaigns::delete_campaign,
        api::handlers::campaigns::list_recipients,
        api::handlers::campaigns::add_recipients,
        api::handlers::campaigns::precheck_campaign,
        api::handlers::campaigns::schedule_campaign,
        api::handlers::campaigns::unschedule_campaign,
        api::handlers::campaigns::start_campaign,
        api::handlers::campaigns::pause_campaign,
        api::handlers::campaigns::resume_campaign,
        api::handlers::campaigns::cancel_campaign,
        api::handlers::precheck::precheck_contacts,
        api::handlers::flows::list_flows,
        api::handlers::flows::create_flow,
        api::handlers::flows::get_flow,
        api::handlers::flows::update_flow,
        api::handlers::flows::delete_flow,
        api::handlers::flows::publish_flow,
        api::handlers::flows::list_submissions,
    ),
    components(schemas(
        api::models::contacts::ContactCreate,
        api::models::contacts::ContactUpdate,
        api::models::contacts::ContactResponse,
        api::models::templates::TemplateCreate,
        api::models::templates::TemplateResponse,
        api::models::templates::TemplateSyncResponse,
        api::models::campaigns::CampaignCreate,
        api::models::campaigns::CampaignUpdate,
        api::models::campaigns::CampaignCounters,
        api::models::campaigns::CampaignResponse,
        api::models::campaigns::ScheduleRequest,
        api::models::campaigns::PauseRequest,
        api::models::campaigns::AddRecipients,
        api::models::campaigns::AddRecipientsResponse,
        api::models::campaigns::RecipientResponse,
        api::models::precheck::AdhocPrecheckRequest,
        api::models::precheck::PrecheckResponse,
        api::models::flows::FlowCreate,
        api::models::flows::FlowUpdate,
        api::models::flows::FlowResponse,
        api::models::flows::FlowSubmissionResponse,
        crate::precheck::Binding,
        crate::precheck::BindingSource,
        crate::precheck::SkipCode,
        crate::precheck::SkipReason,
        crate::precheck::RecipientVerdict,
        crate::precheck::PrecheckSummary,
        crate::precheck::PrecheckReport,
        crate::precheck::batch_fix::FixItem,
        crate::db::models::campaigns::CampaignStatus,
        crate::db::models::contacts::OptInStatus,
        crate::db::models::flows::FlowStatus,
        crate::db::models::recipients::RecipientStatus,
        crate::db::models::templates::TemplateStatus,
        crate::db::models::templates::TemplateCategory,
    )),
    tags(
        (name = "contacts", description = "Contact book and opt-in state"),
        (name = "templates", description = "Message templates and their approval status"),
        (name = "campaigns", description = "Campaign lifecycle, recipients and precheck"),
        (name = "precheck", description = "Ad-hoc recipient validation"),
        (name = "flows", description = "WhatsApp Flow definitions and submissions"),
    )
)]
struct ManagementApiDoc;

/// The full document: webhook routes at the root, management routes under `/api/v1`.
pub fn api_doc() -> utoipa::openapi::OpenApi {
    let mut doc = RootApiDoc::openapi().nest("/api/v1", ManagementApiDoc::openapi());
    SecurityAddon.modify(&mut doc);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_operations_and_security() {
        let doc = api_doc();

        assert!(doc.paths.paths.contains_key("/api/v1/campaigns/{id}/start"));
        assert!(doc.paths.paths.contains_key("/api/v1/precheck"));
        assert!(doc.paths.paths.contains_key("/webhooks/whatsapp"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("BearerAuth"));
        assert!(components.schemas.contains_key("PrecheckReport"));
    }

    #[test]
    fn test_id_fields_are_uuid_strings() {
        let doc = serde_json::to_value(api_doc()).unwrap();
        let schemas = &doc["components"]["schemas"];

        for (schema, field) in [
            ("FixItem", "contact_id"),
            ("RecipientVerdict", "contact_id"),
            ("RecipientResponse", "contact_id"),
        ] {
            let property = &schemas[schema]["properties"][field];
            assert_eq!(property["type"], "string", "{schema}.{field}");
            assert_eq!(property["format"], "uuid", "{schema}.{field}");
        }

        let contact_ids = &schemas["AdhocPrecheckRequest"]["properties"]["contact_ids"];
        assert_eq!(contact_ids["type"], "array");
        assert_eq!(contact_ids["items"]["type"], "string");
    }
}
