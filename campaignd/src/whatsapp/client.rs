//! WhatsApp Cloud API client.

use reqwest::Response;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::instrument;

use super::errors::{ClientError, GraphError};
use super::payloads::{CreateTemplate, TemplateMessage};
use crate::config::WhatsAppConfig;
use crate::types::mask_phone;

/// Upper bound on template pages followed by [`WhatsAppClient::list_templates`].
const MAX_TEMPLATE_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

/// A template as listed by the business account.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteTemplate {
    pub id: String,
    pub name: String,
    pub language: String,
    pub status: String,
    pub category: String,
    #[serde(default)]
    pub components: Value,
}

#[derive(Debug, Deserialize)]
struct TemplatePage {
    data: Vec<RemoteTemplate>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedTemplate {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_root: String,
    phone_number_id: Option<String>,
    business_account_id: Option<String>,
    access_token: Option<String>,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            api_root: format!("{}/{}", config.base_url.as_str().trim_end_matches('/'), config.api_version),
            phone_number_id: config.phone_number_id.clone(),
            business_account_id: config.business_account_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.access_token.as_deref().ok_or(ClientError::NotConfigured("access token"))
    }

    fn phone_number_id(&self) -> Result<&str, ClientError> {
        self.phone_number_id.as_deref().ok_or(ClientError::NotConfigured("phone number id"))
    }

    fn business_account_id(&self) -> Result<&str, ClientError> {
        self.business_account_id
            .as_deref()
            .ok_or(ClientError::NotConfigured("business account id"))
    }

    /// Send a template message. Returns the `wamid` Meta assigned.
    #[instrument(skip(self, message), fields(to = %mask_phone(&message.to), template = %message.template.name), err)]
    pub async fn send_template(&self, message: &TemplateMessage) -> Result<String, ClientError> {
        let url = format!("{}/{}/messages", self.api_root, self.phone_number_id()?);
        let response = self.http.post(url).bearer_auth(self.token()?).json(message).send().await?;

        let sent: SendResponse = parse(response).await?;
        sent.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| ClientError::Decode("send response contained no message id".to_string()))
    }

    /// Every template on the business account, following `paging.next`.
    #[instrument(skip(self), err)]
    pub async fn list_templates(&self) -> Result<Vec<RemoteTemplate>, ClientError> {
        let token = self.token()?;
        let mut url = format!(
            "{}/{}/message_templates?limit=100&fields=id,name,language,status,category,components",
            self.api_root,
            self.business_account_id()?
        );
        let mut templates = vec![];

        for _ in 0..MAX_TEMPLATE_PAGES {
            let response = self.http.get(&url).bearer_auth(token).send().await?;
            let page: TemplatePage = parse(response).await?;
            templates.extend(page.data);

            match page.paging.and_then(|p| p.next) {
                Some(next) => url = next,
                None => return Ok(templates),
            }
        }

        tracing::warn!(pages = MAX_TEMPLATE_PAGES, "Stopped following template pages");
        Ok(templates)
    }

    #[instrument(skip(self, request), fields(name = %request.name, language = %request.language), err)]
    pub async fn create_template(&self, request: &CreateTemplate<'_>) -> Result<CreatedTemplate, ClientError> {
        let url = format!("{}/{}/message_templates", self.api_root, self.business_account_id()?);
        let response = self.http.post(url).bearer_auth(self.token()?).json(request).send().await?;
        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match GraphError::from_body(&body) {
            Some(graph) => ClientError::Api(graph),
            None => ClientError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            },
        });
    }

    serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::errors::SendErrorKind;
    use crate::whatsapp::payloads::template_message;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WhatsAppClient {
        let config = WhatsAppConfig {
            base_url: server.uri().parse().unwrap(),
            phone_number_id: Some("PHONE1".to_string()),
            business_account_id: Some("WABA1".to_string()),
            access_token: Some("token".to_string()),
            ..Default::default()
        };
        WhatsAppClient::new(&config).unwrap()
    }

    fn message() -> TemplateMessage {
        let components = json!([{"type": "BODY", "text": "Hi {{1}}"}]);
        let vars = BTreeMap::from([("body.1".to_string(), "Ada".to_string())]);
        template_message("+14155550123", "hello", "en", &components, &vars, Some("campaign".to_string()))
    }

    #[tokio::test]
    async fn test_send_template_returns_wamid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/PHONE1/messages"))
            .and(header("authorization", "Bearer token"))
            .and(body_partial_json(json!({"to": "14155550123", "template": {"name": "hello"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{"input": "14155550123", "wa_id": "14155550123"}],
                "messages": [{"id": "wamid.HBgL"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).send_template(&message()).await.unwrap();
        assert_eq!(id, "wamid.HBgL");
    }

    #[tokio::test]
    async fn test_send_template_graph_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "(#132001) Template name does not exist in the translation", "code": 132001}
            })))
            .mount(&server)
            .await;

        let err = client(&server).send_template(&message()).await.unwrap_err();
        assert!(matches!(&err, ClientError::Api(g) if g.code == 132001));
        assert_eq!(err.kind(), SendErrorKind::Template);
    }

    #[tokio::test]
    async fn test_send_template_plain_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client(&server).send_template(&message()).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));
        assert_eq!(err.kind(), SendErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let server = MockServer::start().await;
        let config = WhatsAppConfig {
            base_url: server.uri().parse().unwrap(),
            ..Default::default()
        };
        let client = WhatsAppClient::new(&config).unwrap();

        let err = client.send_template(&message()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_list_templates_follows_paging() {
        let server = MockServer::start().await;
        let next = format!("{}/v21.0/WABA1/message_templates?after=CURSOR", server.uri());

        Mock::given(method("GET"))
            .and(path("/v21.0/WABA1/message_templates"))
            .and(query_param("after", "CURSOR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "2", "name": "second", "language": "en", "status": "PENDING", "category": "UTILITY"}]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v21.0/WABA1/message_templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1", "name": "first", "language": "en_US", "status": "APPROVED", "category": "MARKETING",
                          "components": [{"type": "BODY", "text": "Hi"}]}],
                "paging": {"cursors": {"after": "CURSOR"}, "next": next}
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let templates = client(&server).list_templates().await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].name, "first");
        assert_eq!(templates[1].status, "PENDING");
        assert!(templates[1].components.is_null());
    }

    #[tokio::test]
    async fn test_create_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/WABA1/message_templates"))
            .and(body_partial_json(json!({"name": "promo", "category": "MARKETING"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9876", "status": "PENDING", "category": "MARKETING"})))
            .mount(&server)
            .await;

        let components = json!([{"type": "BODY", "text": "Sale!"}]);
        let created = client(&server)
            .create_template(&CreateTemplate {
                name: "promo",
                language: "en",
                category: "MARKETING",
                components: &components,
            })
            .await
            .unwrap();

        assert_eq!(created.id, "9876");
        assert_eq!(created.status, "PENDING");
    }
}
