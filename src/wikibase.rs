use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{Credentials, PropertyMap};
use crate::domain::{Claim, ClaimValue, EntityId, Property, ValueKind};
use crate::error::KiraError;
use crate::store::{EntityHandle, EntityStore};

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;
const MAXLAG_SECONDS: &str = "5";

pub struct WikibaseHttpClient {
    client: Client,
    api_url: String,
    properties: PropertyMap,
    credentials: Option<Credentials>,
    csrf_token: Mutex<Option<String>>,
}

impl WikibaseHttpClient {
    pub fn new(
        api_url: &str,
        properties: PropertyMap,
        credentials: Option<Credentials>,
    ) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-kbe/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::WikibaseHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::WikibaseHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            properties,
            credentials,
            csrf_token: Mutex::new(None),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, KiraError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::WikibaseHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_response(response: Response) -> Result<Value, KiraError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "knowledge base request failed".to_string());
            return Err(KiraError::WikibaseStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| KiraError::WikibaseHttp(err.to_string()))?;
        check_api_error(&body)?;
        Ok(body)
    }

    fn get(&self, params: &[(&str, &str)]) -> Result<Value, KiraError> {
        let response = self.send_with_retries(|| {
            self.client
                .get(&self.api_url)
                .query(&[("format", "json"), ("formatversion", "2")])
                .query(params)
        })?;
        Self::handle_response(response)
    }

    fn post(&self, params: &[(&str, String)]) -> Result<Value, KiraError> {
        let response = self.send_with_retries(|| {
            self.client
                .post(&self.api_url)
                .query(&[("format", "json"), ("formatversion", "2")])
                .form(params)
        })?;
        Self::handle_response(response)
    }

    fn post_once(&self, params: &[(&str, String)]) -> Result<Value, KiraError> {
        let response = self
            .client
            .post(&self.api_url)
            .query(&[("format", "json"), ("formatversion", "2")])
            .form(params)
            .send()
            .map_err(|err| {
                KiraError::StoreWrite(format!("edit may or may not have been applied: {err}"))
            })?;
        Self::handle_response(response)
    }

    fn login(&self) -> Result<String, KiraError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            KiraError::WikibaseLogin(
                "WIKIBASE_USERNAME and WIKIBASE_PASSWORD must be set for live writes".to_string(),
            )
        })?;

        let body = self.get(&[("action", "query"), ("meta", "tokens"), ("type", "login")])?;
        let login_token = token(&body, "logintoken")?;

        let body = self.post(&[
            ("action", "login".to_string()),
            ("lgname", credentials.username.clone()),
            ("lgpassword", credentials.password.clone()),
            ("lgtoken", login_token),
        ])?;
        let result = body
            .get("login")
            .and_then(|value| value.get("result"))
            .and_then(|value| value.as_str())
            .unwrap_or("missing result");
        if result != "Success" {
            let reason = body
                .get("login")
                .and_then(|value| value.get("reason"))
                .and_then(|value| value.as_str())
                .unwrap_or(result);
            return Err(KiraError::WikibaseLogin(reason.to_string()));
        }
        info!(user = %credentials.username, "logged in to knowledge base");

        let body = self.get(&[("action", "query"), ("meta", "tokens")])?;
        token(&body, "csrftoken")
    }

    fn csrf_token(&self) -> Result<String, KiraError> {
        let mut guard = self
            .csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login()?;
        *guard = Some(token.clone());
        Ok(token)
    }

    fn forget_session(&self) {
        let mut guard = self
            .csrf_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    /// Sends a write action once. Only refusals that prove nothing was applied
    /// are resent; a lost reply is not.
    fn edit(&self, action: &str, params: Vec<(&'static str, String)>) -> Result<Value, KiraError> {
        let mut session_renewed = false;
        let mut lag_waits = 0usize;
        loop {
            let mut form = params.clone();
            form.push(("action", action.to_string()));
            form.push(("token", self.csrf_token()?));
            form.push(("assert", "user".to_string()));
            form.push(("maxlag", MAXLAG_SECONDS.to_string()));

            match self.post_once(&form) {
                Err(KiraError::WikibaseApi { code, .. })
                    if !session_renewed && matches!(code.as_str(), "badtoken" | "assertuserfailed") =>
                {
                    warn!(action, code = %code, "knowledge base session expired, logging in again");
                    self.forget_session();
                    session_renewed = true;
                }
                Err(KiraError::WikibaseApi { code, info }) if code == "maxlag" => {
                    if lag_waits >= MAX_RETRIES {
                        return Err(KiraError::WikibaseApi { code, info });
                    }
                    lag_waits += 1;
                    warn!(action, info = %info, "knowledge base is lagged, waiting");
                    thread::sleep(Duration::from_secs(5 * lag_waits as u64));
                }
                other => return other,
            }
        }
    }

    fn fetch_entity(&self, id: &EntityId, props: &str) -> Result<Value, KiraError> {
        let body = self.get(&[
            ("action", "wbgetentities"),
            ("ids", id.as_str()),
            ("props", props),
        ])?;
        entity_from_response(&body, id).cloned()
    }
}

fn existing(handle: &EntityHandle) -> Result<&EntityId, KiraError> {
    handle
        .id()
        .ok_or_else(|| KiraError::StoreWrite(format!("{handle} is not a stored entity")))
}

impl EntityStore for WikibaseHttpClient {
    fn create_entity(&self) -> Result<EntityHandle, KiraError> {
        let body = self.edit(
            "wbeditentity",
            vec![
                ("new", "item".to_string()),
                ("data", "{}".to_string()),
                ("summary", "Creating new item".to_string()),
            ],
        )?;
        let id = body
            .get("entity")
            .and_then(|value| value.get("id"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| KiraError::StoreWrite("created item has no id".to_string()))?;
        let id: EntityId = id.parse()?;
        info!(entity = %id, "created item");
        Ok(EntityHandle::Existing(id))
    }

    fn resolve_handle(&self, id: &EntityId) -> Result<EntityHandle, KiraError> {
        self.fetch_entity(id, "info")?;
        Ok(EntityHandle::Existing(id.clone()))
    }

    fn set_label(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
    ) -> Result<(), KiraError> {
        let id = existing(handle)?;
        self.edit(
            "wbsetlabel",
            vec![
                ("id", id.to_string()),
                ("language", language.to_string()),
                ("value", value.to_string()),
                ("summary", "Setting new label".to_string()),
            ],
        )?;
        Ok(())
    }

    fn get_descriptions(&self, handle: &EntityHandle) -> Result<BTreeMap<String, String>, KiraError> {
        let entity = self.fetch_entity(existing(handle)?, "descriptions")?;
        Ok(parse_descriptions(&entity))
    }

    fn set_description(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
        summary: &str,
    ) -> Result<(), KiraError> {
        let id = existing(handle)?;
        self.edit(
            "wbsetdescription",
            vec![
                ("id", id.to_string()),
                ("language", language.to_string()),
                ("value", value.to_string()),
                ("summary", summary.to_string()),
            ],
        )?;
        Ok(())
    }

    fn get_aliases(
        &self,
        handle: &EntityHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
        let entity = self.fetch_entity(existing(handle)?, "aliases")?;
        Ok(parse_aliases(&entity))
    }

    fn set_aliases(
        &self,
        handle: &EntityHandle,
        language: &str,
        aliases: &[String],
        summary: &str,
    ) -> Result<(), KiraError> {
        let id = existing(handle)?;
        self.edit(
            "wbsetaliases",
            vec![
                ("id", id.to_string()),
                ("language", language.to_string()),
                ("set", multi_value(aliases)),
                ("summary", summary.to_string()),
            ],
        )?;
        Ok(())
    }

    fn get_claims(
        &self,
        handle: &EntityHandle,
        property: Property,
    ) -> Result<Vec<Claim>, KiraError> {
        let entity = self.fetch_entity(existing(handle)?, "claims")?;
        Ok(parse_claims(
            &entity,
            property,
            self.properties.id(property),
        ))
    }

    fn add_claim(
        &self,
        handle: &EntityHandle,
        claim: &Claim,
        summary: &str,
    ) -> Result<(), KiraError> {
        let id = existing(handle)?;
        let property_id = self.properties.id(claim.property);
        let value = snak_value_json(&claim.value)?;
        debug!(entity = %id, property = %property_id, value = %claim.value, "creating claim");
        self.edit(
            "wbcreateclaim",
            vec![
                ("entity", id.to_string()),
                ("property", property_id.to_string()),
                ("snaktype", "value".to_string()),
                ("value", value),
                ("summary", summary.to_string()),
            ],
        )?;
        Ok(())
    }
}

pub fn check_api_error(body: &Value) -> Result<(), KiraError> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let code = error
        .get("code")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown")
        .to_string();
    let info = error
        .get("info")
        .and_then(|value| value.as_str())
        .unwrap_or("no details")
        .to_string();
    Err(KiraError::WikibaseApi { code, info })
}

fn token(body: &Value, name: &str) -> Result<String, KiraError> {
    body.get("query")
        .and_then(|value| value.get("tokens"))
        .and_then(|value| value.get(name))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
        .ok_or_else(|| KiraError::WikibaseLogin(format!("no {name} in response")))
}

pub fn entity_from_response<'a>(body: &'a Value, id: &EntityId) -> Result<&'a Value, KiraError> {
    let entity = body
        .get("entities")
        .and_then(|value| value.get(id.as_str()))
        .ok_or_else(|| KiraError::EntityNotFound(id.to_string()))?;
    if entity.get("missing").is_some() {
        return Err(KiraError::EntityNotFound(id.to_string()));
    }
    Ok(entity)
}

pub fn parse_descriptions(entity: &Value) -> BTreeMap<String, String> {
    let mut descriptions = BTreeMap::new();
    if let Some(map) = entity.get("descriptions").and_then(|value| value.as_object()) {
        for (language, term) in map {
            if let Some(value) = term.get("value").and_then(|value| value.as_str()) {
                descriptions.insert(language.clone(), value.to_string());
            }
        }
    }
    descriptions
}

pub fn parse_aliases(entity: &Value) -> BTreeMap<String, Vec<String>> {
    let mut aliases = BTreeMap::new();
    if let Some(map) = entity.get("aliases").and_then(|value| value.as_object()) {
        for (language, terms) in map {
            let values: Vec<String> = terms
                .as_array()
                .map(|terms| {
                    terms
                        .iter()
                        .filter_map(|term| term.get("value").and_then(|value| value.as_str()))
                        .map(|value| value.to_string())
                        .collect()
                })
                .unwrap_or_default();
            aliases.insert(language.clone(), values);
        }
    }
    aliases
}

pub fn parse_claims(entity: &Value, property: Property, property_id: &str) -> Vec<Claim> {
    let Some(statements) = entity
        .get("claims")
        .and_then(|value| value.get(property_id))
        .and_then(|value| value.as_array())
    else {
        return Vec::new();
    };

    let mut claims = Vec::new();
    for statement in statements {
        let Some(snak) = statement.get("mainsnak") else {
            continue;
        };
        if snak.get("snaktype").and_then(|value| value.as_str()) != Some("value") {
            continue;
        }
        let Some(datavalue) = snak.get("datavalue") else {
            continue;
        };
        let value = match datavalue.get("type").and_then(|value| value.as_str()) {
            Some("wikibase-entityid") => datavalue
                .get("value")
                .and_then(|value| value.get("id"))
                .and_then(|value| value.as_str())
                .and_then(|value| value.parse::<EntityId>().ok())
                .map(ClaimValue::Item),
            Some("string") => datavalue
                .get("value")
                .and_then(|value| value.as_str())
                .map(|value| match property.value_kind() {
                    ValueKind::ExternalId => ClaimValue::ExternalId(value.to_string()),
                    _ => ClaimValue::String(value.to_string()),
                }),
            _ => None,
        };
        if let Some(value) = value {
            claims.push(Claim::new(property, value));
        }
    }
    claims
}

pub fn snak_value_json(value: &ClaimValue) -> Result<String, KiraError> {
    match value {
        ClaimValue::Item(id) => Ok(json!({
            "entity-type": "item",
            "numeric-id": id.numeric_id(),
            "id": id.as_str(),
        })
        .to_string()),
        ClaimValue::String(text) | ClaimValue::ExternalId(text) => Ok(json!(text).to_string()),
        ClaimValue::PendingItem(_) => Err(KiraError::StoreWrite(format!(
            "{value} is not a stored entity"
        ))),
    }
}

pub fn multi_value(values: &[String]) -> String {
    if values.iter().any(|value| value.contains('|')) {
        format!("\u{1f}{}", values.join("\u{1f}"))
    } else {
        values.join("|")
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn entity_fixture() -> Value {
        json!({
            "entities": {
                "Q1234": {
                    "id": "Q1234",
                    "descriptions": {"en": {"language": "en", "value": "bacterial strain"}},
                    "aliases": {"en": [{"language": "en", "value": "K-12"}]},
                    "claims": {
                        "P31": [
                            {"mainsnak": {"snaktype": "value", "property": "P31",
                                "datavalue": {"type": "wikibase-entityid",
                                    "value": {"entity-type": "item", "numeric-id": 855769, "id": "Q855769"}}}},
                            {"mainsnak": {"snaktype": "somevalue", "property": "P31"}}
                        ],
                        "P685": [
                            {"mainsnak": {"snaktype": "value", "property": "P685",
                                "datavalue": {"type": "string", "value": "562"}}}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn parses_terms_and_claims() {
        let body = entity_fixture();
        let id: EntityId = "Q1234".parse().unwrap();
        let entity = entity_from_response(&body, &id).unwrap();

        assert_eq!(
            parse_descriptions(entity).get("en").map(String::as_str),
            Some("bacterial strain")
        );
        assert_eq!(parse_aliases(entity)["en"], vec!["K-12".to_string()]);

        let claims = parse_claims(entity, Property::InstanceOf, "P31");
        assert_eq!(
            claims,
            vec![Claim::new(
                Property::InstanceOf,
                ClaimValue::Item("Q855769".parse().unwrap())
            )]
        );

        let claims = parse_claims(entity, Property::TaxonomyId, "P685");
        assert_eq!(claims[0].value, ClaimValue::ExternalId("562".to_string()));
        assert!(parse_claims(entity, Property::ParentTaxon, "P171").is_empty());
    }

    #[test]
    fn missing_entity_is_not_found() {
        let body = json!({"entities": {"Q9": {"id": "Q9", "missing": ""}}});
        let id: EntityId = "Q9".parse().unwrap();
        assert_matches!(
            entity_from_response(&body, &id),
            Err(KiraError::EntityNotFound(_))
        );
    }

    #[test]
    fn api_errors_are_surfaced() {
        let body = json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}});
        assert_matches!(
            check_api_error(&body),
            Err(KiraError::WikibaseApi { code, .. }) if code == "badtoken"
        );
        assert!(check_api_error(&json!({"success": 1})).is_ok());
    }

    #[test]
    fn snak_values() {
        let item = snak_value_json(&ClaimValue::Item("Q7187".parse().unwrap())).unwrap();
        let parsed: Value = serde_json::from_str(&item).unwrap();
        assert_eq!(parsed["numeric-id"], 7187);
        assert_eq!(parsed["entity-type"], "item");
        assert_eq!(
            snak_value_json(&ClaimValue::ExternalId("562".to_string())).unwrap(),
            "\"562\""
        );
        assert_matches!(
            snak_value_json(&ClaimValue::PendingItem(1)),
            Err(KiraError::StoreWrite(_))
        );
    }

    #[test]
    fn multi_value_separators() {
        assert_eq!(multi_value(&["K-12".to_string(), "MG1655".to_string()]), "K-12|MG1655");
        assert_eq!(multi_value(&["a|b".to_string()]), "\u{1f}a|b");
    }
}
