use anyhow::{Context, Result};
use pharos_migrate_core::{
    Destination, FileBundle, InstitutionRecord, MigrateError, NewChecksum, NewEvent, NewFile,
    NewId, NewObject, NewUser, NewWorkItem, NewWorkItemState, ResolvedInstitution,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::transport::{Body, HttpResponse, Method, Request, Transport};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_API_USER: &str = "system@aptrust.org";

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RestConfig {
    pub base_url: String,
    pub api_user: String,
    pub api_key: String,
}

impl RestConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_user: DEFAULT_API_USER.to_string(),
            api_key: api_key.into(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct InstitutionList {
    results: Vec<ListedInstitution>,
}

#[derive(Debug, Deserialize)]
struct ListedInstitution {
    id: i64,
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i64,
}

#[derive(Serialize)]
struct FilePayload<'a> {
    #[serde(flatten)]
    file: &'a NewFile,
    checksums_attributes: &'a [NewChecksum],
    premis_events_attributes: &'a [NewEvent],
}

/// Destination that writes through the Pharos REST API. Every call must
/// return its documented status; anything else aborts the run.
pub struct RestSink<T> {
    transport: T,
    config: RestConfig,
}

impl<T: Transport> RestSink<T> {
    pub fn new(transport: T, config: RestConfig) -> Self {
        Self { transport, config }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("X-Pharos-API-User".to_string(), self.config.api_user.clone()),
            ("X-Pharos-API-Key".to_string(), self.config.api_key.clone()),
        ]
    }

    fn exchange(
        &self,
        method: Method,
        path: &str,
        body: Body,
        expected: u16,
        record: &str,
    ) -> Result<HttpResponse> {
        let request =
            Request { method, url: self.config.api_url(path), headers: self.headers(), body };
        debug!(method = method.as_str(), url = %request.url, record, "sending request");
        let response = self.transport.send(&request)?;
        if response.status != expected {
            error!(
                record,
                url = %request.url,
                status = response.status,
                body = %response.body,
                "destination rejected record"
            );
            return Err(MigrateError::UnexpectedStatus {
                record: record.to_string(),
                expected,
                status: response.status,
                body: response.body,
            }
            .into());
        }
        Ok(response)
    }

    fn post_json_for_id(
        &self,
        path: &str,
        payload: &impl Serialize,
        record: &str,
    ) -> Result<NewId> {
        let payload = serde_json::to_value(payload)
            .with_context(|| format!("failed to encode {record}"))?;
        let response =
            self.exchange(Method::Post, path, Body::Json(payload), STATUS_CREATED, record)?;
        parse_created(&response, record)
    }
}

fn parse_created(response: &HttpResponse, record: &str) -> Result<NewId> {
    let created: Created = serde_json::from_str(&response.body)
        .with_context(|| format!("failed to decode id returned for {record}"))?;
    Ok(NewId(created.id))
}

/// Flatten an object into `intellectual_object[field]` form pairs,
/// leaving out absent fields.
fn object_form(object: &NewObject) -> Result<Vec<(String, String)>> {
    let Value::Object(fields) = serde_json::to_value(object)? else {
        return Ok(Vec::new());
    };
    Ok(fields
        .into_iter()
        .filter_map(|(field, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(text) => text,
                other => other.to_string(),
            };
            Some((format!("intellectual_object[{field}]"), value))
        })
        .collect())
}

impl<T: Transport> Destination for RestSink<T> {
    fn name(&self) -> &'static str {
        "rest"
    }

    /// Institutions are never created over the API; they are listed and
    /// matched to the legacy rows by identifier.
    fn resolve_institutions(
        &mut self,
        institutions: &[InstitutionRecord],
    ) -> Result<Vec<ResolvedInstitution>> {
        let response =
            self.exchange(Method::Get, "/institutions", Body::Empty, STATUS_OK, "institutions")?;
        let listed: InstitutionList = serde_json::from_str(&response.body)
            .context("failed to decode institution listing")?;

        let mut resolved = Vec::new();
        for record in institutions {
            match listed.results.iter().find(|listed| listed.identifier == record.identifier) {
                Some(listed) => {
                    info!(identifier = %listed.identifier, id = listed.id, "matched institution");
                    resolved.push(ResolvedInstitution {
                        old_id: record.old_id.clone(),
                        identifier: record.identifier.clone(),
                        new_id: NewId(listed.id),
                    });
                }
                None => warn!(
                    identifier = %record.identifier,
                    old_id = %record.old_id,
                    "institution does not exist in destination"
                ),
            }
        }
        Ok(resolved)
    }

    fn create_users(&mut self, users: &[NewUser]) -> Result<usize> {
        info!(count = users.len(), "the REST API has no user import endpoint; skipping users");
        Ok(0)
    }

    fn create_object(&mut self, institution: &str, object: &NewObject) -> Result<NewId> {
        let form = object_form(object).with_context(|| {
            format!("failed to encode intellectual object {}", object.identifier)
        })?;
        let response = self.exchange(
            Method::Post,
            &format!("/objects/{institution}.json"),
            Body::Form(form),
            STATUS_CREATED,
            &object.identifier,
        )?;
        parse_created(&response, &object.identifier)
    }

    fn create_files(&mut self, object_id: NewId, files: &[FileBundle]) -> Result<Vec<NewId>> {
        let Some(first) = files.first() else {
            return Ok(Vec::new());
        };
        let record = format!("{} files {}...", files.len(), first.file.identifier);
        let payload = files
            .iter()
            .map(|bundle| FilePayload {
                file: &bundle.file,
                checksums_attributes: &bundle.checksums,
                premis_events_attributes: &bundle.events,
            })
            .collect::<Vec<_>>();
        let payload = serde_json::to_value(&payload)
            .with_context(|| format!("failed to encode {record}"))?;
        let response = self.exchange(
            Method::Post,
            &format!("/files/{object_id}/create_batch"),
            Body::Json(payload),
            STATUS_CREATED,
            &record,
        )?;

        let created: Vec<Created> = serde_json::from_str(&response.body)
            .with_context(|| format!("failed to decode ids returned for {record}"))?;
        if created.len() != files.len() {
            return Err(MigrateError::Validation(format!(
                "create_batch returned {} files for {record}",
                created.len()
            ))
            .into());
        }
        Ok(created.into_iter().map(|file| NewId(file.id)).collect())
    }

    fn create_events(&mut self, events: &[NewEvent]) -> Result<usize> {
        for event in events {
            let id = self.post_json_for_id("/events", event, &event.identifier)?;
            debug!(
                event_type = %event.event_type,
                identifier = %event.identifier,
                %id,
                "saved event"
            );
        }
        Ok(events.len())
    }

    fn create_work_item(&mut self, item: &NewWorkItem) -> Result<NewId> {
        let record = format!("work item {}", item.name.as_deref().unwrap_or_default());
        self.post_json_for_id("/items", item, &record)
    }

    fn create_work_item_state(&mut self, state: &NewWorkItemState) -> Result<NewId> {
        let record = format!("state of work item {}", state.work_item_id);
        self.post_json_for_id("/item_state", state, &record)
    }
}
