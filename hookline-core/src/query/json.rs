//! Built-in executor for JSON subscription documents.
//!
//! ```json
//! {
//!   "operation": "subscription",
//!   "name": "ProjectEvents",
//!   "variables": ["projectId"],
//!   "observe": ["project:updated:{projectId}", "owner:{viewer}"],
//!   "where": { "/status": "open" },
//!   "select": { "id": "/id", "title": "/title" }
//! }
//! ```
//!
//! `observe` entries are channel templates. `{viewer}` resolves to the
//! owner the query runs as, any other placeholder to a declared variable.
//! An `owner:` channel may only name the viewer. `where` compares JSON
//! pointers against literal values and drops events that do not match.
//! `select` builds the emitted object from JSON pointers into the event; a
//! pointer missing from an event fails that emission only.

use super::{
    EmissionError, ExecutionRequest, OperationInfo, PreparationError, QueryExecutor,
    ResultStream, Viewer,
};
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SUBSCRIPTION: &str = "subscription";
const VIEWER_PLACEHOLDER: &str = "viewer";
const OWNER_CHANNEL_PREFIX: &str = "owner:";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonDocument {
    operation: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    observe: Vec<String>,
    #[serde(default, rename = "where")]
    filter: BTreeMap<String, Value>,
    #[serde(default)]
    select: Option<BTreeMap<String, String>>,
}

/// Executes [JSON subscription documents](self).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonQueryExecutor;

impl JsonQueryExecutor {
    pub fn new() -> Self {
        Self
    }

    fn prepare(document: &str, variables: &Value) -> Result<JsonDocument, PreparationError> {
        let doc: JsonDocument = serde_json::from_str(document)
            .map_err(|e| PreparationError::Syntax(e.to_string()))?;
        if doc.operation != SUBSCRIPTION {
            return Err(PreparationError::NotSubscription(doc.operation));
        }
        for pointer in doc.filter.keys().chain(doc.select.iter().flat_map(|s| s.values())) {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(PreparationError::Invalid(format!(
                    "{pointer:?} is not a JSON pointer"
                )));
            }
        }
        for template in &doc.observe {
            for placeholder in placeholders(template)? {
                if placeholder != VIEWER_PLACEHOLDER && !doc.variables.iter().any(|v| v == placeholder)
                {
                    return Err(PreparationError::Invalid(format!(
                        "placeholder {{{placeholder}}} in {template:?} is not a declared variable"
                    )));
                }
            }
        }
        let provided = variables.as_object();
        for declared in &doc.variables {
            let present = provided
                .and_then(|vars| vars.get(declared))
                .is_some_and(|v| !v.is_null());
            if !present {
                return Err(PreparationError::MissingVariable(declared.clone()));
            }
        }
        Ok(doc)
    }
}

/// Placeholder names in a channel template, in order.
fn placeholders(template: &str) -> Result<Vec<&str>, PreparationError> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            PreparationError::Syntax(format!("unclosed placeholder in {template:?}"))
        })?;
        names.push(&after[..end]);
        rest = &after[end + 1..];
    }
    Ok(names)
}

fn resolve_channel(
    template: &str,
    variables: &Map<String, Value>,
    viewer: &Viewer,
) -> Result<String, PreparationError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            PreparationError::Syntax(format!("unclosed placeholder in {template:?}"))
        })?;
        let name = &after[..end];
        if name == VIEWER_PLACEHOLDER {
            out.push_str(&viewer.owner_id.to_string());
        } else {
            match variables.get(name) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Number(n)) => out.push_str(&n.to_string()),
                Some(Value::Bool(b)) => out.push_str(&b.to_string()),
                Some(Value::Null) | None => {
                    return Err(PreparationError::MissingVariable(name.to_string()));
                }
                Some(_) => {
                    return Err(PreparationError::Invalid(format!(
                        "variable ${name} must be a scalar to be used in a channel"
                    )));
                }
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    let foreign = out
        .strip_prefix(OWNER_CHANNEL_PREFIX)
        .is_some_and(|owner| owner != viewer.owner_id.to_string());
    if foreign {
        return Err(PreparationError::Unauthorized(format!(
            "channel {out:?} belongs to another owner"
        )));
    }
    Ok(out)
}

fn apply(doc: &JsonDocument, event: Value) -> Option<Result<Value, EmissionError>> {
    let matches = doc
        .filter
        .iter()
        .all(|(pointer, expected)| event.pointer(pointer) == Some(expected));
    if !matches {
        return None;
    }
    let Some(select) = &doc.select else {
        return Some(Ok(event));
    };
    let mut out = Map::with_capacity(select.len());
    for (key, pointer) in select {
        match event.pointer(pointer) {
            Some(value) => {
                out.insert(key.clone(), value.clone());
            }
            None => {
                return Some(Err(EmissionError::new(
                    format!("cannot select {key:?}: {pointer:?} is missing from the event"),
                    "FIELD_MISSING",
                )));
            }
        }
    }
    Some(Ok(Value::Object(out)))
}

#[async_trait]
impl QueryExecutor for JsonQueryExecutor {
    async fn describe(
        &self,
        document: &str,
        variables: &Value,
    ) -> Result<OperationInfo, PreparationError> {
        let doc = Self::prepare(document, variables)?;
        Ok(OperationInfo { name: doc.name })
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ResultStream, PreparationError> {
        let doc = Self::prepare(&request.document, &request.variables)?;
        let empty = Map::new();
        let variables = request.variables.as_object().unwrap_or(&empty);
        let channels = doc
            .observe
            .iter()
            .map(|template| resolve_channel(template, variables, &request.viewer))
            .collect::<Result<Vec<_>, _>>()?;

        let observed = stream::select_all(
            channels
                .iter()
                .map(|channel| request.transport.observe(channel)),
        );
        let doc = Arc::new(doc);
        let results = observed
            // A change observed through several channels is emitted once.
            .scan(Vec::<Value>::new(), |seen, event| {
                let fresh = !seen.contains(&event);
                if fresh {
                    seen.push(event.clone());
                }
                future::ready(Some(fresh.then_some(event)))
            })
            .filter_map(future::ready)
            .filter_map(move |event| future::ready(apply(&doc, event)));
        Ok(results.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelName, ChannelRegistry};
    use crate::query::{DiscoveryTransport, LiveTransport};
    use serde_json::json;
    use uuid::Uuid;

    fn viewer() -> Viewer {
        Viewer {
            owner_id: Uuid::from_u128(7),
        }
    }

    fn live(channels: &[&str], data: Value) -> Arc<LiveTransport> {
        let channels: Vec<ChannelName> = channels.iter().map(|c| ChannelName::from(*c)).collect();
        Arc::new(LiveTransport::for_batch(
            Arc::new(ChannelRegistry::default()),
            &channels,
            Arc::new(data),
        ))
    }

    async fn run(
        document: Value,
        variables: Value,
        transport: Arc<dyn crate::query::ObservationTransport>,
    ) -> Result<Vec<Result<Value, EmissionError>>, PreparationError> {
        let stream = JsonQueryExecutor
            .execute(ExecutionRequest {
                document: document.to_string(),
                variables,
                viewer: viewer(),
                transport,
            })
            .await?;
        Ok(stream.collect().await)
    }

    #[tokio::test]
    async fn test_describe_returns_operation_name() {
        let doc = json!({ "operation": "subscription", "name": "ProjectEvents", "observe": [] });
        let info = JsonQueryExecutor
            .describe(&doc.to_string(), &json!({}))
            .await
            .unwrap();
        assert_eq!(info.name.as_deref(), Some("ProjectEvents"));
    }

    #[tokio::test]
    async fn test_preparation_errors() {
        let exec = JsonQueryExecutor;
        let err = exec.describe("{ not json", &json!({})).await.unwrap_err();
        assert!(matches!(err, PreparationError::Syntax(_)));

        let query = json!({ "operation": "query", "observe": [] }).to_string();
        let err = exec.describe(&query, &json!({})).await.unwrap_err();
        assert_eq!(err, PreparationError::NotSubscription("query".into()));

        let needs_id = json!({
            "operation": "subscription",
            "variables": ["id"],
            "observe": ["project:updated:{id}"],
        })
        .to_string();
        let err = exec.describe(&needs_id, &json!({})).await.unwrap_err();
        assert_eq!(err, PreparationError::MissingVariable("id".into()));

        let undeclared = json!({ "operation": "subscription", "observe": ["p:{id}"] }).to_string();
        let err = exec.describe(&undeclared, &json!({ "id": 1 })).await.unwrap_err();
        assert!(matches!(err, PreparationError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_foreign_owner_channel_is_unauthorized() {
        let doc = json!({
            "operation": "subscription",
            "variables": ["owner"],
            "observe": ["owner:{owner}"],
        });
        let err = run(
            doc,
            json!({ "owner": Uuid::from_u128(8).to_string() }),
            live(&[], json!({})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PreparationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_emits_selected_fields_once_per_change() {
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:created", "owner:{viewer}"],
            "select": { "id": "/id" },
        });
        let channel = format!("owner:{}", viewer().owner_id);
        let transport = live(
            &["project:created", channel.as_str()],
            json!({ "id": "p1", "title": "x" }),
        );
        let items = run(doc, json!({}), transport).await.unwrap();
        assert_eq!(items, vec![Ok(json!({ "id": "p1" }))]);
    }

    #[tokio::test]
    async fn test_where_filter_emits_nothing_on_mismatch() {
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:updated"],
            "where": { "/status": "open" },
        });
        let items = run(doc, json!({}), live(&["project:updated"], json!({ "status": "closed" })))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_missing_select_pointer_is_emission_error() {
        let doc = json!({
            "operation": "subscription",
            "observe": ["project:updated"],
            "select": { "owner": "/owner/id" },
        });
        let items = run(doc, json!({}), live(&["project:updated"], json!({ "id": 1 })))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().code, "FIELD_MISSING");
    }

    #[tokio::test]
    async fn test_discovery_run_records_resolved_channels() {
        let doc = json!({
            "operation": "subscription",
            "variables": ["id"],
            "observe": ["project:updated:{id}", "owner:{viewer}"],
        });
        let transport = Arc::new(DiscoveryTransport::new(Arc::new(ChannelRegistry::default())));
        let items = run(doc, json!({ "id": 3 }), transport.clone()).await.unwrap();
        assert!(items.is_empty());

        let channels: Vec<String> = transport.channels().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            channels,
            vec![format!("owner:{}", viewer().owner_id), "project:updated:3".to_string()]
        );
    }
}
