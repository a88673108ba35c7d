//! Demo execution engine.
//!
//! Understands exactly two fields, read from single-field documents:
//!
//! - `greeting`: one result, `"Hello {name}"`
//! - `greetings`: as a query, every greeting in one list; as a subscription,
//!   one greeting per result, `interval` apart
//!
//! `{name}` is the connection's `name` attribute, falling back to `"World"`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use gqlws_core::{
    ConnectionContext, ExecutionEngine, ExecutionError, ExecutionRequest, ExecutionResult,
    ResultStream,
};
use serde_json::json;

const SALUTATIONS: [&str; 5] = ["Hi", "Bonjour", "Hola", "Ciao", "Zdravo"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationKind {
    Query,
    Subscription,
}

/// Greets whoever the connection context names.
#[derive(Clone, Debug)]
pub struct GreetingEngine {
    interval: Duration,
}

impl GreetingEngine {
    /// Engine emitting subscription greetings every 500 ms.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }

    /// Change the delay between subscription greetings.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for GreetingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionEngine for GreetingEngine {
    async fn execute(
        &self,
        request: ExecutionRequest,
        context: &ConnectionContext,
    ) -> Result<ResultStream, ExecutionError> {
        let (kind, field) = parse_document(&request.query)
            .ok_or_else(|| ExecutionError::request("Unsupported document"))?;
        let name = context
            .attribute("name")
            .and_then(|v| v.as_str())
            .unwrap_or("World")
            .to_owned();

        match (kind, field) {
            (OperationKind::Query, "greeting") => {
                let result = ExecutionResult::data(json!({"greeting": format!("Hello {name}")}));
                Ok(stream::iter([Ok(result)]).boxed())
            }
            (OperationKind::Query, "greetings") => {
                let all: Vec<String> = SALUTATIONS.iter().map(|s| format!("{s} {name}")).collect();
                let result = ExecutionResult::data(json!({"greetings": all}));
                Ok(stream::iter([Ok(result)]).boxed())
            }
            (OperationKind::Subscription, "greetings") => {
                let interval = self.interval;
                Ok(async_stream::stream! {
                    for (i, salutation) in SALUTATIONS.iter().enumerate() {
                        if i > 0 {
                            tokio::time::sleep(interval).await;
                        }
                        yield Ok::<_, ExecutionError>(ExecutionResult::data(
                            json!({"greetings": format!("{salutation} {name}")}),
                        ));
                    }
                }
                .boxed())
            }
            (OperationKind::Query, other) => Err(ExecutionError::request(format!(
                "Cannot query field \"{other}\" on type \"Query\""
            ))),
            (OperationKind::Subscription, other) => Err(ExecutionError::request(format!(
                "Cannot query field \"{other}\" on type \"Subscription\""
            ))),
        }
    }
}

/// Read `[query|subscription [Name]] { field }`.
fn parse_document(query: &str) -> Option<(OperationKind, &str)> {
    let open = query.find('{')?;
    let close = query.rfind('}')?;
    if close < open {
        return None;
    }

    let mut head = query[..open].split_whitespace();
    let kind = match head.next() {
        None | Some("query") => OperationKind::Query,
        Some("subscription") => OperationKind::Subscription,
        Some(_) => return None,
    };
    if head.nth(1).is_some() || !query[close + 1..].trim().is_empty() {
        return None;
    }

    let field = query[open + 1..close].trim();
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((kind, field))
}
