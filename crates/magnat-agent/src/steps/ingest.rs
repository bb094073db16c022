use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::DocumentStore;
use magnat_core::types::{Action, IngestReceipt, Message};
use magnat_core::ConversationState;

use crate::graph::{RetryPolicy, Step};

/// Default acknowledgement; `{title}` and `{chunks}` are substituted.
pub const DEFAULT_ACK: &str = "Added \"{title}\" to the library ({chunks} sections).";

/// Default reply for a refused document; `{source}` and `{reason}` are substituted.
pub const DEFAULT_FAILURE: &str = "Could not add {source} to the library: {reason}";

/// What happened to the submitted document.
#[derive(Debug)]
pub enum Ingested {
    Added(IngestReceipt),
    /// The store refused the document for good. Retrying would not help.
    Refused(MagnatError),
}

/// Adds the document named by the latest user turn to the document store and
/// acknowledges it in the main dialog.
///
/// Transient store errors are retried. A refused document (wrong format,
/// missing page, no text) is answered in the dialog and the run goes on.
pub struct IngestStep {
    name: String,
    store: Arc<dyn DocumentStore>,
    ack_template: String,
    failure_template: String,
    retry: RetryPolicy,
}

impl IngestStep {
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            store,
            ack_template: DEFAULT_ACK.to_string(),
            failure_template: DEFAULT_FAILURE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ack_template(mut self, template: impl Into<String>) -> Self {
        self.ack_template = template.into();
        self
    }

    pub fn with_failure_template(mut self, template: impl Into<String>) -> Self {
        self.failure_template = template.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn acknowledgement(&self, receipt: &IngestReceipt) -> String {
        let title = receipt.title.as_deref().unwrap_or(&receipt.source);
        self.ack_template
            .replace("{title}", title)
            .replace("{chunks}", &receipt.chunks.to_string())
    }

    fn refusal(&self, source: &str, error: &MagnatError) -> String {
        let reason = match error {
            MagnatError::DocumentRejected(reason) => reason.clone(),
            other => other.to_string(),
        };
        self.failure_template
            .replace("{source}", source)
            .replace("{reason}", &reason)
    }
}

impl Step for IngestStep {
    type Input = String;
    type Output = Ingested;

    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn prepare(&self, state: &ConversationState) -> Result<String> {
        state
            .dialog()
            .last_user()
            .map(|m| m.content().trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MagnatError::ContractViolation {
                step: self.name.clone(),
                message: "no user message to ingest".to_string(),
            })
    }

    fn execute<'a>(&'a self, source: &'a String) -> BoxFuture<'a, Result<Ingested>> {
        Box::pin(async move {
            match self.store.ingest(source).await {
                Ok(receipt) => Ok(Ingested::Added(receipt)),
                Err(e) if e.is_transient() => Err(e),
                Err(e) => Ok(Ingested::Refused(e)),
            }
        })
    }

    fn finalize(
        &self,
        state: &mut ConversationState,
        source: String,
        ingested: Ingested,
    ) -> Result<Action> {
        let reply = match ingested {
            Ingested::Added(receipt) => {
                info!(
                    step = %self.name,
                    source = %receipt.source,
                    chunks = receipt.chunks,
                    "Document ingested"
                );
                self.acknowledgement(&receipt)
            }
            Ingested::Refused(error) => {
                warn!(step = %self.name, %source, error = %error, "Document refused");
                self.refusal(&source, &error)
            }
        };
        state.dialog_mut().push(Message::assistant(reply));
        Ok(Action::Default)
    }
}
