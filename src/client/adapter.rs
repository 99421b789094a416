use crate::types::{CompletionRequest, CompletionResponse};
use crate::Result;
use async_trait::async_trait;

/// The actual provider call (HTTP mapping lives outside this crate).
///
/// Implementations report the provider's usage numbers in the response and
/// return [`Error::Provider`](crate::Error::Provider) on failure; the client
/// passes those errors through untouched.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name this adapter serves, e.g. `"openai"`.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}
