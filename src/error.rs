use thiserror::Error;

/// Failure returned by a [`crate::provider::TooltipProvider`].
///
/// Provider failures never abort composition: the composer logs the error
/// and treats that provider as having no contribution for the call.
#[derive(Debug, Error)]
#[error("provider '{provider_id}' failed for item '{item_id}': {message}")]
pub struct ProviderError {
    pub provider_id: String,
    pub item_id: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(
        provider_id: impl Into<String>,
        item_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            item_id: item_id.into(),
            message: message.into(),
        }
    }
}

/// Failure while pushing data to one observer's transport.
///
/// Pushes are fire-and-forget: callers log this and move on, the next
/// natural snapshot resynchronizes the observer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("observer {0} is disconnected")]
    Disconnected(uuid::Uuid),
    #[error("transport send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The base type is absent from the external catalog. Callers degrade
    /// to leaving the affected slot unmodified.
    #[error("base item definition not found in catalog: {0}")]
    DefinitionNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
