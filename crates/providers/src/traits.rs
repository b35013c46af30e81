use parley_domain::chat::{Message, ToolDefinition};
use parley_domain::stream::{BoxStream, ModelEvent};
use parley_domain::Result;

/// One streaming model call.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Conversation messages (user/assistant only; the system prompt is a
    /// separate field, matching the Anthropic message structure).
    pub messages: Vec<Message>,
    /// System prompt for this call.
    pub system: String,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Maximum output tokens. `None` lets the adapter choose.
    pub max_tokens: Option<u32>,
}

/// A streaming model client.
///
/// Implementations translate between our internal types and one provider's
/// wire format, yielding raw fragments in wire order.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streaming completion and return the fragment stream.
    async fn stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>>;

    /// The model identifier requests are sent with.
    fn model_id(&self) -> &str;
}
