use futures::StreamExt;
use nuagent_model::{CompletionRequest, ModelProvider, ResponseEvent};

/// Accumulated result of driving a provider's response stream to completion.
pub struct TextResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Drive `provider.complete(req)` to completion, concatenating text deltas.
/// Used by the summarizer workers, which only need the final text — not the
/// incremental streaming the interactive loop cares about.
pub async fn collect_text(provider: &dyn ModelProvider, req: CompletionRequest) -> anyhow::Result<TextResponse> {
    let mut stream = provider.complete(req).await?;
    let mut text = String::new();
    let mut input_tokens = 0;
    let mut output_tokens = 0;
    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(d) => text.push_str(&d),
            ResponseEvent::Usage {
                input_tokens: i,
                output_tokens: o,
                ..
            } => {
                input_tokens = i;
                output_tokens = o;
            }
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => anyhow::bail!(e),
            ResponseEvent::ToolCall { .. } | ResponseEvent::ThinkingDelta(_) => {}
        }
    }
    Ok(TextResponse {
        text,
        input_tokens,
        output_tokens,
    })
}
