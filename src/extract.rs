use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::chunker::ChunkTask;
use crate::llm::CompletionClient;
use crate::prompt;

/// Per-call timeout for the completion service.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exponential backoff schedule for transient completion failures:
/// base delay doubling per attempt plus 0-1s jitter, capped at max_delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Outcome of attempting one chunk. `raw_output: None` means a fatal
/// error or exhausted retries; such tasks are never checkpointed and stay
/// eligible for a future run.
#[derive(Debug)]
pub struct ExtractionResult {
    pub task: ChunkTask,
    pub raw_output: Option<String>,
}

/// Rate-limit, timeout, and transient-server-error signatures are worth
/// retrying; anything else fails the task on the first attempt.
pub fn is_transient(error_text: &str) -> bool {
    const SIGNATURES: &[&str] = &["limit", "timeout", "server error", "rate", "429", "502", "503"];
    let msg = error_text.to_lowercase();
    SIGNATURES.iter().any(|kw| msg.contains(kw))
}

/// Drive one completion call under the retry policy. Returns the trimmed
/// response text, or None once retries are exhausted or the error is
/// classified fatal. `context` labels log lines (URL, chunk index, row).
pub async fn complete_with_retry(
    client: &dyn CompletionClient,
    prompt: &str,
    timeout: Duration,
    policy: RetryPolicy,
    context: &str,
) -> Option<String> {
    let mut delay = policy.base_delay;
    for attempt in 1..=policy.max_attempts {
        match client.complete(prompt, timeout).await {
            Ok(text) => return Some(text.trim().to_string()),
            Err(e) => {
                let msg = format!("{e:#}");
                if !is_transient(&msg) {
                    error!("fatal completion error for {}: {}", context, msg);
                    return None;
                }
                if attempt == policy.max_attempts {
                    warn!(
                        "retries exhausted for {} after {} attempts: {}",
                        context, attempt, msg
                    );
                    return None;
                }
                warn!(
                    "transient completion error for {} (attempt {}/{}), backing off {:.1}s: {}",
                    context,
                    attempt,
                    policy.max_attempts,
                    delay.as_secs_f64(),
                    msg
                );
                tokio::time::sleep(delay).await;
                let jitter = Duration::from_millis(fastrand::u64(0..=1000));
                delay = (delay * 2 + jitter).min(policy.max_delay);
            }
        }
    }
    None
}

/// Retrying extraction client: wraps one chunk-extraction call. Stateless
/// between calls, so independent tasks may run concurrently.
pub struct Extractor {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl Extractor {
    pub fn new(client: Arc<dyn CompletionClient>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
        }
    }

    pub async fn extract(&self, task: ChunkTask) -> ExtractionResult {
        let prompt = prompt::extraction_prompt(&task.text);
        let context = format!("{} chunk {}", task.source_url, task.chunk_index);
        let raw_output = complete_with_retry(
            self.client.as_ref(),
            &prompt,
            self.timeout,
            self.policy,
            &context,
        )
        .await;
        ExtractionResult { task, raw_output }
    }
}

// ── Tests ──
