//! Generative-text collaborator.
//!
//! Everything the system asks of a language model goes through the one
//! narrow [`TextCompleter`] capability, so tests substitute a deterministic
//! stand-in and no other module ever talks to a model directly. The default
//! implementation speaks the Ollama `/api/chat` protocol.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::{Error, Result};

/// IPv4 loopback rather than `localhost`: on some platforms `localhost`
/// resolves to ::1 while the Ollama server listens on IPv4 only.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 120;

/// Single-turn text completion; no session state.
pub trait TextCompleter {
    fn complete(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Ollama implementation
// ---------------------------------------------------------------------------

/// Blocking client for a local Ollama server.
pub struct OllamaCompleter {
    host: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaCompleter {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<OllamaCompleter> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Completion(format!("failed to build http client: {e}")))?;
        Ok(OllamaCompleter {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    /// Host from `OLLAMA_HOST` when set, defaults everywhere else.
    pub fn from_env() -> Result<OllamaCompleter> {
        let host = std::env::var("OLLAMA_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        Self::new(
            &host,
            DEFAULT_MODEL,
            Duration::from_secs(DEFAULT_COMPLETION_TIMEOUT_SECS),
        )
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

impl TextCompleter for OllamaCompleter {
    fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [{"role": "user", "content": prompt}],
            "options": {"temperature": 0}
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "completion request");
        let resp = self.client.post(&url).json(&body).send().map_err(|e| {
            Error::Completion(format!(
                "failed to reach ollama at {url} (is it running?): {e}"
            ))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(Error::Completion(format!("ollama http error {status}: {text}")));
        }

        let out: OllamaChatResponse = resp
            .json()
            .map_err(|e| Error::Completion(format!("ollama returned invalid JSON: {e}")))?;
        Ok(out.message.content)
    }
}

// ---------------------------------------------------------------------------
// Reply extraction helpers
// ---------------------------------------------------------------------------

/// Marker line bounding generated content in a reply.
const FENCE: &str = "```";

/// Content between repeated fence markers; everything outside is discarded.
/// With `skip_comment_lines`, comment-style lines are dropped as well (used
/// when the reply is supposed to be runnable code, models like to annotate).
pub fn extract_fenced(reply: &str, skip_comment_lines: bool) -> String {
    let mut content = String::new();
    let mut inside = false;
    for line in reply.lines() {
        if skip_comment_lines && line.starts_with('#') {
            continue;
        }
        if line.contains(FENCE) {
            inside = !inside;
            continue;
        }
        if inside {
            content.push_str(line);
            content.push('\n');
        }
    }
    content
}

/// A single backtick-quoted token on its own line, e.g. `` `scikit-learn` ``.
/// The literal token `None` means the model declined to answer.
pub fn extract_backtick_token(reply: &str) -> Option<String> {
    for line in reply.lines() {
        let trimmed = line.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
            let token = trimmed.replace('`', "");
            if token.contains("None") {
                return None;
            }
            return Some(token);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_content_is_extracted() {
        let reply = "Here is the file:\n```\ncol_a,col_b\n1,2\n```\nHope that helps!";
        assert_eq!(extract_fenced(reply, false), "col_a,col_b\n1,2\n");
    }

    #[test]
    fn text_outside_fences_is_discarded() {
        let reply = "preamble\n```\nkept\n```\ntrailing";
        let content = extract_fenced(reply, false);
        assert!(!content.contains("preamble"));
        assert!(!content.contains("trailing"));
    }

    #[test]
    fn comment_lines_are_skipped_when_asked() {
        let reply = "# explanation\n```\n# defines the variable\ndata = [1, 2, 3]\n```";
        assert_eq!(extract_fenced(reply, true), "data = [1, 2, 3]\n");
        assert!(extract_fenced(reply, false).contains("# defines"));
    }

    #[test]
    fn unterminated_fence_keeps_rest() {
        let reply = "```\nline1\nline2";
        assert_eq!(extract_fenced(reply, false), "line1\nline2\n");
    }

    #[test]
    fn backtick_token_parsing() {
        assert_eq!(
            extract_backtick_token("Use this:\n`scikit-learn`\n"),
            Some("scikit-learn".to_string())
        );
        assert_eq!(extract_backtick_token("`None`"), None);
        assert_eq!(extract_backtick_token("no token here"), None);
    }
}
