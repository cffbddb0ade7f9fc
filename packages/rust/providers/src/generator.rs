//! Generator gateway: turns an unseen pair into a validated material.
//!
//! 1. Canonicalize the operand order so `(a, b)` and `(b, a)` build the
//!    same prompt
//! 2. Prepend few-shot exemplars from prior cached combinations
//! 3. Ask the chat backend, validate the reply, and on rejection append
//!    corrective feedback and resubmit (up to `max_retries` times)

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use opencraft_shared::{
    CachedCombination, GeneratorConfig, OpenCraftError, PLACEHOLDER_EMOJI, Result, canonical_pair,
    same_name,
};

use crate::chat::{ChatBackend, ChatMessage, OpenAiChat};
use crate::validation::{Rejection, parse_candidate, validate_candidate, validate_name};

const SYSTEM_PROMPT: &str = "You invent the result of combining two things in a crafting game. \
Answer with exactly one thing: a noun that relates to both inputs, either a blend of the two or \
the role one plays for the other. Both inputs matter equally and their order does not. The \
answer must not contain both input words. Use plain ASCII letters only: no punctuation, no \
digits, no emoji, at most three words. Things, materials, people, animals, places, food, \
emotions, events, concepts, natural phenomena, tools and technology are all fine. Reply with \
a single JSON object and nothing else: {\"name\": \"<answer>\", \"emoji\": \"<one emoji>\"}";

/// A material accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMaterial {
    pub name: String,
    pub emoji: String,
    /// Number of backend calls it took.
    pub attempts: u32,
    /// Whether the emoji was replaced by the placeholder on the final attempt.
    pub emoji_patched: bool,
}

/// Bounded retry loop over a [`ChatBackend`].
pub struct Generator {
    backend: Arc<dyn ChatBackend>,
    max_retries: u32,
    max_exemplars: usize,
}

impl Generator {
    pub fn new(backend: Arc<dyn ChatBackend>, max_retries: u32, max_exemplars: usize) -> Self {
        Self {
            backend,
            max_retries,
            max_exemplars,
        }
    }

    /// Build a generator talking to the configured OpenAI-compatible endpoint.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let backend = OpenAiChat::from_config(config)?;
        Ok(Self::new(
            Arc::new(backend),
            config.max_retries,
            config.max_exemplars,
        ))
    }

    /// Generate the material for `first + second`.
    ///
    /// `history` is prior cached combinations touching either operand,
    /// newest first. Fails with [`OpenCraftError::GenerationFailed`] when the
    /// backend is unreachable or every attempt had an unusable name.
    #[instrument(skip(self, history), fields(history = history.len()))]
    pub async fn generate(
        &self,
        first: &str,
        second: &str,
        history: &[CachedCombination],
    ) -> Result<GeneratedMaterial> {
        let (a, b) = canonical_pair(first, second);
        let mut messages = build_conversation(a, b, history, self.max_exemplars);
        let total_attempts = self.max_retries + 1;

        for attempt in 1..=total_attempts {
            let is_last = attempt == total_attempts;

            let reply = self.backend.complete(&messages).await.map_err(|e| {
                warn!(attempt, error = %e, "generation backend failed");
                OpenCraftError::GenerationFailed(format!("{a} + {b}: {e}"))
            })?;

            let rejection = match parse_candidate(&reply).and_then(|c| validate_candidate(&c, a, b)) {
                Ok(valid) => {
                    debug!(attempt, name = %valid.name, "candidate accepted");
                    return Ok(GeneratedMaterial {
                        name: valid.name,
                        emoji: valid.emoji,
                        attempts: attempt,
                        emoji_patched: false,
                    });
                }
                Err(rejection) => rejection,
            };

            if is_last && rejection.is_emoji_level() {
                // The name already passed; only the emoji is patched.
                let name = parse_candidate(&reply)
                    .and_then(|c| validate_name(&c.name, a, b))
                    .map_err(|r| OpenCraftError::ValidationRejected(r.to_string()))?;
                info!(attempt, %name, reason = %rejection, "patching emoji on final attempt");
                return Ok(GeneratedMaterial {
                    name,
                    emoji: PLACEHOLDER_EMOJI.to_string(),
                    attempts: attempt,
                    emoji_patched: true,
                });
            }

            warn!(attempt, reason = %rejection, "candidate rejected");
            if !is_last {
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(feedback(&rejection)));
            }
        }

        Err(OpenCraftError::GenerationFailed(format!(
            "{a} + {b}: no valid candidate after {total_attempts} attempts"
        )))
    }
}

/// Corrective message appended after a rejected reply.
fn feedback(rejection: &Rejection) -> String {
    format!(
        "That answer was rejected because {rejection}. Reply again with a single JSON object \
         {{\"name\": \"<answer>\", \"emoji\": \"<one emoji>\"}} that follows every rule."
    )
}

fn combine_prompt(a: &str, b: &str) -> String {
    format!("Combine {a} and {b}.")
}

fn answer_json(name: &str, emoji: &str) -> String {
    serde_json::json!({ "name": name, "emoji": emoji }).to_string()
}

/// System prompt, exemplar turns, then the request for `(a, b)`.
/// `a` and `b` must already be in canonical order.
fn build_conversation(
    a: &str,
    b: &str,
    history: &[CachedCombination],
    max_exemplars: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
    for ex in select_exemplars(a, b, history, max_exemplars) {
        let (x, y) = canonical_pair(&ex.first_word, &ex.second_word);
        messages.push(ChatMessage::user(combine_prompt(x, y)));
        messages.push(ChatMessage::assistant(answer_json(&ex.result, &ex.emoji)));
    }
    messages.push(ChatMessage::user(combine_prompt(a, b)));
    messages
}

/// Pick up to `max` exemplars from `history` (newest first), skipping the
/// pair being generated and keeping only the newest row per canonical pair.
fn select_exemplars<'h>(
    a: &str,
    b: &str,
    history: &'h [CachedCombination],
    max: usize,
) -> Vec<&'h CachedCombination> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut picked = Vec::new();

    for row in history {
        if picked.len() >= max {
            break;
        }
        let (x, y) = canonical_pair(&row.first_word, &row.second_word);
        if same_name(x, a) && same_name(y, b) {
            continue;
        }
        if seen.insert((x.to_lowercase(), y.to_lowercase())) {
            picked.push(row);
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every conversation.
    struct ScriptedChat {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedChat {
        fn new(replies: &[&str]) -> Arc<Self> {
            let mut replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn conversation(&self, call: usize) -> Vec<ChatMessage> {
            self.seen.lock().unwrap()[call].clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| OpenCraftError::Network("script exhausted".into()))
        }
    }

    fn cached(first: &str, second: &str, result: &str) -> CachedCombination {
        CachedCombination {
            first_word: first.into(),
            second_word: second.into(),
            result: result.into(),
            emoji: "✨".into(),
        }
    }

    #[tokio::test]
    async fn accepts_first_valid_candidate() {
        let chat = ScriptedChat::new(&[r#"{"name": "steam", "emoji": "💧💨"}"#]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let material = generator.generate("Water", "Fire", &[]).await.unwrap();
        assert_eq!(material.name, "Steam");
        assert_eq!(material.emoji, "💧");
        assert_eq!(material.attempts, 1);
        assert!(!material.emoji_patched);
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn prompt_is_independent_of_operand_order() {
        let reply = r#"{"name": "Steam", "emoji": "💨"}"#;
        let forward = ScriptedChat::new(&[reply]);
        let reverse = ScriptedChat::new(&[reply]);

        Generator::new(forward.clone(), 2, 6)
            .generate("Water", "Fire", &[])
            .await
            .unwrap();
        Generator::new(reverse.clone(), 2, 6)
            .generate("Fire", "Water", &[])
            .await
            .unwrap();

        assert_eq!(forward.conversation(0), reverse.conversation(0));
        let last = forward.conversation(0).pop().unwrap();
        assert_eq!(last.content, "Combine Fire and Water.");
    }

    #[tokio::test]
    async fn rejection_feeds_back_and_retries() {
        let chat = ScriptedChat::new(&[
            r#"{"name": "Steam!", "emoji": "💨"}"#,
            r#"{"name": "Steam", "emoji": "💨"}"#,
        ]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let material = generator.generate("Fire", "Water", &[]).await.unwrap();
        assert_eq!(material.name, "Steam");
        assert_eq!(material.attempts, 2);

        let retry = chat.conversation(1);
        let n = retry.len();
        assert_eq!(retry[n - 2].role, Role::Assistant);
        assert!(retry[n - 2].content.contains("Steam!"));
        assert_eq!(retry[n - 1].role, Role::User);
        assert!(retry[n - 1].content.contains("forbidden character '!'"));
    }

    #[tokio::test]
    async fn persistent_name_violation_fails() {
        let chat = ScriptedChat::new(&[
            r#"{"name": "Steam!", "emoji": "💨"}"#,
            r#"{"name": "Steam?", "emoji": "💨"}"#,
            r#"{"name": "St.eam", "emoji": "💨"}"#,
        ]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let err = generator.generate("Fire", "Water", &[]).await.unwrap_err();
        assert!(matches!(err, OpenCraftError::GenerationFailed(_)));
        assert_eq!(chat.calls(), 3);
    }

    #[tokio::test]
    async fn emoji_violation_is_patched_on_final_attempt() {
        let chat = ScriptedChat::new(&[
            r#"{"name": "Steam", "emoji": ""}"#,
            r#"{"name": "Steam", "emoji": "cloud"}"#,
            r#"{"name": "steam", "emoji": ""}"#,
        ]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let material = generator.generate("Fire", "Water", &[]).await.unwrap();
        assert_eq!(material.name, "Steam");
        assert_eq!(material.emoji, PLACEHOLDER_EMOJI);
        assert!(material.emoji_patched);
        assert_eq!(material.attempts, 3);
    }

    #[tokio::test]
    async fn emoji_violation_retries_before_final_attempt() {
        let chat = ScriptedChat::new(&[
            r#"{"name": "Steam", "emoji": ""}"#,
            r#"{"name": "Steam", "emoji": "💨"}"#,
        ]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let material = generator.generate("Fire", "Water", &[]).await.unwrap();
        assert_eq!(material.emoji, "💨");
        assert_eq!(material.attempts, 2);
    }

    #[tokio::test]
    async fn backend_failure_aborts_without_retry() {
        let chat = ScriptedChat::new(&[]);
        let generator = Generator::new(chat.clone(), 2, 6);

        let err = generator.generate("Fire", "Water", &[]).await.unwrap_err();
        assert!(matches!(err, OpenCraftError::GenerationFailed(_)));
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let chat = ScriptedChat::new(&["no json here"]);
        let generator = Generator::new(chat.clone(), 0, 6);

        assert!(generator.generate("Fire", "Water", &[]).await.is_err());
        assert_eq!(chat.calls(), 1);
    }

    #[test]
    fn exemplars_are_deduplicated_bounded_and_skip_current_pair() {
        let history = vec![
            cached("Steam", "Fire", "Engine"),
            cached("Fire", "Steam", "Boiler"),
            cached("Water", "Fire", "Steam"),
            cached("Fire", "Earth", "Lava"),
            cached("Water", "Air", "Mist"),
            cached("Water", "Earth", "Mud"),
        ];

        let picked = select_exemplars("Fire", "Water", &history, 3);
        let results: Vec<&str> = picked.iter().map(|c| c.result.as_str()).collect();
        assert_eq!(results, vec!["Engine", "Lava", "Mist"]);

        assert!(select_exemplars("Fire", "Water", &history, 0).is_empty());
    }

    #[test]
    fn conversation_renders_exemplars_as_turns() {
        let history = vec![cached("Water", "Earth", "Mud")];
        let messages = build_conversation("Earth", "Fire", &history, 6);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Combine Earth and Water.");
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].content.contains("\"name\":\"Mud\""));
        assert_eq!(messages[3].content, "Combine Earth and Fire.");
    }
}
