//! Prompt registry for the three operations.
//!
//! Each prompt has a stable id, a version and a checksum of its template, so a
//! rendered document in the logs can be traced back to the exact template text.
//! Rendering is a pure function of its inputs.

use serde::Serialize;
use std::sync::Arc;

/// Which operation a prompt serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Decompose,
    Options,
    Summary,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::Decompose => "decompose",
            PromptKind::Options => "options",
            PromptKind::Summary => "summary",
        }
    }
}

/// Values substituted into a template
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub text: &'a str,
    pub context: &'a str,
    pub user_context: &'a str,
    pub selected_options: &'a [String],
}

/// Core prompt definition
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    /// Stable identifier (format: operation-vN)
    pub id: String,
    pub kind: PromptKind,
    pub one_liner: String,
    pub version: String,
    /// SHA1 of the template text
    pub checksum: String,
    #[serde(skip)]
    pub template: String,
}

/// A rendered prompt, ready to send upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDocument {
    pub prompt_id: String,
    pub version: String,
    /// SHA1 of the rendered text
    pub checksum: String,
    pub text: String,
}

impl Prompt {
    pub fn new(
        id: impl Into<String>,
        kind: PromptKind,
        one_liner: impl Into<String>,
        version: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        let template = template.into();
        let checksum = sha1_checksum(&template);
        Self {
            id: id.into(),
            kind,
            one_liner: one_liner.into(),
            version: version.into(),
            checksum,
            template,
        }
    }

    /// Fill the template. Values are inserted verbatim and never re-scanned, so
    /// user text containing `{{...}}` stays literal.
    pub fn render(&self, inputs: &PromptInputs<'_>) -> PromptDocument {
        let cues = render_cues(inputs.selected_options);
        let mut out = String::with_capacity(self.template.len() + inputs.text.len() * 2);
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let value = match after[..end].trim() {
                "text" => Some(inputs.text),
                "context" => Some(inputs.context),
                "user_context" => Some(inputs.user_context),
                "selected_options" => Some(cues.as_str()),
                _ => None,
            };
            match value {
                Some(v) => out.push_str(v),
                // Unknown placeholders are kept as written
                None => out.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        PromptDocument {
            prompt_id: self.id.clone(),
            version: self.version.clone(),
            checksum: sha1_checksum(&out),
            text: out,
        }
    }
}

/// Personalization cues as a JSON array of strings
fn render_cues(selected: &[String]) -> String {
    serde_json::to_string(selected).unwrap_or_else(|_| "[]".to_string())
}

/// Generate a SHA1 checksum of prompt content
fn sha1_checksum(content: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Registry of the prompts served by this process
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    decompose: Arc<Prompt>,
    options: Arc<Prompt>,
    summary: Arc<Prompt>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    /// Create the registry with the core prompts
    pub fn new() -> Self {
        Self {
            decompose: Arc::new(Prompt::new(
                "decompose-v1",
                PromptKind::Decompose,
                "Break a goal into at most 8 personalised sub-problems",
                "1.0.0",
                DECOMPOSE_TEMPLATE,
            )),
            options: Arc::new(Prompt::new(
                "options-v1",
                PromptKind::Options,
                "Recommend a choice and list at least 5 diverse options for a sub-problem",
                "1.0.0",
                OPTIONS_TEMPLATE,
            )),
            summary: Arc::new(Prompt::new(
                "summary-v1",
                PromptKind::Summary,
                "Answer the goal in detail using the collected personalisation",
                "1.0.0",
                SUMMARY_TEMPLATE,
            )),
        }
    }

    pub fn get(&self, kind: PromptKind) -> Arc<Prompt> {
        match kind {
            PromptKind::Decompose => self.decompose.clone(),
            PromptKind::Options => self.options.clone(),
            PromptKind::Summary => self.summary.clone(),
        }
    }

    pub fn list(&self) -> Vec<Arc<Prompt>> {
        vec![
            self.decompose.clone(),
            self.options.clone(),
            self.summary.clone(),
        ]
    }

    pub fn render(&self, kind: PromptKind, inputs: &PromptInputs<'_>) -> PromptDocument {
        self.get(kind).render(inputs)
    }
}

const DECOMPOSE_TEMPLATE: &str = r#"I want to accomplish the main goal of: {{text}}
To better assist me, please break down the problem into sub-problems.
Each sub-problem should help me to solve the original problem.
Make it so that each sub-problem is not trivial and can be helpful.
Take my context and personalization cues to personalize the sub-problems.
Make sure each sub-problem is concise and less than 15 words.

Personalization Cue: {{selected_options}}
My Context: {{user_context}}

Output format
(Make sure to only output a valid JSON object that can be parsed with the JS function JSON.parse).
Do not include any '<newline>' or 'json'.
{
  "sub_problems": A list of strings (max 8), each a valid sub-query
}
"#;

const OPTIONS_TEMPLATE: &str = r#"User: {{text}}
== Instructions ==
The user wants to: {{context}}
Here is one of the sub-queries that helps answer the main query.
Go into detail to help me with the sub-query.
Show me some options to personalize and choose from.
Be concrete and make sure the options are valid choices to finish the task in the sub-query.
Personalization Cue: {{selected_options}}
My Context: {{user_context}}
When coming up with options, make sure they are diverse and representative of multiple demographics, cultures, and viewpoints.
Output format (make sure to only output a valid JSON object):
Do not include any '<newline>' or 'json'.
{
  "recommended": Your recommendation,
  "options": A list of options (at least 5) for me to choose from. Each option is a single string. Provide helpful details.
}
== End of Instructions ==
User: {{text}}
Output:
"#;

const SUMMARY_TEMPLATE: &str = r#"User: {{text}}
Your Response:
Here is some information helpful to know about the user to personalize the response.
Personalization: {{selected_options}}
Context: {{user_context}}
Answer the original user query. When helpful, personalize the response.
Output format (make sure to only output a valid JSON object):
Do not include any '<newline>' or 'json'.
{
  "summary": Your detailed response to the user's query
}
"#;
