//! Role payload rendering.
//!
//! Templates are minijinja Markdown with `<!-- section:KEY required|droppable -->`
//! markers. After rendering, droppable sections are removed in [`DROP_ORDER`]
//! until the payload fits the byte budget, then sections are truncated from the
//! back.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::cache::clip_partial_reference;
use crate::core::trim::truncate_to_bytes;
use crate::core::types::Role;

const PLANNER_TEMPLATE: &str = include_str!("../prompts/planner.md");
const IMPLEMENTER_TEMPLATE: &str = include_str!("../prompts/implementer.md");
const REVIEWER_TEMPLATE: &str = include_str!("../prompts/reviewer.md");

/// Sections dropped first when a payload is over budget.
const DROP_ORDER: [&str; 4] = ["context", "commands", "previous_spec", "history"];

const TRUNCATED_NOTE: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

/// Everything a role template can reference. Empty strings render as absent sections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInputs {
    pub turn: u32,
    pub max_turns: u32,
    pub requirements: String,
    pub specification: String,
    /// Reviewer rationale handed to the Planner on a replan.
    pub replan_reason: String,
    /// Format directive after this role's previous output failed to parse.
    pub directive: String,
    /// Feedback from the last closed turn.
    pub feedback: String,
    /// Rendered context snapshot.
    pub context: String,
    pub context_mode: String,
    /// Implementer summary shown to the Reviewer.
    pub implementation: String,
    /// Rendered verification report.
    pub verification: String,
    /// Output of Implementer-requested commands.
    pub commands: String,
    /// Short turn history.
    pub history: String,
}

/// Role templates, embedded defaults optionally replaced from a directory.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    planner: String,
    implementer: String,
    reviewer: String,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            planner: PLANNER_TEMPLATE.to_string(),
            implementer: IMPLEMENTER_TEMPLATE.to_string(),
            reviewer: REVIEWER_TEMPLATE.to_string(),
            budget_bytes,
        }
    }

    /// Replace embedded templates with `<dir>/<role>.md` where present.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self> {
        for role in [Role::Planner, Role::Implementer, Role::Reviewer] {
            let path = dir.join(format!("{role}.md"));
            if !path.exists() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read prompt template {}", path.display()))?;
            debug!(role = %role, path = %path.display(), "using prompt override");
            *self.template_mut(role) = source;
        }
        Ok(self)
    }

    fn template_mut(&mut self, role: Role) -> &mut String {
        match role {
            Role::Planner => &mut self.planner,
            Role::Implementer => &mut self.implementer,
            Role::Reviewer => &mut self.reviewer,
        }
    }

    fn template(&self, role: Role) -> &str {
        match role {
            Role::Planner => &self.planner,
            Role::Implementer => &self.implementer,
            Role::Reviewer => &self.reviewer,
        }
    }

    /// Render the payload for `role` within the byte budget.
    pub fn build(&self, role: Role, input: &PromptInputs) -> Result<String> {
        let env = Environment::new();
        let rendered = env
            .render_str(
                self.template(role),
                context! {
                    turn => input.turn,
                    max_turns => input.max_turns,
                    requirements => trimmed(&input.requirements),
                    specification => trimmed(&input.specification),
                    replan_reason => trimmed(&input.replan_reason),
                    directive => trimmed(&input.directive),
                    feedback => trimmed(&input.feedback),
                    context => trimmed(&input.context),
                    context_mode => trimmed(&input.context_mode),
                    implementation => trimmed(&input.implementation),
                    verification => trimmed(&input.verification),
                    commands => trimmed(&input.commands),
                    history => trimmed(&input.history),
                },
            )
            .with_context(|| format!("render {role} prompt"))?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// Empty strings are falsy in templates, so absent inputs skip their blocks.
fn trimmed(s: &str) -> &str {
    s.trim()
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on section markers. Empty droppable sections vanish.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize {
        let separators = secs.len().saturating_sub(1) * 2;
        secs.iter().map(|s| s.content.len()).sum::<usize>() + separators
    };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over: cut sections from the back until the payload fits.
    for idx in (0..sections.len()).rev() {
        let current = total_len(sections);
        if current <= budget {
            break;
        }
        let section = &mut sections[idx];
        if section.content.len() <= TRUNCATED_NOTE.len() {
            continue;
        }
        let over = current - budget;
        let keep = section
            .content
            .len()
            .saturating_sub(over + TRUNCATED_NOTE.len());
        let before_len = section.content.len();
        let mut cut = clip_partial_reference(truncate_to_bytes(&section.content, keep)).to_string();
        cut.push_str(TRUNCATED_NOTE);
        section.content = cut;
        debug!(
            section = section.key,
            before_len,
            after_len = section.content.len(),
            "truncated section for budget"
        );
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
