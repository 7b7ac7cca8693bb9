//! Chat request assembly.
//!
//! Builds the two-message (system + user) streaming request for one item
//! from the project settings, the resolved prompt templates, and the
//! context selection. Templates resolve per-project override first, then
//! application default, then the built-in fallback; a template that is
//! blank after trimming falls through to the next tier.

use glossa_domain::{ContextSelection, Project, PromptDefaults};
use glossa_provider_protocol::request::{ChatMessage, ChatRequest};

use crate::error::{EngineError, EngineResult};

/// Built-in system prompt opener, used when neither the project nor the
/// configuration provides one. `{target_language}` is substituted.
pub const FALLBACK_PRE_SYSTEM_PROMPT: &str =
    "You are a translation assistant. Translate the final user message into **{target_language}**.";

/// Built-in system prompt closer. `{target_language}` is substituted.
pub const FALLBACK_POST_SYSTEM_PROMPT: &str = "IMPORTANT: Respond with *only* the translation of the final user message into **{target_language}**, nothing else.";

/// Built-in user prompt. `{source_text}` is substituted; templates may also
/// reference `{target_language}`.
pub const FALLBACK_USER_PROMPT: &str = "{source_text}";

const CONTEXT_INTRO: &str =
    "\nUse the following context from other items in the project to inform your translation:";

/// Assembles the chat request for translating `project` item `index`.
///
/// The system message is the rendered pre-system template, then (only when
/// the selection yields at least one non-blank context item) the context
/// intro and the delimited context entries, then the rendered post-system
/// template, joined with newlines. The user message is the rendered user
/// template. Context entries render in ascending index order and never
/// include the target item.
pub fn build_chat_request(
    project: &Project,
    index: usize,
    selection: &ContextSelection,
    defaults: &PromptDefaults,
) -> EngineResult<ChatRequest> {
    let item = project
        .item(index)
        .ok_or(EngineError::IndexOutOfRange(index))?;

    let source_text = item.source_text.trim();
    if source_text.is_empty() {
        return Err(EngineError::MissingInput("Source text is empty".into()));
    }
    let target_language = project.target_language.trim();
    if target_language.is_empty() {
        return Err(EngineError::MissingInput(
            "Target language is not set".into(),
        ));
    }
    let model = project.model.trim();
    if model.is_empty() {
        return Err(EngineError::MissingInput("No model is configured".into()));
    }

    let overrides = &project.prompt_overrides;
    let pre_template = resolve_template(
        overrides.pre_system_prompt.as_deref(),
        defaults.pre_system_prompt.as_deref(),
        FALLBACK_PRE_SYSTEM_PROMPT,
    );
    let post_template = resolve_template(
        overrides.post_system_prompt.as_deref(),
        defaults.post_system_prompt.as_deref(),
        FALLBACK_POST_SYSTEM_PROMPT,
    );
    let user_template = resolve_template(
        overrides.user_prompt.as_deref(),
        defaults.user_prompt.as_deref(),
        FALLBACK_USER_PROMPT,
    );

    let pre_system_prompt = pre_template.replace("{target_language}", target_language);
    let post_system_prompt = post_template.replace("{target_language}", target_language);
    let user_prompt = user_template
        .replace("{source_text}", source_text)
        .replace("{target_language}", target_language);

    let context_block = render_context_block(project, index, selection, target_language);

    let mut sections = vec![pre_system_prompt];
    if !context_block.is_empty() {
        sections.push(CONTEXT_INTRO.to_string());
        sections.push(context_block);
    }
    sections.push(format!("\n{post_system_prompt}"));
    let system_prompt = sections.join("\n");

    Ok(ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ],
        stream: true,
        target_language: target_language.to_string(),
    })
}

/// First non-blank template wins; a present-but-blank tier is skipped.
fn resolve_template<'a>(
    override_template: Option<&'a str>,
    default_template: Option<&'a str>,
    fallback: &'a str,
) -> &'a str {
    override_template
        .filter(|template| !template.trim().is_empty())
        .or_else(|| default_template.filter(|template| !template.trim().is_empty()))
        .unwrap_or(fallback)
}

fn render_context_block(
    project: &Project,
    target: usize,
    selection: &ContextSelection,
    target_language: &str,
) -> String {
    let mut block = String::new();
    for index in selection.context_indices(target) {
        let Some(item) = project.item(index) else {
            continue;
        };
        let source = item.source_text.trim();
        if source.is_empty() {
            continue;
        }
        let name = item.name.as_str();
        let translation = item.translated_text.trim();
        let translation_section = if translation.is_empty() {
            format!("\n(No existing translation for '{name}')\n")
        } else {
            format!("\nExisting Translation ({target_language}) for '{name}':\n{translation}\n")
        };
        block.push_str(&format!(
            "\n==================== CONTEXT ITEM START: {name} ====================\nSource Text ({name}):\n{source}\n{translation_section}==================== CONTEXT ITEM END: {name} ======================\n"
        ));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_domain::Item;

    fn project_with_items(items: Vec<Item>) -> Project {
        let mut project = Project::new("Demo", "Polish", "ollama/llama3");
        for item in items {
            project.add_item(item).unwrap();
        }
        project
    }

    fn translated(name: &str, source: &str, translation: &str) -> Item {
        let mut item = Item::with_source(name, source);
        item.translated_text = translation.to_string();
        item
    }

    fn selection_of(indices: &[usize]) -> ContextSelection {
        ContextSelection {
            included: indices.iter().copied().collect(),
            excluded: Default::default(),
        }
    }

    #[test]
    fn no_context_request_uses_fallback_templates() {
        let project = project_with_items(vec![Item::with_source("Greeting", "Dzień dobry")]);
        let request = build_chat_request(
            &project,
            0,
            &ContextSelection::default(),
            &PromptDefaults::default(),
        )
        .unwrap();

        assert_eq!(request.model, "ollama/llama3");
        assert!(request.stream);
        assert_eq!(request.target_language, "Polish");
        assert_eq!(
            request.messages,
            vec![
                ChatMessage::system(
                    "You are a translation assistant. Translate the final user message into \
                     **Polish**.\n\nIMPORTANT: Respond with *only* the translation of the final \
                     user message into **Polish**, nothing else."
                ),
                ChatMessage::user("Dzień dobry"),
            ]
        );
    }

    #[test]
    fn context_entries_render_in_order_between_system_sections() {
        let project = project_with_items(vec![
            translated("Greeting", "Hello", "Cześć"),
            Item::with_source("Farewell", "Goodbye"),
            Item::with_source("Thanks", "Thank you"),
        ]);
        let request = build_chat_request(
            &project,
            1,
            &selection_of(&[0, 2]),
            &PromptDefaults::default(),
        )
        .unwrap();

        let system = &request.messages[0].content;
        let greeting_entry = "\n==================== CONTEXT ITEM START: Greeting ====================\nSource Text (Greeting):\nHello\n\nExisting Translation (Polish) for 'Greeting':\nCześć\n==================== CONTEXT ITEM END: Greeting ======================\n";
        let thanks_entry = "\n==================== CONTEXT ITEM START: Thanks ====================\nSource Text (Thanks):\nThank you\n\n(No existing translation for 'Thanks')\n==================== CONTEXT ITEM END: Thanks ======================\n";

        assert!(system.starts_with(
            "You are a translation assistant. Translate the final user message into **Polish**."
        ));
        assert!(system.contains(
            "\nUse the following context from other items in the project to inform your \
             translation:\n"
        ));
        assert!(system.contains(greeting_entry));
        assert!(system.contains(thanks_entry));
        assert!(system.find(greeting_entry).unwrap() < system.find(thanks_entry).unwrap());
        assert!(system.ends_with(
            "\n\nIMPORTANT: Respond with *only* the translation of the final user message into \
             **Polish**, nothing else."
        ));
        // The target item contributes nothing to the context block.
        assert!(!system.contains("Farewell"));
        assert_eq!(request.messages[1], ChatMessage::user("Goodbye"));
    }

    #[test]
    fn blank_context_sources_are_skipped() {
        let project = project_with_items(vec![
            Item::with_source("Empty", "   "),
            Item::with_source("Target", "Goodbye"),
            Item::with_source("Thanks", "Thank you"),
        ]);
        let request = build_chat_request(
            &project,
            1,
            &selection_of(&[0, 2]),
            &PromptDefaults::default(),
        )
        .unwrap();

        let system = &request.messages[0].content;
        assert!(!system.contains("CONTEXT ITEM START: Empty"));
        assert!(system.contains("CONTEXT ITEM START: Thanks"));
    }

    #[test]
    fn all_context_sources_blank_collapses_to_no_context_prompt() {
        let project = project_with_items(vec![
            Item::with_source("Empty", "  "),
            Item::with_source("Target", "Goodbye"),
        ]);
        let request = build_chat_request(
            &project,
            1,
            &selection_of(&[0]),
            &PromptDefaults::default(),
        )
        .unwrap();

        assert!(!request.messages[0]
            .content
            .contains("Use the following context"));
    }

    #[test]
    fn overrides_win_and_blank_overrides_fall_through() {
        let mut project = project_with_items(vec![Item::with_source("Greeting", "Bonjour")]);
        project.target_language = "German".to_string();
        project.prompt_overrides.pre_system_prompt =
            Some("Translate into {target_language} with care.".to_string());
        project.prompt_overrides.post_system_prompt = Some("   ".to_string());

        let defaults = PromptDefaults {
            pre_system_prompt: Some("never used".to_string()),
            post_system_prompt: Some("End with {target_language}.".to_string()),
            user_prompt: Some("TEXT: {source_text} LANG: {target_language}".to_string()),
        };

        let request = build_chat_request(&project, 0, &ContextSelection::default(), &defaults)
            .unwrap();

        assert_eq!(
            request.messages[0],
            ChatMessage::system("Translate into German with care.\n\nEnd with German.")
        );
        assert_eq!(
            request.messages[1],
            ChatMessage::user("TEXT: Bonjour LANG: German")
        );
    }

    #[test]
    fn user_template_without_language_placeholder_is_left_alone() {
        let mut project = project_with_items(vec![Item::with_source("Greeting", "Bonjour")]);
        project.prompt_overrides.user_prompt = Some("Please translate: {source_text}".to_string());

        let request = build_chat_request(
            &project,
            0,
            &ContextSelection::default(),
            &PromptDefaults::default(),
        )
        .unwrap();

        assert_eq!(
            request.messages[1],
            ChatMessage::user("Please translate: Bonjour")
        );
    }

    #[test]
    fn missing_inputs_are_rejected() {
        let project = project_with_items(vec![Item::with_source("Greeting", "   ")]);
        assert_eq!(
            build_chat_request(
                &project,
                0,
                &ContextSelection::default(),
                &PromptDefaults::default()
            ),
            Err(EngineError::MissingInput("Source text is empty".into()))
        );

        let mut project = project_with_items(vec![Item::with_source("Greeting", "Hello")]);
        project.target_language = String::new();
        assert_eq!(
            build_chat_request(
                &project,
                0,
                &ContextSelection::default(),
                &PromptDefaults::default()
            ),
            Err(EngineError::MissingInput("Target language is not set".into()))
        );

        let mut project = project_with_items(vec![Item::with_source("Greeting", "Hello")]);
        project.model = "  ".to_string();
        assert_eq!(
            build_chat_request(
                &project,
                0,
                &ContextSelection::default(),
                &PromptDefaults::default()
            ),
            Err(EngineError::MissingInput("No model is configured".into()))
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let project = project_with_items(vec![Item::with_source("Greeting", "Hello")]);
        assert_eq!(
            build_chat_request(
                &project,
                3,
                &ContextSelection::default(),
                &PromptDefaults::default()
            ),
            Err(EngineError::IndexOutOfRange(3))
        );
    }
}
