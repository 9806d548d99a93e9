//! Prompt assembly.
//!
//! The completion server takes one flat string, so the persona, what we
//! remember about the user, the language directive and the whole history
//! are rendered into Llama 3 header blocks. The prompt always ends with an
//! open assistant header so the model knows where to continue.

use crate::chatbot::language::DEFAULT_LANGUAGE;
use crate::chatbot::message::{Role, Turn};

/// Number of stored facts read back into the prompt.
pub const FACTS_IN_PROMPT: usize = 3;

/// Token that closes each block. Also the default stop sequence.
pub const END_OF_TURN: &str = "<|eot_id|>";

const DEFAULT_DESCRIPTION: &str = "You are Saro, a young genius girl with a sarcastic, witty, playful attitude. \
Always clever, funny, and confident. The user's name is {user}. \
Feel free to occasionally mention their name when replying in a sarcastic or playful way.";

const DEFAULT_FALLBACK: &str = "🤔 Uh-oh, Saro couldn't think of anything witty to say. Try poking her again.";

/// The character the bot plays.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    /// System text. `{user}` is replaced with the user's display name.
    pub description: String,
    /// Sent when the model produces nothing.
    pub fallback_reply: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Saro".to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            fallback_reply: DEFAULT_FALLBACK.to_string(),
        }
    }
}

impl Persona {
    /// Lowercase ASCII form of the name, used as a filename prefix.
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if slug.is_empty() { "bot".to_string() } else { slug }
    }
}

/// Sarcasm flavour per language.
pub fn tone_modifier(lang: &str) -> Option<String> {
    match lang {
        DEFAULT_LANGUAGE => None,
        "es" => Some("In Spanish, your sarcasm should be sharp but still friendly, like a witty teenager.".to_string()),
        "fr" => Some("In French, your sarcasm should be ironic and playful, sophisticated but not too mean.".to_string()),
        "ja" => Some("In Japanese, your sarcasm should be light and teasing, slightly mischievous but polite.".to_string()),
        other => Some(format!(
            "In {}, keep your sarcasm playful but not too harsh.",
            other.to_uppercase()
        )),
    }
}

/// Hard instruction to stay in the user's language. None for English.
pub fn language_directive(lang: &str) -> Option<String> {
    if lang == DEFAULT_LANGUAGE {
        return None;
    }
    let code = lang.to_uppercase();
    Some(format!(
        "Important: The user wrote in {code}. You MUST reply ONLY in {code}. \
         Do NOT reply in English unless the user switches back."
    ))
}

/// Build the system message for one request.
pub fn system_message(persona: &Persona, user_name: &str, facts: &[String], lang: &str) -> String {
    let mut system = persona.description.replace("{user}", user_name);

    let start = facts.len().saturating_sub(FACTS_IN_PROMPT);
    let recent = &facts[start..];
    if !recent.is_empty() {
        system.push_str(" Here are some things you know about the user: ");
        for fact in recent {
            system.push_str(&format!("\"{}\". ", fact));
        }
    }

    if let Some(tone) = tone_modifier(lang) {
        system.push(' ');
        system.push_str(&tone);
    }
    if let Some(directive) = language_directive(lang) {
        system.push(' ');
        system.push_str(&directive);
    }

    system
}

fn push_block(out: &mut String, role: Role, content: &str) {
    out.push_str("<|start_header_id|>");
    out.push_str(role.as_str());
    out.push_str("<|end_header_id|>\n\n");
    out.push_str(content);
    out.push_str(END_OF_TURN);
}

/// Render the full prompt. `history` should already contain the current
/// user message as its last turn.
pub fn build_prompt(
    persona: &Persona,
    user_name: &str,
    facts: &[String],
    lang: &str,
    history: &[Turn],
) -> String {
    let system = system_message(persona, user_name, facts, lang);

    let mut prompt = String::new();
    push_block(&mut prompt, Role::System, &system);
    for turn in history {
        push_block(&mut prompt, turn.role, &turn.content);
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Turn> {
        vec![
            Turn::user("hi"),
            Turn::assistant("oh, it's you again"),
            Turn::user("tell me a joke"),
        ]
    }

    #[test]
    fn test_prompt_ends_with_assistant_header() {
        let prompt = build_prompt(&Persona::default(), "Ana", &[], "en", &history());
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
        assert!(prompt.starts_with("<|start_header_id|>system<|end_header_id|>\n\n"));
    }

    #[test]
    fn test_prompt_contains_history_in_order() {
        let prompt = build_prompt(&Persona::default(), "Ana", &[], "en", &history());
        let hi = prompt.find("<|start_header_id|>user<|end_header_id|>\n\nhi<|eot_id|>").unwrap();
        let again = prompt.find("oh, it's you again<|eot_id|>").unwrap();
        let joke = prompt.find("tell me a joke<|eot_id|>").unwrap();
        assert!(hi < again && again < joke);
    }

    #[test]
    fn test_user_name_substituted() {
        let prompt = build_prompt(&Persona::default(), "Ana", &[], "en", &[]);
        assert!(prompt.contains("The user's name is Ana."));
        assert!(!prompt.contains("{user}"));
    }

    #[test]
    fn test_only_last_three_facts() {
        let facts: Vec<String> = (1..=5).map(|i| format!("I like thing {i}")).collect();
        let system = system_message(&Persona::default(), "Ana", &facts, "en");
        assert!(system.contains("Here are some things you know about the user: "));
        assert!(!system.contains("thing 1"));
        assert!(!system.contains("thing 2"));
        assert!(system.contains("\"I like thing 3\". \"I like thing 4\". \"I like thing 5\". "));
    }

    #[test]
    fn test_no_facts_no_memory_section() {
        let system = system_message(&Persona::default(), "Ana", &[], "en");
        assert!(!system.contains("things you know"));
    }

    #[test]
    fn test_spanish_directive() {
        let prompt = build_prompt(&Persona::default(), "Ana", &[], "es", &history());
        assert!(prompt.contains("In Spanish, your sarcasm should be sharp"));
        assert!(prompt.contains("You MUST reply ONLY in ES."));
    }

    #[test]
    fn test_english_has_no_directive() {
        let prompt = build_prompt(&Persona::default(), "Ana", &[], "en", &history());
        assert!(!prompt.contains("You MUST reply ONLY"));
        assert!(!prompt.contains("your sarcasm should"));
    }

    #[test]
    fn test_generic_tone_for_other_languages() {
        let system = system_message(&Persona::default(), "Ana", &[], "de");
        assert!(system.contains("In DE, keep your sarcasm playful but not too harsh."));
        assert!(system.contains("You MUST reply ONLY in DE."));
    }

    #[test]
    fn test_persona_slug() {
        assert_eq!(Persona::default().slug(), "saro");
        let persona = Persona { name: "Zoë Bot".to_string(), ..Persona::default() };
        assert_eq!(persona.slug(), "zobot");
    }
}
