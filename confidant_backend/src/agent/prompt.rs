//! System prompt assembly for each turn.

use crate::persona::traits::TraitStore;
use crate::persona::Persona;
use crate::sidecar::ConversationWarning;

const RELATIONSHIP_GUIDANCE: &str = "\
RELATIONSHIP MEMORY:
You have tools for remembering details about people the user mentions. Use them naturally:

- When someone new is mentioned, add a note about them with basic information
- When you learn something new about someone, add another note
- When someone comes up again, recall what you know about them without announcing it
- Don't say you are \"checking notes\" or \"looking up information\"
- You can acknowledge that you remember someone if asked directly
- Family, friends, colleagues, pets and therapists all count

Examples:
- User mentions \"My therapist Mervin\" -> add a note for Mervin as therapist
- User asks \"Do you remember Sarah?\" -> \"Yes, she got promoted recently, right?\"

Remember people the way a good friend would.
";

const CLOSING_GUIDANCE: &str = "\
Keep responses concise and grounded. Your role is to help the user move forward and grow.

Pay attention to user feedback and be willing to adjust your approach when it's not working.
";

/// Profile, live modifier values, tool guidance, style, and any sidecar warning.
pub fn build_system_prompt(
    persona: &Persona,
    traits: &TraitStore,
    warning: Option<&ConversationWarning>,
) -> String {
    let mut prompt = persona.build_profile(traits);

    prompt.push_str("CURRENT MODIFIER VALUES:\n");
    for (modifier, value) in traits.values() {
        prompt.push_str(&format!("- {}: {}\n", modifier, value));
    }
    prompt.push_str("\nUse these current values when calculating absolute adjustments.\n\n");

    prompt.push_str(RELATIONSHIP_GUIDANCE);

    let style = &persona.personality.style;
    if !style.is_empty() {
        prompt.push_str("\nRemember to stay true to your personality:\n");
        for line in style {
            prompt.push_str(&format!("- {}\n", line));
        }
    }
    prompt.push('\n');
    prompt.push_str(CLOSING_GUIDANCE);

    if let Some(warning) = warning {
        prompt.push_str(&format!("\n\n[COACH WARNING] {}", warning.note));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Personality;
    use crate::sidecar::Severity;
    use chrono::Utc;
    use tempfile::TempDir;

    fn persona(dir: &TempDir) -> (Persona, TraitStore) {
        let persona = Persona {
            dir: dir.path().to_path_buf(),
            personality: Personality {
                name: "Sage".to_string(),
                description: "a calm guide.".to_string(),
                traits: vec!["patient".to_string()],
                style: vec!["Ask before advising".to_string()],
            },
        };
        let traits = persona.load_traits().unwrap();
        (persona, traits)
    }

    #[test]
    fn lists_every_modifier_value() {
        let dir = TempDir::new().unwrap();
        let (persona, mut traits) = persona(&dir);
        traits.set("warmth", 2).unwrap();

        let prompt = build_system_prompt(&persona, &traits, None);
        assert!(prompt.starts_with("You are Sage, a calm guide."));
        assert!(prompt.contains("CURRENT MODIFIER VALUES:\n- warmth: 2\n- challenge: 0\n"));
        assert!(prompt.contains("- emotional_depth: 0"));
        assert!(prompt.contains("RELATIONSHIP MEMORY:"));
        assert!(prompt.contains("- Ask before advising"));
        assert!(!prompt.contains("[COACH WARNING]"));
    }

    #[test]
    fn appends_warning_last() {
        let dir = TempDir::new().unwrap();
        let (persona, traits) = persona(&dir);
        let warning = ConversationWarning {
            note: "Negative emotional trajectory: trend=-0.29, delta=-0.80".to_string(),
            severity: Severity::Warn,
            created_at: Utc::now(),
        };

        let prompt = build_system_prompt(&persona, &traits, Some(&warning));
        assert!(prompt.ends_with(
            "\n\n[COACH WARNING] Negative emotional trajectory: trend=-0.29, delta=-0.80"
        ));
    }
}
