//! Prompt assembly for rubric analysis
//!
//! One prompt pair per question: the group's system prompt (with the agent
//! name substituted or appended) and a user prompt embedding the dialog,
//! the question, its supporting sections and the valid answers.

use crate::models::RubricQuestion;

/// Build the system prompt for a group, injecting the agent name.
///
/// Groups may reference `{{agentName}}` explicitly; otherwise an agent
/// line is appended when a name is known.
pub fn build_system_prompt(group_prompt: &str, agent_name: Option<&str>) -> String {
    if group_prompt.contains("{{agentName}}") {
        return group_prompt.replace("{{agentName}}", agent_name.unwrap_or(""));
    }

    match agent_name {
        Some(name) => format!("{}\nAgent prowadzacy rozmowe: {}.\n", group_prompt, name),
        None => format!("{}\n", group_prompt),
    }
}

/// Build the user prompt for one question against a formatted transcript
pub fn build_user_prompt(transcript: &str, question: &RubricQuestion) -> String {
    let context_section = if question.context.is_empty() {
        String::new()
    } else {
        format!("\n<rules>\n{}\n</rules>\n", question.context)
    };

    let reference_section = match question.reference_script.as_deref() {
        Some(script) if !script.is_empty() => {
            format!("\n<reference_script>\n{}\n</reference_script>\n", script)
        }
        _ => String::new(),
    };

    let quote_list = |examples: &[String]| {
        examples
            .iter()
            .map(|e| format!("- \"{}\"", e))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let good_examples_section = if question.good_examples.is_empty() {
        String::new()
    } else {
        format!(
            "\n<examples_positive>\n{}\n</examples_positive>\n",
            quote_list(&question.good_examples)
        )
    };

    let bad_examples_section = if question.bad_examples.is_empty() {
        String::new()
    } else {
        format!(
            "\n<examples_negative>\n{}\n</examples_negative>\n",
            quote_list(&question.bad_examples)
        )
    };

    let answers = question
        .possible_answers
        .iter()
        .map(|a| format!("- {}", a))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<transcription>\n{transcript}\n</transcription>\n\n\
         <question>\n{question}\n</question>\n\
         {context_section}{reference_section}{good_examples_section}{bad_examples_section}\
         <possible_answers>\n{answers}\n</possible_answers>",
        transcript = transcript,
        question = question.question,
        context_section = context_section,
        reference_section = reference_section,
        good_examples_section = good_examples_section,
        bad_examples_section = bad_examples_section,
        answers = answers,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn question() -> RubricQuestion {
        RubricQuestion {
            question_id: "q1".to_string(),
            group_id: Uuid::new_v4(),
            question: "Czy agent sie przedstawil?".to_string(),
            context: "Agent musi podac imie.".to_string(),
            reference_script: Some("Dzien dobry, nazywam sie...".to_string()),
            good_examples: vec!["Dzien dobry, Jan Kowalski".to_string()],
            bad_examples: vec!["Halo?".to_string()],
            possible_answers: vec!["Tak".to_string(), "Nie".to_string()],
            sort_order: 1,
            is_active: true,
        }
    }

    #[test]
    fn test_system_prompt_placeholder_substitution() {
        let prompt = build_system_prompt("Oceniasz prace agenta {{agentName}}.", Some("Jan"));
        assert_eq!(prompt, "Oceniasz prace agenta Jan.");

        let prompt = build_system_prompt("Oceniasz prace agenta {{agentName}}.", None);
        assert_eq!(prompt, "Oceniasz prace agenta .");
    }

    #[test]
    fn test_system_prompt_appends_agent_line() {
        let prompt = build_system_prompt("Jestes audytorem.", Some("Jan"));
        assert!(prompt.starts_with("Jestes audytorem.\n"));
        assert!(prompt.contains("Agent prowadzacy rozmowe: Jan."));
    }

    #[test]
    fn test_user_prompt_sections() {
        let prompt = build_user_prompt("[Speaker 0]: Dzien dobry", &question());

        assert!(prompt.starts_with("<transcription>\n[Speaker 0]: Dzien dobry\n</transcription>"));
        assert!(prompt.contains("<question>\nCzy agent sie przedstawil?\n</question>"));
        assert!(prompt.contains("<rules>\nAgent musi podac imie.\n</rules>"));
        assert!(prompt.contains("<reference_script>"));
        assert!(prompt.contains("- \"Dzien dobry, Jan Kowalski\""));
        assert!(prompt.contains("- \"Halo?\""));
        assert!(prompt.ends_with("<possible_answers>\n- Tak\n- Nie\n</possible_answers>"));
    }

    #[test]
    fn test_user_prompt_omits_empty_sections() {
        let mut q = question();
        q.context = String::new();
        q.reference_script = None;
        q.good_examples.clear();
        q.bad_examples.clear();

        let prompt = build_user_prompt("text", &q);
        assert!(!prompt.contains("<rules>"));
        assert!(!prompt.contains("<reference_script>"));
        assert!(!prompt.contains("<examples_positive>"));
        assert!(!prompt.contains("<examples_negative>"));
    }
}
