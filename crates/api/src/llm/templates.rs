//! Fixed system prompts per tool

use std::borrow::Cow;

use metamind_shared::ToolType;

const V0_PROMPT: &str = "You are an expert in V0 AI design tool. Based on the user's product idea, create a detailed prompt that they can use with V0 to generate their desired UI design. Include specific layout suggestions, component recommendations, and styling preferences. Format the prompt to be directly usable in V0. Do not include any introductory or concluding paragraphs.";

const CURSOR_PROMPT: &str = "You are an expert in Cursor AI coding tool. Based on the user's product idea, create a detailed prompt that they can use with Cursor to develop their application. Include specific technical requirements, architecture suggestions, and implementation details. Format the prompt to be directly usable with Cursor's /edit or /chat commands. Do not include any introductory or concluding paragraphs.";

const BOLT_PROMPT: &str = "You are an expert in Bolt AI development tool. Based on the user's product idea, create a detailed prompt that they can use with Bolt to build their application. Include specific feature requirements, technical specifications, and implementation guidance. Format the prompt to be directly usable in Bolt. Do not include any introductory or concluding paragraphs.";

const TEMPO_PROMPT: &str = "You are an expert in Tempo AI development platform. Based on the user's product idea, create a detailed prompt that they can use with Tempo to build their application. Include specific component structures, styling preferences, and functionality details. Format the prompt to be directly usable in Tempo's chat interface. Do not include any introductory or concluding paragraphs.";

const LOVABLE_PROMPT: &str = "You are an expert in Lovable AI design tool. Based on the user's product idea, create a detailed prompt that they can use with Lovable to design their application. Include specific UI/UX requirements, design system recommendations, and visual style guidelines. Format the prompt to be directly usable in Lovable's interface. Do not include any introductory or concluding paragraphs.";

pub fn system_prompt(tool: ToolType) -> &'static str {
    match tool {
        ToolType::V0 => V0_PROMPT,
        ToolType::Cursor => CURSOR_PROMPT,
        ToolType::Bolt => BOLT_PROMPT,
        ToolType::Tempo => TEMPO_PROMPT,
        ToolType::Lovable => LOVABLE_PROMPT,
    }
}

/// System prompt for a tool named by the caller; unknown names get the generic one
pub fn system_prompt_for_name(name: &str) -> Cow<'static, str> {
    match name.parse::<ToolType>() {
        Ok(tool) => Cow::Borrowed(system_prompt(tool)),
        Err(_) => Cow::Owned(format!(
            "You are an expert in {} AI tool. Create a detailed prompt based on the user's product idea. Do not include any introductory or concluding paragraphs.",
            name.trim()
        )),
    }
}

pub fn user_prompt(tool: ToolType, idea: &str) -> String {
    format!(
        "Create a detailed prompt for {} based on this product idea: {}. Include feature list, functionality details, and specific implementation guidance. Format your response with markdown for better readability.",
        tool, idea
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tool_has_its_own_prompt() {
        for tool in ToolType::ALL {
            assert!(system_prompt(tool).contains(tool.as_str()));
        }
    }

    #[test]
    fn test_name_lookup_is_case_insensitive() {
        assert_eq!(system_prompt_for_name("cursor"), system_prompt(ToolType::Cursor));
    }

    #[test]
    fn test_unknown_tool_gets_generic_prompt() {
        let prompt = system_prompt_for_name("Replit");
        assert!(prompt.starts_with("You are an expert in Replit AI tool."));
    }

    #[test]
    fn test_user_prompt_mentions_tool_and_idea() {
        let prompt = user_prompt(ToolType::Bolt, "a recipe sharing app");
        assert!(prompt.contains("for Bolt"));
        assert!(prompt.contains("a recipe sharing app"));
    }
}
