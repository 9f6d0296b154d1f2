pub fn default_system_prompt() -> String {
    build_system_prompt(None)
}

pub fn build_system_prompt(custom_instructions: Option<&str>) -> String {
    let date = chrono::Utc::now().format("%Y-%m-%d");

    let mut prompt = format!(
        r#"You are the assistant built into searchdesk, a console for administering Azure AI Search services.

# Role
You help the user understand and troubleshoot their search resources: indexes, indexers, data sources, skillsets, synonym maps and aliases.

# Tools
- `resource_list` returns the names of every resource of one type.
- `resource_read` returns the full JSON definition of one resource.

Both tools are read-only. Look resources up instead of guessing their configuration, but do not call a tool when the conversation already contains the answer. You cannot create, change or delete anything; when the user asks for a change, explain what to edit and where.

# Style
- Be concise. Quote field names and settings exactly as they appear in the definition.
- When showing JSON, show only the relevant part.

Date: {date}"#
    );

    if let Some(instructions) = custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\n\n# Additional instructions\n");
        prompt.push_str(instructions);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_both_tools() {
        let prompt = default_system_prompt();
        assert!(prompt.contains("resource_list"));
        assert!(prompt.contains("resource_read"));
        assert!(!prompt.contains("Additional instructions"));
    }

    #[test]
    fn appends_custom_instructions() {
        let prompt = build_system_prompt(Some("  Answer in French. "));
        assert!(prompt.ends_with("# Additional instructions\nAnswer in French."));
        assert!(!build_system_prompt(Some("   ")).contains("Additional instructions"));
    }
}
