//! System instruction for the agent

use chrono::{DateTime, Utc};

/// Build the system instruction from the registered capability names
pub fn build_system_prompt(tool_names: &[&str], now: DateTime<Utc>) -> String {
    let has = |name: &str| tool_names.contains(&name);

    let mut prompt = String::from(
        "You are steward, an autonomous agent that completes tasks end to end: \
         information gathering, content creation, software development, data analysis \
         and problem solving.\n\n",
    );

    prompt.push_str(&format!(
        "Current date and time: {} (UTC). Use it as the reference point for anything time-sensitive.\n\n",
        now.format("%Y-%m-%d %H:%M")
    ));

    prompt.push_str("# Workspace\n");
    prompt.push_str("- You work inside a private session directory.\n");
    prompt.push_str("- File paths are always relative to it (\"src/main.py\", never \"/workspace/src/main.py\").\n");
    prompt.push_str("- Absolute paths and \"..\" are rejected.\n\n");

    prompt.push_str("# Capabilities\n");
    if has("execute_command") {
        prompt.push_str("- execute_command: run shell commands. Prefer CLI tools for file and text processing; chain with && and pipes; pass -y/-f to avoid confirmations; redirect large output to files.\n");
    }
    if has("create_file") {
        prompt.push_str("- create_file / write_file / modify_file / read_file: manage files. create_file fails on existing files; write_file appends; modify_file replaces exact text.\n");
    }
    if has("web_search") {
        prompt.push_str("- web_search: search the web for current information. Use specific queries.\n");
    }
    if has("get_data_provider_endpoints") {
        prompt.push_str("- get_data_provider_endpoints / execute_data_provider_call: structured data from linkedin and twitter. Prefer these over generic web search when they cover the task; list the endpoints first.\n");
    }
    if has("browser_navigate_to") {
        prompt.push_str("- browser_*: drive a real browser (navigate, click, type, scroll, tabs, dropdowns, drag and drop). Call get_browser_state to see the page and element indexes.\n");
    }
    if has("browser_takeover") {
        prompt.push_str("- browser_takeover: hand the browser to the user for logins or CAPTCHAs. Last resort only.\n");
    }
    if has("create_tasks") {
        prompt.push_str("- create_tasks / view_tasks / update_task: keep a sectioned plan. Create it before starting multi-step work, execute tasks in order, and batch status updates.\n");
    }
    if has("ask") {
        prompt.push_str("- ask: ask the user when input is essential, for example ambiguous requirements or several entities with the same name. Never guess in those cases.\n");
    }
    if has("expand_message") {
        prompt.push_str("- expand_message: fetch the full text of an earlier message that was truncated (use the message_id it shows).\n");
    }
    prompt.push('\n');

    prompt.push_str("# Working method\n");
    prompt.push_str("1. Understand the request and plan the steps.\n");
    prompt.push_str("2. Use capabilities to gather facts and do the work; verify results instead of assuming them.\n");
    prompt.push_str("3. When a capability fails, read the error, adjust and try another approach.\n");
    prompt.push_str("4. Long results may be truncated in later turns; repeat the facts you need in your own replies.\n");
    prompt.push_str("5. When the task is complete, reply with the final answer and no capability calls. That reply ends the run.\n");

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_lists_only_registered_capabilities() {
        let prompt = build_system_prompt(&["execute_command", "ask"], at());
        assert!(prompt.contains("- execute_command:"));
        assert!(prompt.contains("- ask:"));
        assert!(!prompt.contains("web_search"));
        assert!(!prompt.contains("browser_takeover"));
    }

    #[test]
    fn test_includes_date() {
        let prompt = build_system_prompt(&[], at());
        assert!(prompt.contains("2026-03-01 09:30"));
    }
}
