use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn path_intent(raw: &str, arg: &str) -> Intent {
    let mut intent = Intent::new("analyze", raw);
    intent.command_args.insert(
        "path".to_string(),
        Value::String(parse_single_path_arg(arg)),
    );
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "set_provider" {
                    "provider"
                } else {
                    "model"
                };
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert(key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if find_action(&command, SINGLE_PATH_COMMANDS).is_some() {
                return path_intent(text, arg);
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if remainder.starts_with(['/', '.']) {
                return path_intent(text, raw_trimmed);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    path_intent(text, raw_trimmed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_analyze_basic() {
        let intent = parse_intent("/analyze photo.jpg");
        assert_eq!(intent.action, "analyze");
        assert_eq!(intent.command_args["path"], json!("photo.jpg"));
        assert_eq!(intent.arg_str("path"), Some("photo.jpg"));
    }

    #[test]
    fn parse_analyze_quoted_path() {
        let intent = parse_intent("/check \"/tmp/holiday shot.png\"");
        assert_eq!(intent.action, "analyze");
        assert_eq!(intent.command_args["path"], json!("/tmp/holiday shot.png"));
    }

    #[test]
    fn bare_text_is_a_path() {
        let intent = parse_intent("  ./samples/cat.webp  ");
        assert_eq!(intent.action, "analyze");
        assert_eq!(intent.command_args["path"], json!("./samples/cat.webp"));
    }

    #[test]
    fn absolute_paths_are_not_commands() {
        let nested = parse_intent("/tmp/a.png");
        assert_eq!(nested.action, "analyze");
        assert_eq!(nested.command_args["path"], json!("/tmp/a.png"));

        let root = parse_intent("/photo.jpg");
        assert_eq!(root.action, "analyze");
        assert_eq!(root.command_args["path"], json!("/photo.jpg"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/wait").action, "wait");
        assert_eq!(parse_intent("/show").action, "show");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/retry").action, "retry");
        assert_eq!(parse_intent("/HELP").action, "help");
        assert_eq!(parse_intent("/exit").action, "quit");
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_model_and_provider_commands() {
        let model = parse_intent("/model gemini-2.5-pro");
        assert_eq!(model.action, "set_model");
        assert_eq!(model.arg_str("model"), Some("gemini-2.5-pro"));

        let provider = parse_intent("/provider dryrun");
        assert_eq!(provider.action, "set_provider");
        assert_eq!(provider.arg_str("provider"), Some("dryrun"));

        let empty = parse_intent("/model");
        assert_eq!(empty.arg_str("model"), None);
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
