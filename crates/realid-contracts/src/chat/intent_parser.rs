use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS, TEXT_FIELD_COMMANDS, VALUE_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub message: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            message: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
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

/// Turns one line of studio input into an action.
///
/// Lines starting with `/name` are commands; anything else is an edit
/// message for the current image.
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
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, TEXT_FIELD_COMMANDS) {
                return Intent::new(action, text).with_arg("text", Value::String(arg.to_string()));
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(parse_single_path_arg(arg)));
            }

            if let Some(action) = find_action(&command, VALUE_COMMANDS) {
                let value = arg.split_whitespace().next().unwrap_or("");
                return Intent::new(action, text).with_arg("value", Value::String(value.to_string()));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("send", text);
    intent.message = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_an_edit_message() {
        let intent = parse_intent("  make the jacket leather  ");
        assert_eq!(intent.action, "send");
        assert_eq!(intent.message.as_deref(), Some("make the jacket leather"));
    }

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_text_field_commands_keep_full_remainder() {
        let prompt = parse_intent("/prompt mirror selfie, soft light");
        assert_eq!(prompt.action, "set_prompt");
        assert_eq!(prompt.command_args["text"], json!("mirror selfie, soft light"));

        let location = parse_intent("/location   rooftop bar at dusk ");
        assert_eq!(location.action, "set_location");
        assert_eq!(location.arg_str("text"), Some("rooftop bar at dusk"));
    }

    #[test]
    fn parse_quoted_image_paths() {
        let subject = parse_intent("/subject \"/tmp/my face.jpg\"");
        assert_eq!(subject.action, "set_subject_image");
        assert_eq!(subject.command_args["path"], json!("/tmp/my face.jpg"));

        let outfit = parse_intent("/outfit_image outfit.png");
        assert_eq!(outfit.action, "set_outfit_image");
        assert_eq!(outfit.command_args["path"], json!("outfit.png"));
    }

    #[test]
    fn parse_value_commands() {
        assert_eq!(parse_intent("/count 3").arg_str("value"), Some("3"));
        assert_eq!(parse_intent("/ratio 9:16").action, "set_ratio");
        assert_eq!(parse_intent("/select 2").action, "select");
        assert_eq!(parse_intent("/save").arg_str("value"), None);
    }

    #[test]
    fn parse_history_commands() {
        assert_eq!(parse_intent("/undo").action, "undo");
        assert_eq!(parse_intent("/REDO").action, "redo");
        assert_eq!(parse_intent("/regen").action, "regenerate");
        assert_eq!(parse_intent("/back").action, "back");
        assert_eq!(parse_intent("/dismiss").action, "dismiss_error");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn slash_without_command_name_is_a_message() {
        let intent = parse_intent("/ look left");
        assert_eq!(intent.action, "send");
        assert_eq!(intent.message.as_deref(), Some("/ look left"));
    }
}
