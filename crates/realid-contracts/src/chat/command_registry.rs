#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is free text for a form field.
pub(crate) const TEXT_FIELD_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
    CommandSpec {
        command: "location",
        action: "set_location",
    },
    CommandSpec {
        command: "outfit",
        action: "set_outfit",
    },
    CommandSpec {
        command: "body",
        action: "set_body",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "subject",
        action: "set_subject_image",
    },
    CommandSpec {
        command: "location_image",
        action: "set_location_image",
    },
    CommandSpec {
        command: "outfit_image",
        action: "set_outfit_image",
    },
];

/// Commands taking one short token (`/count 3`, `/ratio 9:16`).
pub(crate) const VALUE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "camera",
        action: "set_camera",
    },
    CommandSpec {
        command: "ratio",
        action: "set_ratio",
    },
    CommandSpec {
        command: "count",
        action: "set_count",
    },
    CommandSpec {
        command: "select",
        action: "select",
    },
    CommandSpec {
        command: "save",
        action: "save",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "regen",
        action: "regenerate",
    },
    CommandSpec {
        command: "regenerate",
        action: "regenerate",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
    },
    CommandSpec {
        command: "back",
        action: "back",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss_error",
    },
    CommandSpec {
        command: "form",
        action: "show_form",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/subject",
    "/location_image",
    "/outfit_image",
    "/prompt",
    "/location",
    "/outfit",
    "/body",
    "/camera",
    "/ratio",
    "/count",
    "/form",
    "/generate",
    "/regen",
    "/select",
    "/undo",
    "/redo",
    "/back",
    "/history",
    "/save",
    "/dismiss",
    "/quit",
];
