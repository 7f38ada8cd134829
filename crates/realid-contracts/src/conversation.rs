use crate::request::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub images: Vec<EncodedImage>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn model(content: impl Into<String>, images: Vec<EncodedImage>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            images,
        }
    }
}

/// Full visible chat history at one point in time.
///
/// Snapshots are never edited; [`ConversationSnapshot::append`] returns a new
/// value and leaves the receiver untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationSnapshot {
    turns: Vec<ChatTurn>,
}

impl ConversationSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Self { turns }
    }

    pub fn append(&self, turn: ChatTurn) -> Self {
        let mut turns = self.turns.clone();
        turns.push(turn);
        Self { turns }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }
}

/// Picks the image the next edit should start from.
///
/// The last image of the last model turn that carries images wins; without
/// one the initially selected candidate is used.
pub fn resolve_reference(
    initial_selection: Option<&EncodedImage>,
    snapshot: &ConversationSnapshot,
) -> Option<EncodedImage> {
    snapshot
        .turns()
        .iter()
        .rev()
        .find(|turn| turn.role == Role::Model && !turn.images.is_empty())
        .and_then(|turn| turn.images.last())
        .or(initial_selection)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> EncodedImage {
        EncodedImage::png(tag)
    }

    #[test]
    fn resolves_last_image_of_last_image_bearing_model_turn() {
        let snapshot = ConversationSnapshot::from_turns(vec![
            ChatTurn::user("make it warmer"),
            ChatTurn::model("Here is the result:", vec![image("x"), image("y")]),
            ChatTurn::user("now add a hat"),
            ChatTurn::model("Here is the result:", Vec::new()),
        ]);
        let resolved = resolve_reference(Some(&image("s0")), &snapshot);
        assert_eq!(resolved, Some(image("y")));
    }

    #[test]
    fn falls_back_to_initial_selection() {
        let snapshot = ConversationSnapshot::empty().append(ChatTurn::user("hello"));
        assert_eq!(
            resolve_reference(Some(&image("s0")), &snapshot),
            Some(image("s0"))
        );
    }

    #[test]
    fn user_turn_images_are_not_lineage() {
        let mut turn = ChatTurn::user("use this");
        turn.images.push(image("uploaded"));
        let snapshot = ConversationSnapshot::from_turns(vec![turn]);
        assert_eq!(
            resolve_reference(Some(&image("s0")), &snapshot),
            Some(image("s0"))
        );
    }

    #[test]
    fn nothing_to_resolve_without_selection() {
        let snapshot = ConversationSnapshot::empty().append(ChatTurn::user("hello"));
        assert_eq!(resolve_reference(None, &snapshot), None);
    }

    #[test]
    fn append_leaves_original_snapshot_untouched() {
        let base = ConversationSnapshot::empty().append(ChatTurn::user("one"));
        let next = base.append(ChatTurn::user("two"));
        assert_eq!(base.len(), 1);
        assert_eq!(next.len(), 2);
    }
}
