use crate::conversation::ConversationSnapshot;

/// Linear undo/redo stack over conversation snapshots.
///
/// `versions[0]` is always the empty snapshot and `cursor` always points at
/// an existing version. Committing after an undo drops the forward branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStack {
    versions: Vec<ConversationSnapshot>,
    cursor: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStack {
    pub fn new() -> Self {
        Self {
            versions: vec![ConversationSnapshot::empty()],
            cursor: 0,
        }
    }

    pub fn versions(&self) -> &[ConversationSnapshot] {
        &self.versions
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn current(&self) -> &ConversationSnapshot {
        &self.versions[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.versions.len()
    }

    pub fn commit(&mut self, snapshot: ConversationSnapshot) {
        self.versions.truncate(self.cursor + 1);
        self.versions.push(snapshot);
        self.cursor = self.versions.len() - 1;
    }

    /// Returns `false` and leaves the stack unchanged at the first version.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Returns `false` and leaves the stack unchanged at the last version.
    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
