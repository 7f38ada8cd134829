use thiserror::Error;

use crate::conversation::{resolve_reference, ChatTurn, ConversationSnapshot};
use crate::error::StudioError;
use crate::history::HistoryStack;
use crate::request::{EncodedImage, GenerationRequestSpec};

pub const MODEL_REPLY_TEXT: &str = "Here is the result:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Composing,
    Editing,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Editing => "editing",
        }
    }
}

/// Identifies one in-flight fan-out batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchTicket(u64);

impl BatchTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub reference: EncodedImage,
    pub instruction: String,
    pub identity_reference: Option<EncodedImage>,
    pub context: Option<GenerationRequestSpec>,
}

/// Backend work requested by a transition. The caller performs it and feeds
/// the outcome back as a `*Finished` event carrying the same ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Generate {
        ticket: BatchTicket,
        spec: GenerationRequestSpec,
    },
    Edit {
        ticket: BatchTicket,
        request: EditRequest,
    },
}

impl Effect {
    pub fn ticket(&self) -> BatchTicket {
        match self {
            Self::Generate { ticket, .. } | Self::Edit { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Submit(GenerationRequestSpec),
    Regenerate,
    Select(usize),
    Send(String),
    Undo,
    Redo,
    Back,
    DismissError,
    GenerationFinished {
        ticket: BatchTicket,
        result: Result<Vec<EncodedImage>, StudioError>,
    },
    EditFinished {
        ticket: BatchTicket,
        result: Result<Vec<EncodedImage>, StudioError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("a generation or edit is already in progress")]
    Busy,
    #[error("not available in the {0} step")]
    WrongStep(&'static str),
    #[error("nothing has been submitted yet")]
    NoSavedRequest,
    #[error("there is no candidate #{}", .0 + 1)]
    NoSuchCandidate(usize),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("message is empty")]
    EmptyMessage,
    #[error("result belongs to an abandoned or unknown batch")]
    StaleResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Changed,
    Rejected(Rejection),
    Dispatch(Effect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    /// Drop the optimistic user turn when its edit fails.
    pub rollback_failed_edits: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum PendingWork {
    Generate,
    Edit {
        optimistic: ConversationSnapshot,
        before_send: ConversationSnapshot,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct InFlight {
    ticket: BatchTicket,
    work: PendingWork,
    abandoned: bool,
}

/// Single owned state of one studio session, driven by [`SessionState::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    step: Step,
    error: Option<StudioError>,
    candidates: Vec<EncodedImage>,
    selected: Option<EncodedImage>,
    visible: ConversationSnapshot,
    history: HistoryStack,
    saved_spec: Option<GenerationRequestSpec>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    options: SessionOptions,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl SessionState {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            step: Step::Composing,
            error: None,
            candidates: Vec::new(),
            selected: None,
            visible: ConversationSnapshot::empty(),
            history: HistoryStack::new(),
            saved_spec: None,
            in_flight: None,
            next_ticket: 1,
            options,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn error(&self) -> Option<&StudioError> {
        self.error.as_ref()
    }

    pub fn candidates(&self) -> &[EncodedImage] {
        &self.candidates
    }

    pub fn selected(&self) -> Option<&EncodedImage> {
        self.selected.as_ref()
    }

    pub fn visible(&self) -> &ConversationSnapshot {
        &self.visible
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn saved_spec(&self) -> Option<&GenerationRequestSpec> {
        self.saved_spec.as_ref()
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn can_undo(&self) -> bool {
        !self.is_loading() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_loading() && self.history.can_redo()
    }

    /// Image the next edit would start from, if any.
    pub fn current_reference(&self) -> Option<EncodedImage> {
        resolve_reference(self.selected.as_ref(), &self.visible)
    }

    pub fn apply(&mut self, event: SessionEvent) -> Transition {
        match event {
            SessionEvent::Submit(spec) => self.submit(spec),
            SessionEvent::Regenerate => self.regenerate(),
            SessionEvent::Select(index) => self.select(index),
            SessionEvent::Send(message) => self.send(message),
            SessionEvent::Undo => self.move_cursor(true),
            SessionEvent::Redo => self.move_cursor(false),
            SessionEvent::Back => self.back(),
            SessionEvent::DismissError => {
                self.error = None;
                Transition::Changed
            }
            SessionEvent::GenerationFinished { ticket, result } => {
                self.finish_generation(ticket, result)
            }
            SessionEvent::EditFinished { ticket, result } => self.finish_edit(ticket, result),
        }
    }

    fn submit(&mut self, spec: GenerationRequestSpec) -> Transition {
        if let Some(rejection) = self.guard(Step::Composing) {
            return Transition::Rejected(rejection);
        }
        if let Err(err) = spec.validate() {
            self.error = Some(err);
            return Transition::Changed;
        }
        self.saved_spec = Some(spec.clone());
        self.dispatch_generation(spec)
    }

    fn regenerate(&mut self) -> Transition {
        if let Some(rejection) = self.guard(Step::Composing) {
            return Transition::Rejected(rejection);
        }
        let Some(spec) = self.saved_spec.clone() else {
            return Transition::Rejected(Rejection::NoSavedRequest);
        };
        self.dispatch_generation(spec)
    }

    fn dispatch_generation(&mut self, spec: GenerationRequestSpec) -> Transition {
        let ticket = self.start_batch(PendingWork::Generate);
        self.error = None;
        Transition::Dispatch(Effect::Generate { ticket, spec })
    }

    fn select(&mut self, index: usize) -> Transition {
        if let Some(rejection) = self.guard(Step::Composing) {
            return Transition::Rejected(rejection);
        }
        let Some(image) = self.candidates.get(index).cloned() else {
            return Transition::Rejected(Rejection::NoSuchCandidate(index));
        };
        self.step = Step::Editing;
        self.selected = Some(image);
        self.visible = ConversationSnapshot::empty();
        self.history.reset();
        Transition::Changed
    }

    fn send(&mut self, message: String) -> Transition {
        if let Some(rejection) = self.guard(Step::Editing) {
            return Transition::Rejected(rejection);
        }
        let instruction = message.trim();
        if instruction.is_empty() {
            return Transition::Rejected(Rejection::EmptyMessage);
        }

        let before_send = self.visible.clone();
        let optimistic = self.visible.append(ChatTurn::user(instruction));
        self.visible = optimistic.clone();

        let Some(reference) = resolve_reference(self.selected.as_ref(), &optimistic) else {
            self.error = Some(StudioError::MissingReference);
            if self.options.rollback_failed_edits {
                self.visible = before_send;
            }
            return Transition::Changed;
        };

        let request = EditRequest {
            reference,
            instruction: instruction.to_string(),
            identity_reference: self
                .saved_spec
                .as_ref()
                .and_then(|spec| spec.subject_image.clone()),
            context: self.saved_spec.clone(),
        };
        let ticket = self.start_batch(PendingWork::Edit {
            optimistic,
            before_send,
        });
        self.error = None;
        Transition::Dispatch(Effect::Edit { ticket, request })
    }

    fn move_cursor(&mut self, backward: bool) -> Transition {
        if let Some(rejection) = self.guard(Step::Editing) {
            return Transition::Rejected(rejection);
        }
        let moved = if backward {
            self.history.undo()
        } else {
            self.history.redo()
        };
        if !moved {
            return Transition::Rejected(if backward {
                Rejection::NothingToUndo
            } else {
                Rejection::NothingToRedo
            });
        }
        self.visible = self.history.current().clone();
        Transition::Changed
    }

    fn back(&mut self) -> Transition {
        if self.step != Step::Editing {
            return Transition::Rejected(Rejection::WrongStep(self.step.as_str()));
        }
        self.step = Step::Composing;
        self.selected = None;
        self.visible = ConversationSnapshot::empty();
        self.history.reset();
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.abandoned = true;
        }
        Transition::Changed
    }

    fn finish_generation(
        &mut self,
        ticket: BatchTicket,
        result: Result<Vec<EncodedImage>, StudioError>,
    ) -> Transition {
        let Some(in_flight) = self.take_in_flight(ticket) else {
            return Transition::Rejected(Rejection::StaleResult);
        };
        if in_flight.abandoned || in_flight.work != PendingWork::Generate {
            return Transition::Rejected(Rejection::StaleResult);
        }
        match result {
            Ok(images) => self.candidates = images,
            Err(err) => self.error = Some(err),
        }
        Transition::Changed
    }

    fn finish_edit(
        &mut self,
        ticket: BatchTicket,
        result: Result<Vec<EncodedImage>, StudioError>,
    ) -> Transition {
        let Some(in_flight) = self.take_in_flight(ticket) else {
            return Transition::Rejected(Rejection::StaleResult);
        };
        let PendingWork::Edit {
            optimistic,
            before_send,
        } = in_flight.work
        else {
            return Transition::Rejected(Rejection::StaleResult);
        };
        if in_flight.abandoned {
            return Transition::Rejected(Rejection::StaleResult);
        }
        match result {
            Ok(images) => {
                let committed = optimistic.append(ChatTurn::model(MODEL_REPLY_TEXT, images));
                self.history.commit(committed.clone());
                self.visible = committed;
            }
            Err(err) => {
                self.error = Some(err);
                if self.options.rollback_failed_edits {
                    self.visible = before_send;
                }
            }
        }
        Transition::Changed
    }

    fn guard(&self, required: Step) -> Option<Rejection> {
        if self.is_loading() {
            return Some(Rejection::Busy);
        }
        if self.step != required {
            return Some(Rejection::WrongStep(self.step.as_str()));
        }
        None
    }

    fn start_batch(&mut self, work: PendingWork) -> BatchTicket {
        let ticket = BatchTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(InFlight {
            ticket,
            work,
            abandoned: false,
        });
        ticket
    }

    /// Releases the loading flag when `ticket` is the outstanding batch.
    fn take_in_flight(&mut self, ticket: BatchTicket) -> Option<InFlight> {
        if self.in_flight.as_ref().map(|pending| pending.ticket) != Some(ticket) {
            return None;
        }
        self.in_flight.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> EncodedImage {
        EncodedImage::png(tag)
    }

    fn spec() -> GenerationRequestSpec {
        GenerationRequestSpec::with_subject(EncodedImage::new("image/jpeg", "subject"))
    }

    fn expect_effect(transition: Transition) -> Effect {
        match transition {
            Transition::Dispatch(effect) => effect,
            other => panic!("expected effect, got {other:?}"),
        }
    }

    /// Session in the editing step with candidate `c0` selected.
    fn editing_session(options: SessionOptions) -> SessionState {
        let mut state = SessionState::new(options);
        let effect = expect_effect(state.apply(SessionEvent::Submit(spec())));
        state.apply(SessionEvent::GenerationFinished {
            ticket: effect.ticket(),
            result: Ok(vec![image("c0"), image("c1")]),
        });
        assert_eq!(state.apply(SessionEvent::Select(0)), Transition::Changed);
        state
    }

    fn edit_ok(state: &mut SessionState, message: &str, output: &str) {
        let effect = expect_effect(state.apply(SessionEvent::Send(message.to_string())));
        state.apply(SessionEvent::EditFinished {
            ticket: effect.ticket(),
            result: Ok(vec![image(output)]),
        });
    }

    #[test]
    fn submit_with_missing_subject_sets_input_error_without_dispatch() {
        let mut state = SessionState::default();
        let transition = state.apply(SessionEvent::Submit(GenerationRequestSpec::default()));
        assert_eq!(transition, Transition::Changed);
        assert!(matches!(state.error(), Some(StudioError::Input(_))));
        assert!(!state.is_loading());
        assert!(state.saved_spec().is_none());
    }

    #[test]
    fn generation_success_replaces_candidates_and_failure_keeps_them() {
        let mut state = SessionState::default();
        let effect = expect_effect(state.apply(SessionEvent::Submit(spec())));
        assert!(state.is_loading());
        state.apply(SessionEvent::GenerationFinished {
            ticket: effect.ticket(),
            result: Ok(vec![image("a"), image("b")]),
        });
        assert_eq!(state.candidates(), &[image("a"), image("b")]);

        let effect = expect_effect(state.apply(SessionEvent::Regenerate));
        assert!(matches!(&effect, Effect::Generate { spec: saved, .. } if *saved == spec()));
        state.apply(SessionEvent::GenerationFinished {
            ticket: effect.ticket(),
            result: Err(StudioError::Batch("Image 1 error: boom".to_string())),
        });
        assert_eq!(state.candidates(), &[image("a"), image("b")]);
        assert_eq!(
            state.error().map(ToString::to_string).as_deref(),
            Some("Image 1 error: boom")
        );
        assert!(!state.is_loading());
    }

    #[test]
    fn regenerate_requires_a_saved_request() {
        let mut state = SessionState::default();
        assert_eq!(
            state.apply(SessionEvent::Regenerate),
            Transition::Rejected(Rejection::NoSavedRequest)
        );
    }

    #[test]
    fn resubmission_is_rejected_while_loading() {
        let mut state = SessionState::default();
        expect_effect(state.apply(SessionEvent::Submit(spec())));
        assert_eq!(
            state.apply(SessionEvent::Submit(spec())),
            Transition::Rejected(Rejection::Busy)
        );
        assert_eq!(
            state.apply(SessionEvent::Regenerate),
            Transition::Rejected(Rejection::Busy)
        );
    }

    #[test]
    fn select_rejects_unknown_candidate() {
        let mut state = SessionState::default();
        assert_eq!(
            state.apply(SessionEvent::Select(3)),
            Transition::Rejected(Rejection::NoSuchCandidate(3))
        );
        assert_eq!(state.step(), Step::Composing);
    }

    #[test]
    fn send_resolves_reference_and_passes_identity_context() {
        let mut state = editing_session(SessionOptions::default());
        let effect = expect_effect(state.apply(SessionEvent::Send("make it warmer".to_string())));
        let Effect::Edit { request, .. } = effect else {
            panic!("expected edit effect");
        };
        assert_eq!(request.reference, image("c0"));
        assert_eq!(request.instruction, "make it warmer");
        assert_eq!(
            request.identity_reference,
            Some(EncodedImage::new("image/jpeg", "subject"))
        );
        assert_eq!(request.context, Some(spec()));
        assert_eq!(state.visible().len(), 1);
    }

    #[test]
    fn successful_edit_commits_and_becomes_next_reference() {
        let mut state = editing_session(SessionOptions::default());
        edit_ok(&mut state, "make it warmer", "e1");
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history().cursor(), 1);
        assert_eq!(state.visible(), state.history().current());
        assert_eq!(state.visible().len(), 2);
        assert_eq!(state.current_reference(), Some(image("e1")));
    }

    #[test]
    fn failed_edit_keeps_optimistic_turn_without_committing() {
        let mut state = editing_session(SessionOptions::default());
        edit_ok(&mut state, "make it warmer", "e1");
        let effect = expect_effect(state.apply(SessionEvent::Send("add a hat".to_string())));
        state.apply(SessionEvent::EditFinished {
            ticket: effect.ticket(),
            result: Err(StudioError::Batch("Image edit failed.".to_string())),
        });

        assert_eq!(state.history().len(), 2);
        assert_eq!(state.visible().len(), 3);
        assert_eq!(
            state.visible().last_turn().map(|turn| turn.content.as_str()),
            Some("add a hat")
        );
        assert_ne!(state.visible(), state.history().current());
        assert!(state.error().is_some());

        // Undo resynchronises the visible history with the stack.
        assert_eq!(state.apply(SessionEvent::Undo), Transition::Changed);
        assert!(state.visible().is_empty());
    }

    #[test]
    fn failed_edit_rolls_back_when_configured() {
        let mut state = editing_session(SessionOptions {
            rollback_failed_edits: true,
        });
        let effect = expect_effect(state.apply(SessionEvent::Send("add a hat".to_string())));
        state.apply(SessionEvent::EditFinished {
            ticket: effect.ticket(),
            result: Err(StudioError::Batch("Image edit failed.".to_string())),
        });
        assert!(state.visible().is_empty());
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn undo_redo_are_rejected_while_loading() {
        let mut state = editing_session(SessionOptions::default());
        edit_ok(&mut state, "make it warmer", "e1");
        expect_effect(state.apply(SessionEvent::Send("add a hat".to_string())));
        assert!(!state.can_undo());
        assert_eq!(
            state.apply(SessionEvent::Undo),
            Transition::Rejected(Rejection::Busy)
        );
        assert_eq!(
            state.apply(SessionEvent::Redo),
            Transition::Rejected(Rejection::Busy)
        );
        assert_eq!(state.history().cursor(), 1);
    }

    #[test]
    fn commit_after_undo_drops_redo_branch() {
        let mut state = editing_session(SessionOptions::default());
        edit_ok(&mut state, "one", "e1");
        edit_ok(&mut state, "two", "e2");
        assert_eq!(state.history().len(), 3);

        assert_eq!(state.apply(SessionEvent::Undo), Transition::Changed);
        assert_eq!(state.current_reference(), Some(image("e1")));
        edit_ok(&mut state, "three", "e3");

        assert_eq!(state.history().len(), 3);
        assert_eq!(state.history().cursor(), 2);
        assert_eq!(
            state.apply(SessionEvent::Redo),
            Transition::Rejected(Rejection::NothingToRedo)
        );
        assert_eq!(state.current_reference(), Some(image("e3")));
    }

    #[test]
    fn back_resets_history_and_ignores_stale_edit_result() {
        let mut state = editing_session(SessionOptions::default());
        let effect = expect_effect(state.apply(SessionEvent::Send("add a hat".to_string())));
        assert_eq!(state.apply(SessionEvent::Back), Transition::Changed);
        assert_eq!(state.step(), Step::Composing);
        assert!(state.selected().is_none());
        assert_eq!(state.history(), &HistoryStack::new());
        assert!(state.is_loading());

        let transition = state.apply(SessionEvent::EditFinished {
            ticket: effect.ticket(),
            result: Ok(vec![image("late")]),
        });
        assert_eq!(transition, Transition::Rejected(Rejection::StaleResult));
        assert!(!state.is_loading());
        assert!(state.visible().is_empty());
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.candidates(), &[image("c0"), image("c1")]);
    }

    #[test]
    fn unknown_ticket_is_ignored() {
        let mut state = SessionState::default();
        let effect = expect_effect(state.apply(SessionEvent::Submit(spec())));
        let transition = state.apply(SessionEvent::GenerationFinished {
            ticket: BatchTicket(effect.ticket().id() + 10),
            result: Ok(vec![image("x")]),
        });
        assert_eq!(transition, Transition::Rejected(Rejection::StaleResult));
        assert!(state.is_loading());
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn missing_reference_is_reported_without_dispatch() {
        let mut state = editing_session(SessionOptions::default());
        state.selected = None;
        let transition = state.apply(SessionEvent::Send("add a hat".to_string()));
        assert_eq!(transition, Transition::Changed);
        assert_eq!(state.error(), Some(&StudioError::MissingReference));
        assert!(!state.is_loading());
    }

    #[test]
    fn dismiss_clears_error_only() {
        let mut state = SessionState::default();
        state.apply(SessionEvent::Submit(GenerationRequestSpec::default()));
        assert!(state.error().is_some());
        state.apply(SessionEvent::DismissError);
        assert!(state.error().is_none());
        assert_eq!(state.step(), Step::Composing);
    }
}
