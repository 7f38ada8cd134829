use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use realid_contracts::conversation::Role;
use realid_contracts::events::{payload, EventWriter};
use realid_contracts::session::{
    BatchTicket, Effect, Rejection, SessionEvent, SessionOptions, SessionState, Transition,
};
use realid_contracts::{EncodedImage, StudioResult};
use serde_json::{json, Value};

use crate::files::{edit_file_stem, export_image, generation_file_stem};
use crate::orchestrator::{BatchReport, FanOutOrchestrator};
use crate::ImageBackend;

/// Drives a [`SessionState`] against a live backend.
///
/// Effects are performed synchronously inside [`Studio::dispatch`] and their
/// outcome is fed straight back into the reducer, so callers only ever see
/// settled state. Every step is recorded in the session's event log.
pub struct Studio {
    state: SessionState,
    orchestrator: FanOutOrchestrator,
    events: EventWriter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logged {
    Select,
    Undo,
    Redo,
    Back,
}

impl Studio {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        events: EventWriter,
        options: SessionOptions,
    ) -> Result<Self> {
        let studio = Self {
            state: SessionState::new(options),
            orchestrator: FanOutOrchestrator::new(backend),
            events,
        };
        studio.events.emit(
            "session_started",
            payload(json!({
                "backend": studio.orchestrator.backend_name(),
                "rollback_failed_edits": options.rollback_failed_edits,
            })),
        )?;
        Ok(studio)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Applies `event`, runs any backend work it requests and logs the
    /// result. `Err` is reserved for event-log I/O failures; the state is
    /// fully settled even then, so a broken log never leaves a batch loading.
    pub fn dispatch(&mut self, event: SessionEvent) -> Result<Transition> {
        let logged = match &event {
            SessionEvent::Select(_) => Some(Logged::Select),
            SessionEvent::Undo => Some(Logged::Undo),
            SessionEvent::Redo => Some(Logged::Redo),
            SessionEvent::Back => Some(Logged::Back),
            _ => None,
        };
        let error_before = self.state.error().cloned();
        let mut log = LogErrors::default();

        let transition = self.state.apply(event);
        match &transition {
            Transition::Dispatch(effect) => self.perform(effect.clone(), &mut log),
            Transition::Changed => {
                if let Some(logged) = logged {
                    self.log_change(logged, &mut log);
                }
            }
            Transition::Rejected(_) => {}
        }

        if let Some(error) = self.state.error() {
            if error_before.as_ref() != Some(error) {
                log.record(self.events.emit(
                    "error_raised",
                    payload(json!({
                        "kind": error.kind(),
                        "message": error.to_string(),
                    })),
                ));
            }
        }
        log.finish()?;
        Ok(transition)
    }

    fn perform(&mut self, effect: Effect, log: &mut LogErrors) {
        let ticket = effect.ticket();
        let finished = match &effect {
            Effect::Generate { spec, .. } => {
                log.record(self.events.emit(
                    "generation_requested",
                    payload(json!({
                        "ticket": ticket.id(),
                        "image_count": spec.image_count,
                        "aspect_ratio": spec.aspect_ratio,
                        "camera_mode": spec.camera_mode,
                        "subject": spec.subject_image.as_ref().map(EncodedImage::fingerprint),
                    })),
                ));
                let run = self.orchestrator.run_generation(spec);
                SessionEvent::GenerationFinished {
                    ticket,
                    result: self.settle(ticket, run, log),
                }
            }
            Effect::Edit { request, .. } => {
                log.record(self.events.emit(
                    "edit_requested",
                    payload(json!({
                        "ticket": ticket.id(),
                        "reference": request.reference.fingerprint(),
                        "instruction": request.instruction,
                        "has_identity_reference": request.identity_reference.is_some(),
                    })),
                ));
                let run = self.orchestrator.run_edit(request);
                SessionEvent::EditFinished {
                    ticket,
                    result: self.settle(ticket, run, log),
                }
            }
        };

        let succeeded = matches!(
            &finished,
            SessionEvent::GenerationFinished { result: Ok(_), .. }
                | SessionEvent::EditFinished { result: Ok(_), .. }
        );
        match self.state.apply(finished) {
            Transition::Rejected(Rejection::StaleResult) => {
                log.record(self.events.emit(
                    "stale_result_ignored",
                    payload(json!({ "ticket": ticket.id() })),
                ));
            }
            Transition::Changed if succeeded => match effect {
                Effect::Generate { .. } => {
                    log.record(self.events.emit(
                        "candidates_updated",
                        payload(json!({
                            "ticket": ticket.id(),
                            "images": fingerprints(self.state.candidates()),
                        })),
                    ));
                }
                Effect::Edit { .. } => {
                    let history = self.state.history();
                    let images = history
                        .current()
                        .last_turn()
                        .map(|turn| fingerprints(&turn.images))
                        .unwrap_or_default();
                    log.record(self.events.emit(
                        "version_committed",
                        payload(json!({
                            "ticket": ticket.id(),
                            "cursor": history.cursor(),
                            "versions": history.len(),
                            "images": images,
                        })),
                    ));
                }
            },
            _ => {}
        }
    }

    /// Logs every slot of a finished batch and reduces it to its outcome.
    fn settle(
        &self,
        ticket: BatchTicket,
        run: StudioResult<BatchReport>,
        log: &mut LogErrors,
    ) -> StudioResult<Vec<EncodedImage>> {
        let report = run?;
        let kind = report.kind.as_str();
        for failure in &report.failures {
            log.record(self.events.emit(
                "slot_failed",
                payload(json!({
                    "ticket": ticket.id(),
                    "kind": kind,
                    "slot": failure.slot,
                    "reason": failure.message,
                })),
            ));
        }
        log.record(self.events.emit(
            "batch_finished",
            payload(json!({
                "ticket": ticket.id(),
                "kind": kind,
                "requested": report.requested,
                "succeeded": report.images.len(),
                "failed": report.failures.len(),
            })),
        ));

        let result = report.into_result();
        if let Err(err) = &result {
            log.record(self.events.emit(
                "batch_failed",
                payload(json!({
                    "ticket": ticket.id(),
                    "kind": kind,
                    "message": err.to_string(),
                })),
            ));
        }
        result
    }

    fn log_change(&self, logged: Logged, log: &mut LogErrors) {
        let emitted = match logged {
            Logged::Select => self.events.emit(
                "candidate_selected",
                payload(json!({
                    "reference": self.state.selected().map(EncodedImage::fingerprint),
                })),
            ),
            Logged::Undo | Logged::Redo => {
                let history = self.state.history();
                self.events.emit(
                    "history_moved",
                    payload(json!({
                        "direction": if logged == Logged::Undo { "undo" } else { "redo" },
                        "cursor": history.cursor(),
                        "versions": history.len(),
                    })),
                )
            }
            Logged::Back => self.events.emit("session_reset", payload(json!({}))),
        };
        log.record(emitted);
    }

    /// Writes the current candidates, or just `only` (0-based) when given.
    pub fn export_candidates(&self, dir: &Path, only: Option<usize>) -> Result<Vec<PathBuf>> {
        let candidates = self.state.candidates();
        if candidates.is_empty() {
            bail!("there are no candidates to save");
        }
        let picked: Vec<(usize, &EncodedImage)> = match only {
            Some(index) => match candidates.get(index) {
                Some(image) => vec![(index, image)],
                None => bail!("there is no candidate #{}", index + 1),
            },
            None => candidates.iter().enumerate().collect(),
        };
        picked
            .into_iter()
            .map(|(index, image)| self.export_one(dir, image, &generation_file_stem(index + 1)))
            .collect()
    }

    /// Writes the images of the latest edit result, or the selected
    /// candidate when nothing has been edited yet.
    pub fn export_latest(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let latest = self
            .state
            .visible()
            .turns()
            .iter()
            .rev()
            .find(|turn| turn.role == Role::Model && !turn.images.is_empty())
            .map(|turn| turn.images.clone())
            .or_else(|| self.state.selected().map(|image| vec![image.clone()]))
            .unwrap_or_default();
        if latest.is_empty() {
            bail!("there is no image to save yet");
        }
        latest
            .iter()
            .enumerate()
            .map(|(index, image)| self.export_one(dir, image, &edit_file_stem(index + 1)))
            .collect()
    }

    fn export_one(&self, dir: &Path, image: &EncodedImage, stem: &str) -> Result<PathBuf> {
        let path = export_image(dir, image, stem)?;
        self.events.emit(
            "image_exported",
            payload(json!({
                "path": path.display().to_string(),
                "image": image.fingerprint(),
            })),
        )?;
        Ok(path)
    }
}

/// First event-log failure of a dispatch; later writes are still attempted.
#[derive(Default)]
struct LogErrors(Option<anyhow::Error>);

impl LogErrors {
    fn record<T>(&mut self, result: Result<T>) {
        if let Err(err) = result {
            self.0.get_or_insert(err);
        }
    }

    fn finish(self) -> Result<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn fingerprints(images: &[EncodedImage]) -> Vec<Value> {
    images
        .iter()
        .map(|image| Value::String(image.fingerprint()))
        .collect()
}
