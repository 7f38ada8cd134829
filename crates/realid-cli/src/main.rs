use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use realid_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use realid_contracts::conversation::Role;
use realid_contracts::events::EventWriter;
use realid_contracts::session::{SessionEvent, SessionOptions, SessionState, Step, Transition};
use realid_contracts::{AspectRatio, CameraMode, EncodedImage, GenerationRequestSpec};
use realid_engine::{default_backend_registry, encode_file, BackendConfig, ImageBackend, Studio};

#[derive(Debug, Parser)]
#[command(name = "realid", version, about = "Identity-locked portrait studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive generate, select and edit loop.
    Studio(StudioArgs),
    /// Generate candidates once and save them.
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    backend: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct FormArgs {
    #[arg(long)]
    subject: Option<PathBuf>,
    #[arg(long)]
    location_image: Option<PathBuf>,
    #[arg(long)]
    outfit_image: Option<PathBuf>,
    #[arg(long, default_value = "")]
    location: String,
    #[arg(long, default_value = "")]
    outfit: String,
    #[arg(long, default_value = "")]
    body: String,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = "studio")]
    camera: CameraMode,
    #[arg(long, default_value = "3:4")]
    ratio: AspectRatio,
    #[arg(long, default_value_t = 2)]
    count: u8,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[command(flatten)]
    form: FormArgs,
    /// Drop the pending instruction from the chat when its edit fails.
    #[arg(long)]
    rollback_failed_edits: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[command(flatten)]
    form: FormArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("realid error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn open_studio(args: &SessionArgs, options: SessionOptions) -> Result<Studio> {
    let backend = select_backend(&args.backend, args.model.as_deref())?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = uuid::Uuid::new_v4().to_string();
    Studio::new(backend, EventWriter::new(events_path, session_id), options)
}

fn select_backend(name: &str, model: Option<&str>) -> Result<Arc<dyn ImageBackend>> {
    let registry = default_backend_registry(&BackendConfig::from_env(model));
    registry.get(name.trim()).ok_or_else(|| {
        anyhow!(
            "unknown backend {name:?} (available: {})",
            registry.names().join(", ")
        )
    })
}

fn draft_from_form(form: &FormArgs) -> Result<GenerationRequestSpec> {
    Ok(GenerationRequestSpec {
        subject_image: encode_optional(form.subject.as_deref())?,
        location_image: encode_optional(form.location_image.as_deref())?,
        outfit_image: encode_optional(form.outfit_image.as_deref())?,
        location_text: form.location.clone(),
        outfit_text: form.outfit.clone(),
        body_details: form.body.clone(),
        prompt: form.prompt.clone(),
        camera_mode: form.camera,
        aspect_ratio: form.ratio,
        image_count: form.count,
    })
}

fn encode_optional(path: Option<&Path>) -> Result<Option<EncodedImage>> {
    path.map(|path| {
        encode_file(path).with_context(|| format!("cannot load {}", path.display()))
    })
    .transpose()
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let spec = draft_from_form(&args.form)?;
    let mut studio = open_studio(&args.session, SessionOptions::default())?;
    studio.dispatch(SessionEvent::Submit(spec))?;
    if let Some(err) = studio.state().error() {
        eprintln!("{err}");
        return Ok(1);
    }
    for path in studio.export_candidates(&args.session.out, None)? {
        println!("{}", path.display());
    }
    Ok(0)
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let mut draft = draft_from_form(&args.form)?;
    let mut studio = open_studio(
        &args.session,
        SessionOptions {
            rollback_failed_edits: args.rollback_failed_edits,
        },
    )?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "RealID studio started ({} backend). Type /help for commands.",
        args.session.backend
    );

    loop {
        print!("{}", prompt_label(studio.state()));
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match update_draft(&mut draft, &intent) {
            DraftUpdate::Updated(message) | DraftUpdate::Invalid(message) => {
                println!("{message}");
                continue;
            }
            DraftUpdate::NotDraftCommand => {}
        }

        let event = match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                continue;
            }
            "show_form" => {
                print_form(&draft);
                continue;
            }
            "history" => {
                print_history(studio.state());
                continue;
            }
            "save" => {
                save(&studio, &args.session.out, intent.arg_str("value"));
                continue;
            }
            "unknown" => {
                println!(
                    "Unknown command /{}. Type /help for commands.",
                    intent.arg_str("command").unwrap_or_default()
                );
                continue;
            }
            "generate" => SessionEvent::Submit(draft.clone()),
            "regenerate" => SessionEvent::Regenerate,
            "select" => match intent.arg_str("value").and_then(parse_one_based) {
                Some(index) => SessionEvent::Select(index),
                None => {
                    println!("/select requires a candidate number, e.g. /select 1");
                    continue;
                }
            },
            "send" => SessionEvent::Send(intent.message.clone().unwrap_or_default()),
            "undo" => SessionEvent::Undo,
            "redo" => SessionEvent::Redo,
            "back" => SessionEvent::Back,
            "dismiss_error" => SessionEvent::DismissError,
            other => {
                println!("Unhandled action {other}.");
                continue;
            }
        };

        if matches!(event, SessionEvent::Submit(_) | SessionEvent::Regenerate | SessionEvent::Send(_)) {
            println!("Working...");
        }
        let transition = studio.dispatch(event)?;
        report(&transition, studio.state());
    }

    Ok(())
}

fn prompt_label(state: &SessionState) -> String {
    match state.step() {
        Step::Composing => "compose> ".to_string(),
        Step::Editing => format!(
            "edit v{}/{}> ",
            state.history().cursor(),
            state.history().len() - 1
        ),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DraftUpdate {
    NotDraftCommand,
    Updated(String),
    Invalid(String),
}

/// Applies form-editing commands to the draft request.
fn update_draft(draft: &mut GenerationRequestSpec, intent: &Intent) -> DraftUpdate {
    let text = || intent.arg_str("text").unwrap_or_default().to_string();
    let value = intent.arg_str("value").unwrap_or_default();
    match intent.action.as_str() {
        "set_prompt" => {
            draft.prompt = text();
            DraftUpdate::Updated(format!("Prompt: {}", display_or_default(&draft.prompt)))
        }
        "set_location" => {
            draft.location_text = text();
            DraftUpdate::Updated(format!(
                "Location: {}",
                display_or_default(&draft.location_text)
            ))
        }
        "set_outfit" => {
            draft.outfit_text = text();
            DraftUpdate::Updated(format!("Outfit: {}", display_or_default(&draft.outfit_text)))
        }
        "set_body" => {
            draft.body_details = text();
            DraftUpdate::Updated(format!(
                "Body details: {}",
                display_or_default(&draft.body_details)
            ))
        }
        "set_subject_image" | "set_location_image" | "set_outfit_image" => {
            let Some(path) = intent.arg_str("path") else {
                return DraftUpdate::Invalid(format!("{} requires a path", intent.raw.trim()));
            };
            let image = match encode_file(Path::new(path)) {
                Ok(image) => image,
                Err(err) => return DraftUpdate::Invalid(err.to_string()),
            };
            let (slot, label) = match intent.action.as_str() {
                "set_subject_image" => (&mut draft.subject_image, "Subject"),
                "set_location_image" => (&mut draft.location_image, "Location image"),
                _ => (&mut draft.outfit_image, "Outfit image"),
            };
            *slot = Some(image);
            DraftUpdate::Updated(format!("{label} set to {path}"))
        }
        "set_camera" => match value.parse::<CameraMode>() {
            Ok(mode) => {
                draft.camera_mode = mode;
                DraftUpdate::Updated(format!("Camera: {}", mode.as_str()))
            }
            Err(err) => DraftUpdate::Invalid(err),
        },
        "set_ratio" => match value.parse::<AspectRatio>() {
            Ok(ratio) => {
                draft.aspect_ratio = ratio;
                DraftUpdate::Updated(format!("Aspect ratio: {}", ratio.as_str()))
            }
            Err(err) => DraftUpdate::Invalid(err),
        },
        "set_count" => match value.parse::<u8>() {
            Ok(count) => {
                draft.image_count = count;
                DraftUpdate::Updated(format!("Image count: {count}"))
            }
            Err(_) => DraftUpdate::Invalid("/count requires a number from 1 to 4".to_string()),
        },
        _ => DraftUpdate::NotDraftCommand,
    }
}

fn display_or_default(value: &str) -> &str {
    if value.trim().is_empty() {
        "(default)"
    } else {
        value
    }
}

fn parse_one_based(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok()?.checked_sub(1)
}

fn save(studio: &Studio, out: &Path, which: Option<&str>) {
    let saved = match studio.state().step() {
        Step::Composing => match which.map(|raw| parse_one_based(raw).ok_or(raw)) {
            Some(Err(raw)) => {
                println!("/save expects a candidate number (got {raw})");
                return;
            }
            Some(Ok(index)) => studio.export_candidates(out, Some(index)),
            None => studio.export_candidates(out, None),
        },
        Step::Editing => studio.export_latest(out),
    };
    match saved {
        Ok(paths) => {
            for path in paths {
                println!("Saved {}", path.display());
            }
        }
        Err(err) => println!("Save failed: {err:#}"),
    }
}

fn report(transition: &Transition, state: &SessionState) {
    if let Transition::Rejected(rejection) = transition {
        println!("Ignored: {rejection}.");
        return;
    }
    if let Some(err) = state.error() {
        println!("Error: {err}");
        println!("(/dismiss to clear)");
        return;
    }
    match state.step() {
        Step::Composing => print_candidates(state),
        Step::Editing => {
            let last_model_turn = state
                .visible()
                .last_turn()
                .filter(|turn| turn.role == Role::Model);
            match last_model_turn {
                Some(turn) => {
                    println!("{}", turn.content);
                    for (index, image) in turn.images.iter().enumerate() {
                        println!("  [{}] {}", index + 1, describe_image(image));
                    }
                }
                None if state.visible().is_empty() => match state.current_reference() {
                    Some(reference) => println!(
                        "Editing {}. Type an instruction, or /back to start over.",
                        describe_image(&reference)
                    ),
                    None => println!("Nothing to edit yet."),
                },
                None => {}
            }
        }
    }
}

fn print_candidates(state: &SessionState) {
    let candidates = state.candidates();
    if candidates.is_empty() {
        println!("No candidates yet. Set /subject and /generate.");
        return;
    }
    println!("Candidates:");
    for (index, image) in candidates.iter().enumerate() {
        println!("  [{}] {}", index + 1, describe_image(image));
    }
    println!("/select N to start editing, /save to write them to disk.");
}

fn print_history(state: &SessionState) {
    let history = state.history();
    println!(
        "Version {} of {} (undo: {}, redo: {})",
        history.cursor(),
        history.len() - 1,
        if state.can_undo() { "yes" } else { "no" },
        if state.can_redo() { "yes" } else { "no" },
    );
    for turn in state.visible().turns() {
        let images = if turn.images.is_empty() {
            String::new()
        } else {
            format!(" [{} image(s)]", turn.images.len())
        };
        println!("  {}: {}{images}", turn.role.as_str(), turn.content);
    }
}

fn print_form(draft: &GenerationRequestSpec) {
    let image_label = |image: &Option<EncodedImage>| {
        image
            .as_ref()
            .map(describe_image)
            .unwrap_or_else(|| "(none)".to_string())
    };
    println!("Subject:        {}", image_label(&draft.subject_image));
    println!("Location image: {}", image_label(&draft.location_image));
    println!("Outfit image:   {}", image_label(&draft.outfit_image));
    println!("Location:       {}", display_or_default(&draft.location_text));
    println!("Outfit:         {}", display_or_default(&draft.outfit_text));
    println!("Body details:   {}", display_or_default(&draft.body_details));
    println!("Prompt:         {}", display_or_default(&draft.prompt));
    println!("Camera:         {}", draft.camera_mode.as_str());
    println!("Aspect ratio:   {}", draft.aspect_ratio.as_str());
    println!("Image count:    {}", draft.image_count);
}

fn describe_image(image: &EncodedImage) -> String {
    format!("{} {}", image.mime_type(), image.fingerprint())
}
