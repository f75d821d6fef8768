use crate::client::{GenerateError, GeminiClient, GeneratedImage, ImageGenerator};
use crate::config::StudioConfig;
use crate::controller::{PendingGeneration, StudioController};
use crate::history::CurrentImage;
use crate::key_selection::{ApiKeyStore, KeyCapability, KeySelector};
use crate::settings::{AspectRatio, ImageModel, ImageSize, InputImage, SettingsPatch};
use crate::utils::{self, decode_data_url, ellipsize, extension_for_mime, now_utc_iso};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use flume::{Receiver, Sender};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Completion = (PendingGeneration, Result<GeneratedImage, GenerateError>);

/// Options for a single non-interactive generation.
#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Text prompt describing the image
    #[arg(short, long, default_value = "")]
    pub prompt: String,
    /// Model tier: `standard` or `pro`
    #[arg(short, long, default_value = "standard")]
    pub model: ImageModel,
    /// Aspect ratio: 1:1, 16:9, 9:16, 4:3 or 3:4
    #[arg(short, long, default_value = "1:1")]
    pub aspect: AspectRatio,
    /// Output size for the Pro model: 1K, 2K or 4K
    #[arg(short, long, default_value = "1K")]
    pub size: ImageSize,
    /// Ground the Pro model with web search
    #[arg(long)]
    pub search: bool,
    /// Reference image to edit or draw from
    #[arg(short, long)]
    pub image: Option<PathBuf>,
    /// Where to write the generated image
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Generate one image and write it to disk. Key selection is not available
/// here, so the Pro model relies on the configured key.
pub async fn run_once(config: StudioConfig, args: GenerateArgs) -> Result<()> {
    let client = GeminiClient::new(&config, ApiKeyStore::new())?;
    let mut controller = StudioController::new(KeyCapability::Unavailable);

    controller.change_model(args.model).await;
    let input_image = args
        .image
        .as_deref()
        .map(InputImage::from_path)
        .transpose()?;
    controller.change_settings(SettingsPatch {
        prompt: Some(args.prompt),
        aspect_ratio: Some(args.aspect),
        image_size: Some(args.size),
        use_search: Some(args.search),
        input_image: Some(input_image),
        ..Default::default()
    });
    if controller.settings().is_empty_request() {
        bail!("nothing to generate: pass --prompt and/or --image");
    }

    controller.generate(&client).await;
    if let Some(error) = controller.error() {
        bail!("{error}");
    }
    let image = controller
        .current_image()
        .ok_or_else(|| anyhow!("generation finished without an image"))?;
    let path = save_image(image, args.out.as_deref(), config.output_dir.as_deref())?;
    println!("Saved {}", path.display());
    Ok(())
}

/// Run the interactive studio session.
pub async fn run_repl(config: StudioConfig) -> Result<()> {
    let keys = ApiKeyStore::new();
    let client = Arc::new(GeminiClient::new(&config, keys.clone())?);

    let (line_tx, line_rx) = flume::unbounded();
    spawn_stdin_reader(line_tx);

    let selector = StdinKeySelector {
        store: keys,
        lines: line_rx.clone(),
    };
    let (done_tx, done_rx) = flume::unbounded();
    let mut session = ReplSession {
        controller: StudioController::new(KeyCapability::available(selector)),
        client,
        config,
        done_tx,
    };

    println!("imagestudio ready. Type 'help' for a list of commands.");
    tracing::info!(api_base = session.client.api_base(), "studio session started");

    loop {
        print!("imagestudio> ");
        io::stdout().flush()?;

        tokio::select! {
            line = line_rx.recv_async() => {
                let Ok(line) = line else {
                    println!("Exiting");
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let tokens = match shell_words::split(trimmed) {
                    Ok(tokens) if !tokens.is_empty() => tokens,
                    Ok(_) => continue,
                    Err(err) => {
                        println!("Unable to parse command: {err}");
                        continue;
                    }
                };
                let prompt_was_open = session.controller.is_key_prompt_open();
                match session.handle_command(&tokens).await {
                    Ok(LoopAction::Continue) => {}
                    Ok(LoopAction::Exit) => break,
                    Err(err) => println!("Error: {err:#}"),
                }
                session.announce_key_prompt(prompt_was_open);
            }
            done = done_rx.recv_async() => {
                if let Ok((pending, result)) = done {
                    println!();
                    let prompt_was_open = session.controller.is_key_prompt_open();
                    session.controller.complete_generation(pending, result);
                    session.print_display();
                    session.announce_key_prompt(prompt_was_open);
                }
            }
        }
    }

    if session.controller.is_loading() {
        tracing::warn!("exiting with a generation still in flight");
    }
    Ok(())
}

// Every stdin line goes through one channel so the key prompt and the
// command loop never race for input.
fn spawn_stdin_reader(tx: Sender<String>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Key picker for terminal sessions: asks for a key on the next input line.
struct StdinKeySelector {
    store: ApiKeyStore,
    lines: Receiver<String>,
}

#[async_trait]
impl KeySelector for StdinKeySelector {
    async fn has_selected_api_key(&self) -> bool {
        self.store.is_set().await
    }

    async fn open_select_key(&self) {
        print!("Paste an API key with access to the Pro model (blank keeps the current one): ");
        let _ = io::stdout().flush();
        match self.lines.recv_async().await {
            Ok(line) if !line.trim().is_empty() => {
                self.store.set(line).await;
                println!("API key selected.");
            }
            Ok(_) => println!("Keeping the current key."),
            Err(_) => tracing::warn!("input closed while selecting an API key"),
        }
    }
}

struct ReplSession {
    controller: StudioController,
    client: Arc<GeminiClient>,
    config: StudioConfig,
    done_tx: Sender<Completion>,
}

enum LoopAction {
    Continue,
    Exit,
}

impl ReplSession {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        match command {
            "help" => {
                print_help();
                Ok(LoopAction::Continue)
            }
            "settings" | "status" => {
                self.print_settings();
                self.print_display();
                Ok(LoopAction::Continue)
            }
            "prompt" => {
                let prompt = tokens[1..].join(" ");
                self.controller.change_settings(SettingsPatch::prompt(prompt));
                Ok(LoopAction::Continue)
            }
            "model" => {
                let Some(raw) = tokens.get(1) else {
                    println!("Usage: model standard|pro");
                    return Ok(LoopAction::Continue);
                };
                let model: ImageModel = raw.parse()?;
                self.controller.change_model(model).await;
                println!("Model: {}", self.controller.settings().model);
                Ok(LoopAction::Continue)
            }
            "aspect" | "ratio" => {
                let Some(raw) = tokens.get(1) else {
                    println!("Usage: aspect 1:1|16:9|9:16|4:3|3:4");
                    return Ok(LoopAction::Continue);
                };
                self.controller
                    .change_settings(SettingsPatch::aspect_ratio(raw.parse()?));
                Ok(LoopAction::Continue)
            }
            "size" => {
                let Some(raw) = tokens.get(1) else {
                    println!("Usage: size 1K|2K|4K");
                    return Ok(LoopAction::Continue);
                };
                self.controller
                    .change_settings(SettingsPatch::image_size(raw.parse()?));
                self.note_pro_only("Image size");
                Ok(LoopAction::Continue)
            }
            "search" => {
                let enabled = match tokens.get(1).map(String::as_str) {
                    Some("on") | Some("true") => true,
                    Some("off") | Some("false") => false,
                    _ => {
                        println!("Usage: search on|off");
                        return Ok(LoopAction::Continue);
                    }
                };
                self.controller
                    .change_settings(SettingsPatch::use_search(enabled));
                self.note_pro_only("Search grounding");
                Ok(LoopAction::Continue)
            }
            "image" => {
                match tokens.get(1).map(String::as_str) {
                    None => println!("Usage: image <path> | image clear"),
                    Some("clear") | Some("none") => {
                        self.controller
                            .change_settings(SettingsPatch::input_image(None));
                        println!("Reference image removed.");
                    }
                    Some(path) => {
                        let image = InputImage::from_path(Path::new(path))?;
                        println!("Reference image attached ({}).", image.mime_type);
                        self.controller
                            .change_settings(SettingsPatch::input_image(Some(image)));
                    }
                }
                Ok(LoopAction::Continue)
            }
            "generate" | "gen" => {
                self.start_generation();
                Ok(LoopAction::Continue)
            }
            "history" => {
                self.print_history();
                Ok(LoopAction::Continue)
            }
            "show" => {
                let index = tokens
                    .get(1)
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .filter(|index| *index > 0);
                let Some(index) = index else {
                    println!("Usage: show <N>   (N as listed by 'history')");
                    return Ok(LoopAction::Continue);
                };
                let Some(item) = self.controller.history().get(index - 1).cloned() else {
                    println!("No history entry #{index}");
                    return Ok(LoopAction::Continue);
                };
                self.controller.select_history_item(&item);
                self.print_display();
                Ok(LoopAction::Continue)
            }
            "save" => {
                let Some(image) = self.controller.current_image() else {
                    println!("No image to save.");
                    return Ok(LoopAction::Continue);
                };
                let target = tokens.get(1).map(PathBuf::from);
                let path = save_image(image, target.as_deref(), self.config.output_dir.as_deref())?;
                println!("Saved {}", path.display());
                Ok(LoopAction::Continue)
            }
            "key" => {
                if tokens.get(1).map(String::as_str) == Some("cancel") {
                    self.controller.dismiss_key_prompt();
                } else {
                    self.controller.select_api_key().await;
                }
                Ok(LoopAction::Continue)
            }
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
                Ok(LoopAction::Continue)
            }
            "quit" | "exit" => Ok(LoopAction::Exit),
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
                Ok(LoopAction::Continue)
            }
        }
    }

    fn start_generation(&mut self) {
        let Some(pending) = self.controller.begin_generation() else {
            return;
        };
        println!("Generating…");
        let client = self.client.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = client.generate_image(pending.settings()).await;
            if done_tx.send((pending, result)).is_err() {
                tracing::error!("failed to deliver generation result");
            }
        });
    }

    fn note_pro_only(&self, what: &str) {
        if !self.controller.settings().model.is_pro() {
            println!("Note: {what} only applies to the Pro model.");
        }
    }

    fn announce_key_prompt(&self, was_open: bool) {
        if self.controller.is_key_prompt_open() && !was_open {
            println!("The Pro model needs an API key. Type 'key' to select one or 'key cancel' to dismiss.");
        }
    }

    fn print_settings(&self) {
        let settings = self.controller.settings();
        println!("Prompt:       {}", ellipsize(&settings.prompt, 80));
        println!("Model:        {}", settings.model);
        println!("Aspect ratio: {}", settings.aspect_ratio);
        println!("Image size:   {}", settings.image_size);
        println!("Search:       {}", if settings.use_search { "on" } else { "off" });
        match &settings.input_image {
            Some(image) => println!("Reference:    {} ({} base64 chars)", image.mime_type, image.base64.len()),
            None => println!("Reference:    none"),
        }
        if settings.model.is_pro() {
            let key = if self.controller.is_key_ready() { "ready" } else { "not selected" };
            println!("Pro API key:  {key}");
        }
    }

    fn print_display(&self) {
        if self.controller.is_loading() {
            println!("Generating…");
        } else if let Some(error) = self.controller.error() {
            println!("{error}");
        } else if let Some(image) = self.controller.current_image() {
            println!("Image for \"{}\"", ellipsize(&image.prompt, 60));
            println!("  {}", ellipsize(&image.src, 72));
            println!("Use 'save [path]' to write it to disk.");
        } else {
            println!("No image yet. Set a prompt and type 'generate'.");
        }
    }

    fn print_history(&self) {
        let history = self.controller.history();
        if history.is_empty() {
            println!("No generations yet this session.");
            return;
        }
        println!("History (newest first):");
        for (index, item) in history.items().iter().enumerate() {
            println!("  {:>3}. [{}] {}", index + 1, item.id, ellipsize(&item.prompt, 60));
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  help                 Show this help message");
    println!("  settings             Show the current settings and image");
    println!("  prompt TEXT          Set the prompt");
    println!("  model standard|pro   Switch model (resets size and search)");
    println!("  aspect RATIO         Set the aspect ratio (1:1, 16:9, 9:16, 4:3, 3:4)");
    println!("  size 1K|2K|4K        Set the output size (Pro only)");
    println!("  search on|off        Toggle search grounding (Pro only)");
    println!("  image PATH|clear     Attach or remove a reference image");
    println!("  generate             Generate an image from the current settings");
    println!("  history              List this session's generations");
    println!("  show N               Display history entry N");
    println!("  save [PATH]          Write the displayed image to disk");
    println!("  key [cancel]         Select the Pro model API key, or dismiss the request");
    println!("  clear                Clear the screen");
    println!("  exit                 Quit");
}

/// Decodes `image` and writes it to `target`, or to a timestamped file in
/// `output_dir` (current directory when unset).
fn save_image(image: &CurrentImage, target: Option<&Path>, output_dir: Option<&Path>) -> Result<PathBuf> {
    let (mime_type, bytes) = decode_data_url(&image.src).context("displayed image cannot be saved")?;
    let path = match target {
        Some(path) => path.to_path_buf(),
        None => {
            let stamp: String = now_utc_iso()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect();
            let name = format!("{}-{stamp}.{}", utils::APP_NAME, extension_for_mime(&mime_type));
            output_dir.unwrap_or_else(|| Path::new(".")).join(name)
        }
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
