//! ISL Recognizer - JSON-lines process driver.
//!
//! Reads one JSON command per line on stdin and writes one JSON response per
//! line on stdout. Every command may name a `session`; commands for the same
//! session run strictly in arrival order on that session's worker, while
//! different sessions proceed in parallel up to the frame concurrency limit.
//! Logs go to stderr so stdout stays machine-readable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use isl_recognizer::AppConfig;
use isl_recognizer::recognition::Recognizer;
use isl_recognizer::vision::HandLandmarks;

const SESSION_QUEUE: usize = 32; // Pending commands per session
const OUTPUT_QUEUE: usize = 64; // Pending responses for stdout

/// One input line.
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>, // Echoed back so callers can match responses
    #[serde(default)]
    session: Option<String>,
    #[serde(flatten)]
    command: Command,
}

impl Request {
    /// Session this command is routed to.
    fn session_or(&self, default_session: &str) -> String {
        self.session.clone().unwrap_or_else(|| default_session.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    /// Base64 or data-URL frame, with optional client-side landmarks.
    Frame {
        image: String,
        #[serde(default)]
        landmarks: Option<Vec<HandLandmarks>>,
    },
    Space,
    Backspace,
    Clear,
    Complete,
    Text,
    Info,
    Reset,
    /// List suggestions, or apply `word` as the current word.
    Suggest {
        #[serde(default)]
        word: Option<String>,
    },
    SpellCheck,
    ToggleAutoCorrect,
    SuggestionThreshold {
        value: f32,
    },
    Collect {
        image: String,
        label: String,
    },
    Samples,
    Reload,
    End,
}

/// Run one command against the recognizer. Blocking: inference happens here.
fn execute(recognizer: &Recognizer, session_id: &str, command: Command) -> Result<Value> {
    // Commands that don't touch session state
    match command {
        Command::Collect { image, label } => {
            let path = recognizer.collect_encoded(&image, &label)?;
            return Ok(json!({ "path": path.display().to_string() }));
        }
        Command::Samples => {
            let store = recognizer.sample_store().context("sample collection is disabled")?;
            return Ok(serde_json::to_value(store.counts()?)?);
        }
        Command::Reload => {
            recognizer.model().reload()?;
            return Ok(json!({ "model_loaded": recognizer.is_ready() }));
        }
        Command::End => return Ok(json!({ "ended": recognizer.end_session(session_id) })),
        _ => {}
    }

    let session = recognizer.session(session_id);
    let value = match command {
        Command::Frame { image, landmarks } => serde_json::to_value(session.predict_encoded(&image, landmarks)?)?,
        Command::Space => serde_json::to_value(session.add_space())?,
        Command::Backspace => serde_json::to_value(session.backspace())?,
        Command::Clear => serde_json::to_value(session.clear_text())?,
        Command::Complete => serde_json::to_value(session.force_word_completion())?,
        Command::Text => serde_json::to_value(session.get_text())?,
        Command::Info => serde_json::to_value(session.get_model_info())?,
        Command::Reset => {
            session.reset_recognition();
            let letter = session.get_model_info().activation_letter;
            json!({ "message": format!("Recognition reset. Show sign '{}' to reactivate.", letter) })
        }
        Command::Suggest { word: Some(word) } => {
            let applied = session.apply_suggestion(&word);
            json!({ "applied": applied, "spell_check": session.spell_check() })
        }
        Command::Suggest { word: None } => json!({ "suggestions": session.suggestions() }),
        Command::SpellCheck => serde_json::to_value(session.spell_check())?,
        Command::ToggleAutoCorrect => json!({ "auto_correct": session.toggle_auto_correct() }),
        Command::SuggestionThreshold { value } => {
            let applied = session.set_suggestion_threshold(value).context("suggestion threshold must be a finite number")?;
            json!({ "threshold": applied })
        }
        Command::Collect { .. } | Command::Samples | Command::Reload | Command::End => Value::Null,
    };
    Ok(value)
}

fn error_response(id: Option<Value>, session: Option<&str>, message: &str) -> Value {
    json!({ "id": id, "session": session, "ok": false, "error": message })
}

/// Parse one input line, or build the error response for a malformed one.
fn parse_request(line: &str) -> std::result::Result<Request, Value> {
    serde_json::from_str(line).map_err(|e| {
        warn!("Ignoring malformed command: {}", e);
        error_response(None, None, &format!("invalid command: {}", e))
    })
}

/// Spawn the worker that owns one session's command queue.
///
/// Commands are executed one at a time on the blocking pool, so a session's
/// frames are processed in the order they were read.
///
/// # Arguments
/// * `session_id` - Session served by this worker
/// * `request_rx` - Commands routed to this session
/// * `recognizer` - Shared recognizer
/// * `permits` - Global limit on commands executing at once
/// * `output_tx` - Channel to the stdout writer
///
/// # Returns
/// Join handle for the spawned task
fn spawn_session_worker(
    session_id: String,
    mut request_rx: mpsc::Receiver<Request>,
    recognizer: Arc<Recognizer>,
    permits: Arc<Semaphore>,
    output_tx: mpsc::Sender<Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Request { id, command, .. }) = request_rx.recv().await {
            let Ok(_permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            let recognizer = Arc::clone(&recognizer);
            let sid = session_id.clone();
            let outcome = tokio::task::spawn_blocking(move || execute(&recognizer, &sid, command)).await;

            let response = match outcome {
                Ok(Ok(result)) => json!({ "id": id, "session": session_id, "ok": true, "result": result }),
                Ok(Err(e)) => {
                    debug!("Command failed for session '{}': {:#}", session_id, e);
                    error_response(id, Some(&session_id), &format!("{:#}", e))
                }
                Err(e) => {
                    error!("❌ Command panicked for session '{}': {}", session_id, e);
                    error_response(id, Some(&session_id), "internal error")
                }
            };

            if output_tx.send(response).await.is_err() {
                debug!("Output channel closed");
                break;
            }
        }
        debug!("Session worker '{}' finished", session_id);
    })
}

/// Spawn the stdin reader that parses commands and routes them to session workers.
///
/// On end of input it closes every session queue and waits for the workers to
/// drain, so every accepted command gets its response.
///
/// # Arguments
/// * `recognizer` - Shared recognizer
/// * `default_session` - Session for commands that don't name one
/// * `permits` - Global limit on commands executing at once
/// * `output_tx` - Channel to the stdout writer
/// * `shutdown` - Shutdown flag
///
/// # Returns
/// Join handle for the spawned task
fn spawn_reader_task(
    recognizer: Arc<Recognizer>,
    default_session: String,
    permits: Arc<Semaphore>,
    output_tx: mpsc::Sender<Value>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut workers: HashMap<String, (mpsc::Sender<Request>, JoinHandle<()>)> = HashMap::new();

        while !shutdown.load(Ordering::Relaxed) {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("📭 Input closed");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read input: {}", e);
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(response) => {
                    if output_tx.send(response).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let session_id = request.session_or(&default_session);
            let (request_tx, _) = workers.entry(session_id.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(SESSION_QUEUE);
                let handle = spawn_session_worker(session_id.clone(), rx, Arc::clone(&recognizer), Arc::clone(&permits), output_tx.clone());
                (tx, handle)
            });

            if request_tx.send(request).await.is_err() {
                warn!("Session worker '{}' is gone, dropping command", session_id);
            }
        }

        let handles: Vec<JoinHandle<()>> = workers.into_values().map(|(_, handle)| handle).collect();
        drain_workers(handles).await;
    })
}

/// Wait for session workers to finish. Returns how many ended by panic or abort.
async fn drain_workers(handles: Vec<JoinHandle<()>>) -> usize {
    debug!("Draining {} session worker(s)", handles.len());
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("❌ Session worker ended abnormally: {}", e);
            failed += 1;
        }
    }
    failed
}

/// Spawn the writer that prints one JSON response per line.
fn spawn_writer_task(mut output_rx: mpsc::Receiver<Value>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = output_rx.recv().await {
            let mut line = response.to_string();
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!("❌ Failed to write response: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!("❌ Failed to flush output: {}", e);
                break;
            }
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.store(true, Ordering::SeqCst);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(if config.verbose { "debug" } else { "info" }))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🤟 ISL Recognizer v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    // Checkpoint loading is blocking I/O plus weight upload
    let recognizer = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Recognizer::from_config(&config)).await.context("Recognizer setup panicked")??
    };

    if recognizer.is_ready() {
        info!("✅ Recognizer ready");
    } else if config.lazy_model {
        info!("Model will load on the first frame");
    } else {
        warn!("⚠️ Running without a model: frames will fail until 'reload' succeeds");
    }

    let recognizer = Arc::new(recognizer);
    let permits = Arc::new(Semaphore::new(config.max_concurrent_frames));
    let shutdown = Arc::new(AtomicBool::new(false));

    let (output_tx, output_rx) = mpsc::channel::<Value>(OUTPUT_QUEUE);
    let writer_handle = spawn_writer_task(output_rx);
    let mut reader_handle = spawn_reader_task(recognizer, config.default_session.clone(), permits, output_tx, shutdown.clone());

    let graceful_timeout = tokio::time::Duration::from_millis(500);

    tokio::select! {
        _ = &mut reader_handle => {
            debug!("Reader finished");
        }
        _ = wait_for_shutdown(shutdown) => {
            tokio::select! {
                _ = &mut reader_handle => {
                    debug!("Reader finished gracefully");
                }
                _ = tokio::time::sleep(graceful_timeout) => {
                    debug!("Reader didn't finish in time, aborting");
                    reader_handle.abort();
                }
            }
        }
    }

    // The writer stops once the reader and every worker have dropped their senders
    tokio::select! {
        _ = writer_handle => {
            debug!("Writer finished gracefully");
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            debug!("Writer didn't finish in time");
        }
    }

    info!("✅ ISL Recognizer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{ImageFormat, Rgb, RgbImage};
    use isl_recognizer::Tuning;
    use isl_recognizer::config::tuning::ActivationTuning;
    use isl_recognizer::language::Dictionary;
    use isl_recognizer::model::{LetterClassifier, ModelSlot, NUM_CLASSES, class_index};
    use std::io::Cursor;

    /// Always predicts one label with high probability.
    struct Fixed(char);

    impl LetterClassifier for Fixed {
        fn classify(&self, _image: &RgbImage) -> isl_recognizer::Result<Vec<f32>> {
            let mut probs = vec![0.002; NUM_CLASSES];
            probs[class_index(self.0).unwrap_or(0)] = 0.93;
            Ok(probs)
        }

        fn device_name(&self) -> String {
            "fixed".to_string()
        }
    }

    fn recognizer() -> Recognizer {
        let tuning = Tuning { activation: ActivationTuning { start_active: true, ..Default::default() }, ..Default::default() };
        Recognizer::new(ModelSlot::with_classifier(Arc::new(Fixed('G'))), tuning, Dictionary::builtin())
    }

    fn encoded_frame() -> String {
        let mut png = Vec::new();
        RgbImage::from_pixel(64, 48, Rgb([90, 60, 40])).write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(&png))
    }

    fn frame_command() -> Command {
        Command::Frame { image: encoded_frame(), landmarks: None }
    }

    #[test]
    fn test_parses_simple_commands() {
        let request = parse_request(r#"{"cmd":"space"}"#).unwrap();
        assert!(matches!(request.command, Command::Space));
        assert!(request.id.is_none());
        assert_eq!(request.session_or("default"), "default");

        let request = parse_request(r#"{"cmd":"suggest"}"#).unwrap();
        assert!(matches!(request.command, Command::Suggest { word: None }));

        let request = parse_request(r#"{"cmd":"suggest","word":"hello","session":"alice"}"#).unwrap();
        assert!(matches!(request.command, Command::Suggest { word: Some(ref w) } if w == "hello"));
        assert_eq!(request.session_or("default"), "alice");

        let request = parse_request(r#"{"cmd":"suggestion_threshold","value":1}"#).unwrap();
        assert!(matches!(request.command, Command::SuggestionThreshold { value } if value == 1.0));
    }

    #[test]
    fn test_parses_frame_with_landmarks() {
        let line = r#"{"id":7,"session":"s1","cmd":"frame","image":"abc","landmarks":[[{"x":0.1,"y":0.2,"z":0.0},{"x":0.3,"y":0.4,"z":0.0}]]}"#;
        let request = parse_request(line).unwrap();
        assert_eq!(request.id, Some(json!(7)));
        assert_eq!(request.session_or("default"), "s1");
        match request.command {
            Command::Frame { image, landmarks: Some(hands) } => {
                assert_eq!(image, "abc");
                assert_eq!(hands.len(), 1);
                assert_eq!(hands[0].len(), 2);
                assert_eq!(hands[0][1].x, 0.3);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_gets_error_response() {
        for line in [r#"{"cmd":"dance"}"#, r#"{"session":"s"}"#, "not json", r#"{"cmd":"suggestion_threshold"}"#] {
            let response = parse_request(line).unwrap_err();
            assert_eq!(response["ok"], json!(false));
            assert!(response["id"].is_null());
            assert!(response["error"].as_str().unwrap().starts_with("invalid command"));
        }
    }

    #[test]
    fn test_drain_counts_failed_workers() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let failed = runtime.block_on(async {
            let ok = tokio::spawn(async {});
            let panicked = tokio::spawn(async {
                if true {
                    panic!("worker blew up");
                }
            });
            drain_workers(vec![ok, panicked]).await
        });
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_error_response_shape() {
        assert_eq!(error_response(Some(json!("r1")), Some("s"), "boom"), json!({ "id": "r1", "session": "s", "ok": false, "error": "boom" }));
    }

    #[test]
    fn test_execute_frame_and_text_commands() {
        let r = recognizer();
        let result = execute(&r, "s", frame_command()).unwrap();
        assert_eq!(result["letter"], json!("G"));
        assert_eq!(result["recognition_active"], json!(true));

        for _ in 0..4 {
            execute(&r, "s", frame_command()).unwrap();
        }
        let text = execute(&r, "s", Command::Text).unwrap();
        assert_eq!(text["current_word"], json!("G"));

        let update = execute(&r, "s", Command::Complete).unwrap();
        assert_eq!(update, json!({ "current_text": "G", "current_word": "" }));

        let update = execute(&r, "s", Command::Clear).unwrap();
        assert_eq!(update["current_text"], json!(""));

        // Other sessions are untouched
        assert_eq!(execute(&r, "other", Command::Text).unwrap()["current_word"], json!(""));
    }

    #[test]
    fn test_execute_settings_and_info() {
        let r = recognizer();
        assert!(execute(&r, "s", Command::Suggest { word: None }).unwrap()["suggestions"].is_array());
        assert_eq!(execute(&r, "s", Command::SuggestionThreshold { value: 1.5 }).unwrap(), json!({ "threshold": 1.0 }));
        assert!(execute(&r, "s", Command::SuggestionThreshold { value: f32::NAN }).is_err());

        let info = execute(&r, "s", Command::Info).unwrap();
        assert_eq!(info["model_loaded"], json!(true));
        assert_eq!(info["classes"].as_array().map(Vec::len), Some(NUM_CLASSES));

        let reset = execute(&r, "s", Command::Reset).unwrap();
        assert!(reset["message"].as_str().unwrap().contains("'A'"));
    }

    #[test]
    fn test_execute_session_free_commands() {
        let r = recognizer();
        let err = execute(&r, "s", Command::Samples).unwrap_err();
        assert!(format!("{:#}", err).contains("sample collection is disabled"));
        assert!(execute(&r, "s", Command::Collect { image: encoded_frame(), label: "A".to_string() }).is_err());

        execute(&r, "s", Command::Text).unwrap();
        assert_eq!(execute(&r, "s", Command::End).unwrap(), json!({ "ended": true }));
        assert_eq!(execute(&r, "s", Command::End).unwrap(), json!({ "ended": false }));
    }
}
