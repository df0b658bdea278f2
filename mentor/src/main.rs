use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use mentor::chat::{ChatSession, ChatStatus};
use mentor::editor::{follow_draft, DocumentEditor};
use mentor::{AppContext, Config};
use shared_types::{new_thread_id, MessageRole, Rect};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mentor=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let requested = std::env::args().nth(1);
    let thread_id = requested.clone().unwrap_or_else(new_thread_id);
    info!(thread_id = %thread_id, api = %config.api_base_url, "mentor starting");

    let context = AppContext::from_config(&config)?;
    let viewport = Rect::new(0.0, 0.0, 1280.0, 800.0);
    let session = context.session(&thread_id, config.session_options(viewport));

    tokio::spawn(print_assistant_text(session.clone()));
    tokio::spawn(print_overlay(context.clone()));
    tokio::spawn(print_drafts(context.clone()));

    if requested.is_some() {
        if let Err(e) = session.open().await {
            tracing::warn!(error = %e, "Failed to load thread");
        }
    } else if config.auto_greeting {
        session.greet();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/stop", _) => {
                session.stop();
            }
            ("/clear", _) => session.clear_error(),
            ("/up", id) | ("/down", id) if !id.trim().is_empty() => {
                let upvote = line.starts_with("/up");
                if let Err(e) = session.vote_message(id.trim(), upvote).await {
                    eprintln!("vote failed: {e}");
                }
            }
            _ => {
                if session.send_message(line).is_none() && !line.is_empty() {
                    eprintln!("(not sent: status is {:?})", session.status());
                }
            }
        }
    }

    session.close();
    Ok(())
}

/// Print assistant text as it streams, and errors when they occur.
async fn print_assistant_text(session: ChatSession) {
    let mut snapshots = session.subscribe();
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut last_status = ChatStatus::Ready;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let mut stdout = std::io::stdout();
        for message in snapshot
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
        {
            let text = message.text();
            let seen = printed.entry(message.id.clone()).or_insert(0);
            if text.len() > *seen && text.is_char_boundary(*seen) {
                let _ = write!(stdout, "{}", &text[*seen..]);
                *seen = text.len();
            }
        }
        if snapshot.status != last_status {
            match snapshot.status {
                ChatStatus::Ready => {
                    let _ = writeln!(stdout);
                }
                ChatStatus::Error => {
                    let _ = writeln!(
                        stdout,
                        "\n[error] {}",
                        snapshot.error.as_deref().unwrap_or("unknown")
                    );
                }
                _ => {}
            }
            last_status = snapshot.status;
        }
        let _ = stdout.flush();
    }
}

/// Announce artifacts as the overlay opens them.
async fn print_overlay(context: AppContext) {
    let mut overlay = context.overlay.subscribe();
    while overlay.changed().await.is_ok() {
        if let Some(artifact) = overlay.borrow_and_update().clone() {
            println!("\n[artifact] {}", artifact.title);
        }
    }
}

/// Follow every draft the store starts, whether or not the overlay opened
/// it, and print the saved version once the draft settles.
async fn print_drafts(context: AppContext) {
    let mut started = context.drafts.subscribe_started();
    let following: Arc<Mutex<HashSet<String>>> = Arc::default();
    loop {
        let document_id = match started.recv().await {
            Ok(id) => id,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed draft announcements");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if !following
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(document_id.clone())
        {
            continue;
        }
        tokio::spawn(print_settled_document(
            context.clone(),
            document_id,
            following.clone(),
        ));
    }
}

async fn print_settled_document(
    context: AppContext,
    document_id: String,
    following: Arc<Mutex<HashSet<String>>>,
) {
    let editor = Arc::new(Mutex::new(DocumentEditor::default()));
    let follower = tokio::spawn(follow_draft(
        editor.clone(),
        context.drafts.subscribe(&document_id),
    ));
    let mut settled = context.drafts.subscribe(&document_id);
    let _ = settled.wait_for(|draft| draft.is_none()).await;
    follower.abort();
    drop(settled);
    following
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&document_id);

    match context.persistence().fetch_latest_document(&document_id).await {
        Ok(document) => {
            let mut editor = editor.lock().unwrap_or_else(|e| e.into_inner());
            editor.set_streaming(false);
            if let Err(e) = editor.reconcile(&document.content) {
                tracing::warn!(document_id = %document_id, error = %e, "Reconcile failed");
            }
            println!(
                "\n[{} v{}]\n{}\n",
                document.title,
                document.version_number,
                editor.content()
            );
        }
        Err(e) => {
            tracing::warn!(document_id = %document_id, error = %e, "Document not saved")
        }
    }
}
