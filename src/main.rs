use std::sync::Arc;

use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;

use slotline::auth::{PresetConfirmation, StaticAuthorization};
use slotline::backend::MemoryBackend;
use slotline::booking::{BookingMutator, CalendarViewModel, DeleteOutcome, ModalState};
use slotline::config::Config;
use slotline::model::{BookingId, Span, UserId};
use slotline::time;

const HELP: &str = "\
commands:
  list                          show bookings on the current resource
  book <start> <end> <title..>  reserve a range (RFC3339 instants)
  edit <id> <title..>           retitle a booking
  move <id> <start> <end>       reschedule a booking
  delete <id> [yes]             delete a booking; without `yes` it is declined
  use <resource>                switch resource
  login <user> | logout | whoami
  quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotline::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let backend = Arc::new(MemoryBackend::open(&config.journal_path())?);
    info!("slotline started");
    info!("  journal: {}", config.journal_path().display());
    info!("  resource: {}", config.resource);
    info!("  call timeout: {:?}", config.call_timeout);
    let metrics = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics}");

    tokio::spawn(slotline::compactor::run_compactor(backend.clone(), config.compact_threshold));

    let auth = Arc::new(StaticAuthorization::new(config.user.clone(), config.admins.clone()));
    let confirm = Arc::new(PresetConfirmation::new(false));
    let mutator =
        BookingMutator::new(backend.clone(), backend.clone(), auth.clone(), confirm.clone())
            .with_call_timeout(config.call_timeout);

    let mut calendar = CalendarViewModel::new(config.resource.clone(), mutator);
    calendar.refresh_viewer().await;
    if let Err(e) = calendar.attach(backend.as_ref()).await {
        tracing::error!("initial load failed: {e}");
    }

    println!("{HELP}");
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    loop {
        tokio::select! {
            change = calendar.next_change(), if calendar.is_attached() => {
                match change {
                    Some(kind) => println!("[{}] remote {}", calendar.resource(), kind.label()),
                    None => {
                        tracing::warn!("change feed ended");
                        calendar.detach();
                    }
                }
            }
            line = lines.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        tracing::error!("stdin error: {e}");
                        break;
                    }
                    None => break,
                };
                let command = Command::parse(&line);
                if command == Some(Command::Quit) {
                    break;
                }
                match command {
                    Some(command) => run(command, &mut calendar, &backend, &auth, &confirm).await,
                    None if line.trim().is_empty() => {}
                    None => println!("{HELP}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    calendar.detach();
    info!("slotline stopped");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List,
    Book { span: Span, title: String },
    Edit { id: BookingId, title: String },
    Move { id: BookingId, span: Span },
    Delete { id: BookingId, confirmed: bool },
    Use { resource: String },
    Login { user: UserId },
    Logout,
    WhoAmI,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let command = match verb {
            "list" => Command::List,
            "book" => {
                let span = parse_span(words.next()?, words.next()?)?;
                let title = words.collect::<Vec<_>>().join(" ");
                Command::Book { span, title }
            }
            "edit" => {
                let id = BookingId::from(words.next()?);
                let title = words.collect::<Vec<_>>().join(" ");
                Command::Edit { id, title }
            }
            "move" => {
                let id = BookingId::from(words.next()?);
                let span = parse_span(words.next()?, words.next()?)?;
                Command::Move { id, span }
            }
            "delete" => {
                let id = BookingId::from(words.next()?);
                let confirmed = words.next() == Some("yes");
                Command::Delete { id, confirmed }
            }
            "use" => Command::Use {
                resource: words.next()?.to_string(),
            },
            "login" => Command::Login {
                user: UserId::from(words.next()?),
            },
            "logout" => Command::Logout,
            "whoami" => Command::WhoAmI,
            "quit" | "exit" => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

/// Reversed ranges are let through so the mutator can report them.
fn parse_span(start: &str, end: &str) -> Option<Span> {
    Some(Span::unchecked(time::parse_instant(start)?, time::parse_instant(end)?))
}

async fn run(
    command: Command,
    calendar: &mut CalendarViewModel,
    backend: &Arc<MemoryBackend>,
    auth: &StaticAuthorization,
    confirm: &PresetConfirmation,
) {
    match command {
        Command::List => {
            calendar.pump_feed();
            let events = calendar.events();
            if events.is_empty() {
                println!("no bookings on {}", calendar.resource());
            }
            for ev in events {
                let flags = match (ev.own, ev.editable) {
                    (true, _) => "mine",
                    (false, true) => "editable",
                    (false, false) => "",
                };
                println!(
                    "{}  {}  {}  {}",
                    ev.id,
                    time::format_range(&Span::unchecked(ev.start, ev.end)),
                    ev.title,
                    flags
                );
            }
        }
        Command::Book { span, title } => {
            calendar.on_range_select(span);
            if let Some(form) = calendar.form_mut() {
                form.set_title(title);
            }
            report(calendar.submit_modal().await);
            if matches!(calendar.modal(), ModalState::Creating { .. }) {
                calendar.close_create_modal().await;
            }
        }
        Command::Edit { id, title } => {
            if !calendar.on_event_click(&id) {
                println!("no booking {id} on {}", calendar.resource());
                return;
            }
            if let Some(form) = calendar.form_mut() {
                form.set_title(title);
            }
            report(calendar.submit_modal().await);
            if matches!(calendar.modal(), ModalState::Editing { .. }) {
                calendar.close_edit_modal().await;
            }
        }
        Command::Move { id, span } => {
            let revert = || println!("move of {id} reverted");
            match calendar.on_drag_reschedule(&id, span, revert).await {
                Ok(row) => println!("moved {} to {}", row.id, time::format_range(&row.span())),
                Err(e) => println!("{}", e.user_message()),
            }
        }
        Command::Delete { id, confirmed } => {
            if !calendar.on_event_click(&id) {
                println!("no booking {id} on {}", calendar.resource());
                return;
            }
            confirm.set(confirmed);
            match calendar.delete_from_modal().await {
                Some(Ok(DeleteOutcome::Deleted)) => println!("deleted {id}"),
                Some(Ok(DeleteOutcome::Declined)) => println!("kept {id} (add `yes` to confirm)"),
                Some(Err(e)) => println!("{}", e.user_message()),
                None => {}
            }
            confirm.set(false);
            if matches!(calendar.modal(), ModalState::Editing { .. }) {
                calendar.close_edit_modal().await;
            }
        }
        Command::Use { resource } => {
            if let Err(e) = calendar.switch_resource(resource, backend.as_ref()).await {
                println!("{}", e.user_message());
            }
            println!("now on {} ({} bookings)", calendar.resource(), calendar.store().len());
        }
        Command::Login { user } => {
            auth.set_viewer(Some(user)).await;
            calendar.refresh_viewer().await;
            println!("signed in as {}", display_viewer(calendar.viewer()));
        }
        Command::Logout => {
            auth.set_viewer(None).await;
            calendar.refresh_viewer().await;
            println!("signed out");
        }
        Command::WhoAmI => println!("{}", display_viewer(calendar.viewer())),
        Command::Quit => {}
    }
}

fn report<T: std::fmt::Debug>(result: Option<Result<T, slotline::booking::BookingError>>) {
    match result {
        Some(Ok(row)) => println!("ok: {row:?}"),
        Some(Err(e)) => println!("{}", e.user_message()),
        None => {}
    }
}

fn display_viewer(viewer: Option<&UserId>) -> String {
    viewer.map_or_else(|| "anonymous".to_string(), UserId::to_string)
}
