//! Line-oriented terminal front end.

use crate::api::models::Pin;
use crate::app::{self, AppConfig};
use crate::controller::{UserCommand, View};
use crate::error::Result;
use crate::session::{BubbleKind, ViewUpdate};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEFAULT_SERVER: &str = "http://localhost:5050";

const HELP: &str = "\
/connect <PIN>  verificar y conectar con un contacto
/contacts       listar contactos conocidos
/pick <n>       conectar con el contacto n de la lista
/clear          limpiar el historial
/retry          reintentar el registro del PIN
/quit           salir
Cualquier otra línea se envía como mensaje.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Command(UserCommand),
    ListContacts,
    Pick(usize),
    Help,
    Quit,
    Empty,
}

pub fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Line::Command(UserCommand::Send(trimmed.to_string()));
    };
    let (cmd, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match (cmd, arg.trim()) {
        ("connect", pin) => Line::Command(UserCommand::Connect(pin.to_string())),
        ("contacts", _) => Line::ListContacts,
        ("pick", n) => n.parse().map(Line::Pick).unwrap_or(Line::Help),
        ("clear", _) => Line::Command(UserCommand::Clear),
        ("retry", _) => Line::Command(UserCommand::RetryRegistration),
        ("quit" | "exit", _) => Line::Quit,
        _ => Line::Help,
    }
}

/// Prints updates to stdout and remembers the contact list for `/pick`.
#[derive(Clone, Default)]
pub struct ConsoleView {
    contacts: Arc<Mutex<Vec<Pin>>>,
}

impl ConsoleView {
    pub fn contacts(&self) -> Vec<Pin> {
        self.contacts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn render(update: &ViewUpdate) -> Option<String> {
        match update {
            ViewUpdate::Bubble(b) => Some(match b.kind {
                BubbleKind::System => format!("[{}] * {}", b.time, b.text),
                BubbleKind::Own => format!("[{}] > {}", b.time, b.text),
                BubbleKind::Peer => format!("[{}] {}", b.time, b.text),
            }),
            ViewUpdate::ClearLog => Some("\x1b[2J\x1b[H".to_string()),
            ViewUpdate::OwnPin(pin) => Some(format!("Tu PIN: {pin}")),
            ViewUpdate::Target(pin) => Some(format!("Contacto activo: {pin}")),
            ViewUpdate::Contacts(list) => Some(list_contacts(list)),
            ViewUpdate::ClearInput => None,
        }
    }
}

fn list_contacts(list: &[Pin]) -> String {
    if list.is_empty() {
        return "Sin contactos.".to_string();
    }
    list.iter()
        .enumerate()
        .map(|(i, pin)| format!("  {}. {}", i + 1, pin))
        .collect::<Vec<_>>()
        .join("\n")
}

impl View for ConsoleView {
    fn update(&mut self, update: ViewUpdate) {
        if let ViewUpdate::Contacts(list) = &update {
            if let Ok(mut contacts) = self.contacts.lock() {
                *contacts = list.clone();
            }
        }
        if let Some(text) = Self::render(&update) {
            println!("{text}");
        }
    }
}

async fn ask_server() -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("Servidor (default {DEFAULT_SERVER}): ").as_bytes())
        .await?;
    stdout.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let server = crate::utils::normalize_url(&line);
    Ok(if server.is_empty() { DEFAULT_SERVER.to_string() } else { server })
}

pub async fn run(mut config: AppConfig) -> Result<()> {
    if !config.is_configured() {
        config.server_url = ask_server().await?;
        if let Err(e) = config.save() {
            log::warn!("could not save config: {e}");
        }
    }
    println!("Conectando a {}... (/help para ayuda)", config.server_url);

    let view = ConsoleView::default();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(app::run_session(config, view.clone(), cmd_rx));
    let lines = BufReader::new(tokio::io::stdin()).lines();
    drive(lines, &view, cmd_tx, session).await
}

/// Feed input lines to the session until the user quits, input ends or the
/// session itself finishes.
async fn drive<R>(
    mut lines: Lines<R>,
    view: &ConsoleView,
    cmd_tx: mpsc::UnboundedSender<UserCommand>,
    mut session: JoinHandle<Result<()>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let finished = loop {
        let line = tokio::select! {
            biased;
            line = lines.next_line() => line?,
            outcome = &mut session => break Some(outcome),
        };
        let Some(line) = line else { break None };
        let command = match parse_line(&line) {
            Line::Command(cmd) => cmd,
            Line::ListContacts => {
                println!("{}", list_contacts(&view.contacts()));
                continue;
            }
            Line::Pick(n) => match n.checked_sub(1).and_then(|i| view.contacts().get(i).cloned()) {
                Some(pin) => UserCommand::PickContact(pin),
                None => {
                    println!("No hay contacto {n}.");
                    continue;
                }
            },
            Line::Help => {
                println!("{HELP}");
                continue;
            }
            Line::Quit => break None,
            Line::Empty => continue,
        };
        if cmd_tx.send(command).is_err() {
            break None;
        }
    };
    drop(cmd_tx);

    let outcome = match finished {
        Some(outcome) => outcome,
        None => session.await,
    };
    match outcome {
        Ok(result) => result,
        Err(e) => {
            log::error!("session task failed: {e}");
            Ok(())
        }
    }
}
