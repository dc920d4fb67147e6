//! Client session state and its transitions.
//!
//! [`Session::handle`] is pure: it takes an [`Action`] (user command, network
//! completion, socket event) and returns the [`Effect`]s an adapter must carry
//! out. Nothing here touches the network, the store or a widget.

use crate::api::events::{ChatMessage, InboundEvent, OutboundEvent};
use crate::api::models::{Pin, RegisterResponse};
use std::collections::VecDeque;

/// Optimistic sends remembered for echo suppression.
const MAX_PENDING_ECHOES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleKind {
    /// Written by this client (optimistic echo or another tab with our PIN).
    Own,
    Peer,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    pub kind: BubbleKind,
    pub text: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unregistered,
    Idle { me: Pin },
    Connected { me: Pin, target: Pin },
}

/// Everything a front end needs to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Bubble(Bubble),
    ClearLog,
    OwnPin(Pin),
    Target(Pin),
    Contacts(Vec<Pin>),
    ClearInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Started { stored: Option<Pin>, cached_contacts: Vec<Pin> },
    Registered(RegisterResponse),
    RegistrationFailed(String),
    RetryRegistration,
    ConnectRequested(String),
    LookupCompleted { pin: Pin, exists: bool },
    LookupFailed { pin: Pin, reason: String },
    ContactSelected(Pin),
    ContactsLoaded(Vec<Pin>),
    ContactsFailed(String),
    SendRequested(String),
    EmitFailed { event: &'static str, reason: String },
    ClearRequested,
    SocketConnected,
    SocketClosed(String),
    Inbound(InboundEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Show(ViewUpdate),
    Emit(OutboundEvent),
    PersistPin(Pin),
    CacheContacts(Vec<Pin>),
    Register(Option<Pin>),
    LookupPin(Pin),
    FetchContacts,
}

impl Effect {
    /// Effects that need a [`crate::api::client::ChatBackend`] round trip.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Register(_) | Self::LookupPin(_) | Self::FetchContacts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEcho {
    target: Pin,
    text: String,
}

pub type Clock = Box<dyn Fn() -> String + Send>;

pub struct Session {
    me: Option<Pin>,
    target: Option<Pin>,
    stored: Option<Pin>,
    /// A `Register` is in flight.
    registering: bool,
    pending: VecDeque<PendingEcho>,
    clock: Clock,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_clock(Box::new(crate::utils::now_hhmm))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self { me: None, target: None, stored: None, registering: false, pending: VecDeque::new(), clock }
    }

    pub fn me(&self) -> Option<&Pin> {
        self.me.as_ref()
    }

    pub fn target(&self) -> Option<&Pin> {
        self.target.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        match (&self.me, &self.target) {
            (None, _) => ConnectionState::Unregistered,
            (Some(me), None) => ConnectionState::Idle { me: me.clone() },
            (Some(me), Some(target)) => ConnectionState::Connected { me: me.clone(), target: target.clone() },
        }
    }

    pub fn handle(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::Started { stored, cached_contacts } => {
                self.stored = stored.clone();
                let mut out = Vec::new();
                if !cached_contacts.is_empty() {
                    out.push(Effect::Show(ViewUpdate::Contacts(cached_contacts)));
                }
                self.registering = true;
                out.push(Effect::Register(stored));
                out.push(Effect::FetchContacts);
                out
            }
            Action::Registered(RegisterResponse { pin, reused }) => {
                self.registering = false;
                if let Some(me) = &self.me {
                    log::warn!("ignoring late registration of {pin}, already joined as {me}");
                    return Vec::new();
                }
                log::info!("own PIN {pin} (reused: {reused})");
                self.me = Some(pin.clone());
                self.stored = Some(pin.clone());
                let notice = if reused { format!("PIN reusado: {pin}") } else { format!("PIN asignado: {pin}") };
                vec![
                    Effect::PersistPin(pin.clone()),
                    Effect::Show(ViewUpdate::OwnPin(pin.clone())),
                    Effect::Emit(OutboundEvent::JoinWithPin { pin }),
                    self.system(notice),
                ]
            }
            Action::RegistrationFailed(reason) => {
                self.registering = false;
                log::warn!("registration failed: {reason}");
                vec![self.system(format!("No se pudo obtener un PIN: {reason}"))]
            }
            Action::RetryRegistration => match &self.me {
                Some(me) => vec![self.system(format!("Ya tenés el PIN {me}."))],
                None if self.registering => vec![self.system("Ya se está pidiendo un PIN.".to_string())],
                None => {
                    self.registering = true;
                    vec![Effect::Register(self.stored.clone())]
                }
            },
            Action::ConnectRequested(input) => {
                let Some(pin) = Pin::parse(&input) else { return Vec::new() };
                if self.me.is_none() {
                    return vec![self.system("Todavía no tenés un PIN asignado.".to_string())];
                }
                vec![Effect::LookupPin(pin)]
            }
            Action::LookupCompleted { pin, exists: true } => self.connect_to(pin),
            Action::LookupCompleted { pin, exists: false } => vec![self.system(format!(
                "El PIN {pin} no existe. Asegúrate de que tu contacto haya abierto la app."
            ))],
            Action::LookupFailed { pin, reason } => {
                log::warn!("lookup of {pin} failed: {reason}");
                vec![self.system(format!("No se pudo verificar el PIN {pin}: {reason}"))]
            }
            Action::ContactSelected(pin) => {
                if self.me.is_none() {
                    return vec![self.system("Todavía no tenés un PIN asignado.".to_string())];
                }
                self.connect_to(pin)
            }
            Action::ContactsLoaded(contacts) => vec![
                Effect::CacheContacts(contacts.clone()),
                Effect::Show(ViewUpdate::Contacts(contacts)),
            ],
            Action::ContactsFailed(reason) => {
                log::warn!("contact list failed: {reason}");
                vec![self.system(format!("No se pudo cargar la lista de contactos: {reason}"))]
            }
            Action::SendRequested(input) => self.send(input),
            Action::EmitFailed { event, reason } => {
                log::warn!("emit {event} failed: {reason}");
                let notice = if event == "send_private_message" {
                    format!("No se pudo enviar el mensaje: {reason}")
                } else {
                    format!("Error de conexión ({event}): {reason}")
                };
                vec![self.system(notice)]
            }
            Action::ClearRequested => vec![Effect::Show(ViewUpdate::ClearLog)],
            Action::SocketConnected => {
                log::debug!("socket namespace connected");
                Vec::new()
            }
            Action::SocketClosed(reason) => {
                vec![self.system(format!("Se perdió la conexión con el servidor: {reason}"))]
            }
            Action::Inbound(InboundEvent::ReceiveMessage(msg)) => self.receive(msg),
            Action::Inbound(InboundEvent::SystemMessage(notice)) => {
                let time = notice.time.unwrap_or_else(|| (self.clock)());
                vec![Effect::Show(ViewUpdate::Bubble(Bubble { kind: BubbleKind::System, text: notice.text, time }))]
            }
        }
    }

    fn connect_to(&mut self, pin: Pin) -> Vec<Effect> {
        self.target = Some(pin.clone());
        vec![
            Effect::Show(ViewUpdate::Target(pin.clone())),
            Effect::Emit(OutboundEvent::StartPrivateChat { target_pin: pin.clone() }),
            self.system(format!("Conectado a {pin}. Los mensajes ahora son privados.")),
        ]
    }

    fn send(&mut self, input: String) -> Vec<Effect> {
        let text = input.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let Some(target) = self.target.clone() else {
            return vec![self.system("Primero conectate al PIN de tu contacto.".to_string())];
        };
        if self.pending.len() == MAX_PENDING_ECHOES {
            self.pending.pop_front();
        }
        self.pending.push_back(PendingEcho { target: target.clone(), text: text.to_string() });
        vec![
            Effect::Emit(OutboundEvent::SendPrivateMessage { target_pin: target, text: text.to_string() }),
            self.bubble(BubbleKind::Own, text.to_string(), None),
            Effect::Show(ViewUpdate::ClearInput),
        ]
    }

    fn receive(&mut self, msg: ChatMessage) -> Vec<Effect> {
        let own = self.me.as_ref() == Some(&msg.from_pin);
        if own {
            let matched = self.pending.iter().position(|p| {
                p.text == msg.text.trim() && msg.to_pin.as_ref().is_none_or(|to| *to == p.target)
            });
            if let Some(idx) = matched {
                self.pending.remove(idx);
                log::trace!("suppressed echo of an optimistic send");
                return Vec::new();
            }
        }
        let kind = if own { BubbleKind::Own } else { BubbleKind::Peer };
        vec![self.bubble(kind, format!("{}: {}", msg.from_pin, msg.text), msg.time)]
    }

    fn bubble(&self, kind: BubbleKind, text: String, time: Option<String>) -> Effect {
        let time = time.unwrap_or_else(|| (self.clock)());
        Effect::Show(ViewUpdate::Bubble(Bubble { kind, text, time }))
    }

    fn system(&self, text: String) -> Effect {
        self.bubble(BubbleKind::System, text, None)
    }
}
