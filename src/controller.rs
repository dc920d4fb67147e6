use crate::api::client::ChatBackend;
use crate::api::models::Pin;
use crate::api::socket::{EventSink, SocketEvent};
use crate::session::{Action, Effect, Session, ViewUpdate};
use crate::storage::PinStore;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Where rendered output goes.
pub trait View {
    fn update(&mut self, update: ViewUpdate);
}

impl View for mpsc::UnboundedSender<ViewUpdate> {
    fn update(&mut self, update: ViewUpdate) {
        let _ = self.send(update);
    }
}

impl View for Vec<ViewUpdate> {
    fn update(&mut self, update: ViewUpdate) {
        self.push(update);
    }
}

/// What a front end can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Connect(String),
    PickContact(Pin),
    Send(String),
    Clear,
    RetryRegistration,
}

impl From<UserCommand> for Action {
    fn from(cmd: UserCommand) -> Self {
        match cmd {
            UserCommand::Connect(input) => Action::ConnectRequested(input),
            UserCommand::PickContact(pin) => Action::ContactSelected(pin),
            UserCommand::Send(text) => Action::SendRequested(text),
            UserCommand::Clear => Action::ClearRequested,
            UserCommand::RetryRegistration => Action::RetryRegistration,
        }
    }
}

impl From<SocketEvent> for Action {
    fn from(event: SocketEvent) -> Self {
        match event {
            SocketEvent::Connected { .. } => Action::SocketConnected,
            SocketEvent::Inbound(inbound) => Action::Inbound(inbound),
            SocketEvent::Closed(reason) => Action::SocketClosed(reason),
        }
    }
}

/// Run one network effect and turn the outcome into the follow-up action.
async fn resolve<B: ChatBackend>(backend: &B, effect: Effect) -> Option<Action> {
    match effect {
        Effect::Register(stored) => Some(match backend.register(stored).await {
            Ok(resp) => Action::Registered(resp),
            Err(e) => Action::RegistrationFailed(e.to_string()),
        }),
        Effect::LookupPin(pin) => Some(match backend.pin_exists(pin.clone()).await {
            Ok(exists) => Action::LookupCompleted { pin, exists },
            Err(e) => Action::LookupFailed { pin, reason: e.to_string() },
        }),
        Effect::FetchContacts => Some(match backend.contacts().await {
            Ok(list) => Action::ContactsLoaded(list),
            Err(e) => Action::ContactsFailed(e.to_string()),
        }),
        _ => None,
    }
}

/// Owns the session and carries out its effects.
///
/// Network effects run in spawned tasks and come back through an internal
/// channel, so socket events keep rendering while a request is in flight.
pub struct Controller<B, E, S, V> {
    session: Session,
    backend: B,
    sink: E,
    store: S,
    view: V,
    results_tx: mpsc::UnboundedSender<Action>,
    results_rx: mpsc::UnboundedReceiver<Action>,
    in_flight: usize,
}

impl<B, E, S, V> Controller<B, E, S, V>
where
    B: ChatBackend,
    E: EventSink,
    S: PinStore,
    V: View,
{
    pub fn new(backend: B, sink: E, store: S, view: V) -> Self {
        Self::with_session(Session::new(), backend, sink, store, view)
    }

    pub fn with_session(session: Session, backend: B, sink: E, store: S, view: V) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self { session, backend, sink, store, view, results_tx, results_rx, in_flight: 0 }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load local state and kick off registration and the contact fetch.
    pub fn start(&mut self) {
        let stored = self.store.load_pin().unwrap_or_else(|e| {
            log::warn!("could not read stored PIN: {e}");
            None
        });
        let cached_contacts = self.store.load_contacts().unwrap_or_else(|e| {
            log::warn!("could not read contact cache: {e}");
            Vec::new()
        });
        self.dispatch(Action::Started { stored, cached_contacts });
    }

    pub fn dispatch(&mut self, action: Action) {
        let mut queue = VecDeque::from([action]);
        while let Some(action) = queue.pop_front() {
            for effect in self.session.handle(action) {
                if let Some(follow_up) = self.perform(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn perform(&mut self, effect: Effect) -> Option<Action> {
        match effect {
            Effect::Show(update) => self.view.update(update),
            Effect::Emit(event) => {
                if let Err(e) = self.sink.emit(&event) {
                    return Some(Action::EmitFailed { event: event.name(), reason: e.to_string() });
                }
            }
            Effect::PersistPin(pin) => {
                if let Err(e) = self.store.save_pin(&pin) {
                    log::warn!("could not persist PIN {pin}: {e}");
                }
            }
            Effect::CacheContacts(contacts) => {
                if let Err(e) = self.store.save_contacts(&contacts) {
                    log::warn!("could not cache contacts: {e}");
                }
            }
            network @ (Effect::Register(_) | Effect::LookupPin(_) | Effect::FetchContacts) => {
                let backend = self.backend.clone();
                let results = self.results_tx.clone();
                self.in_flight += 1;
                tokio::spawn(async move {
                    if let Some(action) = resolve(&backend, network).await {
                        let _ = results.send(action);
                    }
                });
            }
        }
        None
    }

    fn complete(&mut self, action: Action) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.dispatch(action);
    }

    /// Wait until every in-flight request has reported back.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.results_rx.recv().await {
                Some(action) => self.complete(action),
                None => break,
            }
        }
    }

    /// Drive the session until the front end drops its command sender.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<UserCommand>,
        mut socket: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        self.start();
        let mut socket_open = true;
        loop {
            tokio::select! {
                Some(action) = self.results_rx.recv() => self.complete(action),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd.into()),
                    None => break,
                },
                event = socket.recv(), if socket_open => match event {
                    Some(event) => self.dispatch(event.into()),
                    None => socket_open = false,
                },
            }
        }
        log::debug!("session loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::{ChatMessage, InboundEvent, OutboundEvent};
    use crate::api::models::RegisterResponse;
    use crate::error::{ClientError, Result};
    use crate::session::{Bubble, BubbleKind};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn pin(s: &str) -> Pin {
        Pin::parse(s).unwrap()
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        known: Arc<Mutex<HashSet<Pin>>>,
        next: Arc<Mutex<Vec<Pin>>>,
        contacts: Vec<Pin>,
        fail_contacts: bool,
        fail_register: Arc<Mutex<bool>>,
    }

    impl FakeBackend {
        fn issuing(pins: &[&str]) -> Self {
            let backend = Self::default();
            backend.next.lock().unwrap().extend(pins.iter().rev().map(|p| pin(p)));
            backend
        }

        fn knowing(self, pins: &[&str]) -> Self {
            self.known.lock().unwrap().extend(pins.iter().map(|p| pin(p)));
            self
        }
    }

    impl ChatBackend for FakeBackend {
        async fn register(&self, stored: Option<Pin>) -> Result<RegisterResponse> {
            if *self.fail_register.lock().unwrap() {
                return Err(ClientError::Status { endpoint: "/api/register".into(), status: 503 });
            }
            let mut known = self.known.lock().unwrap();
            if let Some(stored) = stored.filter(|p| known.contains(p)) {
                return Ok(RegisterResponse { pin: stored, reused: true });
            }
            let fresh = self.next.lock().unwrap().pop().expect("no PIN left to issue");
            known.insert(fresh.clone());
            Ok(RegisterResponse { pin: fresh, reused: false })
        }

        async fn pin_exists(&self, pin: Pin) -> Result<bool> {
            Ok(self.known.lock().unwrap().contains(&pin))
        }

        async fn contacts(&self) -> Result<Vec<Pin>> {
            if self.fail_contacts {
                return Err(ClientError::Status { endpoint: "/api/contacts".into(), status: 500 });
            }
            Ok(self.contacts.clone())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<OutboundEvent>>>,
        closed: bool,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &OutboundEvent) -> Result<()> {
            if self.closed {
                return Err(ClientError::Closed);
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        pin: Mutex<Option<Pin>>,
        contacts: Mutex<Vec<Pin>>,
    }

    impl PinStore for MemoryStore {
        fn load_pin(&self) -> Result<Option<Pin>> {
            Ok(self.pin.lock().unwrap().clone())
        }

        fn save_pin(&self, pin: &Pin) -> Result<()> {
            *self.pin.lock().unwrap() = Some(pin.clone());
            Ok(())
        }

        fn load_contacts(&self) -> Result<Vec<Pin>> {
            Ok(self.contacts.lock().unwrap().clone())
        }

        fn save_contacts(&self, contacts: &[Pin]) -> Result<()> {
            *self.contacts.lock().unwrap() = contacts.to_vec();
            Ok(())
        }
    }

    type TestController = Controller<FakeBackend, RecordingSink, MemoryStore, Vec<ViewUpdate>>;

    fn controller(backend: FakeBackend, sink: RecordingSink, store: MemoryStore) -> TestController {
        let session = Session::with_clock(Box::new(|| "12:00".to_string()));
        Controller::with_session(session, backend, sink, store, Vec::new())
    }

    fn texts(view: &[ViewUpdate]) -> Vec<&str> {
        view.iter()
            .filter_map(|u| match u {
                ViewUpdate::Bubble(Bubble { text, .. }) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    async fn started(backend: FakeBackend, sink: RecordingSink) -> TestController {
        let mut c = controller(backend, sink, MemoryStore::default());
        c.start();
        c.settle().await;
        c
    }

    #[tokio::test]
    async fn bootstrap_assigns_and_persists_pin() {
        let sink = RecordingSink::default();
        let c = started(FakeBackend::issuing(&["AB12"]), sink.clone()).await;

        assert_eq!(texts(c.view()), vec!["PIN asignado: AB12"]);
        assert!(c.view().contains(&ViewUpdate::OwnPin(pin("AB12"))));
        assert_eq!(c.store().load_pin().unwrap(), Some(pin("AB12")));
        assert_eq!(*sink.sent.lock().unwrap(), vec![OutboundEvent::JoinWithPin { pin: pin("AB12") }]);
    }

    #[tokio::test]
    async fn restart_with_stored_pin_reuses_it() {
        let backend = FakeBackend::issuing(&["AB12", "CD34"]);
        let first = started(backend.clone(), RecordingSink::default()).await;
        let stored = first.store().load_pin().unwrap();

        let store = MemoryStore::default();
        *store.pin.lock().unwrap() = stored;
        let mut second = controller(backend, RecordingSink::default(), store);
        second.start();
        second.settle().await;

        assert_eq!(texts(second.view()), vec!["PIN reusado: AB12"]);
        assert_eq!(second.session().me(), Some(&pin("AB12")));
    }

    #[tokio::test]
    async fn registration_failure_then_retry() {
        let backend = FakeBackend::issuing(&["AB12"]);
        *backend.fail_register.lock().unwrap() = true;
        let mut c = started(backend.clone(), RecordingSink::default()).await;
        assert!(c.session().me().is_none());
        assert!(texts(c.view())[0].starts_with("No se pudo obtener un PIN:"));

        *backend.fail_register.lock().unwrap() = false;
        c.dispatch(UserCommand::RetryRegistration.into());
        c.settle().await;
        assert_eq!(c.session().me(), Some(&pin("AB12")));
    }

    #[tokio::test]
    async fn connect_succeeds_only_for_existing_pins() {
        let sink = RecordingSink::default();
        let mut c = started(FakeBackend::issuing(&["AB12"]).knowing(&["ZZ99"]), sink.clone()).await;

        c.dispatch(UserCommand::Connect("nope".into()).into());
        c.settle().await;
        assert!(c.session().target().is_none());

        c.dispatch(UserCommand::Connect(" zz99".into()).into());
        c.settle().await;
        assert_eq!(c.session().target(), Some(&pin("ZZ99")));
        assert!(sink.sent.lock().unwrap().contains(&OutboundEvent::StartPrivateChat { target_pin: pin("ZZ99") }));

        c.dispatch(UserCommand::Connect("GONE".into()).into());
        c.settle().await;
        assert_eq!(c.session().target(), Some(&pin("ZZ99")));
        assert_eq!(
            texts(c.view()).last().copied(),
            Some("El PIN GONE no existe. Asegúrate de que tu contacto haya abierto la app.")
        );
    }

    #[tokio::test]
    async fn send_to_target_emits_and_renders_once() {
        let sink = RecordingSink::default();
        let mut c = started(FakeBackend::issuing(&["AB12"]), sink.clone()).await;
        c.dispatch(UserCommand::PickContact(pin("ZZ99")).into());
        sink.sent.lock().unwrap().clear();
        c.view_mut().clear();

        c.dispatch(UserCommand::Send("hello".into()).into());
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![OutboundEvent::SendPrivateMessage { target_pin: pin("ZZ99"), text: "hello".into() }]
        );
        assert_eq!(
            c.view()[0],
            ViewUpdate::Bubble(Bubble { kind: BubbleKind::Own, text: "hello".into(), time: "12:00".into() })
        );
        assert_eq!(texts(c.view()).len(), 1);
    }

    #[tokio::test]
    async fn closed_socket_turns_send_into_notice() {
        let sink = RecordingSink { closed: true, ..Default::default() };
        let mut c = started(FakeBackend::issuing(&["AB12"]), sink).await;
        c.dispatch(UserCommand::PickContact(pin("ZZ99")).into());
        c.view_mut().clear();

        c.dispatch(UserCommand::Send("hello".into()).into());
        assert_eq!(texts(c.view()), vec!["hello", "No se pudo enviar el mensaje: socket connection closed"]);
    }

    #[tokio::test]
    async fn cached_contacts_show_before_fetch_replaces_them() {
        let backend = FakeBackend { contacts: vec![pin("Q1"), pin("ZZ99")], ..FakeBackend::issuing(&["AB12"]) };
        let store = MemoryStore::default();
        *store.contacts.lock().unwrap() = vec![pin("OLD1")];
        let mut c = controller(backend, RecordingSink::default(), store);
        c.start();
        assert_eq!(c.view()[0], ViewUpdate::Contacts(vec![pin("OLD1")]));

        c.settle().await;
        assert!(c.view().contains(&ViewUpdate::Contacts(vec![pin("Q1"), pin("ZZ99")])));
        assert_eq!(c.store().load_contacts().unwrap(), vec![pin("Q1"), pin("ZZ99")]);
    }

    #[tokio::test]
    async fn failed_contact_fetch_keeps_cache_and_explains() {
        let backend = FakeBackend { fail_contacts: true, ..FakeBackend::issuing(&["AB12"]) };
        let store = MemoryStore::default();
        *store.contacts.lock().unwrap() = vec![pin("OLD1")];
        let mut c = controller(backend, RecordingSink::default(), store);
        c.start();
        c.settle().await;

        assert!(texts(c.view()).contains(&"No se pudo cargar la lista de contactos: /api/contacts answered HTTP 500"));
        assert_eq!(
            c.view().iter().filter(|u| matches!(u, ViewUpdate::Contacts(_))).count(),
            1,
            "only the cached list is shown"
        );
        assert_eq!(c.store().load_contacts().unwrap(), vec![pin("OLD1")]);
        assert_eq!(c.session().me(), Some(&pin("AB12")));
    }

    #[tokio::test]
    async fn run_loop_handles_commands_and_socket_events() {
        let (view_tx, mut view_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sock_tx, sock_rx) = mpsc::unbounded_channel();
        let session = Session::with_clock(Box::new(|| "12:00".to_string()));
        let c = Controller::with_session(
            session,
            FakeBackend::issuing(&["AB12"]),
            RecordingSink::default(),
            MemoryStore::default(),
            view_tx,
        );
        let task = tokio::spawn(c.run(cmd_rx, sock_rx));

        let mut seen = Vec::new();
        while !seen.contains(&ViewUpdate::OwnPin(pin("AB12"))) {
            seen.push(view_rx.recv().await.unwrap());
        }

        sock_tx
            .send(SocketEvent::Inbound(InboundEvent::ReceiveMessage(ChatMessage {
                from_pin: pin("ZZ99"),
                to_pin: Some(pin("AB12")),
                text: "hi".into(),
                username: None,
                time: None,
            })))
            .unwrap();
        let peer = loop {
            if let ViewUpdate::Bubble(b) = view_rx.recv().await.unwrap() {
                if b.kind == BubbleKind::Peer {
                    break b;
                }
            }
        };
        assert_eq!(peer.text, "ZZ99: hi");

        cmd_tx.send(UserCommand::Clear).unwrap();
        while view_rx.recv().await.unwrap() != ViewUpdate::ClearLog {}

        drop(cmd_tx);
        task.await.unwrap();
    }
}
