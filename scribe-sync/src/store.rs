//! Local replica of the document state.
//!
//! The store is the single source of truth for what the UI shows. Local
//! edits are applied optimistically and transmitted; every inbound message
//! from the authority overwrites the addressed fields unconditionally.
//!
//! ```text
//!   update_content ──► version+1, content, saved=false ──► send UPDATE
//!                                                             │
//!                                                             ▼
//!   apply_inbound  ◄── UPDATE / UNDO / REDO / IMAGE_* ◄── authority
//!   (content and version replaced, even if the version goes down)
//! ```
//!
//! Inbound processing never transmits. The reducer [`apply_inbound`] is a
//! plain function over [`StoreState`] so it can be tested and benchmarked
//! without a connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::DocumentSummary;
use crate::connection::{ConnectTarget, ConnectionManager, MessageHandler, Subscription};
use crate::error::ConfigError;
use crate::protocol::{ClientMessage, Collaborator, DocumentId, DocumentSnapshot, Image, ServerMessage};

const DEFAULT_LAST_UPDATE: &str = "Just now";

/// A document as held by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    /// Authority-controlled; local bumps are provisional
    pub version: u64,
    pub saved: bool,
    pub collaborators: Vec<Collaborator>,
    pub images: Vec<Image>,
    pub last_update: String,
}

impl DocumentState {
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            version: 0,
            saved: true,
            collaborators: vec![Collaborator::new("1", "You")],
            images: Vec::new(),
            last_update: DEFAULT_LAST_UPDATE.to_string(),
        }
    }

    fn from_snapshot(snapshot: &DocumentSnapshot) -> Self {
        let mut doc = Self::new(snapshot.id.clone(), "");
        doc.replace_from(snapshot);
        doc
    }

    /// Overwrite with whatever the snapshot carries.
    fn replace_from(&mut self, snapshot: &DocumentSnapshot) {
        if let Some(content) = &snapshot.content {
            self.content.clone_from(content);
        }
        if let Some(title) = &snapshot.title {
            self.title.clone_from(title);
        }
        if let Some(version) = snapshot.version {
            self.version = version;
        }
    }

    /// The version a local mutation would carry, or `None` at `u64::MAX`.
    fn next_version(&self) -> Option<u64> {
        let next = self.version.checked_add(1);
        if next.is_none() {
            log::warn!("Version of document {} is exhausted; ignoring local edit", self.id);
        }
        next
    }
}

impl From<DocumentSummary> for DocumentState {
    fn from(summary: DocumentSummary) -> Self {
        let mut doc = Self::new(summary.id, summary.title);
        doc.version = summary.version.unwrap_or(0);
        if let Some(updated_at) = summary.updated_at {
            doc.last_update = updated_at;
        }
        if let Some(collaborators) = summary.collaborators {
            doc.collaborators = collaborators;
        }
        doc
    }
}

/// Every document known to the session, plus the one bound to the
/// connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    pub documents: Vec<DocumentState>,
    pub bound: Option<DocumentId>,
}

impl StoreState {
    pub fn bound_document(&self) -> Option<&DocumentState> {
        let bound = self.bound.as_ref()?;
        self.documents.iter().find(|doc| &doc.id == bound)
    }

    pub fn bound_document_mut(&mut self) -> Option<&mut DocumentState> {
        let bound = self.bound.as_ref()?;
        self.documents.iter_mut().find(|doc| &doc.id == bound)
    }

    fn upsert(&mut self, doc: DocumentState) {
        match self.documents.iter_mut().find(|existing| existing.id == doc.id) {
            Some(existing) => *existing = doc,
            None => self.documents.push(doc),
        }
    }
}

/// Apply one authoritative message. Returns whether anything changed.
///
/// Messages for any document other than the bound one are ignored. The
/// only exception is an INITIALIZE arriving while nothing is bound, which
/// creates and binds its document (guest join).
pub fn apply_inbound(state: &mut StoreState, message: &ServerMessage) -> bool {
    if let ServerMessage::Initialize {
        document: Some(snapshot),
        ..
    } = message
    {
        if state.bound.is_none() {
            let doc = DocumentState::from_snapshot(snapshot);
            state.bound = Some(doc.id.clone());
            state.upsert(doc);
            return true;
        }
    }

    let Some(addressed) = message.document_id() else {
        return false;
    };
    let doc = match state.bound_document_mut() {
        Some(doc) if &doc.id == addressed => doc,
        _ => {
            log::debug!("Ignoring {} for unbound document {addressed}", message.kind());
            return false;
        }
    };

    match message {
        ServerMessage::Initialize { document, .. } => {
            if let Some(snapshot) = document {
                doc.replace_from(snapshot);
            }
        }
        ServerMessage::Update { document }
        | ServerMessage::Undo { document }
        | ServerMessage::Redo { document } => {
            if let Some(content) = &document.content {
                doc.content.clone_from(content);
            }
            doc.version = document.version.unwrap_or(doc.version);
        }
        ServerMessage::ImageAdd { image, version, .. } => {
            // Our own add comes back as an echo.
            if !doc.images.iter().any(|existing| existing.id == image.id) {
                doc.images.push(image.clone());
            }
            doc.version = version.unwrap_or(doc.version);
        }
        ServerMessage::ImageRemove {
            image_id, version, ..
        } => {
            doc.images.retain(|image| &image.id != image_id);
            doc.version = version.unwrap_or(doc.version);
        }
        ServerMessage::NameUpdate { name, .. } => {
            doc.title.clone_from(name);
        }
    }
    true
}

/// Shared handle to the replica.
///
/// Clones share state. Mutations send through the connection manager the
/// store was built with.
#[derive(Clone)]
pub struct SyncStore {
    state: Arc<Mutex<StoreState>>,
    connection: ConnectionManager,
    revision: Arc<watch::Sender<u64>>,
    handler: MessageHandler,
}

impl SyncStore {
    pub fn new(connection: ConnectionManager) -> Self {
        let state = Arc::new(Mutex::new(StoreState::default()));
        let (revision, _) = watch::channel(0);
        let revision = Arc::new(revision);

        let handler: MessageHandler = {
            let state = Arc::clone(&state);
            let revision = Arc::clone(&revision);
            Arc::new(move |message: &ServerMessage| {
                let changed = apply_inbound(&mut state.lock(), message);
                if changed {
                    revision.send_modify(|r| *r += 1);
                }
            })
        };

        Self {
            state,
            connection,
            revision,
            handler,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Snapshot of the whole replica.
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }

    pub fn documents(&self) -> Vec<DocumentState> {
        self.state.lock().documents.clone()
    }

    /// The bound document.
    pub fn current(&self) -> Option<DocumentState> {
        self.state.lock().bound_document().cloned()
    }

    pub fn bound_id(&self) -> Option<DocumentId> {
        self.state.lock().bound.clone()
    }

    /// Revision counter that ticks after every applied change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Replace the document list. The binding survives if its document is
    /// still listed.
    pub fn set_documents(&self, documents: Vec<DocumentSummary>) {
        {
            let mut state = self.state.lock();
            state.documents = documents.into_iter().map(DocumentState::from).collect();
            let still_listed = state
                .bound
                .as_ref()
                .is_some_and(|bound| state.documents.iter().any(|doc| &doc.id == bound));
            if !still_listed {
                state.bound = None;
            }
        }
        self.touch();
    }

    /// Register the reducer with the connection. Idempotent.
    pub fn attach(&self) -> Subscription {
        self.connection.add_message_handler(Arc::clone(&self.handler))
    }

    /// Start a fresh connection for `target`.
    pub fn open(&self, target: ConnectTarget) -> Result<(), ConfigError> {
        self.connection.disconnect();
        self.bind_target(&target);
        self.attach();
        self.connection.connect(target)
    }

    /// An owner target binds its document; a guest target empties the
    /// store so the next INITIALIZE can bind the shared document.
    pub(crate) fn bind_target(&self, target: &ConnectTarget) {
        {
            let mut state = self.state.lock();
            match target {
                ConnectTarget::Owner { document_id, .. } => {
                    if !state.documents.iter().any(|doc| &doc.id == document_id) {
                        state.documents.push(DocumentState::new(document_id.clone(), ""));
                    }
                    state.bound = Some(document_id.clone());
                }
                ConnectTarget::Guest { .. } => {
                    state.documents.clear();
                    state.bound = None;
                }
            }
        }
        self.touch();
    }

    /// Bind another listed document and move the connection to it.
    ///
    /// Returns `Ok(false)` for an unknown or already-bound document, and in
    /// a guest session, which is scoped to a single document.
    pub fn select_document(&self, id: &DocumentId) -> Result<bool, ConfigError> {
        let credential = match self.connection.target() {
            None => return Err(ConfigError::NoSession),
            Some(ConnectTarget::Guest { .. }) => {
                log::warn!("Guest sessions cannot switch documents");
                return Ok(false);
            }
            Some(ConnectTarget::Owner { credential, .. }) => credential,
        };

        {
            let mut state = self.state.lock();
            if state.bound.as_ref() == Some(id) {
                return Ok(false);
            }
            if !state.documents.iter().any(|doc| &doc.id == id) {
                log::warn!("Cannot select unknown document {id}");
                return Ok(false);
            }
            state.bound = Some(id.clone());
        }
        self.touch();

        self.attach();
        self.connection.connect(ConnectTarget::Owner {
            document_id: id.clone(),
            credential,
        })?;
        Ok(true)
    }

    /// Optimistically replace the content and send UPDATE with the bumped
    /// version.
    pub fn update_content(&self, content: impl Into<String>) -> bool {
        let content = content.into();
        let message = {
            let mut state = self.state.lock();
            let Some(doc) = state.bound_document_mut() else {
                log::debug!("Ignoring content update with no bound document");
                return false;
            };
            let Some(version) = doc.next_version() else {
                return false;
            };
            doc.version = version;
            doc.content.clone_from(&content);
            doc.saved = false;
            ClientMessage::Update {
                document_id: doc.id.clone(),
                content,
                version: doc.version,
            }
        };
        self.touch();
        self.connection.send(&message);
        true
    }

    /// Optimistically retitle the bound document. The version is not bumped.
    pub fn rename(&self, title: impl Into<String>) -> bool {
        let title = title.into();
        let message = {
            let mut state = self.state.lock();
            let Some(doc) = state.bound_document_mut() else {
                return false;
            };
            doc.title.clone_from(&title);
            ClientMessage::NameUpdate {
                document_id: doc.id.clone(),
                name: title,
                version: doc.version,
            }
        };
        self.touch();
        self.connection.send(&message);
        true
    }

    pub fn add_image(&self, image: Image) -> bool {
        let message = {
            let mut state = self.state.lock();
            let Some(doc) = state.bound_document_mut() else {
                return false;
            };
            if doc.images.iter().any(|existing| existing.id == image.id) {
                return false;
            }
            let Some(version) = doc.next_version() else {
                return false;
            };
            doc.version = version;
            doc.images.push(image.clone());
            ClientMessage::ImageAdd {
                document_id: doc.id.clone(),
                image,
                version: doc.version,
            }
        };
        self.touch();
        self.connection.send(&message);
        true
    }

    pub fn remove_image(&self, image_id: &str) -> bool {
        let message = {
            let mut state = self.state.lock();
            let Some(doc) = state.bound_document_mut() else {
                return false;
            };
            if !doc.images.iter().any(|image| image.id == image_id) {
                return false;
            }
            let Some(version) = doc.next_version() else {
                return false;
            };
            doc.images.retain(|image| image.id != image_id);
            doc.version = version;
            ClientMessage::ImageRemove {
                document_id: doc.id.clone(),
                image_id: image_id.to_string(),
                version: doc.version,
            }
        };
        self.touch();
        self.connection.send(&message);
        true
    }

    /// Ask the authority to undo. Local state changes only when the
    /// answer arrives.
    pub fn handle_undo(&self) -> bool {
        if !self.connection.is_open() {
            return false;
        }
        let message = {
            let state = self.state.lock();
            match state.bound_document() {
                Some(doc) if doc.version > 0 => {
                    log::debug!("Requesting undo from version {}", doc.version);
                    ClientMessage::Undo {
                        document_id: doc.id.clone(),
                        content: doc.content.clone(),
                        version: doc.version,
                    }
                }
                _ => return false,
            }
        };
        self.connection.send(&message)
    }

    /// Ask the authority to redo.
    pub fn handle_redo(&self) -> bool {
        if !self.connection.is_open() {
            return false;
        }
        let message = {
            let state = self.state.lock();
            let Some(doc) = state.bound_document() else {
                return false;
            };
            log::debug!("Requesting redo from version {}", doc.version);
            ClientMessage::Redo {
                document_id: doc.id.clone(),
                content: doc.content.clone(),
                version: doc.version,
            }
        };
        self.connection.send(&message)
    }

    pub fn mark_saved(&self, saved: bool) -> bool {
        {
            let mut state = self.state.lock();
            let Some(doc) = state.bound_document_mut() else {
                return false;
            };
            doc.saved = saved;
        }
        self.touch();
        true
    }

    /// Apply an authoritative message without going through the connection.
    pub fn apply_inbound(&self, message: &ServerMessage) -> bool {
        let changed = apply_inbound(&mut self.state.lock(), message);
        if changed {
            self.touch();
        }
        changed
    }

    /// Discard every document.
    pub fn clear(&self) {
        *self.state.lock() = StoreState::default();
        self.touch();
    }

    fn touch(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}
