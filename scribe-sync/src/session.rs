//! Session negotiation: owner mode vs guest mode.
//!
//! ```text
//!   Owner:  list documents ──► bind first ──► /ws/document/<id>/?token=…
//!
//!   Guest:  /ws/document/shared/<sid>/ ──► wait for INITIALIZE (bounded)
//!                                              │
//!                     ┌────────────────────────┼──────────────────────┐
//!                     ▼                        ▼                      ▼
//!               document + role          error field             timeout
//!               can_edit = Writer        SessionError            SessionError
//! ```
//!
//! The session gates store mutations on the negotiated role. It does not
//! enforce permissions beyond that; the authority rejects anything it does
//! not allow.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::api::{DocumentApi, DocumentSummary, Permission};
use crate::config::ClientConfig;
use crate::connection::{
    ConnectTarget, ConnectionEvent, ConnectionManager, SessionRole, NORMAL_CLOSURE,
};
use crate::error::{ConfigError, SessionError, SyncError};
use crate::protocol::{DocumentId, Image, Role, ServerMessage};
use crate::store::SyncStore;

/// What a guest learned from INITIALIZE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAccess {
    pub document_id: DocumentId,
    pub role: Role,
    pub can_edit: bool,
}

#[derive(Debug, Clone)]
struct Access {
    role: SessionRole,
    can_edit: bool,
    credential: Option<String>,
}

/// One client session: a connection, the replica it feeds, and the role
/// that decides which mutations are allowed.
pub struct Session {
    config: ClientConfig,
    connection: ConnectionManager,
    store: SyncStore,
    api: DocumentApi,
    access: Mutex<Option<Access>>,
}

impl Session {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let connection = ConnectionManager::new(config.connection.clone())?;
        let api = DocumentApi::new(&config.api_base_url)?;
        let store = SyncStore::new(connection.clone());
        Ok(Self {
            config,
            connection,
            store,
            api,
            access: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn api(&self) -> &DocumentApi {
        &self.api
    }

    pub fn role(&self) -> Option<SessionRole> {
        self.access.lock().as_ref().map(|access| access.role)
    }

    pub fn can_edit(&self) -> bool {
        self.access.lock().as_ref().is_some_and(|access| access.can_edit)
    }

    /// Fetch the caller's documents, bind the first and connect.
    pub async fn start_owner(&self, credential: &str) -> Result<Option<DocumentId>, SyncError> {
        let documents = self.api.list_documents(credential).await?;
        log::info!("Fetched {} documents", documents.len());
        Ok(self.start_owner_with(credential, documents)?)
    }

    /// Owner session over an already fetched document list.
    ///
    /// Returns the bound document, or `None` if the list is empty.
    pub fn start_owner_with(
        &self,
        credential: impl Into<String>,
        documents: Vec<DocumentSummary>,
    ) -> Result<Option<DocumentId>, ConfigError> {
        let credential = credential.into();
        self.connection.disconnect();
        self.store.clear();
        self.store.set_documents(documents);

        *self.access.lock() = Some(Access {
            role: SessionRole::Owner,
            can_edit: true,
            credential: Some(credential.clone()),
        });

        let first = self.store.documents().first().map(|doc| doc.id.clone());
        match &first {
            Some(document_id) => self.store.open(ConnectTarget::Owner {
                document_id: document_id.clone(),
                credential,
            })?,
            None => log::info!("Owner session started with no documents"),
        }
        Ok(first)
    }

    /// Join a shared document and wait for the authority's INITIALIZE.
    ///
    /// On timeout or rejection the connection is torn down, the store is
    /// emptied and `can_edit` stays false. Never retried automatically.
    pub async fn join_as_guest(&self, shared_id: &str) -> Result<GuestAccess, SyncError> {
        *self.access.lock() = None;
        let target = ConnectTarget::Guest {
            shared_id: shared_id.to_string(),
        };

        self.connection.disconnect();
        self.store.bind_target(&target);
        self.store.attach();

        // Registered after the store, so the reducer has already bound the
        // document by the time the waiter fires.
        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(Mutex::new(Some(tx)));
        let subscription = self.connection.add_message_handler(Arc::new(
            move |message: &ServerMessage| {
                if matches!(message, ServerMessage::Initialize { .. }) {
                    if let Some(tx) = waiter.lock().take() {
                        let _ = tx.send(message.clone());
                    }
                }
            },
        ));

        let mut events = self.connection.events();
        self.connection.connect(target)?;

        let timeout = self.config.guest_init_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            tokio::select! {
                message = rx => message.map_err(|_| SyncError::from(SessionError::ConnectionLost)),
                lost = wait_for_loss(&mut events) => Err(lost),
            }
        })
        .await;
        subscription.unsubscribe();

        let result: Result<GuestAccess, SyncError> = match outcome {
            Err(_) => Err(SessionError::InitializeTimeout(timeout).into()),
            Ok(Err(e)) => Err(e),
            Ok(Ok(ServerMessage::Initialize {
                error: Some(reason),
                ..
            })) => Err(SessionError::Rejected(reason).into()),
            Ok(Ok(ServerMessage::Initialize {
                document: Some(document),
                role,
                ..
            })) => {
                let role = role.unwrap_or(Role::Reader);
                Ok(GuestAccess {
                    document_id: document.id,
                    role,
                    can_edit: role.can_edit(),
                })
            }
            Ok(Ok(_)) => Err(SessionError::Rejected("INITIALIZE carried no document".into()).into()),
        };

        match result {
            Ok(access) => {
                log::info!(
                    "Joined shared document {} as {:?}",
                    access.document_id,
                    access.role
                );
                *self.access.lock() = Some(Access {
                    role: SessionRole::Guest,
                    can_edit: access.can_edit,
                    credential: None,
                });
                Ok(access)
            }
            Err(e) => {
                log::error!("Guest session failed: {e}");
                self.connection.disconnect();
                self.store.clear();
                Err(e)
            }
        }
    }

    /// Issue a share token for the bound document. Owner only.
    pub async fn share(&self, permissions: &[Permission]) -> Result<String, SyncError> {
        let credential = match self.access.lock().as_ref() {
            None => return Err(ConfigError::NoSession.into()),
            Some(Access {
                role: SessionRole::Owner,
                credential: Some(credential),
                ..
            }) => credential.clone(),
            Some(_) => return Err(SessionError::NotOwner.into()),
        };
        let document_id = self.store.bound_id().ok_or(ConfigError::NoSession)?;
        Ok(self
            .api
            .issue_share_token(&credential, &document_id, permissions)
            .await?)
    }

    pub fn update_content(&self, content: impl Into<String>) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.update_content(content))
    }

    pub fn rename(&self, title: impl Into<String>) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.rename(title))
    }

    pub fn add_image(&self, image: Image) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.add_image(image))
    }

    pub fn remove_image(&self, image_id: &str) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.remove_image(image_id))
    }

    pub fn undo(&self) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.handle_undo())
    }

    pub fn redo(&self) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.handle_redo())
    }

    pub fn mark_saved(&self, saved: bool) -> Result<bool, ConfigError> {
        Ok(self.editable()? && self.store.mark_saved(saved))
    }

    pub fn select_document(&self, id: &DocumentId) -> Result<bool, ConfigError> {
        if self.access.lock().is_none() {
            return Err(ConfigError::NoSession);
        }
        self.store.select_document(id)
    }

    /// Disconnect and forget everything. Safe to call repeatedly.
    pub fn end(&self) {
        let had_session = self.access.lock().take().is_some();
        self.connection.disconnect();
        self.store.clear();
        if had_session {
            log::info!("Session ended");
        }
    }

    fn editable(&self) -> Result<bool, ConfigError> {
        match self.access.lock().as_ref() {
            None => Err(ConfigError::NoSession),
            Some(access) if !access.can_edit => {
                log::debug!("Ignoring mutation from a read-only session");
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

/// Resolve once the connection is gone for good: closed normally by
/// either side, or out of reconnect attempts.
async fn wait_for_loss(events: &mut broadcast::Receiver<ConnectionEvent>) -> SyncError {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Closed {
                code: NORMAL_CLOSURE,
            }) => return SessionError::ConnectionLost.into(),
            Ok(ConnectionEvent::Failed { attempts }) => {
                return SyncError::Transport(format!(
                    "connection failed after {attempts} reconnect attempts"
                ));
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
