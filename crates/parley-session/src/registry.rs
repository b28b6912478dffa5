//! Process-wide call registry and the manager that creates sessions.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{CallRecord, CallSession, SessionCommand, SessionDeps, SessionSetup, SharedRecord};
use parley_types::{normalize_phone_number, CallDirection, CallSnapshot, CallStatus, EndReason};
use parley_voice::TransportTarget;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

const SHUTDOWN_WAIT: Duration = Duration::from_secs(15);
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub(crate) struct SessionHandle {
    record: SharedRecord,
    control: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    fn snapshot(&self) -> CallSnapshot {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    fn status(&self) -> CallStatus {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }
}

/// Call id to session handle. Insertion and purge are atomic per id.
#[derive(Clone, Default)]
pub(crate) struct CallRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl CallRegistry {
    /// Returns `false` if the id is already taken.
    fn insert(&self, call_id: &str, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(call_id) {
            return false;
        }
        sessions.insert(call_id.to_string(), handle);
        true
    }

    fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
            .cloned()
    }

    pub(crate) fn remove(&self, call_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(call_id)
            .is_some()
    }

    fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A caller already waiting in a room.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub room_name: String,
    pub caller_identity: String,
    /// Caller's phone number, when the telephony provider supplies it.
    pub caller_id: Option<String>,
}

/// A number to dial.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub phone_number: String,
    /// Added to the conversation as a system turn after the prompt.
    pub initial_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCall {
    pub call_id: String,
    pub room_name: String,
    pub bot_identity: String,
}

/// Creates, looks up and ends call sessions.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    registry: CallRegistry,
    deps: SessionDeps,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
        Self {
            registry: CallRegistry::default(),
            deps,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Answers a caller waiting in `room_name`.
    ///
    /// Returns once the session has issued its transport connect. The call
    /// becomes active asynchronously.
    pub async fn create_inbound(&self, call: InboundCall) -> Result<CreatedCall, SessionError> {
        let call_id = Uuid::new_v4().to_string();
        let counterparty = call
            .caller_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| call.caller_identity.clone());
        let target = TransportTarget::Inbound {
            room_name: call.room_name,
            caller_identity: call.caller_identity,
        };
        self.start(call_id, CallDirection::Inbound, target, counterparty, None)
            .await
    }

    /// Dials `phone_number` into a fresh room.
    pub async fn create_outbound(&self, call: OutboundCall) -> Result<CreatedCall, SessionError> {
        let phone_number =
            normalize_phone_number(&call.phone_number, &self.config.default_country_code)?;
        let call_id = Uuid::new_v4().to_string();
        let target = TransportTarget::Outbound {
            room_name: format!("{}-{}", self.config.outbound_room_prefix, call_id),
            phone_number: phone_number.clone(),
        };
        self.start(
            call_id,
            CallDirection::Outbound,
            target,
            phone_number,
            call.initial_context,
        )
        .await
    }

    async fn start(
        &self,
        call_id: String,
        direction: CallDirection,
        target: TransportTarget,
        counterparty: String,
        initial_context: Option<String>,
    ) -> Result<CreatedCall, SessionError> {
        let bot_identity = format!("{}-{}", self.config.bot_identity, short_id(&call_id));
        let room_name = target.room_name().to_string();

        let record: SharedRecord = Arc::new(RwLock::new(CallRecord::new(
            &call_id,
            direction,
            &room_name,
            &bot_identity,
            &counterparty,
        )));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            record: Arc::clone(&record),
            control: control_tx,
        };
        if !self.registry.insert(&call_id, handle) {
            return Err(SessionError::Aborted { call_id });
        }

        info!(
            call_id = %call_id,
            direction = direction.as_str(),
            room = %room_name,
            "creating call session"
        );

        let setup = SessionSetup {
            call_id: call_id.clone(),
            target,
            bot_identity: bot_identity.clone(),
            initial_context,
            record,
        };
        let (session, steps) = CallSession::new(
            setup,
            self.deps.clone(),
            Arc::clone(&self.config),
            self.registry.clone(),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(session.run(control_rx, steps, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(CreatedCall {
                call_id,
                room_name,
                bot_identity,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Aborted { call_id }),
        }
    }

    pub fn get(&self, call_id: &str) -> Result<CallSnapshot, SessionError> {
        self.registry
            .get(call_id)
            .map(|handle| handle.snapshot())
            .ok_or_else(|| SessionError::NotFound(call_id.to_string()))
    }

    /// Every call that has not yet ended, oldest first.
    pub fn list_active(&self) -> Vec<CallSnapshot> {
        let mut calls: Vec<CallSnapshot> = self
            .registry
            .handles()
            .iter()
            .map(SessionHandle::snapshot)
            .filter(|snapshot| snapshot.status != CallStatus::Ended)
            .collect();
        calls.sort_by_key(|snapshot| snapshot.start_time);
        calls
    }

    pub fn active_count(&self) -> usize {
        self.registry
            .handles()
            .iter()
            .filter(|handle| handle.status() != CallStatus::Ended)
            .count()
    }

    /// Number of records held, including ended calls not yet purged.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks a call to end.
    ///
    /// Returns `false` if the call is unknown or has already ended. `true`
    /// once the session has accepted the request, or while it is already
    /// tearing down. Teardown completes asynchronously.
    pub async fn end(&self, call_id: &str) -> bool {
        let Some(handle) = self.registry.get(call_id) else {
            return false;
        };
        match handle.status() {
            CallStatus::Ended => return false,
            CallStatus::Ending => return true,
            _ => {}
        }

        let (accepted_tx, accepted_rx) = oneshot::channel();
        let command = SessionCommand::End {
            reason: EndReason::Requested,
            accepted: Some(accepted_tx),
        };
        if handle.control.send(command).is_err() {
            return false;
        }
        accepted_rx.await.unwrap_or(false)
    }

    /// Ends every call and waits for teardown to finish.
    pub async fn shutdown(&self) {
        let handles = self.registry.handles();
        let mut ending = 0;
        for handle in &handles {
            if handle.status() != CallStatus::Ended
                && handle
                    .control
                    .send(SessionCommand::End {
                        reason: EndReason::Shutdown,
                        accepted: None,
                    })
                    .is_ok()
            {
                ending += 1;
            }
        }
        if ending == 0 {
            return;
        }
        info!(calls = ending, "ending active calls for shutdown");

        let all_ended = async {
            while handles.iter().any(|h| h.status() != CallStatus::Ended) {
                tokio::time::sleep(SHUTDOWN_POLL).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_WAIT, all_ended).await.is_err() {
            warn!("calls still tearing down at shutdown deadline");
        }
    }
}

fn short_id(call_id: &str) -> &str {
    call_id.split('-').next().unwrap_or(call_id)
}
