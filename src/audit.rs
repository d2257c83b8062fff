//! Best-effort security audit trail.
//!
//! Events are queued on a bounded channel and written by a background task
//! as `tracing` events with the `audit` target. Recording never waits: a
//! full or closed channel drops the event.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::oauth::types::TokenKind;

/// Security-relevant events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    AuthorizationCodeIssued {
        client_id: String,
        user_id: String,
        authorization_id: String,
    },
    AuthorizationCodeRedeemed {
        client_id: String,
        user_id: String,
        authorization_id: String,
    },
    RefreshTokenRotated {
        client_id: String,
        user_id: String,
        authorization_id: String,
    },
    RefreshTokenReuseDetected {
        client_id: String,
        user_id: String,
        authorization_id: Option<String>,
        revoked: usize,
    },
    TokenRevoked {
        client_id: String,
        kind: TokenKind,
        revoked: usize,
    },
    SigningKeyRotated {
        key_id: String,
        previous_key_id: Option<String>,
    },
    SessionEstablished {
        user_id: String,
    },
    LoggedOut {
        user_id: Option<String>,
        client_id: Option<String>,
    },
}

/// Cheap, cloneable handle used by request handlers
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditEvent>,
}

/// Consumes queued events; run it on a tracked background task
pub struct AuditWriter {
    receiver: mpsc::Receiver<AuditEvent>,
}

impl AuditLogger {
    pub fn new(capacity: usize) -> (Self, AuditWriter) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, AuditWriter { receiver })
    }

    pub fn record(&self, event: AuditEvent) {
        if let Err(err) = self.sender.try_send(event) {
            tracing::warn!(error = %err, "audit event dropped");
        }
    }
}

impl AuditWriter {
    /// Write events until cancelled, then drain whatever is still queued.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => write_event(&event),
                    None => return,
                },
            }
        }

        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            write_event(&event);
        }
        tracing::debug!("audit writer stopped");
    }
}

fn write_event(event: &AuditEvent) {
    match event {
        AuditEvent::AuthorizationCodeIssued {
            client_id,
            user_id,
            authorization_id,
        } => tracing::info!(
            target: "audit",
            %client_id, %user_id, %authorization_id,
            "authorization code issued"
        ),
        AuditEvent::AuthorizationCodeRedeemed {
            client_id,
            user_id,
            authorization_id,
        } => tracing::info!(
            target: "audit",
            %client_id, %user_id, %authorization_id,
            "authorization code redeemed"
        ),
        AuditEvent::RefreshTokenRotated {
            client_id,
            user_id,
            authorization_id,
        } => tracing::info!(
            target: "audit",
            %client_id, %user_id, %authorization_id,
            "refresh token rotated"
        ),
        AuditEvent::RefreshTokenReuseDetected {
            client_id,
            user_id,
            authorization_id,
            revoked,
        } => tracing::warn!(
            target: "audit",
            %client_id, %user_id, ?authorization_id, revoked,
            "refresh token reuse detected"
        ),
        AuditEvent::TokenRevoked {
            client_id,
            kind,
            revoked,
        } => tracing::info!(
            target: "audit",
            %client_id, %kind, revoked,
            "token revoked"
        ),
        AuditEvent::SigningKeyRotated {
            key_id,
            previous_key_id,
        } => tracing::info!(
            target: "audit",
            %key_id, ?previous_key_id,
            "signing key rotated"
        ),
        AuditEvent::SessionEstablished { user_id } => {
            tracing::info!(target: "audit", %user_id, "session established")
        }
        AuditEvent::LoggedOut { user_id, client_id } => {
            tracing::info!(target: "audit", ?user_id, ?client_id, "logged out")
        }
    }
}
