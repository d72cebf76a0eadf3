use super::normalizer::{self, RawBatch};
use crate::error::{AppError, Result};
use crate::sources::{SnapshotFetcher, StreamTransport};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Credential that unlocks withheld data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn expiring(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(AppError::InvalidCredential("token is empty".to_string()));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(AppError::InvalidCredential(format!(
                    "token expired at {}",
                    expires_at
                )));
            }
        }
        Ok(())
    }
}

/// How a batch splits between data that may be applied and data that was withheld.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateDecision {
    /// Payloads that may be normalized and applied.
    pub cleartext: Vec<Value>,
    /// Ids (or names) of individually withheld entities.
    pub withheld: Vec<String>,
    /// The whole batch was withheld.
    pub whole_batch: bool,
}

impl GateDecision {
    pub fn is_gated(&self) -> bool {
        self.whole_batch || !self.withheld.is_empty()
    }
}

/// Decides whether incoming batches pass through or are withheld pending access.
pub struct AccessGate {
    transport: Arc<StreamTransport>,
    fetcher: Arc<SnapshotFetcher>,
    access_required: AtomicBool,
}

impl AccessGate {
    pub fn new(transport: Arc<StreamTransport>, fetcher: Arc<SnapshotFetcher>) -> Self {
        Self {
            transport,
            fetcher,
            access_required: AtomicBool::new(false),
        }
    }

    /// Split `batch` into cleartext payloads and withheld entities.
    pub fn inspect(&self, batch: RawBatch) -> GateDecision {
        let mut decision = GateDecision {
            whole_batch: batch.encrypted,
            ..GateDecision::default()
        };

        if batch.encrypted {
            decision.withheld = batch
                .payloads
                .iter()
                .filter_map(|p| normalizer::identity(p).map(|(id, _)| id))
                .collect();
        } else {
            for payload in batch.payloads {
                if normalizer::is_withheld(&payload) {
                    let key = normalizer::identity(&payload)
                        .map(|(id, _)| id)
                        .unwrap_or_else(|| "unknown".to_string());
                    decision.withheld.push(key);
                } else {
                    decision.cleartext.push(payload);
                }
            }
        }

        if decision.is_gated() {
            if !self.access_required.swap(true, Ordering::SeqCst) {
                warn!("Server is withholding roulette data; access required");
            }
        } else if !decision.cleartext.is_empty()
            && self.access_required.swap(false, Ordering::SeqCst)
        {
            info!("Roulette data is flowing in cleartext again");
        }

        decision
    }

    /// Store a credential and reconnect so the next batch arrives unlocked.
    ///
    /// A stopped stream is not restarted; the token is used on its next
    /// connect. Returns whether a reconnect was started.
    pub fn supply_credential(&self, credential: AccessCredential) -> Result<bool> {
        credential.validate()?;

        self.transport.set_access_token(Some(credential.token.clone()));
        self.fetcher.set_access_token(Some(credential.token));

        let reconnecting = self.transport.force_reconnect_if_started();
        if reconnecting {
            info!("Access credential accepted; reconnecting stream");
        } else {
            info!("Access credential stored for the next connect");
        }
        Ok(reconnecting)
    }

    pub fn access_required(&self) -> bool {
        self.access_required.load(Ordering::SeqCst)
    }

}
