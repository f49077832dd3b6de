//! Audit events for cost accounting and operator alerting
//!
//! Emitted as structured `tracing` records under the `audit` target so a
//! log pipeline can route them to a metrics store without touching the
//! rest of the service output.

use crate::core_types::{ChainId, DepositId};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// `tracing` target every audit record is emitted under
pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Detection-to-confirmation latency
    DepositConfirmed {
        deposit_id: DepositId,
        chain: ChainId,
        asset: String,
        amount: Decimal,
        latency_ms: i64,
    },
    /// `gas_spent` is what the sponsor paid, in native base units
    SweepSucceeded {
        deposit_id: DepositId,
        chain: ChainId,
        asset: String,
        amount: Decimal,
        sweep_tx_id: String,
        funding_tx_id: Option<String>,
        gas_spent: u128,
    },
    SweepFailed {
        deposit_id: DepositId,
        chain: ChainId,
        asset: String,
        code: &'static str,
        reason: String,
    },
    /// Sweeps on this chain are blocked until the sponsor is topped up
    SponsorBalanceLow {
        chain: ChainId,
        sponsor: String,
        balance: u128,
        required: u128,
    },
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            AuditEvent::DepositConfirmed {
                deposit_id,
                chain,
                latency_ms,
                ..
            } => info!(
                target: AUDIT_TARGET,
                event = "deposit_confirmed",
                %deposit_id,
                %chain,
                latency_ms,
                payload = %payload
            ),
            AuditEvent::SweepSucceeded {
                deposit_id,
                chain,
                gas_spent,
                ..
            } => info!(
                target: AUDIT_TARGET,
                event = "sweep_succeeded",
                %deposit_id,
                %chain,
                gas_spent = %gas_spent,
                payload = %payload
            ),
            AuditEvent::SweepFailed {
                deposit_id,
                chain,
                code,
                ..
            } => warn!(
                target: AUDIT_TARGET,
                event = "sweep_failed",
                %deposit_id,
                %chain,
                code,
                payload = %payload
            ),
            AuditEvent::SponsorBalanceLow { chain, sponsor, .. } => error!(
                target: AUDIT_TARGET,
                event = "sponsor_balance_low",
                %chain,
                sponsor = %sponsor,
                payload = %payload
            ),
        }
    }
}

/// Collects events in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
