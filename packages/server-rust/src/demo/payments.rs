use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tenantflow_core::{Message, Propagation, TenantId};
use tracing::info;

use crate::messaging::MessageHandler;

/// Customer-to-business payment notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct C2bPayment {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    pub amount: f64,
    /// Informational copy supplied by the caller; never used for scoping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// A payment together with the tenant the listener was bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPayment {
    pub tenant: TenantId,
    pub payment: C2bPayment,
}

/// In-memory record of processed payments.
#[derive(Debug, Default)]
pub struct PaymentLedger {
    entries: Mutex<Vec<RecordedPayment>>,
}

impl PaymentLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tenant: TenantId, payment: C2bPayment) {
        self.entries.lock().push(RecordedPayment { tenant, payment });
    }

    #[must_use]
    pub fn entries(&self) -> Vec<RecordedPayment> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Consumes `payments.c2b`. Every payment must arrive with a tenant.
pub struct PaymentListener {
    ledger: Arc<PaymentLedger>,
    propagation: Propagation,
}

impl PaymentListener {
    #[must_use]
    pub fn new(ledger: Arc<PaymentLedger>, propagation: Propagation) -> Self {
        Self { ledger, propagation }
    }
}

#[async_trait]
impl MessageHandler for PaymentListener {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>> {
        let payment: C2bPayment = message.decode().context("decoding C2B payment")?;
        let tenant = self
            .propagation
            .current()
            .with_context(|| format!("payment {} arrived without a tenant", payment.transaction_id))?;

        info!(
            tenant_id = %tenant,
            transaction_id = %payment.transaction_id,
            amount = payment.amount,
            "C2B payment received"
        );
        self.ledger.record(tenant, payment);
        Ok(None)
    }
}
