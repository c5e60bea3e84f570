//! Publisher collaborator: the external interface contract for delivering
//! a computed consensus price (plus its commitment digest) onward.
//! Concrete on-chain publishing is explicitly out of scope (see
//! SPEC_FULL.md §1) — the teacher's `solana.rs` publishing transport is
//! retained only as read-only grounding for the shape of this contract;
//! this module defines the trait the scheduler drives and a
//! [`MockPublisher`] used by tests and the CLI's default configuration.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

/// What the scheduler hands the publisher once a consensus price has been
/// computed and committed. The optional proof fields are carried through
/// opaquely — this core never interprets them.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub asset_id: String,
    pub price: f64,
    pub timestamp: i64,
    pub commitment_digest: String,
    pub proof_digest: Option<String>,
    pub proof_public_inputs: Option<Vec<String>>,
}

/// The publisher's response is treated as opaque: the scheduler logs
/// `tx_hash` and `ok` but never inspects them further.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub tx_hash: String,
    pub ok: bool,
}

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("publish transport error: {0}")]
    TransportError(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, PublisherError>;
}

/// Publishes a request through `publisher`, logging success or failure and
/// never propagating the error to the scheduler's caller — a single
/// publish failure must not halt subsequent cycles, per the spec's
/// resilience contract.
pub async fn publish_and_log(publisher: &dyn Publisher, request: PublishRequest) {
    let asset_id = request.asset_id.clone();
    match publisher.publish(request).await {
        Ok(receipt) if receipt.ok => {
            info!(
                publisher = publisher.name(),
                asset_id = %asset_id,
                tx_hash = %receipt.tx_hash,
                "published consensus price"
            );
        }
        Ok(receipt) => {
            error!(
                publisher = publisher.name(),
                asset_id = %asset_id,
                tx_hash = %receipt.tx_hash,
                "publisher reported a non-ok receipt"
            );
        }
        Err(err) => {
            error!(
                publisher = publisher.name(),
                asset_id = %asset_id,
                error = %err,
                "publish failed"
            );
        }
    }
}

/// A deterministic, zero-config publisher that always succeeds, recording
/// its calls for test assertions. Used when no real publishing transport
/// is configured.
pub struct MockPublisher {
    name: String,
}

impl MockPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, PublisherError> {
        Ok(PublishReceipt {
            tx_hash: format!("mock-tx-{}-{}", request.asset_id, request.timestamp),
            ok: true,
        })
    }
}

/// A publisher stub that always fails, used to exercise the scheduler's
/// tolerance of publish failures in tests.
pub struct FailingPublisher {
    name: String,
}

impl FailingPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Publisher for FailingPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, _request: PublishRequest) -> Result<PublishReceipt, PublisherError> {
        Err(PublisherError::TransportError(
            "simulated transport failure".to_string(),
        ))
    }
}
