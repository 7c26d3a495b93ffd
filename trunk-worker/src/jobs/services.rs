use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use trunk_queue::prelude::*;

use super::{BalanceSync, CallSimulation, CarrierSync, CrmSync, InvoiceGeneration, KnowledgeBaseIndex};

/// Business operations behind each platform job.
///
/// Implementations live with the platform's carrier, CRM and billing
/// integrations; the worker only routes payloads to them.
#[async_trait]
pub trait PlatformServices: Send + Sync {
    async fn sync_carriers(&self, job: CarrierSync, token: CancellationToken) -> Result<(), JobError>;

    async fn sync_crm_account(&self, job: CrmSync, token: CancellationToken) -> Result<(), JobError>;

    async fn generate_invoice(&self, job: InvoiceGeneration, token: CancellationToken) -> Result<(), JobError>;

    async fn index_document(&self, job: KnowledgeBaseIndex, token: CancellationToken) -> Result<(), JobError>;

    async fn simulate_call(&self, job: CallSimulation, token: CancellationToken) -> Result<(), JobError>;

    async fn sync_balances(&self, job: BalanceSync, token: CancellationToken) -> Result<(), JobError>;
}

/// Stand-in that logs each request; used until real integrations are wired in
#[derive(Debug, Clone, Default)]
pub struct LoggingServices;

#[async_trait]
impl PlatformServices for LoggingServices {
    async fn sync_carriers(&self, job: CarrierSync, _token: CancellationToken) -> Result<(), JobError> {
        info!(carrier_id = ?job.carrier_id, "Carrier sync requested");
        Ok(())
    }

    async fn sync_crm_account(&self, job: CrmSync, _token: CancellationToken) -> Result<(), JobError> {
        info!(account_id = %job.account_id, "CRM sync requested");
        Ok(())
    }

    async fn generate_invoice(&self, job: InvoiceGeneration, _token: CancellationToken) -> Result<(), JobError> {
        if job.period_end < job.period_start {
            return Err(JobError::permanent(format!(
                "Invoice period ends before it starts ({} < {})",
                job.period_end, job.period_start
            )));
        }
        info!(
            customer_id = job.customer_id,
            period_start = %job.period_start,
            period_end = %job.period_end,
            "Invoice generation requested"
        );
        Ok(())
    }

    async fn index_document(&self, job: KnowledgeBaseIndex, _token: CancellationToken) -> Result<(), JobError> {
        info!(document_id = %job.document_id, "Knowledge base indexing requested");
        Ok(())
    }

    /// Holds the line for the call's duration, hanging up early on cancellation
    async fn simulate_call(&self, job: CallSimulation, token: CancellationToken) -> Result<(), JobError> {
        info!(campaign_id = job.campaign_id, destination = %job.destination, "Simulating call");

        tokio::select! {
            _ = token.cancelled() => Err(JobError::retryable("Call simulation interrupted")),
            _ = tokio::time::sleep(Duration::from_secs(u64::from(job.duration_secs))) => {
                info!(campaign_id = job.campaign_id, "Call simulation finished");
                Ok(())
            }
        }
    }

    async fn sync_balances(&self, job: BalanceSync, _token: CancellationToken) -> Result<(), JobError> {
        info!(carrier_id = ?job.carrier_id, "Balance sync requested");
        Ok(())
    }
}
