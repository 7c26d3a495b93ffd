//! Platform job types and their dispatch.

pub mod services;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use trunk_queue::prelude::*;

pub use services::{LoggingServices, PlatformServices};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierSync {
    /// `None` syncs every carrier
    pub carrier_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmSync {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceGeneration {
    pub customer_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseIndex {
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSimulation {
    pub campaign_id: i64,
    pub destination: String,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSync {
    /// `None` refreshes every carrier balance
    pub carrier_id: Option<i64>,
}

/// Every background job the platform runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", content = "payload", rename_all = "snake_case")]
pub enum PlatformJob {
    CarrierSync(CarrierSync),
    CrmSync(CrmSync),
    InvoiceGeneration(InvoiceGeneration),
    KnowledgeBaseIndex(KnowledgeBaseIndex),
    CallSimulation(CallSimulation),
    BalanceSync(BalanceSync),
}

#[async_trait]
impl JobSet for PlatformJob {
    type Context = Arc<dyn PlatformServices>;

    const JOB_TYPES: &'static [&'static str] = &[
        "carrier_sync",
        "crm_sync",
        "invoice_generation",
        "knowledge_base_index",
        "call_simulation",
        "balance_sync",
    ];

    fn job_type(&self) -> &'static str {
        match self {
            Self::CarrierSync(_) => "carrier_sync",
            Self::CrmSync(_) => "crm_sync",
            Self::InvoiceGeneration(_) => "invoice_generation",
            Self::KnowledgeBaseIndex(_) => "knowledge_base_index",
            Self::CallSimulation(_) => "call_simulation",
            Self::BalanceSync(_) => "balance_sync",
        }
    }

    async fn dispatch(self, services: Self::Context, token: CancellationToken) -> Result<(), JobError> {
        match self {
            Self::CarrierSync(job) => services.sync_carriers(job, token).await,
            Self::CrmSync(job) => services.sync_crm_account(job, token).await,
            Self::InvoiceGeneration(job) => services.generate_invoice(job, token).await,
            Self::KnowledgeBaseIndex(job) => services.index_document(job, token).await,
            Self::CallSimulation(job) => services.simulate_call(job, token).await,
            Self::BalanceSync(job) => services.sync_balances(job, token).await,
        }
    }

    fn priority(&self) -> Option<i32> {
        match self {
            Self::BalanceSync(_) => Some(10),
            Self::InvoiceGeneration(_) => Some(5),
            Self::CallSimulation(_) => Some(-5),
            _ => None,
        }
    }
}
