//! Budget enforcement over usage change-feed batches.
//!
//! Each `INSERT`/`MODIFY` record is classified by its sort key. A lease
//! summary at or over its budget ends that lease with `OverBudget`; a
//! principal summary at or over the principal ceiling ends every active
//! lease of the principal with `OverPrincipalBudget`. A failing record
//! never stops the rest of the batch.

use std::sync::Arc;

use super::LeaseService;
use crate::domain::usage::{LeaseUsageSummary, PrincipalUsageSummary};
use crate::domain::{ChangeKind, ChangeRecord, LeaseId, LeaseStatusReason, UsageSummary};
use crate::error::GatewayError;

/// Ends leases whose usage summaries cross a budget.
#[derive(Debug, Clone)]
pub struct BudgetEnforcer {
    leases: Arc<LeaseService>,
    principal_budget_amount: f64,
}

impl BudgetEnforcer {
    /// Creates an enforcer with the given principal budget ceiling.
    #[must_use]
    pub fn new(leases: Arc<LeaseService>, principal_budget_amount: f64) -> Self {
        Self {
            leases,
            principal_budget_amount,
        }
    }

    /// Processes every record of a batch and returns the number handled.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Multi`] carrying every per-record failure.
    pub async fn handle_batch(&self, records: &[ChangeRecord]) -> Result<usize, GatewayError> {
        let mut errors = Vec::new();
        for record in records {
            if let Err(e) = self.handle_record(record).await {
                errors.push(e);
            }
        }

        if let Err(e) = GatewayError::collect("Failed to handle usage change records", errors) {
            tracing::error!(error = %e, records = records.len(), "usage batch failed");
            return Err(e);
        }
        Ok(records.len())
    }

    /// Processes one change record.
    ///
    /// # Errors
    ///
    /// Returns the failure of the image decode or of the lease
    /// termination it triggered.
    pub async fn handle_record(&self, record: &ChangeRecord) -> Result<(), GatewayError> {
        if record.event_name == ChangeKind::Remove {
            return Ok(());
        }
        let Some(image) = &record.new_image else {
            return Err(GatewayError::internal(
                "Failed to unmarshal stream image",
                format!("{:?} record has no new image", record.event_name),
            ));
        };

        match image.summary()? {
            Some(UsageSummary::Lease(summary)) => self.enforce_lease(&summary).await,
            Some(UsageSummary::Principal(summary)) => self.enforce_principal(&summary).await,
            None => Ok(()),
        }
    }

    async fn enforce_lease(&self, summary: &LeaseUsageSummary) -> Result<(), GatewayError> {
        if !summary.is_over_budget() {
            return Ok(());
        }
        let id: LeaseId = summary.lease_id.parse().map_err(|e| {
            GatewayError::internal(
                "Failed to unmarshal stream image",
                format!("invalid lease id {}: {e}", summary.lease_id),
            )
        })?;
        tracing::info!(
            lease_id = %id,
            cost = summary.cost_amount,
            budget = summary.budget_amount,
            "lease is over budget"
        );
        self.leases.end(id, LeaseStatusReason::OverBudget).await?;
        Ok(())
    }

    async fn enforce_principal(&self, summary: &PrincipalUsageSummary) -> Result<(), GatewayError> {
        if !summary.is_over_budget(self.principal_budget_amount) {
            return Ok(());
        }
        tracing::info!(
            principal_id = %summary.principal_id,
            cost = summary.cost_amount,
            ceiling = self.principal_budget_amount,
            "principal is over budget"
        );

        let active = self.leases.active_for_principal(&summary.principal_id).await?;
        let mut errors = Vec::new();
        for lease in active {
            if let Err(e) = self
                .leases
                .end(lease.id, LeaseStatusReason::OverPrincipalBudget)
                .await
            {
                errors.push(e);
            }
        }
        GatewayError::collect(
            format!("Failed to end leases for principal {}", summary.principal_id),
            errors,
        )
    }
}
