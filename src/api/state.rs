use std::sync::Arc;

use crate::admin::Admin;
use crate::ledger::Ledger;
use crate::observability::Metrics;
use crate::status::StatusReporter;

#[derive(Clone)]
pub struct AppState {
    pub reporter: StatusReporter,
    pub admin: Admin,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, metrics: Arc<Metrics>) -> Self {
        Self {
            reporter: StatusReporter::new(ledger.clone()),
            admin: Admin::new(ledger),
            metrics,
        }
    }
}
