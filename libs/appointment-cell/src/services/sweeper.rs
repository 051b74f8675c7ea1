// libs/appointment-cell/src/services/sweeper.rs
use std::sync::Arc;

use tracing::{info, instrument};

use shared_utils::clock::Clock;

use crate::models::AppointmentError;
use crate::services::lifecycle::missed_cutoff;
use crate::services::store::AppointmentStore;

/// Read-triggered reconciliation: confirmed appointments whose slot passed
/// more than the grace period ago, with no start stamp and no meet link,
/// become `missed`. Re-running immediately changes nothing.
pub struct MissedAppointmentSweeper {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
}

impl MissedAppointmentSweeper {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<usize, AppointmentError> {
        let cutoff = missed_cutoff(self.clock.now());
        let changed = self.store.mark_missed_before(cutoff).await?;

        if changed > 0 {
            info!("Sweeper marked {} appointments missed (cutoff {})", changed, cutoff);
        }
        Ok(changed)
    }
}
