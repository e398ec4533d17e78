use tracing::{info, warn};

use crate::migration::MigrationState;
use crate::traits::StatusStore;

/// Resolves the migration state the proxy should boot with.
///
/// The persisted status key is advisory only: a missing key, an unreadable
/// store or an unrecognized token all resolve to `Normal`. Startup never
/// fails over this key.
pub async fn recover_initial_state(store: &dyn StatusStore, key: &str) -> MigrationState {
    match store.read_status(key).await {
        Ok(Some(token)) => {
            let state = MigrationState::decode(&token);
            info!("Recovered persisted migration status {} from {}", state, key);
            state
        }
        Ok(None) => {
            info!("No persisted migration status under {}, assuming normal", key);
            MigrationState::Normal
        }
        Err(e) => {
            warn!("Could not read persisted migration status, assuming normal: {e}");
            MigrationState::Normal
        }
    }
}
