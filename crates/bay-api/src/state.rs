use std::sync::Arc;

use bay_config::AuthSettings;
use bay_orchestrator::Bay;

#[derive(Clone)]
pub struct AppState {
    pub bay: Arc<Bay>,
    pub auth: Arc<AuthSettings>,
}
