use std::sync::Arc;
use std::time::Duration;

use sysproc_distributed::LocalCluster;
use sysproc_procedures::{SystemProcedures, UnknownResponsePolicy};

pub type SharedSession = Arc<Session>;

#[derive(Debug)]
pub struct Session {
    pub cluster: LocalCluster,
    pub procedures: SystemProcedures,
    pub unknown_policy: UnknownResponsePolicy,
    pub call_timeout: Option<Duration>,
}

impl Session {
    pub fn new(
        cluster: LocalCluster,
        unknown_policy: UnknownResponsePolicy,
        call_timeout: Option<Duration>,
    ) -> Self {
        let procedures = SystemProcedures::new(&cluster);
        Self {
            cluster,
            procedures,
            unknown_policy,
            call_timeout,
        }
    }
}
