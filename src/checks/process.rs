use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::System;

use super::{pace, Cadence, Check, CheckError, Evaluation};

/// Alerts when no running executable path contains the configured name
pub struct ProcessCheck {
    name: String,
    cadence: Cadence,
    process: String,
    period: Duration,
    system: Arc<Mutex<System>>,
}

impl ProcessCheck {
    pub fn new(name: String, cadence: Cadence, process: String, period: Duration) -> Self {
        Self {
            name,
            cadence,
            process,
            period,
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

pub fn evaluate_running(process: &str, running: bool) -> Evaluation {
    let text = if running {
        format!("PROCESS: Process {} is running", process)
    } else {
        format!("PROCESS: ALERT: Process {} is not found", process)
    };
    Evaluation::new(!running, text.clone(), text)
}

/// Whether any executable path contains `process`
pub fn is_running<'a>(executables: impl IntoIterator<Item = &'a PathBuf>, process: &str) -> bool {
    executables
        .into_iter()
        .any(|exe| exe.to_string_lossy().contains(process))
}

#[async_trait::async_trait]
impl Check for ProcessCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        pace(self.period, self.cadence).await;

        // A full process scan can take a while on busy hosts
        let system = Arc::clone(&self.system);
        let executables: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            let mut system = system.lock();
            system.refresh_all();
            system
                .processes()
                .values()
                .filter_map(|p| p.exe().map(|e| e.to_path_buf()))
                .collect()
        })
        .await?;

        let running = is_running(&executables, &self.process);
        Ok(evaluate_running(&self.process, running))
    }
}
