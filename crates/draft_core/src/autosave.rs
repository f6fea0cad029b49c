use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{controller::WorkoutDraftController, DraftStore, WorkoutBackend};

pub type SharedController<B, S> = Arc<Mutex<WorkoutDraftController<B, S>>>;

/// Periodic flush task. Dropping the handle stops it.
pub struct AutosaveHandle {
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Flushes the shared draft every `period` when it changed. The task ends on
/// its own once the draft is saved or canceled.
pub fn spawn_autosave<B, S>(controller: SharedController<B, S>, period: Duration) -> AutosaveHandle
where
    B: WorkoutBackend + 'static,
    S: DraftStore + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut guard = controller.lock().await;
            if guard.is_finished() {
                debug!(workout_id = %guard.workout_id(), "autosave stopped");
                break;
            }
            match guard.flush().await {
                Ok(true) => debug!(workout_id = %guard.workout_id(), "autosaved workout draft"),
                Ok(false) => {}
                Err(err) => {
                    warn!(workout_id = %guard.workout_id(), error = %err, "autosave failed")
                }
            }
        }
    });
    AutosaveHandle { task }
}
