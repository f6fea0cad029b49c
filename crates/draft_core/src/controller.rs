use std::{fmt, time::Duration};

use anyhow::Context;
use chrono::Utc;
use shared::{
    domain::{ExerciseId, WorkoutId},
    error::BackendError,
    records::{NewSet, WorkoutRecord},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    fields::{format_weight, holds_value, validate_set, Field, FieldErrors, SetInput},
    session::SessionContext,
    snapshot::{draft_key, CompletedExercise, DraftSet, WorkoutDraft},
    DraftStore, Navigation, WorkoutBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutosavePolicy {
    /// Write the snapshot after every mutation.
    #[default]
    EveryMutation,
    /// Only mark the draft dirty; a periodic task calls `flush`.
    Interval(Duration),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DraftError {
    #[error("invalid set: {0}")]
    Validation(FieldErrors),
    #[error("no exercise selected")]
    NoExerciseSelected,
    #[error("{0} still has pending sets; add it to the workout or discard it first")]
    ExerciseInProgress(String),
    #[error("a set is being edited; save or cancel the edit first")]
    SetUpdateInProgress,
    #[error("pending set input would be discarded")]
    UnsavedInput,
    #[error("cannot add an exercise without sets")]
    EmptyExercise,
    #[error("no set at index {0}")]
    SetIndexOutOfRange(usize),
    #[error("no exercise at index {0}")]
    ExerciseIndexOutOfRange(usize),
    #[error("no set is being edited")]
    NotEditingSet,
    #[error("workout has no exercises to save")]
    EmptyWorkout,
    #[error("exercise at index {0} is already saved to the workout")]
    ExerciseAlreadySaved(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    LinkExercise,
    InsertSets,
}

impl fmt::Display for SaveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkExercise => f.write_str("link exercise"),
            Self::InsertSets => f.write_str("insert sets"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(
        "failed to {step} for {exercise_name} ({persisted} of {total} exercises already saved): {source}"
    )]
    Partial {
        step: SaveStep,
        exercise_name: String,
        persisted: usize,
        total: usize,
        #[source]
        source: BackendError,
    },
    #[error("all {total} exercises saved but the workout could not be marked complete: {source}")]
    Complete {
        total: usize,
        #[source]
        source: BackendError,
    },
}

impl SaveError {
    /// Number of exercises whose link and sets reached the backend before the
    /// failure.
    pub fn persisted_exercises(&self) -> usize {
        match self {
            Self::Draft(_) => 0,
            Self::Partial { persisted, .. } => *persisted,
            Self::Complete { total, .. } => *total,
        }
    }
}

/// Creates the workout row for the signed-in user.
pub async fn start_workout<B: WorkoutBackend>(
    session: &SessionContext,
    backend: &B,
) -> Result<WorkoutRecord, BackendError> {
    let user_id = session.require_user()?;
    session.begin_loading();
    let result = backend.create_workout(user_id, Utc::now()).await;
    session.finish_loading();
    let record = result?;
    info!(workout_id = %record.workout_id, user_id = %user_id, "started workout");
    Ok(record)
}

/// Owns the draft of one workout being built and keeps it in sync with the
/// local draft store.
pub struct WorkoutDraftController<B: WorkoutBackend, S: DraftStore> {
    workout_id: WorkoutId,
    backend: B,
    store: S,
    policy: AutosavePolicy,
    draft: WorkoutDraft,
    field_errors: FieldErrors,
    last_persisted: Option<String>,
    finished: bool,
}

impl<B: WorkoutBackend, S: DraftStore> WorkoutDraftController<B, S> {
    /// Restores the saved draft for `workout_id`, or starts empty. A blob that
    /// cannot be read or decoded is logged and ignored. Restoring does not
    /// write anything back.
    pub async fn open(workout_id: WorkoutId, backend: B, store: S, policy: AutosavePolicy) -> Self {
        let key = draft_key(workout_id);
        let (draft, last_persisted) = match store.load(&key).await {
            Ok(Some(raw)) => match WorkoutDraft::from_json(&raw) {
                Ok(draft) => {
                    info!(
                        workout_id = %workout_id,
                        exercises = draft.completed_exercises.len(),
                        pending_sets = draft.sets.len(),
                        "restored workout draft"
                    );
                    (draft, Some(raw))
                }
                Err(err) => {
                    warn!(workout_id = %workout_id, error = %err, "discarding corrupt workout draft");
                    (WorkoutDraft::default(), None)
                }
            },
            Ok(None) => {
                let empty = WorkoutDraft::default();
                let baseline = empty.to_json().ok();
                (empty, baseline)
            }
            Err(err) => {
                error!(workout_id = %workout_id, error = %err, "failed to read workout draft");
                (WorkoutDraft::default(), None)
            }
        };

        Self {
            workout_id,
            backend,
            store,
            policy,
            draft,
            field_errors: FieldErrors::default(),
            last_persisted,
            finished: false,
        }
    }

    pub fn workout_id(&self) -> WorkoutId {
        self.workout_id
    }

    pub fn draft(&self) -> &WorkoutDraft {
        &self.draft
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    pub fn completed_exercises(&self) -> &[CompletedExercise] {
        &self.draft.completed_exercises
    }

    pub fn pending_sets(&self) -> &[DraftSet] {
        &self.draft.sets
    }

    pub fn is_editing_set(&self) -> bool {
        self.draft.editing_set_index.is_some()
    }

    pub fn is_editing_exercise(&self) -> bool {
        self.draft.editing_exercise_index.is_some()
    }

    /// Set once the draft was saved or canceled.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_dirty(&self) -> bool {
        if self.finished {
            return false;
        }
        match self.draft.to_json() {
            Ok(raw) => self.last_persisted.as_deref() != Some(raw.as_str()),
            Err(_) => true,
        }
    }

    /// Writes the snapshot when it differs from the last one written.
    /// Returns whether a write happened.
    pub async fn flush(&mut self) -> anyhow::Result<bool> {
        if self.finished {
            return Ok(false);
        }
        let raw = self.draft.to_json().context("failed to encode workout draft")?;
        if self.last_persisted.as_deref() == Some(raw.as_str()) {
            return Ok(false);
        }
        self.store
            .save(&draft_key(self.workout_id), &raw)
            .await
            .with_context(|| format!("failed to store draft for workout {}", self.workout_id))?;
        self.last_persisted = Some(raw);
        Ok(true)
    }

    /// Flushes pending changes before the controller goes away.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.flush().await?;
        Ok(())
    }

    pub async fn select_exercise(
        &mut self,
        exercise_id: ExerciseId,
        exercise_name: impl Into<String>,
    ) -> Result<(), DraftError> {
        if self.draft.editing_set_index.is_some() {
            return Err(DraftError::SetUpdateInProgress);
        }
        if !self.draft.sets.is_empty() && self.draft.exercise_id != Some(exercise_id) {
            return Err(DraftError::ExerciseInProgress(
                self.draft.exercise_name.clone(),
            ));
        }
        self.draft.exercise_id = Some(exercise_id);
        self.draft.exercise_name = exercise_name.into();
        self.mutated().await;
        Ok(())
    }

    pub async fn update_field(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::Reps => self.draft.reps = value,
            Field::Weight => self.draft.weight = value,
            Field::PartialReps => self.draft.partial_reps = value,
        }
        self.field_errors.clear(field);
        self.mutated().await;
    }

    /// Fills the form with `input` and submits it as a new set.
    pub async fn add_set(&mut self, input: SetInput) -> Result<DraftSet, DraftError> {
        if self.draft.editing_set_index.is_some() {
            return Err(DraftError::SetUpdateInProgress);
        }
        self.draft.reps = input.reps;
        self.draft.weight = input.weight;
        self.draft.partial_reps = input.partial_reps;
        self.submit_set().await
    }

    /// Appends the set currently typed into the form. On invalid input only
    /// the error flags change.
    pub async fn submit_set(&mut self) -> Result<DraftSet, DraftError> {
        if self.draft.editing_set_index.is_some() {
            return Err(DraftError::SetUpdateInProgress);
        }
        let Some(exercise_id) = self.draft.exercise_id else {
            return Err(DraftError::NoExerciseSelected);
        };
        let values = match validate_set(&self.draft.reps, &self.draft.weight, &self.draft.partial_reps)
        {
            Ok(values) => values,
            Err(errors) => {
                self.field_errors = errors.clone();
                self.mutated().await;
                return Err(DraftError::Validation(errors));
            }
        };

        let set = DraftSet {
            exercise_id,
            reps: values.reps,
            weight: values.weight,
            partial_reps: values.partial_reps,
        };
        self.draft.sets.push(set.clone());
        self.draft.clear_fields();
        self.field_errors = FieldErrors::default();
        self.mutated().await;
        debug!(workout_id = %self.workout_id, sets = self.draft.sets.len(), "added set");
        Ok(set)
    }

    /// Loads the set at `index` into the form and enters set-update mode.
    pub async fn update_set(&mut self, index: usize) -> Result<(), DraftError> {
        let set = self
            .draft
            .sets
            .get(index)
            .ok_or(DraftError::SetIndexOutOfRange(index))?;
        self.draft.reps = set.reps.to_string();
        self.draft.weight = format_weight(set.weight);
        self.draft.partial_reps = set.partial_reps.to_string();
        self.draft.editing_set_index = Some(index);
        self.field_errors = FieldErrors::default();
        self.mutated().await;
        Ok(())
    }

    pub async fn save_updated_set(&mut self) -> Result<(), DraftError> {
        let index = self
            .draft
            .editing_set_index
            .ok_or(DraftError::NotEditingSet)?;
        let values = match validate_set(&self.draft.reps, &self.draft.weight, &self.draft.partial_reps)
        {
            Ok(values) => values,
            Err(errors) => {
                self.field_errors = errors.clone();
                self.mutated().await;
                return Err(DraftError::Validation(errors));
            }
        };
        let set = self
            .draft
            .sets
            .get_mut(index)
            .ok_or(DraftError::SetIndexOutOfRange(index))?;
        set.reps = values.reps;
        set.weight = values.weight;
        set.partial_reps = values.partial_reps;

        self.draft.editing_set_index = None;
        self.draft.clear_fields();
        self.field_errors = FieldErrors::default();
        self.mutated().await;
        Ok(())
    }

    pub async fn cancel_set_update(&mut self) {
        self.draft.editing_set_index = None;
        self.draft.clear_fields();
        self.field_errors = FieldErrors::default();
        self.mutated().await;
    }

    /// Removes the set at `index`. Emptying the sets of an exercise that is
    /// being edited also drops that exercise from the workout.
    pub async fn delete_set(&mut self, index: usize) -> Result<DraftSet, DraftError> {
        if index >= self.draft.sets.len() {
            return Err(DraftError::SetIndexOutOfRange(index));
        }
        let removed = self.draft.sets.remove(index);

        match self.draft.editing_set_index {
            Some(editing) if editing == index => {
                self.draft.editing_set_index = None;
                self.draft.clear_fields();
                self.field_errors = FieldErrors::default();
            }
            Some(editing) if editing > index => {
                self.draft.editing_set_index = Some(editing - 1);
            }
            _ => {}
        }

        if self.draft.sets.is_empty() {
            if let Some(exercise_index) = self.draft.editing_exercise_index.take() {
                if exercise_index < self.draft.completed_exercises.len() {
                    let dropped = self.draft.completed_exercises.remove(exercise_index);
                    info!(
                        workout_id = %self.workout_id,
                        exercise = %dropped.exercise_name,
                        "last set deleted; removed exercise from workout"
                    );
                }
                self.draft.clear_in_progress();
            }
        }

        self.mutated().await;
        Ok(removed)
    }

    pub fn check_unsaved_changes(&self) -> bool {
        holds_value(&self.draft.reps)
            || holds_value(&self.draft.weight)
            || holds_value(&self.draft.partial_reps)
    }

    /// Clears the form after the user confirmed throwing away what was typed.
    pub async fn discard_pending_input(&mut self) {
        self.draft.clear_fields();
        self.draft.editing_set_index = None;
        self.field_errors = FieldErrors::default();
        self.mutated().await;
    }

    /// Moves the in-progress exercise into the workout, replacing the entry
    /// under edit if there is one. Returns the entry's index.
    pub async fn add_exercise_to_workout(&mut self) -> Result<usize, DraftError> {
        if self.check_unsaved_changes() {
            return Err(DraftError::UnsavedInput);
        }
        let Some(exercise_id) = self.draft.exercise_id else {
            return Err(DraftError::NoExerciseSelected);
        };
        if self.draft.sets.is_empty() {
            return Err(DraftError::EmptyExercise);
        }

        let entry = CompletedExercise {
            exercise_id,
            exercise_name: self.draft.exercise_name.clone(),
            sets: std::mem::take(&mut self.draft.sets),
        };
        let index = match self.draft.editing_exercise_index.take() {
            Some(index) if index < self.draft.completed_exercises.len() => {
                self.draft.completed_exercises[index] = entry;
                index
            }
            _ => {
                self.draft.completed_exercises.push(entry);
                self.draft.completed_exercises.len() - 1
            }
        };
        self.draft.clear_in_progress();
        self.field_errors = FieldErrors::default();
        self.mutated().await;
        info!(workout_id = %self.workout_id, index, "exercise added to workout");
        Ok(index)
    }

    pub async fn delete_exercise(&mut self, index: usize) -> Result<CompletedExercise, DraftError> {
        if index >= self.draft.completed_exercises.len() {
            return Err(DraftError::ExerciseIndexOutOfRange(index));
        }
        self.ensure_unsaved(index)?;
        let removed = self.draft.completed_exercises.remove(index);
        match self.draft.editing_exercise_index {
            Some(editing) if editing == index => {
                self.draft.editing_exercise_index = None;
                self.draft.clear_in_progress();
            }
            Some(editing) if editing > index => {
                self.draft.editing_exercise_index = Some(editing - 1);
            }
            _ => {}
        }
        self.mutated().await;
        Ok(removed)
    }

    /// Loads a completed exercise back into the in-progress slot for editing.
    pub async fn update_exercise(&mut self, index: usize) -> Result<(), DraftError> {
        if self.draft.editing_set_index.is_some() {
            return Err(DraftError::SetUpdateInProgress);
        }
        if !self.draft.sets.is_empty() {
            return Err(DraftError::ExerciseInProgress(
                self.draft.exercise_name.clone(),
            ));
        }
        let entry = self
            .draft
            .completed_exercises
            .get(index)
            .cloned()
            .ok_or(DraftError::ExerciseIndexOutOfRange(index))?;
        self.ensure_unsaved(index)?;
        self.draft.exercise_id = Some(entry.exercise_id);
        self.draft.exercise_name = entry.exercise_name;
        self.draft.sets = entry.sets;
        self.draft.editing_exercise_index = Some(index);
        self.draft.clear_fields();
        self.field_errors = FieldErrors::default();
        self.mutated().await;
        Ok(())
    }

    /// Writes every completed exercise to the backend, one exercise at a time:
    /// the exercise link first, then its sets. The first failure stops the
    /// save; rows written before it stay in place and the local draft is kept
    /// together with how far the save got, so calling this again picks up at
    /// the failed exercise.
    pub async fn save_workout(&mut self) -> Result<Navigation, SaveError> {
        if self.draft.completed_exercises.is_empty() {
            return Err(DraftError::EmptyWorkout.into());
        }
        if !self.draft.sets.is_empty() {
            return Err(DraftError::ExerciseInProgress(self.draft.exercise_name.clone()).into());
        }

        let total = self.draft.completed_exercises.len();
        if self.draft.persisted_exercises > 0 {
            info!(
                workout_id = %self.workout_id,
                persisted = self.draft.persisted_exercises,
                total,
                "resuming workout save"
            );
        }

        while self.draft.persisted_exercises < total {
            let index = self.draft.persisted_exercises;
            let entry = self.draft.completed_exercises[index].clone();

            let link = match self.draft.pending_link {
                Some(link) => link,
                None => {
                    let inserted = self
                        .backend
                        .insert_workout_exercise(self.workout_id, entry.exercise_id, index as i64 + 1)
                        .await;
                    let link = match inserted {
                        Ok(link) => link,
                        Err(source) => {
                            return Err(self.save_aborted(SaveStep::LinkExercise, &entry, total, source))
                        }
                    };
                    self.draft.pending_link = Some(link);
                    self.record_save_progress().await;
                    link
                }
            };

            let sets: Vec<NewSet> = entry
                .sets
                .iter()
                .enumerate()
                .map(|(position, set)| NewSet {
                    set_number: position as i64 + 1,
                    reps: set.reps,
                    weight: set.weight,
                    partial_reps: set.partial_reps,
                })
                .collect();
            if let Err(source) = self.backend.insert_sets(link, &sets).await {
                return Err(self.save_aborted(SaveStep::InsertSets, &entry, total, source));
            }

            self.draft.pending_link = None;
            self.draft.persisted_exercises = index + 1;
            self.record_save_progress().await;
        }

        if let Err(source) = self.backend.complete_workout(self.workout_id, Utc::now()).await {
            error!(workout_id = %self.workout_id, error = %source, "failed to mark workout complete");
            return Err(SaveError::Complete { total, source });
        }

        info!(workout_id = %self.workout_id, exercises = total, "workout saved");
        self.clear_local().await;
        Ok(Navigation::WorkoutSummary(self.workout_id))
    }

    fn save_aborted(
        &self,
        step: SaveStep,
        entry: &CompletedExercise,
        total: usize,
        source: BackendError,
    ) -> SaveError {
        let persisted = self.draft.persisted_exercises;
        error!(
            workout_id = %self.workout_id,
            exercise = %entry.exercise_name,
            step = %step,
            persisted,
            code = ?source.code(),
            error = %source,
            "workout save aborted"
        );
        SaveError::Partial {
            step,
            exercise_name: entry.exercise_name.clone(),
            persisted,
            total,
            source,
        }
    }

    /// Save progress is written whatever the autosave policy, so a retry after
    /// a restart does not write the same rows twice.
    async fn record_save_progress(&mut self) {
        if let Err(err) = self.flush().await {
            warn!(workout_id = %self.workout_id, error = %err, "failed to persist save progress");
        }
    }

    /// Deletes the workout on a best-effort basis and drops the local draft.
    pub async fn cancel_workout(&mut self) -> Navigation {
        if let Err(err) = self.backend.delete_workout(self.workout_id).await {
            warn!(workout_id = %self.workout_id, error = %err, "failed to delete canceled workout");
        } else {
            info!(workout_id = %self.workout_id, "workout canceled");
        }
        self.clear_local().await;
        Navigation::Home
    }

    /// Exercises already written by an interrupted save, or linked and waiting
    /// for their sets, are frozen.
    fn ensure_unsaved(&self, index: usize) -> Result<(), DraftError> {
        let linked = self.draft.pending_link.is_some() && index == self.draft.persisted_exercises;
        if index < self.draft.persisted_exercises || linked {
            return Err(DraftError::ExerciseAlreadySaved(index));
        }
        Ok(())
    }

    async fn clear_local(&mut self) {
        if let Err(err) = self.store.remove(&draft_key(self.workout_id)).await {
            warn!(workout_id = %self.workout_id, error = %err, "failed to clear workout draft");
        }
        self.draft = WorkoutDraft::default();
        self.field_errors = FieldErrors::default();
        self.last_persisted = None;
        self.finished = true;
    }

    async fn mutated(&mut self) {
        self.draft.sync_exercises_in_workout();
        if self.policy != AutosavePolicy::EveryMutation {
            return;
        }
        if let Err(err) = self.flush().await {
            warn!(workout_id = %self.workout_id, error = %err, "failed to persist workout draft");
        }
    }
}
