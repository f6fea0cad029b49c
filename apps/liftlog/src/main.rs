mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use draft_core::{
    fields::format_weight, spawn_autosave, AutosavePolicy, DraftError, DraftStore, Field,
    RestBackend, SessionContext, SetInput, WorkoutBackend, WorkoutDraft, WorkoutDraftController,
};
use shared::{
    domain::{ExerciseId, UserId, WorkoutId, WorkoutStatus},
    records::WorkoutSummary,
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::BackendKind;

const LOCAL_USER: &str = "local";

#[derive(Parser, Debug)]
#[command(name = "liftlog", about = "Build a workout draft and save it")]
struct Cli {
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the exercise library.
    Exercises,
    /// Create a workout for the configured user.
    Start,
    Show {
        workout: i64,
    },
    Select {
        workout: i64,
        exercise_id: i64,
    },
    AddSet {
        workout: i64,
        reps: String,
        weight: String,
        #[arg(default_value = "")]
        partial_reps: String,
    },
    /// Load a pending set into the form for editing.
    EditSet {
        workout: i64,
        index: usize,
    },
    /// Write the edited form back over the set being edited.
    SaveSet {
        workout: i64,
        #[arg(long)]
        reps: Option<String>,
        #[arg(long)]
        weight: Option<String>,
        #[arg(long)]
        partial_reps: Option<String>,
    },
    CancelSetEdit {
        workout: i64,
    },
    DeleteSet {
        workout: i64,
        index: usize,
    },
    /// Move the pending sets into the workout.
    AddExercise {
        workout: i64,
        #[arg(long)]
        discard_input: bool,
    },
    EditExercise {
        workout: i64,
        index: usize,
    },
    DeleteExercise {
        workout: i64,
        index: usize,
    },
    /// Persist the draft to the backend and mark the workout complete.
    Save {
        workout: i64,
    },
    /// Delete the workout and its draft.
    Cancel {
        workout: i64,
    },
    Summary {
        workout: i64,
    },
    /// List the configured user's workouts, newest first.
    History,
    /// Add an exercise to the local library.
    NewExercise {
        name: String,
        #[arg(long)]
        muscle_group: Option<String>,
    },
}

impl Command {
    fn draft_workout(&self) -> Option<WorkoutId> {
        let id = match self {
            Self::Exercises
            | Self::Start
            | Self::Summary { .. }
            | Self::History
            | Self::NewExercise { .. } => return None,
            Self::Show { workout }
            | Self::Select { workout, .. }
            | Self::AddSet { workout, .. }
            | Self::EditSet { workout, .. }
            | Self::SaveSet { workout, .. }
            | Self::CancelSetEdit { workout }
            | Self::DeleteSet { workout, .. }
            | Self::AddExercise { workout, .. }
            | Self::EditExercise { workout, .. }
            | Self::DeleteExercise { workout, .. }
            | Self::Save { workout }
            | Self::Cancel { workout } => *workout,
        };
        Some(WorkoutId(id))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = config::load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }

    let database_url = config::prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open draft database '{database_url}'"))?;
    storage.health_check().await?;

    let user_id = match (settings.user_id, settings.backend) {
        (Some(id), _) => Some(UserId(id)),
        (None, BackendKind::Sqlite) => Some(storage.create_user(LOCAL_USER).await?),
        (None, BackendKind::Rest) => None,
    };
    let session = user_id.map(SessionContext::signed_in).unwrap_or_default();

    let policy = match settings.autosave_interval_secs {
        0 => AutosavePolicy::EveryMutation,
        secs => AutosavePolicy::Interval(Duration::from_secs(secs)),
    };
    info!(backend = ?settings.backend, database_url = %database_url, "liftlog ready");

    if matches!(cli.command, Command::History | Command::NewExercise { .. }) {
        if settings.backend != BackendKind::Sqlite {
            bail!("this command reads the local sqlite database; use --backend sqlite");
        }
        return local_command(&storage, &session, cli.command).await;
    }

    match settings.backend {
        BackendKind::Sqlite => run(storage.clone(), storage, &session, policy, cli.command).await,
        BackendKind::Rest => {
            let rest_url = settings
                .rest_url
                .as_deref()
                .context("rest_url must be set to use the rest backend")?;
            let api_key = settings
                .rest_api_key
                .clone()
                .context("rest_api_key must be set to use the rest backend")?;
            let mut backend = RestBackend::new(rest_url, api_key)?;
            if let Some(token) = settings.rest_access_token.clone() {
                backend = backend.with_access_token(token);
            }
            run(backend, storage, &session, policy, cli.command).await
        }
    }
}

async fn run<B>(
    backend: B,
    store: Storage,
    session: &SessionContext,
    policy: AutosavePolicy,
    command: Command,
) -> Result<()>
where
    B: WorkoutBackend + 'static,
{
    if let Some(workout_id) = command.draft_workout() {
        return edit_draft(workout_id, backend, store, policy, command).await;
    }

    match command {
        Command::Exercises => {
            for entry in backend.list_exercise_library().await? {
                match entry.muscle_group {
                    Some(group) => println!("{:>4}  {} ({group})", entry.exercise_id.0, entry.name),
                    None => println!("{:>4}  {}", entry.exercise_id.0, entry.name),
                }
            }
        }
        Command::Start => {
            let workout = draft_core::start_workout(session, &backend).await?;
            println!("started workout_id={}", workout.workout_id.0);
        }
        Command::Summary { workout } => {
            let summary = backend.load_workout_summary(WorkoutId(workout)).await?;
            print_summary(&summary);
        }
        _ => {}
    }
    Ok(())
}

async fn local_command(storage: &Storage, session: &SessionContext, command: Command) -> Result<()> {
    match command {
        Command::History => {
            let user_id = session.require_user()?;
            let username = storage
                .username_for_user(user_id)
                .await?
                .unwrap_or_else(|| format!("user {}", user_id.0));
            let workouts = storage.list_workouts_for_user(user_id).await?;
            println!("{} workouts for {username}", workouts.len());
            for workout in workouts {
                let status = match workout.status() {
                    WorkoutStatus::Completed => "completed",
                    WorkoutStatus::InProgress => "in progress",
                };
                println!(
                    "{:>4}  {}  {status}",
                    workout.workout_id.0,
                    workout.started_at.format("%Y-%m-%d %H:%M")
                );
            }
            let drafts = storage.list_draft_keys().await?;
            if !drafts.is_empty() {
                println!("unsaved drafts: {}", drafts.join(", "));
            }
        }
        Command::NewExercise { name, muscle_group } => {
            let exercise_id = storage.add_exercise(&name, muscle_group.as_deref()).await?;
            println!("exercise_id={} {name}", exercise_id.0);
        }
        _ => {}
    }
    Ok(())
}

async fn edit_draft<B, S>(
    workout_id: WorkoutId,
    backend: B,
    store: S,
    policy: AutosavePolicy,
    command: Command,
) -> Result<()>
where
    B: WorkoutBackend + 'static,
    S: DraftStore + 'static,
{
    let controller = WorkoutDraftController::open(workout_id, backend, store, policy).await;
    let shared = Arc::new(Mutex::new(controller));
    let autosave = match policy {
        AutosavePolicy::Interval(period) => Some(spawn_autosave(shared.clone(), period)),
        AutosavePolicy::EveryMutation => None,
    };

    let mut controller = shared.lock().await;
    let result = apply(&mut controller, command).await;
    controller.flush().await?;
    if result.is_ok() && !controller.is_finished() {
        print_draft(controller.draft());
    }
    drop(controller);

    if let Some(handle) = autosave {
        handle.stop();
    }
    result
}

async fn apply<B: WorkoutBackend, S: DraftStore>(
    controller: &mut WorkoutDraftController<B, S>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Show { .. } => {}
        Command::Select { exercise_id, .. } => {
            let exercise_id = ExerciseId(exercise_id);
            let library = controller.backend().list_exercise_library().await?;
            let Some(entry) = library.into_iter().find(|e| e.exercise_id == exercise_id) else {
                bail!("exercise {} is not in the library", exercise_id.0);
            };
            controller.select_exercise(entry.exercise_id, entry.name).await?;
        }
        Command::AddSet {
            reps,
            weight,
            partial_reps,
            ..
        } => {
            controller
                .add_set(SetInput::new(reps, weight, partial_reps))
                .await?;
        }
        Command::EditSet { index, .. } => controller.update_set(index).await?,
        Command::SaveSet {
            reps,
            weight,
            partial_reps,
            ..
        } => {
            if !controller.is_editing_set() {
                return Err(DraftError::NotEditingSet.into());
            }
            for (field, value) in [
                (Field::Reps, reps),
                (Field::Weight, weight),
                (Field::PartialReps, partial_reps),
            ] {
                if let Some(value) = value {
                    controller.update_field(field, value).await;
                }
            }
            controller.save_updated_set().await?;
        }
        Command::CancelSetEdit { .. } => controller.cancel_set_update().await,
        Command::DeleteSet { index, .. } => {
            controller.delete_set(index).await?;
        }
        Command::AddExercise { discard_input, .. } => {
            match controller.add_exercise_to_workout().await {
                Err(DraftError::UnsavedInput) if discard_input => {
                    controller.discard_pending_input().await;
                    controller.add_exercise_to_workout().await?;
                }
                other => {
                    other.map_err(|err| match err {
                        DraftError::UnsavedInput => anyhow::anyhow!(
                            "{err}; add the set first or pass --discard-input"
                        ),
                        err => err.into(),
                    })?;
                }
            }
        }
        Command::EditExercise { index, .. } => controller.update_exercise(index).await?,
        Command::DeleteExercise { index, .. } => {
            controller.delete_exercise(index).await?;
        }
        Command::Save { .. } => {
            let nav = controller.save_workout().await?;
            println!("saved, continue at {}", nav.path());
            let summary = controller
                .backend()
                .load_workout_summary(controller.workout_id())
                .await?;
            print_summary(&summary);
        }
        Command::Cancel { .. } => {
            let nav = controller.cancel_workout().await;
            println!("canceled, continue at {}", nav.path());
        }
        Command::Exercises
        | Command::Start
        | Command::Summary { .. }
        | Command::History
        | Command::NewExercise { .. } => {}
    }
    Ok(())
}

fn describe_set(reps: i64, weight: f64, partial_reps: i64) -> String {
    let mut line = format!("{reps} x {}", format_weight(weight));
    if partial_reps > 0 {
        line.push_str(&format!(" +{partial_reps} partial"));
    }
    line
}

fn print_draft(draft: &WorkoutDraft) {
    if draft.is_empty() {
        println!("empty draft; select an exercise to begin");
        return;
    }
    if draft.completed_exercises.is_empty() {
        println!("no exercises added yet");
    }
    for (i, exercise) in draft.completed_exercises.iter().enumerate() {
        let marker = if draft.editing_exercise_index == Some(i) {
            " (editing)"
        } else if i < draft.persisted_exercises {
            " (saved)"
        } else {
            ""
        };
        println!("[{i}] {}{marker}", exercise.exercise_name);
        for set in &exercise.sets {
            println!("      {}", describe_set(set.reps, set.weight, set.partial_reps));
        }
    }

    if draft.exercise_id.is_some() {
        println!("in progress: {}", draft.exercise_name);
        for (i, set) in draft.sets.iter().enumerate() {
            let marker = if draft.editing_set_index == Some(i) {
                " (editing)"
            } else {
                ""
            };
            println!(
                "  [{i}] {}{marker}",
                describe_set(set.reps, set.weight, set.partial_reps)
            );
        }
    }

    if !(draft.reps.is_empty() && draft.weight.is_empty() && draft.partial_reps.is_empty()) {
        println!(
            "form: reps={:?} weight={:?} partial reps={:?}",
            draft.reps, draft.weight, draft.partial_reps
        );
    }
}

fn print_summary(summary: &WorkoutSummary) {
    let status = match summary.workout.completed_at {
        Some(at) => format!("completed {}", at.format("%Y-%m-%d %H:%M")),
        None => "in progress".to_string(),
    };
    println!("workout {} ({status})", summary.workout.workout_id.0);
    for exercise in &summary.exercises {
        println!("  {}", exercise.exercise_name);
        for set in &exercise.sets {
            println!(
                "    set {}: {}",
                set.set_number,
                describe_set(set.reps, set.weight, set.partial_reps)
            );
        }
    }
    println!(
        "{} sets, volume {}",
        summary.total_sets(),
        format_weight(summary.total_volume())
    );
}
