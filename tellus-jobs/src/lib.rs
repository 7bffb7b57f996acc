#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::expect_used
)]

//! Fire-and-forget background jobs on bevy's async compute pool. A job is
//! spawned from a system, performs its work off the render thread, and its
//! outcome is collected later with [`FinishedJobs::take_next`].

use bevy::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{any, future, pin};

pub struct Plugin;

impl bevy::prelude::Plugin for Plugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(JobOutcomePayloads(vec![]))
            .add_systems(Update, collect_finished_jobs);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + Send + 'static>>;
#[cfg(target_arch = "wasm32")]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + 'static>>;

/// Cooperative cancellation handle shared between a job owner and its
/// in-flight jobs. Jobs are expected to check it when they start, not
/// preemptively; work already under way runs to completion.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub trait Job: any::Any + Sized + Send + Sync + 'static {
    type Outcome: any::Any + Send + Sync;

    fn name(&self) -> String;

    fn perform(self) -> AsyncReturn<Self::Outcome>;

    fn spawn(self, commands: &mut bevy::ecs::system::Commands) {
        let (outcome_tx, outcome_rx) = async_channel::unbounded::<JobOutcomePayload>();

        let job_name = self.name();
        let in_progress = InProgressJob {
            name: job_name.clone(),
            started: instant::Instant::now(),
            outcome_rx,
        };

        bevy::tasks::AsyncComputeTaskPool::get()
            .spawn(async move {
                let outcome = self.perform().await;
                let payload = JobOutcomePayload {
                    job_outcome_type_id: any::TypeId::of::<Self>(),
                    job_outcome: Box::new(outcome),
                };
                if outcome_tx.send(payload).await.is_err() {
                    bevy::log::error!(
                        "failed to send outcome of job '{}' back to the main thread",
                        job_name
                    );
                }
            })
            .detach();

        commands.spawn(in_progress);
    }
}

/// Moves outcomes of completed jobs from their channels into the
/// [`JobOutcomePayloads`] resource and despawns the bookkeeping entities.
fn collect_finished_jobs(
    mut query: Query<(Entity, &mut InProgressJob)>,
    mut commands: Commands,
    mut outcomes: ResMut<JobOutcomePayloads>,
) {
    for (entity, in_progress) in &mut query {
        if let Ok(outcome) = in_progress.outcome_rx.try_recv() {
            bevy::log::debug!(
                "job '{}' finished in {:?}",
                in_progress.name,
                in_progress.started.elapsed()
            );
            commands.entity(entity).despawn();
            outcomes.0.push(outcome);
        }
    }
}

pub struct JobOutcomePayload {
    job_outcome_type_id: any::TypeId,
    job_outcome: Box<dyn any::Any + Send + Sync>,
}

#[derive(Component)]
pub struct InProgressJob {
    pub name: String,
    pub started: instant::Instant,
    outcome_rx: async_channel::Receiver<JobOutcomePayload>,
}

#[derive(bevy::ecs::system::SystemParam)]
pub struct JobSpawner<'w, 's> {
    commands: bevy::ecs::system::Commands<'w, 's>,
}

impl<'w, 's> JobSpawner<'w, 's> {
    pub fn spawn<J: Job>(&mut self, job: J) {
        job.spawn(&mut self.commands)
    }
}

#[derive(Resource)]
pub struct JobOutcomePayloads(Vec<JobOutcomePayload>);

#[derive(bevy::ecs::system::SystemParam)]
pub struct FinishedJobs<'w> {
    outcomes: ResMut<'w, JobOutcomePayloads>,
}

impl<'w> FinishedJobs<'w> {
    /// Removes and returns the next available outcome of jobs of type `J`.
    #[inline]
    pub fn take_next<J: Job>(&mut self) -> Option<J::Outcome> {
        let index = self
            .outcomes
            .0
            .iter()
            .enumerate()
            .find(|(_i, payload)| {
                any::TypeId::of::<J>() == payload.job_outcome_type_id
                    && payload.job_outcome.is::<J::Outcome>()
            })
            .map(|(i, _)| i)?;
        let payload = self.outcomes.0.remove(index);
        match payload.job_outcome.downcast::<J::Outcome>() {
            Ok(outcome) => Some(*outcome),
            Err(_) => {
                bevy::log::error!("encountered unexpected job outcome type");
                None
            }
        }
    }
}
