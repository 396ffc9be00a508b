//! One aggregation run: masks, task pool, result channel and reconstruction.
//!
//! [`AggregationSession`] owns all per-run state. Worker sessions only ever
//! see a [`SessionHandle`], which pulls from the pool and pushes results into
//! a multi-producer channel drained by [`AggregationSession::aggregate`].

use std::{collections::BTreeSet, time::Duration};

use num_bigint::BigInt;
use rand::{Rng, TryCryptoRng, TryRngCore};
use tokio::{
    sync::mpsc,
    time::{timeout_at, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    decompose::{build_tasks, DecomposeError},
    mask::{MaskError, MaskSet},
    matrix::{Cell, Operands, ResultMatrix},
    pool::TaskPool,
    reconstruct::{IntegrityError, Reconstructor, Submission},
    task::{Task, TaskId, TaskResult},
};

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Mask setup failed.
    #[error("mask setup failed: {0}")]
    Mask(#[from] MaskError),
    /// Tasks could not be built.
    #[error("task decomposition failed: {0}")]
    Decompose(#[from] DecomposeError),
    /// The session no longer accepts results.
    #[error("aggregation session is closed")]
    Closed,
}

/// Configuration of an aggregation session.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SessionConfig {
    /// Whether cells are split into masked shares.
    #[builder(default)]
    privacy: bool,
    /// Number of mask vectors per side, `S`.
    #[builder(default = "8")]
    mask_set_size: usize,
    /// Deadline for the whole aggregation phase.
    #[builder(default = "Duration::from_secs(60)")]
    aggregation_timeout: Duration,
    /// Number of rejected results kept in [`Outcome::violations`]. Later
    /// rejections are only counted.
    #[builder(default = "1024")]
    max_violations: usize,
}

impl SessionConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.privacy.unwrap_or_default() && self.mask_set_size == Some(0) {
            return Err("mask_set_size must be at least 1 when privacy is enabled".to_string());
        }
        Ok(())
    }
}

impl SessionConfig {
    /// Creates a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Returns whether privacy is enabled.
    pub fn privacy(&self) -> bool {
        self.privacy
    }

    /// Returns the mask set size.
    pub fn mask_set_size(&self) -> usize {
        self.mask_set_size
    }

    /// Returns the aggregation timeout.
    pub fn aggregation_timeout(&self) -> Duration {
        self.aggregation_timeout
    }

    /// Returns the number of rejected results kept in the outcome.
    pub fn max_violations(&self) -> usize {
        self.max_violations
    }
}

/// How the aggregation phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStatus {
    /// Every cell was settled before the deadline.
    Complete,
    /// The deadline elapsed first.
    TimedOut,
}

/// The best-effort result of a run.
#[derive(Debug)]
pub struct Outcome {
    /// The result matrix; unresolved cells are `None`.
    pub matrix: ResultMatrix,
    /// How aggregation ended.
    pub status: AggregationStatus,
    /// Cells whose shares failed to reconstruct.
    pub failed_cells: BTreeSet<Cell>,
    /// The first rejected results, in arrival order, up to the configured
    /// maximum.
    pub violations: Vec<(TaskId, IntegrityError)>,
    /// Number of rejected results, including those not kept in `violations`.
    pub rejected_results: usize,
}

impl Outcome {
    /// Returns the number of unresolved cells.
    pub fn unresolved_count(&self) -> usize {
        self.matrix.unresolved_cells().len()
    }

    /// Returns the unresolved cells in row-major order.
    pub fn unresolved_cells(&self) -> Vec<Cell> {
        self.matrix.unresolved_cells()
    }
}

/// Handle shared with worker sessions.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pool: TaskPool,
    results: mpsc::UnboundedSender<TaskResult>,
    masked: bool,
}

impl SessionHandle {
    /// Takes the next task, or `None` if the pool is exhausted.
    pub fn next_task(&self) -> Option<Task> {
        self.pool.next_task()
    }

    /// Hands a worker's result to the aggregation loop.
    pub fn submit_result(&self, id: TaskId, dot: BigInt) -> Result<(), SessionError> {
        self.results
            .send(TaskResult { id, dot })
            .map_err(|_| SessionError::Closed)
    }

    /// Returns the number of tasks left in the pool.
    pub fn pending_tasks(&self) -> usize {
        self.pool.len()
    }

    /// Returns whether the session splits cells into masked shares.
    pub fn is_masked(&self) -> bool {
        self.masked
    }
}

/// State of one matrix-multiplication run.
#[derive(Debug)]
pub struct AggregationSession {
    handle: SessionHandle,
    receiver: mpsc::UnboundedReceiver<TaskResult>,
    reconstructor: Reconstructor,
    timeout: Duration,
    status: Option<AggregationStatus>,
    violations: Vec<(TaskId, IntegrityError)>,
    max_violations: usize,
    rejected_results: usize,
}

impl AggregationSession {
    /// Sets up a session, drawing fresh masks from `mask_rng` if privacy is
    /// enabled.
    ///
    /// `rng` draws the per-cell mask indices and shuffles the tasks.
    pub fn new<M, R>(
        operands: &Operands,
        config: &SessionConfig,
        mask_rng: &mut M,
        rng: &mut R,
    ) -> Result<Self, SessionError>
    where
        M: TryRngCore + TryCryptoRng + ?Sized,
        R: Rng + ?Sized,
    {
        let masks = if config.privacy() {
            Some(MaskSet::generate(
                mask_rng,
                config.mask_set_size(),
                operands.inner_dim(),
            )?)
        } else {
            None
        };

        Self::build(operands, config, masks.as_ref(), rng)
    }

    /// Sets up a masked session over a fixed mask set.
    ///
    /// The privacy flag and mask set size of `config` are ignored.
    pub fn with_masks<R: Rng + ?Sized>(
        operands: &Operands,
        config: &SessionConfig,
        masks: &MaskSet,
        rng: &mut R,
    ) -> Result<Self, SessionError> {
        Self::build(operands, config, Some(masks), rng)
    }

    fn build<R: Rng + ?Sized>(
        operands: &Operands,
        config: &SessionConfig,
        masks: Option<&MaskSet>,
        rng: &mut R,
    ) -> Result<Self, SessionError> {
        let tasks = build_tasks(operands, masks, rng)?;
        let (n, m) = operands.shape();

        info!(
            rows = n,
            cols = m,
            inner = operands.inner_dim(),
            tasks = tasks.len(),
            masked = masks.is_some(),
            "aggregation session ready"
        );

        let pool = TaskPool::new();
        pool.push_all(tasks);

        let (results, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            handle: SessionHandle {
                pool,
                results,
                masked: masks.is_some(),
            },
            receiver,
            reconstructor: Reconstructor::new((n, m), masks.map(MaskSet::offset_table)),
            timeout: config.aggregation_timeout(),
            status: None,
            violations: Vec::new(),
            max_violations: config.max_violations(),
            rejected_results: 0,
        })
    }

    /// Returns a handle for worker sessions.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Returns the reconstructor.
    pub fn reconstructor(&self) -> &Reconstructor {
        &self.reconstructor
    }

    /// Drains results until every cell is settled or the aggregation timeout,
    /// measured from this call, elapses.
    #[instrument(level = "debug", skip(self), fields(timeout = ?self.timeout))]
    pub async fn aggregate(&mut self) -> AggregationStatus {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let status = loop {
            if self.reconstructor.is_settled() {
                break AggregationStatus::Complete;
            }

            // The session holds a sender itself, so the channel cannot close
            // while this loop runs.
            match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(result)) => self.apply(result),
                Ok(None) | Err(_) => {
                    warn!(
                        pending = self.reconstructor.pending(),
                        "aggregation deadline reached"
                    );
                    break AggregationStatus::TimedOut;
                }
            }
        };

        info!(
            elapsed = ?started.elapsed(),
            pending = self.reconstructor.pending(),
            ?status,
            "aggregation finished"
        );

        self.status = Some(status);
        status
    }

    /// Consumes the session and returns the best-effort result.
    pub fn finalize(self) -> Outcome {
        let status = self.status.unwrap_or(if self.reconstructor.is_settled() {
            AggregationStatus::Complete
        } else {
            AggregationStatus::TimedOut
        });
        let (matrix, failed_cells) = self.reconstructor.finalize();

        Outcome {
            matrix,
            status,
            failed_cells,
            violations: self.violations,
            rejected_results: self.rejected_results,
        }
    }

    fn apply(&mut self, result: TaskResult) {
        let TaskResult { id, dot } = result;
        match self.reconstructor.submit(&id, dot) {
            Ok(Submission::Resolved { cell, value }) => {
                debug!(%id, %cell, %value, "resolved cell");
            }
            Ok(Submission::AwaitingPair { cell }) => {
                trace!(%id, %cell, "stored share");
            }
            Ok(Submission::Duplicate) => {
                debug!(%id, "discarded duplicate result");
            }
            Err(err) => {
                self.rejected_results += 1;
                if self.violations.len() < self.max_violations {
                    warn!(%id, "rejected result: {err}");
                    self.violations.push((id, err));
                } else {
                    debug!(%id, rejected = self.rejected_results, "rejected result: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{matrix::Matrix, vector};
    use rand::{rngs::OsRng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    fn example() -> Operands {
        Operands::new(
            Matrix::new(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap(),
            Matrix::new(vec![vec![7, 8], vec![9, 10], vec![11, 12]]).unwrap(),
        )
        .unwrap()
    }

    fn config(privacy: bool, timeout: Duration) -> SessionConfig {
        SessionConfig::builder()
            .privacy(privacy)
            .mask_set_size(2)
            .aggregation_timeout(timeout)
            .build()
            .unwrap()
    }

    fn expected_example() -> Vec<Vec<Option<BigInt>>> {
        vec![
            vec![Some(58.into()), Some(64.into())],
            vec![Some(139.into()), Some(154.into())],
        ]
    }

    /// Spawns `count` honest workers that drain the pool.
    fn spawn_workers(handle: &SessionHandle, count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..count)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    while let Some(task) = handle.next_task() {
                        let dot = vector::dot(&task.x, &task.y);
                        handle.submit_result(task.id, dot).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_plain_session() {
        let operands = example();
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let mut session = AggregationSession::new(
            &operands,
            &config(false, Duration::from_secs(5)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();
        assert!(!handle.is_masked());
        assert_eq!(handle.pending_tasks(), 4);

        for worker in spawn_workers(&handle, 3) {
            worker.await.unwrap();
        }

        assert_eq!(session.aggregate().await, AggregationStatus::Complete);
        let outcome = session.finalize();
        assert_eq!(outcome.matrix.to_rows(), expected_example());
        assert_eq!(outcome.unresolved_count(), 0);
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test]
    async fn test_private_session_with_fixed_masks() {
        let operands = example();
        let masks = MaskSet::from_vectors(
            vec![
                vector::from_i64s(&[17, 4_000_000_000, 3]),
                vector::from_i64s(&[2, 2, 2]),
            ],
            vec![
                vector::from_i64s(&[9, 8, 7]),
                vector::from_i64s(&[u32::MAX as i64, 0, 1]),
            ],
        )
        .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut session = AggregationSession::with_masks(
            &operands,
            &config(true, Duration::from_secs(5)),
            &masks,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();
        assert!(handle.is_masked());
        assert_eq!(handle.pending_tasks(), 8);

        let workers = spawn_workers(&handle, 4);
        assert_eq!(session.aggregate().await, AggregationStatus::Complete);
        for worker in workers {
            worker.await.unwrap();
        }

        let outcome = session.finalize();
        assert_eq!(outcome.matrix.to_rows(), expected_example());
    }

    #[tokio::test]
    async fn test_private_session_with_generated_masks() {
        let operands = example();
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut session = AggregationSession::new(
            &operands,
            &config(true, Duration::from_secs(5)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();

        let workers = spawn_workers(&session.handle(), 2);
        assert_eq!(session.aggregate().await, AggregationStatus::Complete);
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(session.finalize().matrix.to_rows(), expected_example());
    }

    #[tokio::test]
    async fn test_timeout_reports_partial_result() {
        let operands = example();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut session = AggregationSession::new(
            &operands,
            &config(false, Duration::from_millis(50)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();

        // One task is pulled and never answered, as if its worker vanished.
        let lost = handle.next_task().unwrap();
        for worker in spawn_workers(&handle, 1) {
            worker.await.unwrap();
        }
        assert!(handle.next_task().is_none());

        assert_eq!(session.aggregate().await, AggregationStatus::TimedOut);
        let outcome = session.finalize();

        assert_eq!(outcome.status, AggregationStatus::TimedOut);
        assert_eq!(outcome.unresolved_count(), 1);
        assert_eq!(outcome.unresolved_cells(), vec![lost.id.cell()]);
        assert_eq!(outcome.matrix.resolved_count(), 3);
    }

    #[tokio::test]
    async fn test_deadline_is_global_not_per_result() {
        let operands = Operands::new(
            Matrix::new(vec![vec![1]; 6]).unwrap(),
            Matrix::new(vec![vec![1; 6]]).unwrap(),
        )
        .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let mut session = AggregationSession::new(
            &operands,
            &config(false, Duration::from_millis(200)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();

        // Results trickle in well within the timeout of each other, but the
        // whole run takes far longer than the timeout.
        let trickle = tokio::spawn(async move {
            while let Some(task) = handle.next_task() {
                tokio::time::sleep(Duration::from_millis(40)).await;
                if handle.submit_result(task.id, 1.into()).is_err() {
                    break;
                }
            }
        });

        let started = std::time::Instant::now();
        assert_eq!(session.aggregate().await, AggregationStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));

        let outcome = session.finalize();
        assert!(outcome.unresolved_count() > 0);
        assert!(outcome.matrix.resolved_count() > 0);
        trickle.await.unwrap();
    }

    #[tokio::test]
    async fn test_violations_and_duplicates() {
        let operands = example();
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut session = AggregationSession::new(
            &operands,
            &config(false, Duration::from_millis(100)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();

        handle
            .submit_result(TaskId::Plain { i: 0, j: 0 }, 58.into())
            .unwrap();
        handle
            .submit_result(TaskId::Plain { i: 0, j: 0 }, 99.into())
            .unwrap();
        handle
            .submit_result(TaskId::Plain { i: 5, j: 0 }, 1.into())
            .unwrap();

        assert_eq!(session.aggregate().await, AggregationStatus::TimedOut);
        assert_eq!(session.reconstructor().pending(), 3);

        let outcome = session.finalize();
        assert_eq!(
            outcome.matrix.get(Cell::new(0, 0)),
            Some(&BigInt::from(58))
        );
        assert_eq!(
            outcome.violations,
            vec![(
                TaskId::Plain { i: 5, j: 0 },
                IntegrityError::CellOutOfRange {
                    cell: Cell::new(5, 0)
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_submit_after_finalize_fails() {
        let operands = example();
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let session = AggregationSession::new(
            &operands,
            &config(false, Duration::from_millis(10)),
            &mut OsRng,
            &mut rng,
        )
        .unwrap();
        let handle = session.handle();
        drop(session.finalize());

        // Finalizing drops the receiver.
        assert!(matches!(
            handle.submit_result(TaskId::Plain { i: 0, j: 0 }, 1.into()),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::builder()
            .privacy(true)
            .mask_set_size(0)
            .build()
            .is_err());

        let config = SessionConfig::builder().build().unwrap();
        assert!(!config.privacy());
        assert_eq!(config.mask_set_size(), 8);
        assert_eq!(config.aggregation_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_violations(), 1024);
    }

    #[tokio::test]
    async fn test_recorded_violations_are_capped() {
        let operands = example();
        let config = SessionConfig::builder()
            .max_violations(2)
            .aggregation_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let mut session =
            AggregationSession::new(&operands, &config, &mut OsRng, &mut rng).unwrap();
        let handle = session.handle();

        for i in 10..15 {
            handle
                .submit_result(TaskId::Plain { i, j: 0 }, 1.into())
                .unwrap();
        }

        assert_eq!(session.aggregate().await, AggregationStatus::TimedOut);
        let outcome = session.finalize();

        assert_eq!(outcome.rejected_results, 5);
        let kept: Vec<TaskId> = outcome.violations.iter().map(|(id, _)| *id).collect();
        assert_eq!(
            kept,
            vec![TaskId::Plain { i: 10, j: 0 }, TaskId::Plain { i: 11, j: 0 }]
        );
        assert_eq!(outcome.unresolved_count(), 4);
    }
}
