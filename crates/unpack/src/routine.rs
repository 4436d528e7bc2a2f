//! Sequential root passes with bounded-parallel establishment fan-out.

use crate::Context;
use crate::cancel::guarded;
use crate::error::{Error, ErrorKind, Result};
use crate::establishment::Establishment;
use crate::namer::UsedNames;
use crate::process::process_establishment;
use derive_more::Display;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

const STATUS_CAPACITY: usize = 256;

/// One top-level directory of the source share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPass {
    pub directory: String,
    /// Only process establishments whose category equals `directory`.
    pub filter_by_category: bool,
    /// Skip reports for establishments that already have one.
    pub append_only_if_missing: bool,
    /// Earlier passes whose used names this pass starts from.
    pub carry_from: Vec<String>,
}
impl RootPass {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            filter_by_category: true,
            append_only_if_missing: false,
            carry_from: Vec::new(),
        }
    }
}

/// Position in a pass, rendered as the progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub root: String,
    pub index: usize,
    pub total: usize,
}
impl Progress {
    pub fn percent(&self) -> usize {
        (self.index * 100).checked_div(self.total).unwrap_or(100)
    }
}
impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processing {}/{} — {}% of root {}", self.index, self.total, self.percent(), self.root)
    }
}

/// Best-effort status events; a lagging or absent subscriber never slows the
/// run down.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Status {
    #[display("starting root {root}")]
    PassStarted { root: String },
    #[display("{_0}")]
    Progress(Progress),
    #[display("establishment {directory} in root {root} failed: {message}")]
    EstablishmentFailed { root: String, directory: String, message: String },
    #[display("finished root {root}: {succeeded} succeeded, {failed} failed")]
    PassComplete { root: String, succeeded: usize, failed: usize },
}

/// An establishment whose processing did not finish.
#[derive(Debug)]
pub struct EstablishmentFailure {
    pub root: String,
    pub directory: String,
    pub error: Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub root: String,
    /// Subdirectories of the root.
    pub discovered: usize,
    /// Establishments left after identifier and category filtering.
    pub eligible: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Carried-in names plus every name allocated during the pass.
    pub used_names: UsedNames,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: Vec<PassReport>,
    pub failures: Vec<EstablishmentFailure>,
}
impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moves every configured root of the source share to the destination.
///
/// # Examples
///
/// ```no_run
/// use cdc_unpack::{Context, RootPass, UnpackRoutine};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(ctx: Context) -> cdc_unpack::error::Result<()> {
/// let routine = UnpackRoutine::new(ctx, vec![RootPass::new("CDC"), RootPass::new("CDCFE")], 5);
/// let mut status = routine.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = status.recv().await {
///         println!("{event}");
///     }
/// });
/// let report = routine.run(&CancellationToken::new()).await?;
/// assert!(report.is_clean());
/// # Ok(())
/// # }
/// ```
pub struct UnpackRoutine {
    ctx: Arc<Context>,
    passes: Vec<RootPass>,
    degree_of_parallelism: usize,
    status: broadcast::Sender<Status>,
}

impl UnpackRoutine {
    /// A parallelism of zero is treated as one.
    pub fn new(ctx: Context, passes: Vec<RootPass>, degree_of_parallelism: u8) -> Self {
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            ctx: Arc::new(ctx),
            passes,
            degree_of_parallelism: usize::from(degree_of_parallelism.max(1)),
            status,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.status.subscribe()
    }

    fn emit(&self, status: Status) {
        // No subscribers is fine.
        _ = self.status.send(status);
    }

    /// Run every pass in order.
    ///
    /// Establishment failures are collected in the report; only failing to
    /// list a root, a bad carry-in, or cancellation end the run with an
    /// error. On cancellation, in-flight establishments are allowed to wind
    /// down before [`ErrorKind::Cancelled`] is returned.
    #[instrument(skip_all)]
    pub async fn run(&self, ct: &CancellationToken) -> Result<RunReport> {
        let mut report = RunReport::default();
        for pass in &self.passes {
            if ct.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let mut carried = UsedNames::new();
            for earlier in &pass.carry_from {
                let Some(previous) = report.passes.iter().find(|p| &p.root == earlier) else {
                    exn::bail!(ErrorKind::InvalidPass(pass.directory.clone(), earlier.clone()));
                };
                carried.extend(previous.used_names.iter().cloned());
            }
            let (pass_report, failures) = self.run_pass(pass, carried, ct).await?;
            report.passes.push(pass_report);
            report.failures.extend(failures);
        }
        if ct.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(root = %pass.directory))]
    async fn run_pass(
        &self,
        pass: &RootPass,
        carried: UsedNames,
        ct: &CancellationToken,
    ) -> Result<(PassReport, Vec<EstablishmentFailure>)> {
        let root = pass.directory.clone();
        self.emit(Status::PassStarted { root: root.clone() });
        tracing::info!(append_only = pass.append_only_if_missing, carried = carried.len(), "Starting root pass");

        let directories =
            guarded(ct, self.ctx.source.list_directories(std::slice::from_ref(&root)), || ErrorKind::Storage).await?;
        let discovered = directories.len();
        let establishments: Vec<Establishment> = directories
            .iter()
            .map(|directory| Establishment::parse(directory))
            .filter(|establishment| establishment.identifier.is_some())
            .filter(|establishment| !pass.filter_by_category || establishment.category.as_deref() == Some(root.as_str()))
            .collect();
        let total = establishments.len();
        tracing::info!(discovered, eligible = total, "Listed establishments");

        let semaphore = Arc::new(Semaphore::new(self.degree_of_parallelism));
        let mut tasks = JoinSet::new();
        // Every task starts from the registry as it stood when the pass began;
        // results only reach `used`, never a sibling's snapshot.
        let registry = carried;
        let mut used = registry.clone();
        let mut failures = Vec::new();
        let mut succeeded = 0;

        for (index, establishment) in establishments.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = ct.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // Never closed.
                    Err(_) => break,
                },
            };
            let progress = Progress { root: root.clone(), index: index + 1, total };
            tracing::info!("{progress}");
            self.emit(Status::Progress(progress));

            let ctx = self.ctx.clone();
            let ct = ct.clone();
            let task_root = root.clone();
            let snapshot = registry.clone();
            let append_only = pass.append_only_if_missing;
            let directory = establishment.source_directory_name.clone();
            let span = tracing::info_span!("establishment", directory = %directory);
            tasks.spawn(
                async move {
                    // Released on every exit path, panics included.
                    let _permit = permit;
                    let work = process_establishment(&ctx, &task_root, &establishment, snapshot, append_only, &ct);
                    let result = match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(exn::Exn::from(ErrorKind::Panicked(panic_message(panic.as_ref())))),
                    };
                    (directory, result)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            self.collect(&root, joined, &mut used, &mut succeeded, &mut failures)?;
        }

        let failed = failures.len();
        tracing::info!(succeeded, failed, used_names = used.len(), "Finished root pass");
        self.emit(Status::PassComplete { root: root.clone(), succeeded, failed });
        let report = PassReport { root, discovered, eligible: total, succeeded, failed, used_names: used };
        Ok((report, failures))
    }

    /// Merge one finished establishment task into the pass totals.
    fn collect(
        &self,
        root: &str,
        joined: std::result::Result<(String, Result<UsedNames>), tokio::task::JoinError>,
        used: &mut UsedNames,
        succeeded: &mut usize,
        failures: &mut Vec<EstablishmentFailure>,
    ) -> Result<()> {
        // Tasks are never aborted and panics are caught inside them, so a
        // join error means the runtime is going away.
        let (directory, result) = match joined {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, "Establishment task could not be joined");
                exn::bail!(ErrorKind::Cancelled);
            },
        };
        match result {
            Ok(names) => {
                used.extend(names);
                *succeeded += 1;
            },
            Err(error) => {
                // Interrupted work is reported once, by `run`.
                if matches!(&*error, ErrorKind::Cancelled) {
                    tracing::debug!(%directory, "Establishment cancelled");
                    return Ok(());
                }
                tracing::error!(%directory, error = ?error, "Establishment failed");
                self.emit(Status::EstablishmentFailed {
                    root: root.to_string(),
                    directory: directory.clone(),
                    message: error.to_string(),
                });
                failures.push(EstablishmentFailure { root: root.to_string(), directory, error });
            },
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceIndex;
    use async_trait::async_trait;
    use cdc_archive::{ENTRY_NAME, pack_single_entry};
    use cdc_metadata::MemoryMetadata;
    use cdc_storage::backend::MockBackend;
    use cdc_storage::error::Result as StorageResult;
    use cdc_storage::{BackendHandle, DocumentFile, StorageBackend};
    use std::path::Path;
    use std::time::Duration;
    use url::Url;

    fn report(size: usize) -> Vec<u8> {
        pack_single_entry(ENTRY_NAME, &vec![b'r'; size]).unwrap()
    }

    fn context(source: BackendHandle, destination: Arc<MockBackend>) -> Context {
        Context {
            source,
            destination,
            metadata: Arc::new(MemoryMetadata::new()),
            evidence: Arc::new(EvidenceIndex::default()),
        }
    }

    #[test]
    fn test_progress_line() {
        let progress = Progress { root: "CDC".to_string(), index: 1, total: 4 };
        assert_eq!(progress.to_string(), "processing 1/4 — 25% of root CDC");
        let empty = Progress { root: "CDC".to_string(), index: 0, total: 0 };
        assert_eq!(empty.percent(), 100);
    }

    #[tokio::test]
    async fn test_filtering_and_passes() {
        let source = Arc::new(MockBackend::with_files([
            ("CDC/1 A (CDC)/report.zip", report(10)),
            ("CDC/2 B (CDCFE)/report.zip", report(10)),
            ("CDC/Archive C (CDC)/report.zip", report(10)),
            ("CDCFE/3 D (CDCFE)/report.zip", report(10)),
        ]));
        let destination = Arc::new(MockBackend::default().with_name("destination"));
        let routine = UnpackRoutine::new(
            context(source, destination.clone()),
            vec![RootPass::new("CDC"), RootPass::new("CDCFE")],
            5,
        );
        let report = routine.run(&CancellationToken::new()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.passes.len(), 2);
        assert_eq!(report.passes[0].discovered, 3);
        assert_eq!(report.passes[0].eligible, 1);
        assert_eq!(report.passes[1].eligible, 1);
        assert!(destination.read(Path::new("00001 A (CDC)/Condition Report/A.docx")).await.is_some());
        assert!(destination.read(Path::new("00003 D (CDCFE)/Condition Report/D.docx")).await.is_some());
        assert_eq!(destination.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_unfiltered_pass_takes_every_category() {
        let source = Arc::new(MockBackend::with_files([
            ("reports/1 A (CDC)/report.zip", report(10)),
            ("reports/2 B (CDCFE)/report.zip", report(10)),
            ("reports/3 C/report.zip", report(10)),
        ]));
        let destination = Arc::new(MockBackend::default());
        let mut pass = RootPass::new("reports");
        pass.filter_by_category = false;
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![pass], 2);
        let report = routine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.passes[0].succeeded, 3);
        assert!(destination.read(Path::new("00003 C/Condition Report/C.docx")).await.is_some());
    }

    #[tokio::test]
    async fn test_append_only_pass_against_carried_names() {
        let source = Arc::new(MockBackend::with_files([
            ("reports/1 A/report.zip", report(10)),
            ("reports-50/1 A/report.zip", report(20)),
            ("reports-50/2 B/report.zip", report(20)),
            ("extra/2 B/report.docx", b"PK".to_vec()),
        ]));
        let destination = Arc::new(MockBackend::default());
        let first = RootPass { filter_by_category: false, ..RootPass::new("reports") };
        let second = RootPass {
            filter_by_category: false,
            append_only_if_missing: true,
            carry_from: vec!["reports".to_string()],
            ..RootPass::new("reports-50")
        };
        let third = RootPass {
            filter_by_category: false,
            append_only_if_missing: true,
            carry_from: vec!["reports".to_string(), "reports-50".to_string()],
            ..RootPass::new("extra")
        };
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![first, second, third], 1);
        let report = routine.run(&CancellationToken::new()).await.unwrap();
        assert!(report.is_clean());
        // A's report came from the first pass only; B's from the second.
        assert_eq!(destination.upload_count(), 2);
        let a = destination.read(Path::new("00001 A/Condition Report/A.docx")).await.unwrap();
        assert_eq!(a.len(), 10);
        let b = destination.read(Path::new("00002 B/Condition Report/B.docx")).await.unwrap();
        assert_eq!(b.len(), 20);
        let expected: UsedNames = ["A.docx", "B.docx"].iter().map(|s| s.to_string()).collect();
        assert_eq!(report.passes[2].used_names, expected);
    }

    async fn append_only_outcome(degree_of_parallelism: u8) -> (usize, usize, UsedNames) {
        let source = Arc::new(
            MockBackend::with_files([("reports/1 AB/report.zip", report(10)), ("reports/2 A/report.zip", report(10))])
                .with_latency(Duration::from_millis(20)),
        );
        let destination = Arc::new(MockBackend::default());
        let pass = RootPass { filter_by_category: false, append_only_if_missing: true, ..RootPass::new("reports") };
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![pass], degree_of_parallelism);
        let report = routine.run(&CancellationToken::new()).await.unwrap();
        let pass = &report.passes[0];
        (pass.succeeded, destination.upload_count(), pass.used_names.clone())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_outcome_independent_of_parallelism() {
        let sequential = append_only_outcome(1).await;
        let parallel = append_only_outcome(2).await;
        assert_eq!(sequential, parallel);
        // Names allocated within the pass are not visible to siblings, so
        // "A" is not mistaken for having "AB"'s report.
        let expected: UsedNames = ["A.docx", "AB.docx"].iter().map(|s| s.to_string()).collect();
        assert_eq!(sequential, (2, 2, expected));
    }

    #[tokio::test]
    async fn test_carry_from_unknown_pass() {
        let source = Arc::new(MockBackend::default());
        let pass = RootPass { carry_from: vec!["later".to_string()], ..RootPass::new("CDC") };
        let routine = UnpackRoutine::new(context(source, Arc::new(MockBackend::default())), vec![pass], 1);
        let err = routine.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPass(..)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_cap() {
        let files: Vec<(String, Vec<u8>)> =
            (1..=12).map(|i| (format!("CDC/{i} School {i} (CDC)/report.docx"), b"PK".to_vec())).collect();
        let source = Arc::new(MockBackend::with_files(files).with_latency(Duration::from_millis(10)));
        let destination = Arc::new(MockBackend::default());
        let routine = UnpackRoutine::new(context(source.clone(), destination.clone()), vec![RootPass::new("CDC")], 3);
        let report = routine.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.passes[0].succeeded, 12);
        assert_eq!(destination.upload_count(), 12);
        // One listing or download per establishment at a time, so the
        // source never sees more calls at once than there are permits.
        assert!(source.peak_concurrency() <= 3, "peak was {}", source.peak_concurrency());
        assert!(source.peak_concurrency() >= 2);
    }

    /// Fails every download beneath one establishment.
    struct FlakySource {
        inner: MockBackend,
        poisoned: &'static str,
    }

    #[async_trait]
    impl StorageBackend for FlakySource {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn list_directories(&self, path: &[String]) -> StorageResult<Vec<String>> {
            self.inner.list_directories(path).await
        }
        async fn list_files(&self, path: &[String]) -> StorageResult<Vec<DocumentFile>> {
            self.inner.list_files(path).await
        }
        async fn download(&self, absolute_path: &str) -> StorageResult<Vec<u8>> {
            if absolute_path.contains(self.poisoned) {
                exn::bail!(cdc_storage::error::ErrorKind::BackendError("connection reset".to_string()));
            }
            self.inner.download(absolute_path).await
        }
        fn locate(&self, path: &[String], filename: &str) -> StorageResult<Url> {
            self.inner.locate(path, filename)
        }
        async fn upload(&self, path: &[String], filename: &str, mime_type: &str, data: &[u8]) -> StorageResult<Url> {
            self.inner.upload(path, filename, mime_type, data).await
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let source = Arc::new(FlakySource {
            inner: MockBackend::with_files([
                ("CDC/1 A (CDC)/report.docx", b"PK".to_vec()),
                ("CDC/2 B (CDC)/report.docx", b"PK".to_vec()),
                ("CDC/3 C (CDC)/report.docx", b"PK".to_vec()),
            ]),
            poisoned: "2%20B",
        });
        let destination = Arc::new(MockBackend::default());
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![RootPass::new("CDC")], 2);
        let mut status = routine.subscribe();
        let report = routine.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].directory, "2 B (CDC)");
        assert!(matches!(&*report.failures[0].error, ErrorKind::Storage));
        assert_eq!(report.passes[0].succeeded, 2);
        assert_eq!(destination.upload_count(), 2);

        let mut events = Vec::new();
        while let Ok(event) = status.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(Status::PassStarted { .. })));
        assert!(events.iter().any(|e| matches!(e, Status::EstablishmentFailed { directory, .. } if directory == "2 B (CDC)")));
        assert_eq!(events.iter().filter(|e| matches!(e, Status::Progress(_))).count(), 3);
        assert!(matches!(events.last(), Some(Status::PassComplete { succeeded: 2, failed: 1, .. })));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let source = Arc::new(MockBackend::with_files([("CDC/1 A (CDC)/report.docx", b"PK".to_vec())]));
        let destination = Arc::new(MockBackend::default());
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![RootPass::new("CDC")], 1);
        let ct = CancellationToken::new();
        ct.cancel();
        let err = routine.run(&ct).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(destination.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_pass() {
        let files: Vec<(String, Vec<u8>)> =
            (1..=20).map(|i| (format!("CDC/{i} S{i} (CDC)/report.docx"), b"PK".to_vec())).collect();
        let source = Arc::new(MockBackend::with_files(files).with_latency(Duration::from_millis(5)));
        let destination = Arc::new(MockBackend::default());
        let routine = UnpackRoutine::new(context(source, destination.clone()), vec![RootPass::new("CDC")], 1);
        let mut status = routine.subscribe();
        let ct = CancellationToken::new();
        let trigger = ct.clone();
        tokio::spawn(async move {
            // Cancel once the third establishment has been dispatched.
            while let Ok(event) = status.recv().await {
                if matches!(event, Status::Progress(Progress { index: 3, .. })) {
                    trigger.cancel();
                }
            }
        });
        let err = routine.run(&ct).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(destination.upload_count() < 20);
    }
}
