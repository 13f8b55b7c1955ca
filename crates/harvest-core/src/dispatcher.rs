use std::sync::Arc;

use futures::{StreamExt, future, stream};
use tokio_util::sync::CancellationToken;

use crate::config::{FilterCriteria, HarvestConfig, UrlPatterns};
use crate::index::ArchiveIndex;
use crate::job::{ExtractionJob, JobContext};
use crate::models::{ArchiveFileReference, HarvestReport, JobResult};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::traits::{ArchiveTransport, ContentExtractor, LanguageDetector, OutputSink};

/// Runs one extraction job per archive file with bounded concurrency.
#[derive(Clone)]
pub struct Dispatcher<T, E, L, S> {
    transport: T,
    extractor: E,
    detector: L,
    sink: S,
    config: Arc<HarvestConfig>,
}

impl<T, E, L, S> Dispatcher<T, E, L, S>
where
    T: ArchiveTransport + 'static,
    E: ContentExtractor + 'static,
    L: LanguageDetector + 'static,
    S: OutputSink + 'static,
{
    pub fn new(transport: T, extractor: E, detector: L, sink: S, config: HarvestConfig) -> Self {
        Self {
            transport,
            extractor,
            detector,
            sink,
            config: Arc::new(config),
        }
    }

    /// Resolve the archive files of the criteria's window and run them.
    pub async fn harvest<I, R>(
        &self,
        index: &ArchiveIndex<I>,
        criteria: &FilterCriteria,
        cancel: CancellationToken,
        reporter: R,
    ) -> HarvestReport
    where
        I: ArchiveTransport,
        R: HarvestReporter + Clone + 'static,
    {
        let references = index.resolve(&criteria.window, &reporter).await;
        self.run(references, &criteria.patterns, cancel, reporter).await
    }

    /// Run every reference, at most `workers` at a time.
    ///
    /// A job that fails or panics is logged and left out of the aggregate;
    /// the rest of the batch continues. Once `cancel` fires no further jobs
    /// are started and the jobs in flight run to the end.
    pub async fn run<R>(
        &self,
        references: Vec<ArchiveFileReference>,
        patterns: &UrlPatterns,
        cancel: CancellationToken,
        reporter: R,
    ) -> HarvestReport
    where
        R: HarvestReporter + Clone + 'static,
    {
        let context = JobContext {
            transport: self.transport.clone(),
            extractor: self.extractor.clone(),
            detector: self.detector.clone(),
            sink: self.sink.clone(),
            patterns: Arc::new(patterns.clone()),
            config: Arc::clone(&self.config),
        };
        let total = references.len();

        let mut outcomes = stream::iter(references)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|reference| {
                let job = ExtractionJob::new(reference, context.clone());
                let name = job.name().to_string();
                let reporter = reporter.clone();
                async move { (name, tokio::spawn(job.run(reporter)).await) }
            })
            .buffer_unordered(self.config.workers());

        let mut report = HarvestReport::default();
        let mut finished = 0;

        while let Some((name, outcome)) = outcomes.next().await {
            finished += 1;
            match outcome {
                Ok(Ok(result)) => merge_result(&mut report, result, &reporter),
                Ok(Err(e)) => {
                    let error = e.to_string();
                    reporter.report(HarvestEvent::JobFailed {
                        job: &name,
                        error: &error,
                    });
                    report.failed_jobs.push(name);
                }
                Err(e) => {
                    let error = if e.is_panic() {
                        "job panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    reporter.report(HarvestEvent::JobFailed {
                        job: &name,
                        error: &error,
                    });
                    report.failed_jobs.push(name);
                }
            }
        }

        if finished < total {
            report.cancelled = true;
            reporter.report(HarvestEvent::Cancelled {
                pending: total - finished,
            });
        }
        report
    }
}

/// Fold one job's result into the run report.
///
/// Locations without any extracted article are not retained.
pub(crate) fn merge_result<R: HarvestReporter>(
    report: &mut HarvestReport,
    result: JobResult,
    reporter: &R,
) {
    report.counters += result.counters;
    reporter.report(HarvestEvent::Aggregate {
        counters: report.counters,
    });

    if result.counters.extracted == 0 {
        reporter.report(HarvestEvent::EmptyOutputIgnored {
            location: &result.location,
        });
    } else {
        report.locations.push(result.location);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::config::DateWindow;
    use crate::models::{Counters, JobState};
    use crate::report::TracingReporter;
    use crate::testutil::*;

    type TestDispatcher = Dispatcher<MockTransport, MockExtractor, MockDetector, RecordingSink>;

    const BASE: &str = "http://mirror.test/";

    fn dispatcher(
        transport: &MockTransport,
        extractor: &MockExtractor,
        config: HarvestConfig,
    ) -> TestDispatcher {
        Dispatcher::new(
            transport.clone(),
            extractor.clone(),
            MockDetector::new("eng"),
            RecordingSink::new(),
            config,
        )
    }

    fn archive(urls: &[&str]) -> Vec<u8> {
        urls.iter()
            .fold(WarcBuilder::new(), |b, url| b.record(html_response(url, "<p>x</p>")))
            .build_gzipped()
    }

    fn register(transport: &MockTransport, name: &str, urls: &[&str]) -> ArchiveFileReference {
        let reference = reference_at(BASE, name);
        transport.add_archive(reference.locator(), archive(urls));
        reference
    }

    fn result(name: &str, extracted: u64, discarded: u64, errored: u64) -> JobResult {
        JobResult {
            job_name: name.to_string(),
            location: PathBuf::from(format!("/out/{name}.parquet")),
            counters: Counters {
                extracted,
                discarded,
                errored,
            },
            state: JobState::Done,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_batch_aggregates_successful_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let extractor = MockExtractor::new();
        let config = HarvestConfig::builder(dir.path()).workers(2).build().unwrap();

        let refs = vec![
            register(
                &transport,
                "CC-NEWS-20220401000000-00001.warc.gz",
                &["https://a.example.com/1", "https://a.example.com/2"],
            ),
            register(
                &transport,
                "CC-NEWS-20220401000000-00002.warc.gz",
                &["https://other.org/1"],
            ),
            // Never registered, so the download fails with a 404.
            reference_at(BASE, "CC-NEWS-20220401000000-00003.warc.gz"),
        ];

        let patterns = UrlPatterns::new(["*.example.com/*"]).unwrap();
        let report = dispatcher(&transport, &extractor, config)
            .run(refs, &patterns, CancellationToken::new(), TracingReporter)
            .await;

        assert_eq!(report.counters.extracted, 2);
        assert_eq!(report.counters.discarded, 1);
        assert_eq!(report.counters.errored, 0);
        assert_eq!(
            report.locations,
            vec![dir.path().join("CC-NEWS-20220401000000-00001.parquet")]
        );
        assert!(report.failed_jobs.is_empty());
        assert!(!report.cancelled);
        assert_eq!(transport.opened().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_job_is_not_aggregated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let config = HarvestConfig::builder(dir.path()).workers(2).build().unwrap();

        let refs = vec![
            register(
                &transport,
                "CC-NEWS-20220401000000-00001.warc.gz",
                &["https://a.example.com/1"],
            ),
            register(
                &transport,
                "CC-NEWS-20220401000000-00002.warc.gz",
                &["https://a.example.com/2", "https://a.example.com/3"],
            ),
        ];

        let dispatcher = Dispatcher::new(
            transport.clone(),
            MockExtractor::new(),
            MockDetector::new("eng"),
            RecordingSink::failing_for("00002"),
            config,
        );
        let report = dispatcher
            .run(
                refs,
                &UrlPatterns::new(["*"]).unwrap(),
                CancellationToken::new(),
                TracingReporter,
            )
            .await;

        assert_eq!(report.failed_jobs, vec!["CC-NEWS-20220401000000-00002".to_string()]);
        assert_eq!(report.counters.extracted, 1);
        assert_eq!(report.locations.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_job_is_reported_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let extractor = MockExtractor::new();
        let config = HarvestConfig::builder(dir.path()).workers(2).build().unwrap();

        let refs = vec![
            register(
                &transport,
                "CC-NEWS-20220401000000-00001.warc.gz",
                &["https://a.example.com/1", "https://a.example.com/2"],
            ),
            register(
                &transport,
                "CC-NEWS-20220401000000-00002.warc.gz",
                &["https://a.example.com/3"],
            ),
        ];
        transport.panic_on_open(refs[1].locator());

        let reporter = RecordingReporter::new();
        let report = dispatcher(&transport, &extractor, config)
            .run(
                refs,
                &UrlPatterns::new(["*"]).unwrap(),
                CancellationToken::new(),
                reporter.clone(),
            )
            .await;

        assert_eq!(report.failed_jobs, vec!["CC-NEWS-20220401000000-00002".to_string()]);
        assert_eq!(reporter.count("job_failed"), 1);
        assert_eq!(
            report.counters,
            Counters {
                extracted: 2,
                discarded: 0,
                errored: 0
            }
        );
        assert_eq!(report.locations.len(), 1);
        assert!(!report.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_by_workers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let extractor = MockExtractor::new().with_delay(Duration::from_millis(50));
        let config = HarvestConfig::builder(dir.path()).workers(2).build().unwrap();

        let refs: Vec<_> = (1..=6)
            .map(|i| {
                register(
                    &transport,
                    &format!("CC-NEWS-20220401000000-0000{i}.warc.gz"),
                    &["https://a.example.com/1"],
                )
            })
            .collect();

        let report = dispatcher(&transport, &extractor, config)
            .run(
                refs,
                &UrlPatterns::new(["*"]).unwrap(),
                CancellationToken::new(),
                TracingReporter,
            )
            .await;

        assert_eq!(report.counters.extracted, 6);
        assert!(extractor.max_in_flight() <= 2);
        assert!(extractor.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let config = HarvestConfig::builder(dir.path()).build().unwrap();
        let refs = vec![register(
            &transport,
            "CC-NEWS-20220401000000-00001.warc.gz",
            &["https://a.example.com/1"],
        )];

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = dispatcher(&transport, &MockExtractor::new(), config)
            .run(refs, &UrlPatterns::new(["*"]).unwrap(), cancel, TracingReporter)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.counters, Counters::default());
        assert!(transport.opened().is_empty());
    }

    #[derive(Clone)]
    struct CancelOnFirstJob(CancellationToken);

    impl HarvestReporter for CancelOnFirstJob {
        fn report(&self, event: HarvestEvent<'_>) {
            if let HarvestEvent::JobStarted { .. } = event {
                self.0.cancel();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_lets_in_flight_job_finish() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let config = HarvestConfig::builder(dir.path()).workers(1).build().unwrap();
        let refs = vec![
            register(
                &transport,
                "CC-NEWS-20220401000000-00001.warc.gz",
                &["https://a.example.com/1"],
            ),
            register(
                &transport,
                "CC-NEWS-20220401000000-00002.warc.gz",
                &["https://a.example.com/2"],
            ),
        ];

        let cancel = CancellationToken::new();
        let report = dispatcher(&transport, &MockExtractor::new(), config)
            .run(
                refs,
                &UrlPatterns::new(["*"]).unwrap(),
                cancel.clone(),
                CancelOnFirstJob(cancel),
            )
            .await;

        assert!(report.cancelled);
        assert_eq!(report.counters.extracted, 1);
        assert_eq!(transport.opened().len(), 1);
    }

    #[test]
    fn test_merge_drops_empty_locations() {
        let mut report = HarvestReport::default();
        merge_result(&mut report, result("a", 3, 1, 0), &TracingReporter);
        merge_result(&mut report, result("b", 0, 5, 2), &TracingReporter);

        assert_eq!(report.locations, vec![PathBuf::from("/out/a.parquet")]);
        assert_eq!(
            report.counters,
            Counters {
                extracted: 3,
                discarded: 6,
                errored: 2
            }
        );
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let results = [result("a", 3, 1, 0), result("b", 0, 5, 2), result("c", 7, 0, 1)];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let merged: Vec<_> = orders
            .iter()
            .map(|order| {
                let mut report = HarvestReport::default();
                for &i in order {
                    merge_result(&mut report, results[i].clone(), &TracingReporter);
                }
                report.locations.sort();
                report
            })
            .collect();

        assert!(merged.iter().all(|r| *r == merged[0]));
        assert_eq!(merged[0].counters.total(), 19);
        assert_eq!(merged[0].locations.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_harvest_resolves_and_runs() {
        use chrono::{TimeZone, Utc};

        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let index = ArchiveIndex::with_base_url(transport.clone(), BASE).unwrap();

        transport.add_resource(
            &index.paths_url(2022, 4),
            gzip(
                b"crawl-data/CC-NEWS/2022/04/CC-NEWS-20220410000000-00001.warc.gz\n\
                  crawl-data/CC-NEWS/2022/04/CC-NEWS-20220420000000-00002.warc.gz\n",
            ),
        );
        transport.add_archive(
            &format!("{BASE}crawl-data/CC-NEWS/2022/04/CC-NEWS-20220410000000-00001.warc.gz"),
            archive(&["https://news.example.com/a", "https://news.example.com/b"]),
        );

        let window = DateWindow::with_clock(
            Utc.with_ymd_and_hms(2022, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 4, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let criteria = FilterCriteria::new(UrlPatterns::new(["*.example.com/*"]).unwrap(), window);
        let config = HarvestConfig::builder(dir.path()).build().unwrap();

        let report = dispatcher(&transport, &MockExtractor::new(), config)
            .harvest(&index, &criteria, CancellationToken::new(), TracingReporter)
            .await;

        assert_eq!(report.counters.extracted, 2);
        assert_eq!(
            report.locations,
            vec![dir.path().join("CC-NEWS-20220410000000-00001.parquet")]
        );
        // Only the file inside the window is downloaded.
        assert_eq!(transport.opened().len(), 1);
    }
}
