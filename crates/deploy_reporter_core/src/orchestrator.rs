use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::changes::{self, SnapshotDiff};
use crate::config::{ConnectionSettings, ReporterConfig};
use crate::dedup::{JsonSetStore, SetStore, fingerprint, record_notified, should_notify};
use crate::deploy_alerts::{collect_new_deploy_links, deliver_alerts};
use crate::notify::{MentionResolver, Notifier, change_message, created_message};
use crate::publish::{PagePublisher, PublishOutcome, PublishRequest, page_url, publish_page};
use crate::render::render_page;
use crate::snapshot::{self, SnapshotStore};
use crate::tracker::{
    TicketFetcher, TicketQuery, TicketRecord, browse_url, build_jql, fetch_or_empty,
};
use crate::window::{RunMode, WeekWindow, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub today: NaiveDate,
    pub paginate: bool,
    pub force_update: bool,
    pub mute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "publish", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Empty diff in a mode that does not refresh unconditionally.
    Skipped,
    Published(PublishOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Duplicate,
    /// The notifier declined: no webhook or outside allowed hours.
    Gated,
    Muted,
    NoChanges,
    Failed(String),
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Duplicate => "duplicate",
            Self::Gated => "gated",
            Self::Muted => "muted",
            Self::NoChanges => "no_changes",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub window: WeekWindow,
    pub jql: String,
    pub ticket_count: usize,
    pub diff: SnapshotDiff,
    pub fingerprint: Option<String>,
    pub outcome: RunOutcome,
    pub page_url: Option<String>,
    pub notification: NotificationStatus,
    pub deploy_alerts_sent: usize,
    pub snapshot_written: bool,
}

/// One scheduled invocation: resolve, fetch, diff, publish, notify, persist.
///
/// State files are mode-scoped and carry no locking; invocations sharing a
/// storage slot must not overlap.
pub struct Orchestrator<F, P, N, M> {
    config: ReporterConfig,
    connection: ConnectionSettings,
    fetcher: F,
    publisher: P,
    notifier: N,
    directory: M,
}

impl<F, P, N, M> Orchestrator<F, P, N, M>
where
    F: TicketFetcher,
    P: PagePublisher,
    N: Notifier,
    M: MentionResolver,
{
    pub fn new(config: ReporterConfig, fetcher: F, publisher: P, notifier: N, directory: M) -> Result<Self> {
        let connection = config.require_connection()?;
        Ok(Self {
            config,
            connection,
            fetcher,
            publisher,
            notifier,
            directory,
        })
    }

    pub fn into_parts(self) -> (F, P, N, M) {
        (self.fetcher, self.publisher, self.notifier, self.directory)
    }

    pub fn request_count(&self) -> usize {
        self.fetcher.request_count() + self.publisher.request_count()
    }

    pub fn run(&mut self, options: RunOptions) -> Result<RunReport> {
        let window = resolve(options.mode, options.today);
        let slot = options.mode.storage_slot();
        info!(mode = %options.mode, label = %window.label, slot, "resolved week window");

        let query = TicketQuery {
            project_key: self.connection.project_key.clone(),
            date_field_id: self.config.date_field_id.clone(),
            start: window.start_str(),
            end: window.end_str(),
            paginate: options.paginate,
        };
        let jql = build_jql(&query);
        let tickets = fetch_or_empty(&mut self.fetcher, &query);
        info!(tickets = tickets.len(), "fetched tickets");

        let snapshot_store = SnapshotStore::new(self.config.snapshot_path(slot));
        let previous = snapshot_store.load();
        let current = snapshot::serialize(&tickets);
        let tracker_url = self.connection.atlassian_url.clone();
        let diff = changes::diff(previous.as_deref(), &current, |key| {
            browse_url(&tracker_url, key)
        });
        info!(changes = %diff.summary_line(), "compared with previous snapshot");
        let change_fingerprint = (!diff.is_empty()).then(|| fingerprint(&diff, &window.label));

        let mut report = RunReport {
            mode: options.mode,
            window,
            jql,
            ticket_count: tickets.len(),
            fingerprint: change_fingerprint,
            diff,
            outcome: RunOutcome::Skipped,
            page_url: None,
            notification: NotificationStatus::NoChanges,
            deploy_alerts_sent: 0,
            snapshot_written: false,
        };
        if report.diff.is_empty() && !options.mode.always_publishes() && !options.force_update {
            info!("no changes since last run; skipping publish");
            return Ok(report);
        }

        let fetcher = &mut self.fetcher;
        let body = render_page(&report.jql, &tickets, &tracker_url, |key| {
            match fetcher.lookup_summary(key) {
                Ok(summary) => summary,
                Err(error) => {
                    warn!(key, error = %format!("{error:#}"), "linked ticket lookup failed");
                    None
                }
            }
        });

        let request = PublishRequest {
            space_key: self.connection.space_key.clone(),
            title: report.window.label.clone(),
            body,
            parent_page_id: self.config.parent_page_id.clone(),
        };
        let outcome = publish_page(&mut self.publisher, &request)
            .with_context(|| format!("failed to publish '{}'", request.title))?;
        let url = page_url(&tracker_url, &request.space_key, outcome.page_id());
        report.page_url = Some(url.clone());
        report.outcome = RunOutcome::Published(outcome.clone());

        report.notification = if options.mute {
            info!("notifications muted");
            NotificationStatus::Muted
        } else {
            match report.fingerprint.as_deref() {
                None => NotificationStatus::NoChanges,
                Some(fp) => {
                    let text = match &outcome {
                        PublishOutcome::Created(_) => created_message(&request.title, &url),
                        _ => change_message(&request.title, &url, &report.diff),
                    };
                    let store = JsonSetStore::new(self.config.fingerprints_path(slot));
                    self.notify_once(&store, fp, &text)
                }
            }
        };

        if !options.mute {
            report.deploy_alerts_sent = self.send_deploy_alerts(&tickets, slot);
        }

        snapshot_store
            .save(&current)
            .with_context(|| format!("failed to persist snapshot for slot '{slot}'"))?;
        report.snapshot_written = true;
        info!(
            outcome = outcome.as_str(),
            notification = report.notification.as_str(),
            "run complete"
        );
        Ok(report)
    }

    fn notify_once(&mut self, store: &dyn SetStore, fp: &str, text: &str) -> NotificationStatus {
        let notified = store.load();
        if !should_notify(fp, &notified) {
            info!(fingerprint = fp, "change set already notified");
            return NotificationStatus::Duplicate;
        }
        match self.notifier.send(text) {
            Ok(true) => {
                if let Err(error) = store.save(&record_notified(fp, notified)) {
                    warn!(error = %format!("{error:#}"), "failed to record notified fingerprint");
                }
                NotificationStatus::Sent
            }
            Ok(false) => NotificationStatus::Gated,
            Err(error) => {
                let message = format!("{error:#}");
                warn!(error = %message, "notification failed");
                NotificationStatus::Failed(message)
            }
        }
    }

    fn send_deploy_alerts(&mut self, tickets: &[TicketRecord], slot: &str) -> usize {
        let store = JsonSetStore::new(self.config.deploy_keys_path(slot));
        let notified = store.load();
        let alerts = collect_new_deploy_links(tickets, &notified);
        if alerts.is_empty() {
            return 0;
        }
        let delivery = deliver_alerts(
            &alerts,
            notified,
            &mut self.notifier,
            &mut self.directory,
            &self.config.approvers,
            &self.connection.atlassian_url,
        );
        if delivery.sent > 0
            && let Err(error) = store.save(&delivery.notified)
        {
            warn!(error = %format!("{error:#}"), "failed to record notified deploy keys");
        }
        delivery.sent
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;

    use anyhow::bail;

    use super::*;
    use crate::config::ConfigFile;
    use crate::publish::PageInfo;
    use crate::snapshot::TicketSnapshotEntry;
    use crate::tracker::{Assignee, LinkDirection, TicketLink};

    #[derive(Default)]
    struct MockFetcher {
        tickets: Vec<TicketRecord>,
        fail: bool,
        queries: Vec<TicketQuery>,
        request_count: usize,
    }

    impl TicketFetcher for MockFetcher {
        fn fetch(&mut self, query: &TicketQuery) -> anyhow::Result<Vec<TicketRecord>> {
            self.request_count += 1;
            self.queries.push(query.clone());
            if self.fail {
                bail!("tracker unreachable");
            }
            Ok(self.tickets.clone())
        }

        fn lookup_summary(&mut self, _key: &str) -> anyhow::Result<Option<String>> {
            self.request_count += 1;
            Ok(Some("looked up".to_string()))
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    #[derive(Default)]
    struct MockPublisher {
        pages: BTreeMap<String, PageInfo>,
        fail: bool,
        lookups: usize,
        writes: usize,
    }

    impl PagePublisher for MockPublisher {
        fn find_page(&mut self, _space: &str, title: &str) -> anyhow::Result<Option<PageInfo>> {
            self.lookups += 1;
            if self.fail {
                bail!("wiki unavailable");
            }
            Ok(self.pages.get(title).cloned())
        }

        fn create(
            &mut self,
            _space: &str,
            title: &str,
            body: &str,
            _parent_id: &str,
        ) -> anyhow::Result<String> {
            self.writes += 1;
            let id = "4600000001".to_string();
            self.pages.insert(
                title.to_string(),
                PageInfo {
                    id: id.clone(),
                    body: body.to_string(),
                },
            );
            Ok(id)
        }

        fn update(
            &mut self,
            id: &str,
            title: &str,
            body: &str,
            _parent_id: &str,
        ) -> anyhow::Result<()> {
            self.writes += 1;
            self.pages.insert(
                title.to_string(),
                PageInfo {
                    id: id.to_string(),
                    body: body.to_string(),
                },
            );
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.lookups + self.writes
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Delivery {
        Deliver,
        Decline,
        Fail,
    }

    struct MockNotifier {
        delivery: Delivery,
        attempts: Vec<String>,
    }

    impl MockNotifier {
        fn new(delivery: Delivery) -> Self {
            Self {
                delivery,
                attempts: Vec::new(),
            }
        }
    }

    impl Notifier for MockNotifier {
        fn send(&mut self, text: &str) -> anyhow::Result<bool> {
            self.attempts.push(text.to_string());
            match self.delivery {
                Delivery::Deliver => Ok(true),
                Delivery::Decline => Ok(false),
                Delivery::Fail => bail!("webhook returned 500"),
            }
        }
    }

    struct NameDirectory;

    impl MentionResolver for NameDirectory {
        fn mention(&mut self, _email: Option<&str>, fallback_name: &str) -> String {
            fallback_name.to_string()
        }
    }

    type TestOrchestrator = Orchestrator<MockFetcher, MockPublisher, MockNotifier, NameDirectory>;

    fn config(state_dir: &Path) -> ReporterConfig {
        let state = state_dir.to_string_lossy().to_string();
        let pairs = [
            ("ATLASSIAN_URL", "https://acme.atlassian.net"),
            ("ATLASSIAN_USERNAME", "bot@acme.test"),
            ("ATLASSIAN_API_TOKEN", "secret"),
            ("JIRA_PROJECT_KEY", "IT"),
            ("CONFLUENCE_SPACE_KEY", "DEPLOY"),
            ("REPORTER_STATE_DIR", state.as_str()),
        ]
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<BTreeMap<_, _>>();
        ReporterConfig::resolve_with(&ConfigFile::default(), |key| pairs.get(key).cloned())
    }

    fn ticket(key: &str, date: &str) -> TicketRecord {
        TicketRecord {
            key: key.to_string(),
            summary: format!("{key} summary"),
            status: "Open".to_string(),
            assignee: Some(Assignee {
                display_name: "김담당".to_string(),
                email: Some("kim@acme.test".to_string()),
            }),
            scheduled_date: Some(date.to_string()),
            links: Vec::new(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 24).expect("valid date")
    }

    fn options(mode: RunMode) -> RunOptions {
        RunOptions {
            mode,
            today: today(),
            paginate: true,
            force_update: false,
            mute: false,
        }
    }

    fn orchestrator(
        state_dir: &Path,
        tickets: Vec<TicketRecord>,
        publisher: MockPublisher,
        delivery: Delivery,
    ) -> TestOrchestrator {
        Orchestrator::new(
            config(state_dir),
            MockFetcher {
                tickets,
                ..MockFetcher::default()
            },
            publisher,
            MockNotifier::new(delivery),
            NameDirectory,
        )
        .expect("orchestrator")
    }

    fn seed_snapshot(state_dir: &Path, slot: &str, tickets: &[TicketRecord]) {
        SnapshotStore::new(config(state_dir).snapshot_path(slot))
            .save(&snapshot::serialize(tickets))
            .expect("seed snapshot");
    }

    fn stored_snapshot(state_dir: &Path, slot: &str) -> Option<Vec<TicketSnapshotEntry>> {
        SnapshotStore::new(config(state_dir).snapshot_path(slot)).load()
    }

    #[test]
    fn missing_connection_settings_fail_before_any_io() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut incomplete = config(temp.path());
        incomplete.space_key = None;
        let result = Orchestrator::new(
            incomplete,
            MockFetcher::default(),
            MockPublisher::default(),
            MockNotifier::new(Delivery::Deliver),
            NameDirectory,
        );
        let error = result.err().expect("must fail");
        assert!(error.to_string().contains("CONFLUENCE_SPACE_KEY"));
    }

    #[test]
    fn first_run_creates_page_notifies_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut orchestrator = orchestrator(
            temp.path(),
            vec![ticket("IT-1", "2025-07-22")],
            MockPublisher::default(),
            Delivery::Deliver,
        );

        let report = orchestrator.run(options(RunMode::Current)).expect("run");
        assert_eq!(report.window.label, "7월 4째주: (07/21~07/27)");
        assert_eq!(report.diff.added.len(), 1);
        assert_eq!(
            report.outcome,
            RunOutcome::Published(PublishOutcome::Created("4600000001".to_string()))
        );
        assert_eq!(
            report.page_url.as_deref(),
            Some("https://acme.atlassian.net/wiki/spaces/DEPLOY/pages/4600000001")
        );
        assert_eq!(report.notification, NotificationStatus::Sent);
        assert!(report.snapshot_written);

        let (fetcher, publisher, notifier, _) = orchestrator.into_parts();
        assert_eq!(fetcher.queries[0].start, "2025-07-21");
        assert_eq!(fetcher.queries[0].end, "2025-07-27");
        assert!(publisher.pages.contains_key("7월 4째주: (07/21~07/27)"));
        assert!(notifier.attempts[0].starts_with("✅ 배포 일정 리포트가 생성되었습니다."));
        assert_eq!(
            stored_snapshot(temp.path(), "current").map(|entries| entries.len()),
            Some(1)
        );
    }

    #[test]
    fn update_mode_with_no_changes_skips_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tickets = vec![ticket("IT-1", "2025-07-22")];
        seed_snapshot(temp.path(), "current", &tickets);

        let mut orchestrator =
            orchestrator(temp.path(), tickets, MockPublisher::default(), Delivery::Deliver);
        let report = orchestrator.run(options(RunMode::Update)).expect("run");

        assert_eq!(report.outcome, RunOutcome::Skipped);
        assert_eq!(report.notification, NotificationStatus::NoChanges);
        assert!(report.fingerprint.is_none());
        assert!(!report.snapshot_written);
        let (_, publisher, notifier, _) = orchestrator.into_parts();
        assert_eq!(publisher.lookups, 0);
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn current_mode_publishes_even_without_changes_but_never_notifies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tickets = vec![ticket("IT-1", "2025-07-22")];
        seed_snapshot(temp.path(), "current", &tickets);

        let mut orchestrator =
            orchestrator(temp.path(), tickets, MockPublisher::default(), Delivery::Deliver);
        let report = orchestrator.run(options(RunMode::Current)).expect("run");

        assert!(matches!(report.outcome, RunOutcome::Published(_)));
        assert_eq!(report.notification, NotificationStatus::NoChanges);
        let (_, publisher, notifier, _) = orchestrator.into_parts();
        assert_eq!(publisher.lookups, 1);
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn force_update_bypasses_the_short_circuit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tickets = vec![ticket("IT-1", "2025-07-22")];
        seed_snapshot(temp.path(), "current", &tickets);

        let mut orchestrator =
            orchestrator(temp.path(), tickets, MockPublisher::default(), Delivery::Deliver);
        let report = orchestrator
            .run(RunOptions {
                force_update: true,
                ..options(RunMode::Update)
            })
            .expect("run");
        assert!(matches!(report.outcome, RunOutcome::Published(_)));
        let (_, _, notifier, _) = orchestrator.into_parts();
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn publish_failure_leaves_state_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_snapshot(temp.path(), "current", &[ticket("IT-1", "2025-07-21")]);
        let snapshot_path = config(temp.path()).snapshot_path("current");
        let before = fs::read_to_string(&snapshot_path).expect("read seed");

        let mut orchestrator = orchestrator(
            temp.path(),
            vec![ticket("IT-1", "2025-07-22")],
            MockPublisher {
                fail: true,
                ..MockPublisher::default()
            },
            Delivery::Deliver,
        );
        let error = orchestrator.run(options(RunMode::Update)).expect_err("must fail");
        assert!(format!("{error:#}").contains("wiki unavailable"));

        assert_eq!(fs::read_to_string(&snapshot_path).expect("read"), before);
        assert!(!config(temp.path()).fingerprints_path("current").exists());
        let (_, _, notifier, _) = orchestrator.into_parts();
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn same_change_set_is_notified_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let previous = vec![ticket("IT-1", "2025-07-21")];
        let current = vec![ticket("IT-1", "2025-07-22")];

        seed_snapshot(temp.path(), "current", &previous);
        let mut first = orchestrator(
            temp.path(),
            current.clone(),
            MockPublisher::default(),
            Delivery::Deliver,
        );
        let report = first.run(options(RunMode::Update)).expect("first run");
        assert_eq!(report.diff.updated.len(), 1);
        assert_eq!(report.notification, NotificationStatus::Sent);
        let (_, publisher, notifier, _) = first.into_parts();
        assert_eq!(notifier.attempts.len(), 1);

        seed_snapshot(temp.path(), "current", &previous);
        let mut second = orchestrator(temp.path(), current, publisher, Delivery::Deliver);
        let report = second.run(options(RunMode::Update)).expect("second run");
        assert_eq!(report.notification, NotificationStatus::Duplicate);
        let (_, _, notifier, _) = second.into_parts();
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn updated_page_sends_change_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_snapshot(temp.path(), "current", &[ticket("IT-1", "2025-07-21")]);
        let mut publisher = MockPublisher::default();
        publisher.pages.insert(
            "7월 4째주: (07/21~07/27)".to_string(),
            PageInfo {
                id: "77".to_string(),
                body: "<p>old</p>".to_string(),
            },
        );

        let mut orchestrator = orchestrator(
            temp.path(),
            vec![ticket("IT-1", "2025-07-22"), ticket("IT-2", "2025-07-23")],
            publisher,
            Delivery::Deliver,
        );
        let report = orchestrator.run(options(RunMode::Update)).expect("run");
        assert_eq!(
            report.outcome,
            RunOutcome::Published(PublishOutcome::Updated("77".to_string()))
        );
        let (_, _, notifier, _) = orchestrator.into_parts();
        assert!(notifier.attempts[0].starts_with("📊 배포 일정 리포트가 업데이트되었습니다:"));
        assert!(notifier.attempts[0].contains("➕ 추가: 1개 | 🔄 갱신: 1개"));
    }

    #[test]
    fn failed_notification_still_persists_snapshot_and_stays_eligible() {
        let temp = tempfile::tempdir().expect("tempdir");
        let previous = vec![ticket("IT-1", "2025-07-21")];
        let current = vec![ticket("IT-1", "2025-07-22")];
        seed_snapshot(temp.path(), "current", &previous);

        let mut failing = orchestrator(
            temp.path(),
            current.clone(),
            MockPublisher::default(),
            Delivery::Fail,
        );
        let report = failing.run(options(RunMode::Update)).expect("run");
        assert!(matches!(report.notification, NotificationStatus::Failed(_)));
        assert!(report.snapshot_written);
        assert_eq!(
            stored_snapshot(temp.path(), "current").expect("persisted")[0].scheduled_date,
            "2025-07-22"
        );
        let (_, publisher, _, _) = failing.into_parts();

        seed_snapshot(temp.path(), "current", &previous);
        let mut retry = orchestrator(temp.path(), current, publisher, Delivery::Deliver);
        let report = retry.run(options(RunMode::Update)).expect("retry");
        assert_eq!(report.notification, NotificationStatus::Sent);
    }

    #[test]
    fn gated_notification_is_not_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut orchestrator = orchestrator(
            temp.path(),
            vec![ticket("IT-1", "2025-07-22")],
            MockPublisher::default(),
            Delivery::Decline,
        );
        let report = orchestrator.run(options(RunMode::Current)).expect("run");
        assert_eq!(report.notification, NotificationStatus::Gated);
        let store = JsonSetStore::new(config(temp.path()).fingerprints_path("current"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn mute_runs_detection_publish_and_persist_without_sending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tickets = vec![ticket("IT-1", "2025-07-22")];
        tickets[0].links.push(TicketLink {
            direction: LinkDirection::DeployedBy,
            key: "DEP-1".to_string(),
            status: "Open".to_string(),
            summary: "deploy".to_string(),
        });
        let mut orchestrator =
            orchestrator(temp.path(), tickets, MockPublisher::default(), Delivery::Deliver);
        let report = orchestrator
            .run(RunOptions {
                mute: true,
                ..options(RunMode::Current)
            })
            .expect("run");
        assert_eq!(report.notification, NotificationStatus::Muted);
        assert_eq!(report.deploy_alerts_sent, 0);
        assert!(report.fingerprint.is_some());
        assert!(report.snapshot_written);
        let (_, _, notifier, _) = orchestrator.into_parts();
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn fetch_failure_publishes_an_empty_page() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed_snapshot(temp.path(), "current", &[ticket("IT-1", "2025-07-21")]);
        let mut orchestrator = Orchestrator::new(
            config(temp.path()),
            MockFetcher {
                fail: true,
                ..MockFetcher::default()
            },
            MockPublisher::default(),
            MockNotifier::new(Delivery::Deliver),
            NameDirectory,
        )
        .expect("orchestrator");
        let report = orchestrator.run(options(RunMode::Update)).expect("run");
        assert_eq!(report.ticket_count, 0);
        assert_eq!(report.diff.removed.len(), 1);
        assert!(matches!(report.outcome, RunOutcome::Published(_)));
        assert_eq!(stored_snapshot(temp.path(), "current"), Some(Vec::new()));
    }

    #[test]
    fn new_deploy_tickets_alert_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut tickets = vec![ticket("IT-1", "2025-07-22")];
        tickets[0].links.push(TicketLink {
            direction: LinkDirection::DeployedBy,
            key: "DEP-1".to_string(),
            status: "Open".to_string(),
            summary: "deploy".to_string(),
        });

        let mut first = orchestrator(
            temp.path(),
            tickets.clone(),
            MockPublisher::default(),
            Delivery::Deliver,
        );
        let report = first.run(options(RunMode::Current)).expect("first run");
        assert_eq!(report.deploy_alerts_sent, 1);
        let (_, publisher, notifier, _) = first.into_parts();
        assert_eq!(notifier.attempts.len(), 2);
        assert!(notifier.attempts[1].starts_with("김담당님, 담당 IT티켓에 새로운 배포 티켓이 생성되었습니다."));

        let mut second = orchestrator(temp.path(), tickets, publisher, Delivery::Deliver);
        let report = second.run(options(RunMode::Current)).expect("second run");
        assert_eq!(report.deploy_alerts_sent, 0);
        let (_, _, notifier, _) = second.into_parts();
        assert!(notifier.attempts.is_empty());
    }

    #[test]
    fn modes_keep_separate_state_slots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut orchestrator = orchestrator(
            temp.path(),
            vec![ticket("IT-9", "2025-07-29")],
            MockPublisher::default(),
            Delivery::Deliver,
        );
        let report = orchestrator.run(options(RunMode::Create)).expect("run");
        assert_eq!(report.window.label, "7월 5째주: (07/28~08/03)");
        assert!(stored_snapshot(temp.path(), "create").is_some());
        assert!(stored_snapshot(temp.path(), "current").is_none());
    }
}
