//! Crawler, deleter and stale notifier against a fake platform.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{env_at, now, registry, FakeConnector, RecordingNotifier};
use env_cleaner::connector::ConnectorSet;
use env_cleaner::jobs::crawler::Crawler;
use env_cleaner::jobs::deleter::{Deleter, SweepReport};
use env_cleaner::jobs::stale::StaleNotifier;
use env_cleaner::metrics::Metrics;
use env_cleaner::store::Registry;

const HOUR: i64 = 3_600;

mod crawler_tests {
    use super::*;

    #[tokio::test]
    async fn test_crawl_persists_new_environments_only() {
        let reg = registry().await;
        let t = now();
        let platform = FakeConnector::with_inventory(vec![
            env_at("a", "alice", t + HOUR),
            env_at("b", "bob", t + HOUR),
        ]);
        let crawler = Crawler::new(platform.clone(), reg.clone(), Metrics::new().unwrap());

        assert_eq!(crawler.crawl().await.unwrap(), 2);
        assert_eq!(crawler.crawl().await.unwrap(), 0);
        assert_eq!(reg.list_environments().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_crawl_never_rewrites_known_environment() {
        let reg = registry().await;
        let original = env_at("a", "alice", now() + HOUR);
        reg.write_environments(&[original.clone()]).await.unwrap();

        let platform =
            FakeConnector::with_inventory(vec![env_at("a", "mallory", now() + 90 * 24 * HOUR)]);
        let crawler = Crawler::new(platform, reg.clone(), Metrics::new().unwrap());
        crawler.crawl().await.unwrap();

        assert_eq!(reg.get_environment("a").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_vanished_environment_stays_registered() {
        let reg = registry().await;
        let platform = FakeConnector::with_inventory(vec![env_at("a", "alice", now() + HOUR)]);
        let crawler = Crawler::new(platform.clone(), reg.clone(), Metrics::new().unwrap());
        crawler.crawl().await.unwrap();

        platform.inventory.lock().unwrap().clear();
        crawler.crawl().await.unwrap();

        assert!(reg.get_environment("a").await.is_ok());
    }
}

mod deleter_tests {
    use super::*;

    fn deleter(
        reg: Arc<dyn Registry>,
        platform: Arc<FakeConnector>,
        notifier: Arc<RecordingNotifier>,
        dry_run: bool,
    ) -> Deleter {
        Deleter::new(
            reg,
            ConnectorSet::new().with(platform),
            notifier,
            dry_run,
            Metrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_dry_run_announces_without_deleting() {
        let reg = registry().await;
        reg.write_environments(&[env_at("old", "alice", now() - HOUR)])
            .await
            .unwrap();
        let platform = FakeConnector::with_inventory(vec![]);
        let notifier = Arc::new(RecordingNotifier::default());

        let report = deleter(reg.clone(), platform.clone(), notifier.clone(), true)
            .sweep()
            .await
            .unwrap();

        assert!(platform.deleted().is_empty());
        assert!(reg.get_environment("old").await.is_ok());
        assert_eq!(notifier.deleted(), vec!["old".to_string()]);
        assert_eq!(
            report,
            SweepReport {
                outdated: 1,
                reclaimed: 1,
                announced: 1,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_sweep_deletes_outdated_only() {
        let reg = registry().await;
        let t = now();
        reg.write_environments(&[
            env_at("old", "alice", t - HOUR),
            env_at("fresh", "bob", t + HOUR),
        ])
        .await
        .unwrap();
        let platform = FakeConnector::with_inventory(vec![]);
        let notifier = Arc::new(RecordingNotifier::default());

        deleter(reg.clone(), platform.clone(), notifier.clone(), false)
            .sweep()
            .await
            .unwrap();

        assert_eq!(platform.deleted(), vec!["old".to_string()]);
        assert_eq!(notifier.deleted(), vec!["old".to_string()]);
        let left: Vec<String> = reg
            .list_environments()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(left, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_environment() {
        let reg = registry().await;
        let t = now();
        reg.write_environments(&[
            env_at("changed", "alice", t - 3 * HOUR),
            env_at("stuck", "bob", t - 2 * HOUR),
            env_at("ok", "carol", t - HOUR),
        ])
        .await
        .unwrap();
        let platform = FakeConnector::with_inventory(vec![]);
        platform.broken.lock().unwrap().insert("changed".into());
        platform.failing_deletes.lock().unwrap().insert("stuck".into());
        let notifier = Arc::new(RecordingNotifier::default());

        let report = deleter(reg.clone(), platform.clone(), notifier.clone(), false)
            .sweep()
            .await
            .unwrap();

        assert_eq!(report.outdated, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(platform.deleted(), vec!["ok".to_string()]);
        assert_eq!(notifier.deleted(), vec!["ok".to_string()]);
        assert!(reg.get_environment("changed").await.is_ok());
        assert!(reg.get_environment("stuck").await.is_ok());
        assert!(reg.get_environment("ok").await.is_err());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_deletion() {
        let reg = registry().await;
        reg.write_environments(&[env_at("old", "alice", now() - HOUR)])
            .await
            .unwrap();
        let platform = FakeConnector::with_inventory(vec![]);
        let notifier = Arc::new(RecordingNotifier {
            fail_deleted: true,
            ..RecordingNotifier::default()
        });

        let report = deleter(reg.clone(), platform.clone(), notifier, false)
            .sweep()
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.announced, 0);
        assert!(reg.get_environment("old").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_type_is_skipped() {
        let reg = registry().await;
        let mut orphan = env_at("vm-1", "alice", now() - HOUR);
        orphan.kind = "vsphere_vm".into();
        reg.write_environments(&[orphan]).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());

        let report = deleter(
            reg.clone(),
            FakeConnector::with_inventory(vec![]),
            notifier.clone(),
            false,
        )
        .sweep()
        .await
        .unwrap();

        assert_eq!(report.skipped, 1);
        assert!(notifier.deleted().is_empty());
        assert!(reg.get_environment("vm-1").await.is_ok());
    }
}

mod stale_tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(24 * 3_600);

    #[tokio::test]
    async fn test_issues_one_token_and_notifies_once() {
        let reg = registry().await;
        let t = now();
        reg.write_environments(&[
            env_at("soon", "alice", t + HOUR),
            env_at("later", "bob", t + 72 * HOUR),
        ])
        .await
        .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let job = StaleNotifier::new(reg.clone(), notifier.clone(), THRESHOLD, Metrics::new().unwrap());

        assert_eq!(job.check().await.unwrap(), 1);
        assert_eq!(job.check().await.unwrap(), 0);

        let sent = notifier.stale();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "soon");
        let live = reg.get_token("soon").await.unwrap().unwrap();
        assert_eq!(live.token, sent[0].1);
        assert_eq!(reg.get_token("later").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_delivery_withdraws_token() {
        let reg = registry().await;
        reg.write_environments(&[env_at("soon", "alice", now() + HOUR)])
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier {
            fail_stale: true,
            ..RecordingNotifier::default()
        });
        let job = StaleNotifier::new(reg.clone(), notifier, THRESHOLD, Metrics::new().unwrap());

        assert_eq!(job.check().await.unwrap(), 0);
        assert_eq!(reg.get_token("soon").await.unwrap(), None);
    }
}
