//! Registry contract, exercised against in-memory SQLite.

mod common;

use std::time::Duration;

use common::{env_at, now, registry};
use env_cleaner::models::environment::Deadline;
use env_cleaner::store::{Registry, StoreError};

const HOUR: i64 = 3_600;

mod write_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let reg = registry().await;
        let e = env_at("a", "alice", now() + HOUR);

        assert_eq!(reg.write_environments(&[e.clone()]).await.unwrap(), 1);
        assert_eq!(reg.write_environments(&[e.clone()]).await.unwrap(), 0);

        let all = reg.list_environments().await.unwrap();
        assert_eq!(all, vec![e]);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let reg = registry().await;
        let first = env_at("a", "alice", now() + HOUR);
        let mut second = env_at("a", "bob", now() + 48 * HOUR);
        second.name = "renamed".into();

        reg.write_environments(&[first.clone()]).await.unwrap();
        reg.write_environments(&[second]).await.unwrap();

        assert_eq!(reg.get_environment("a").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let reg = registry().await;
        assert!(matches!(
            reg.get_environment("missing").await,
            Err(StoreError::NotFound(id)) if id == "missing"
        ));
    }
}

mod deadline_tests {
    use super::*;

    #[tokio::test]
    async fn test_extend_is_anchored_on_stored_deadline() {
        let reg = registry().await;
        let d = now() + 24 * HOUR;
        reg.write_environments(&[env_at("a", "alice", d)]).await.unwrap();

        let extended = reg
            .extend_environment("a", Duration::from_secs(12 * 3_600))
            .await
            .unwrap();

        assert_eq!(extended.deadline.epoch(), d + 12 * HOUR);
        assert_eq!(
            extended.deadline,
            Deadline::from_epoch(d + 12 * HOUR).unwrap()
        );
        assert_eq!(reg.get_environment("a").await.unwrap(), extended);
    }

    #[tokio::test]
    async fn test_extensions_stack() {
        let reg = registry().await;
        let d = now() + HOUR;
        reg.write_environments(&[env_at("a", "alice", d)]).await.unwrap();

        reg.extend_environment("a", Duration::from_secs(3_600)).await.unwrap();
        let env = reg
            .extend_environment("a", Duration::from_secs(3_600))
            .await
            .unwrap();
        assert_eq!(env.deadline.epoch(), d + 2 * HOUR);
    }

    #[tokio::test]
    async fn test_extend_unknown_is_not_found() {
        let reg = registry().await;
        assert!(matches!(
            reg.extend_environment("missing", Duration::from_secs(60)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_and_outdated_partition() {
        let reg = registry().await;
        let t = now();
        reg.write_environments(&[
            env_at("past", "alice", t - HOUR),
            env_at("soon", "alice", t + HOUR),
            env_at("later", "alice", t + 72 * HOUR),
        ])
        .await
        .unwrap();

        let outdated: Vec<String> = reg
            .outdated_environments()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(outdated, vec!["past"]);

        let stale: Vec<String> = reg
            .stale_environments(Duration::from_secs(24 * 3_600))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(stale, vec!["soon"]);
    }

    #[tokio::test]
    async fn test_delete_environment() {
        let reg = registry().await;
        reg.write_environments(&[env_at("a", "alice", now())]).await.unwrap();

        assert!(reg.delete_environment("a").await.unwrap());
        assert!(!reg.delete_environment("a").await.unwrap());
        assert!(reg.list_environments().await.unwrap().is_empty());
    }
}

mod token_tests {
    use super::*;

    #[tokio::test]
    async fn test_one_live_token_per_environment() {
        let reg = registry().await;
        reg.write_environments(&[env_at("a", "alice", now() + HOUR)])
            .await
            .unwrap();

        let token = reg.issue_token("a").await.unwrap();
        assert!(matches!(
            reg.issue_token("a").await,
            Err(StoreError::TokenExists(_))
        ));
        assert_eq!(reg.get_token("a").await.unwrap(), Some(token));

        assert!(reg.delete_token("a").await.unwrap());
        assert_eq!(reg.get_token("a").await.unwrap(), None);
        reg.issue_token("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_token_requires_environment() {
        let reg = registry().await;
        assert!(matches!(
            reg.issue_token("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleting_environment_drops_token() {
        let reg = registry().await;
        reg.write_environments(&[env_at("a", "alice", now() + HOUR)])
            .await
            .unwrap();
        reg.issue_token("a").await.unwrap();

        reg.delete_environment("a").await.unwrap();
        assert_eq!(reg.get_token("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redeem_consumes_and_extends() {
        let reg = registry().await;
        let d = now() + HOUR;
        reg.write_environments(&[env_at("a", "alice", d)]).await.unwrap();
        let token = reg.issue_token("a").await.unwrap();

        let env = reg
            .redeem_token("a", &token.token, Duration::from_secs(3_600))
            .await
            .unwrap();
        assert_eq!(env.deadline.epoch(), d + HOUR);
        assert_eq!(reg.get_token("a").await.unwrap(), None);

        assert!(matches!(
            reg.redeem_token("a", &token.token, Duration::from_secs(3_600))
                .await,
            Err(StoreError::TokenRejected(_))
        ));
        assert_eq!(reg.get_environment("a").await.unwrap().deadline.epoch(), d + HOUR);
    }

    #[tokio::test]
    async fn test_redeem_with_wrong_token_changes_nothing() {
        let reg = registry().await;
        let d = now() + HOUR;
        reg.write_environments(&[env_at("a", "alice", d)]).await.unwrap();
        let token = reg.issue_token("a").await.unwrap();

        assert!(matches!(
            reg.redeem_token("a", "not-the-token", Duration::from_secs(60))
                .await,
            Err(StoreError::TokenRejected(_))
        ));
        assert_eq!(reg.get_token("a").await.unwrap(), Some(token));
        assert_eq!(reg.get_environment("a").await.unwrap().deadline.epoch(), d);
    }

    #[tokio::test]
    async fn test_concurrent_redeems_extend_once() {
        let reg = registry().await;
        let d = now() + HOUR;
        reg.write_environments(&[env_at("a", "alice", d)]).await.unwrap();
        let token = reg.issue_token("a").await.unwrap();
        let period = Duration::from_secs(6 * 3_600);

        let (first, second) = tokio::join!(
            reg.redeem_token("a", &token.token, period),
            reg.redeem_token("a", &token.token, period),
        );

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(
            matches!(first, Err(StoreError::TokenRejected(_)))
                || matches!(second, Err(StoreError::TokenRejected(_)))
        );
        assert_eq!(
            reg.get_environment("a").await.unwrap().deadline.epoch(),
            d + 6 * HOUR
        );
    }
}
