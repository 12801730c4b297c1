use std::time::Duration;

use padron_core::job::{EnqueueRequest, JobStatus};
use padron_core::job_queue::JobQueue;
use padron_db::LookupJobRepository;

use crate::common::setup_test_db;

#[tokio::test]
async fn enqueue_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let requester = uuid::Uuid::new_v4();
    let job = repo
        .enqueue(
            EnqueueRequest::new("V-12345678")
                .with_requested_by(requester)
                .with_priority(2),
        )
        .await
        .unwrap();

    assert_eq!(job.citizen_id, "V-12345678");
    assert_eq!(job.requested_by, Some(requester));
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.priority, 2);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert!(job.result.is_none());
    assert!(job.completed_at.is_none());
}

#[tokio::test]
async fn enqueue_with_custom_max_attempts() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let job = repo
        .enqueue(EnqueueRequest::new("V-12345678").with_max_attempts(10))
        .await
        .unwrap();

    assert_eq!(job.max_attempts, 10);
}

#[tokio::test]
async fn claim_sets_processing_and_increments_attempts() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();

    let claimed = repo.claim_batch(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, JobStatus::Processing);
    assert_eq!(claimed[0].attempts, 1);
}

#[tokio::test]
async fn claim_returns_empty_when_no_queued_jobs() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let claimed = repo.claim_batch(10).await.unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn claim_skips_processing_jobs() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();

    let first = repo.claim_batch(10).await.unwrap();
    assert_eq!(first.len(), 1);

    // Already processing: the next poll cycle cannot claim it again.
    let second = repo.claim_batch(10).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let low_old = repo
        .enqueue(EnqueueRequest::new("V-00000001"))
        .await
        .unwrap();
    let low_new = repo
        .enqueue(EnqueueRequest::new("V-00000002"))
        .await
        .unwrap();
    let urgent = repo
        .enqueue(EnqueueRequest::new("V-00000003").with_priority(5))
        .await
        .unwrap();

    let claimed = repo.claim_batch(10).await.unwrap();
    let ids: Vec<_> = claimed.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![urgent.id, low_old.id, low_new.id]);
}

#[tokio::test]
async fn claim_respects_batch_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    for n in 0..5 {
        repo.enqueue(EnqueueRequest::new(format!("V-0000000{n}")))
            .await
            .unwrap();
    }

    let claimed = repo.claim_batch(3).await.unwrap();
    assert_eq!(claimed.len(), 3);
    assert_eq!(
        repo.count_by_status(JobStatus::Queued).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn claim_honors_next_attempt_at() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let job = repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();
    repo.claim_batch(10).await.unwrap();

    // Requeued with a future next_attempt_at: not claimable yet.
    let later = chrono::Utc::now() + chrono::TimeDelta::minutes(5);
    repo.requeue_job(job.id, "temporary error", Some(later))
        .await
        .unwrap();
    assert!(repo.claim_batch(10).await.unwrap().is_empty());

    // Requeued with a past next_attempt_at: claimable again.
    let earlier = chrono::Utc::now() - chrono::TimeDelta::minutes(5);
    repo.requeue_job(job.id, "temporary error", Some(earlier))
        .await
        .unwrap();
    let claimed = repo.claim_batch(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 2);
}

#[tokio::test]
async fn complete_job_stores_result_and_metrics() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let job = repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();
    repo.claim_batch(10).await.unwrap();

    let result = serde_json::json!({"name": "MARIA PEREZ", "state": "MIRANDA"});
    repo.complete_job(job.id, &result, Duration::from_millis(4200), Some(0.003))
        .await
        .unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Done);
    assert_eq!(updated.result, Some(result));
    assert_eq!(updated.duration_ms, Some(4200));
    assert_eq!(updated.cost, Some(0.003));
    assert!(updated.completed_at.is_some());
    assert!(updated.last_error.is_none());
}

#[tokio::test]
async fn requeue_job_reverts_to_queued_with_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let job = repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();
    repo.claim_batch(10).await.unwrap();

    repo.requeue_job(job.id, "captcha rejected", None)
        .await
        .unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Queued);
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.last_error.as_deref(), Some("captcha rejected"));
    assert!(updated.completed_at.is_none());
}

#[tokio::test]
async fn fail_job_is_terminal() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    let job = repo.enqueue(EnqueueRequest::new("V-12345678")).await.unwrap();
    repo.claim_batch(10).await.unwrap();

    repo.fail_job(job.id, "registry unreachable", Duration::from_secs(61))
        .await
        .unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert_eq!(updated.last_error.as_deref(), Some("registry unreachable"));
    assert_eq!(updated.duration_ms, Some(61_000));
    assert!(updated.completed_at.is_some());

    // Terminal jobs are never claimed again.
    assert!(repo.claim_batch(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_jobs_with_status_filter() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    repo.enqueue(EnqueueRequest::new("V-00000001")).await.unwrap();
    repo.enqueue(EnqueueRequest::new("V-00000002")).await.unwrap();
    repo.claim_batch(1).await.unwrap();

    let queued = repo.list_jobs(Some(JobStatus::Queued), 10).await.unwrap();
    assert_eq!(queued.len(), 1);

    let processing = repo
        .list_jobs(Some(JobStatus::Processing), 10)
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);

    let all = repo.list_jobs(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn count_by_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = LookupJobRepository::new(pool);

    for n in 0..3 {
        repo.enqueue(EnqueueRequest::new(format!("V-0000000{n}")))
            .await
            .unwrap();
    }

    assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 3);
    assert_eq!(repo.count_by_status(JobStatus::Done).await.unwrap(), 0);
}
