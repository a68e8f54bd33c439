use super::common::*;
use crate::workflows::hiring::domain::{
    AgentKind, ApplicationStatus, BiasVerdict, PipelineStage, StagePointer,
};
use crate::workflows::hiring::events::EventChannel;
use crate::workflows::hiring::gateway::GatewayError;
use crate::workflows::hiring::repository::{ApplicationRepository, CredentialRepository};
use crate::workflows::hiring::service::AdvanceOutcome;
use crate::workflows::hiring::stage::PipelineConfig;

#[tokio::test]
async fn below_threshold_nothing_is_claimed() {
    let (service, store, gateway, _publisher) = build_service(test_config());

    let record = service.register(intake("app-b1")).expect("registers");
    advance_to_bias(&service, &record.application_id).await;

    // One eligible application against a batch size of two.
    let outcome = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(outcome.claimed, 0);
    assert!(outcome.completed.is_empty());
    assert_eq!(gateway.call_count(AgentKind::Bias), 0);

    let stored = store
        .fetch(&record.application_id)
        .expect("fetch succeeds")
        .expect("record present");
    assert!(stored.bias_eligible, "application stays queued");
}

#[tokio::test]
async fn full_batch_processes_every_member_once() {
    let (service, store, gateway, _publisher) = build_service(test_config());

    let first = service.register(intake("app-b2")).expect("registers");
    let second = service.register(intake("app-b3")).expect("registers");
    let third = service.register(intake("app-b4")).expect("registers");
    for id in [
        &first.application_id,
        &second.application_id,
        &third.application_id,
    ] {
        advance_to_bias(&service, id).await;
    }

    // Three eligible at a threshold of two: the whole queue drains at once.
    let outcome = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(outcome.claimed, 3);
    assert_eq!(outcome.completed.len(), 3);
    assert_eq!(gateway.call_count(AgentKind::Bias), 3);

    for id in [
        &first.application_id,
        &second.application_id,
        &third.application_id,
    ] {
        let credential = store
            .latest_credential(id)
            .expect("query succeeds")
            .expect("credential present");
        assert_eq!(
            credential.document.current_stage,
            StagePointer::Next(PipelineStage::Matching)
        );
        assert_eq!(credential.document.status, ApplicationStatus::InReview);
    }

    // A second trigger finds an empty queue; nobody is reviewed twice.
    let rerun = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(rerun.claimed, 0);
    assert_eq!(gateway.call_count(AgentKind::Bias), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_triggers_split_the_queue_without_overlap() {
    let config = PipelineConfig {
        bias_batch_size: 10,
        ..test_config()
    };
    let (service, store, gateway, _publisher) = build_service(config);

    let mut ids = Vec::new();
    for n in 0..10 {
        let record = service
            .register(intake(&format!("app-b6-{n}")))
            .expect("registers");
        advance_to_bias(&service, &record.application_id).await;
        ids.push(record.application_id);
    }

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.run_bias_batch().await }
    });
    let second = tokio::spawn({
        let service = service.clone();
        async move { service.run_bias_batch().await }
    });
    let first = first.await.expect("task joins").expect("batch runs");
    let second = second.await.expect("task joins").expect("batch runs");

    // The claim is atomic, so the two triggers partition the queue and no
    // member is reviewed twice.
    assert_eq!(first.claimed + second.claimed, 10);
    assert_eq!(gateway.call_count(AgentKind::Bias), 10);

    let mut reviewed: Vec<_> = first
        .completed
        .iter()
        .chain(second.completed.iter())
        .cloned()
        .collect();
    reviewed.sort_by(|a, b| a.0.cmp(&b.0));
    let mut expected = ids.clone();
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(reviewed, expected);

    for id in &ids {
        let credential = store
            .latest_credential(id)
            .expect("query succeeds")
            .expect("credential present");
        assert_eq!(
            credential.document.current_stage,
            StagePointer::Next(PipelineStage::Matching)
        );
    }
}

#[tokio::test]
async fn parking_twice_queues_once() {
    let (service, _store, gateway, _publisher) = build_service(test_config());

    let record = service.register(intake("app-b5")).expect("registers");
    advance_to_bias(&service, &record.application_id).await;
    let again = service
        .advance(&record.application_id)
        .await
        .expect("repeat parking succeeds");
    assert!(matches!(again, AdvanceOutcome::AwaitingBiasBatch(_)));
    assert_eq!(gateway.call_count(AgentKind::Bias), 0);
}

#[tokio::test]
async fn flagged_verdict_alerts_but_still_proceeds() {
    let config = PipelineConfig {
        bias_batch_size: 1,
        ..test_config()
    };
    let (service, _store, gateway, publisher) = build_service(config);
    gateway.respond_with(AgentKind::Bias, bias_response(BiasVerdict::Flagged));

    let record = service.register(intake("app-flagged")).expect("registers");
    advance_to_bias(&service, &record.application_id).await;

    let outcome = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(outcome.completed, vec![record.application_id.clone()]);

    let alerts = publisher.on_channel(EventChannel::BiasAlert);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].payload["verdict"], "flagged");

    // Advisory, not blocking: matching is next.
    let next = service
        .advance(&record.application_id)
        .await
        .expect("matching completes");
    assert_eq!(
        next.credential().document.current_stage,
        StagePointer::Next(PipelineStage::CredentialIssuance)
    );
}

#[tokio::test]
async fn clear_verdict_publishes_no_alert() {
    let config = PipelineConfig {
        bias_batch_size: 1,
        ..test_config()
    };
    let (service, _store, _gateway, publisher) = build_service(config);

    let record = service.register(intake("app-clear")).expect("registers");
    advance_to_bias(&service, &record.application_id).await;
    service.run_bias_batch().await.expect("batch runs");

    assert!(publisher.on_channel(EventChannel::BiasAlert).is_empty());
}

#[tokio::test]
async fn failed_member_is_requeued_for_the_next_batch() {
    let config = PipelineConfig {
        bias_batch_size: 1,
        ..test_config()
    };
    let (service, store, gateway, _publisher) = build_service(config);

    let record = service.register(intake("app-requeue")).expect("registers");
    let id = record.application_id.clone();
    advance_to_bias(&service, &id).await;

    // Exhaust the retry budget for this batch run only.
    for _ in 0..3 {
        gateway.enqueue(
            AgentKind::Bias,
            Err(GatewayError::Timeout {
                agent: AgentKind::Bias,
                application_id: id.clone(),
                timeout_seconds: 60,
            }),
        );
    }

    let outcome = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(outcome.claimed, 1);
    assert!(outcome.completed.is_empty());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, id);

    let stored = store
        .fetch(&id)
        .expect("fetch succeeds")
        .expect("record present");
    assert!(stored.bias_eligible, "failed member re-queued");

    // The fixed clear response serves the next run.
    let rerun = service.run_bias_batch().await.expect("batch runs");
    assert_eq!(rerun.completed, vec![id]);
}
