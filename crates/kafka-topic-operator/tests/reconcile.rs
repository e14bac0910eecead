//! Controller behaviour against in-memory collaborators

mod common;

use common::*;
use kafka_topic_operator::controller::Trigger;
use kafka_topic_operator::crd::KafkaTopicSpec;
use kafka_topic_operator::error::OperatorError;
use kafka_topic_operator::reconcile::Decision;
use kafka_topic_operator::topic::ResourceName;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Send `triggers`, close the channel and run the loop until it drains
async fn drive(h: &Harness, triggers: Vec<Trigger>) {
    let (tx, rx) = mpsc::channel(16);
    for trigger in triggers {
        tx.send(trigger).await.unwrap();
    }
    drop(tx);
    h.operator().run(rx).await;
}

fn added(n: &str) -> Trigger {
    Trigger::ResourceAdded {
        topic: name(n),
        resource: ResourceName::new(n),
    }
}

#[tokio::test]
async fn test_converged_sides_only_record_the_snapshot() {
    let h = Harness::new();
    let k8s = managed(topic("orders", 3, 2, &[]));
    h.k8s.insert(&k8s);
    h.kafka.insert(topic("orders", 3, 2, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::RecordConverged));
    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.mutations().is_empty());

    let stored = h.stored("orders").await.unwrap();
    assert_eq!(stored.partitions(), 3);
    assert_eq!(stored.replication_factor(), 2);

    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(phase(&resource).as_deref(), Some("Ready"));
}

#[tokio::test]
async fn test_partition_increase_propagates_to_kafka() {
    let h = Harness::new();
    let base = managed(topic("orders", 3, 1, &[]));
    h.store_topic(&base).await;
    h.k8s.insert(&managed(topic("orders", 5, 1, &[])));
    h.kafka.insert(topic("orders", 3, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::Merge));
    assert_eq!(h.kafka.calls(), vec!["increase_partitions orders"]);
    assert_eq!(h.kafka.get("orders").unwrap().partitions(), 5);
    assert_eq!(h.stored("orders").await.unwrap().partitions(), 5);
}

#[tokio::test]
async fn test_partition_decrease_is_rejected_without_broker_calls() {
    let h = Harness::new();
    let base = managed(topic("orders", 3, 1, &[]));
    h.store_topic(&base).await;
    h.k8s.insert(&managed(topic("orders", 2, 1, &[])));
    h.kafka.insert(topic("orders", 3, 1, &[]));

    let err = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap_err();

    assert!(matches!(err, OperatorError::PartitionDecrease { from: 3, to: 2, .. }));
    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.mutations().is_empty());
    assert_eq!(h.k8s.warning_reasons(), vec!["PartitionDecrease"]);
    assert_eq!(h.stored("orders").await.unwrap().partitions(), 3);

    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(phase(&resource).as_deref(), Some("NotReady"));
}

#[tokio::test]
async fn test_new_kafka_topic_gets_a_resource() {
    let h = Harness::new();
    h.kafka.insert(topic("orders", 1, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::CreateResource));
    assert_eq!(h.k8s.mutations(), vec!["create orders"]);

    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(resource.spec.partitions, 1);
    assert_eq!(resource.spec.replicas, 1);
    assert!(predicate().matches(resource.metadata.labels.as_ref().unwrap()));

    assert!(h.stored("orders").await.is_some());
    assert!(h.kafka.calls().is_empty());
}

#[tokio::test]
async fn test_conflicting_edits_fail_without_mutation() {
    let h = Harness::new();
    let base = managed(topic("orders", 1, 1, &[("a", "1")]));
    h.store_topic(&base).await;
    h.k8s.insert(&managed(topic("orders", 1, 1, &[("a", "2")])));
    h.kafka.insert(topic("orders", 1, 1, &[("a", "3")]));

    let err = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap_err();

    assert!(matches!(err, OperatorError::Conflict { .. }));
    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.mutations().is_empty());
    assert_eq!(h.k8s.warning_reasons(), vec!["ConflictingChanges"]);

    assert_eq!(h.stored("orders").await.unwrap().config()["a"], "1");
    assert_eq!(h.kafka.get("orders").unwrap().config()["a"], "3");
    assert_eq!(h.k8s.resource("orders").unwrap().spec.config["a"], "2");
}

#[tokio::test]
async fn test_disjoint_edits_are_merged() {
    let h = Harness::new();
    let base = managed(topic("orders", 1, 1, &[("a", "1")]));
    h.store_topic(&base).await;
    h.k8s.insert(&managed(topic("orders", 4, 1, &[("a", "1")])));
    h.kafka.insert(topic("orders", 1, 1, &[("a", "1"), ("b", "2")]));

    h.operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(h.kafka.calls(), vec!["increase_partitions orders"]);
    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(resource.spec.partitions, 4);
    assert_eq!(resource.spec.config["b"], "2");

    let stored = h.stored("orders").await.unwrap();
    assert_eq!(stored.partitions(), 4);
    assert_eq!(stored.config().len(), 2);
}

#[tokio::test]
async fn test_broker_partition_growth_flows_to_resource() {
    let h = Harness::new();
    h.store_topic(&managed(topic("orders", 3, 1, &[]))).await;
    h.k8s.insert(&managed(topic("orders", 3, 1, &[])));
    h.kafka.insert(topic("orders", 5, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::Merge));
    assert!(h.kafka.calls().is_empty());
    assert_eq!(h.k8s.mutations(), vec!["update orders"]);
    assert_eq!(h.k8s.resource("orders").unwrap().spec.partitions, 5);
    assert_eq!(h.stored("orders").await.unwrap().partitions(), 5);
}

#[tokio::test]
async fn test_broker_replication_change_flows_to_resource() {
    let h = Harness::new();
    h.store_topic(&managed(topic("orders", 3, 1, &[]))).await;
    h.k8s.insert(&managed(topic("orders", 3, 1, &[])));
    h.kafka.insert(topic("orders", 3, 3, &[]));

    h.operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.warning_reasons().is_empty());
    assert_eq!(h.k8s.resource("orders").unwrap().spec.replicas, 3);
    assert_eq!(h.stored("orders").await.unwrap().replication_factor(), 3);
}

#[tokio::test]
async fn test_broker_config_removal_clears_resource_key() {
    let h = Harness::new();
    h.store_topic(&managed(topic("orders", 3, 1, &[("retention.ms", "1000")])))
        .await;
    h.k8s
        .insert(&managed(topic("orders", 3, 1, &[("retention.ms", "1000")])));
    h.kafka.insert(topic("orders", 3, 1, &[]));

    h.operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.resource("orders").unwrap().spec.config.is_empty());
    assert!(h.stored("orders").await.unwrap().config().is_empty());
}

#[tokio::test]
async fn test_unsupported_replication_change_keeps_stored_record() {
    let h = Harness::new();
    let base = managed(topic("orders", 1, 1, &[]));
    h.store_topic(&base).await;
    h.k8s.insert(&managed(topic("orders", 1, 3, &[])));
    h.kafka.insert(topic("orders", 1, 1, &[]));

    let err = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "UnsupportedChange");
    assert_eq!(h.kafka.calls(), vec!["change_replication_factor orders"]);
    assert!(h.k8s.mutations().is_empty());
    assert_eq!(h.stored("orders").await.unwrap().replication_factor(), 1);
}

#[tokio::test]
async fn test_kafka_wins_when_sides_differ_without_history() {
    let h = Harness::new();
    h.k8s.insert(&managed(topic("orders", 3, 1, &[])));
    h.kafka.insert(topic("orders", 6, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::KafkaWins));
    assert!(h.kafka.calls().is_empty());
    assert_eq!(h.k8s.mutations(), vec!["update orders"]);
    assert_eq!(h.k8s.warning_reasons(), vec!["ResourceOverwritten"]);

    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(resource.spec.partitions, 6);
    assert!(predicate().matches(resource.metadata.labels.as_ref().unwrap()));
    assert_eq!(h.stored("orders").await.unwrap().partitions(), 6);
}

#[tokio::test]
async fn test_deleted_resource_deletes_kafka_topic() {
    let h = Harness::new();
    h.store_topic(&managed(topic("orders", 1, 1, &[]))).await;
    h.kafka.insert(topic("orders", 1, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::DeleteKafkaTopic));
    assert_eq!(h.kafka.calls(), vec!["delete orders"]);
    assert!(h.kafka.get("orders").is_none());
    assert!(h.stored("orders").await.is_none());
}

#[tokio::test]
async fn test_deleted_kafka_topic_deletes_resource() {
    let h = Harness::new();
    let t = managed(topic("orders", 1, 1, &[]));
    h.store_topic(&t).await;
    h.k8s.insert(&t);

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, Some(Decision::DeleteResource));
    assert_eq!(h.k8s.calls(), vec!["delete orders"]);
    assert!(h.k8s.resource("orders").is_none());
    assert!(h.stored("orders").await.is_none());
}

#[tokio::test]
async fn test_unavailable_kafka_topic_keeps_resource() {
    let h = Harness::new();
    let t = managed(topic("orders", 1, 1, &[]));
    h.store_topic(&t).await;
    h.k8s.insert(&t);
    h.kafka.insert(topic("orders", 1, 1, &[]));
    h.kafka.make_unavailable("orders");

    let result = h.operator().reconcile(&name("orders"), None, "test").await;

    assert!(result.is_err());
    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.mutations().is_empty());
    assert!(h.k8s.resource("orders").is_some());
    assert!(h.stored("orders").await.is_some());
}

#[tokio::test]
async fn test_sweep_skips_unavailable_kafka_topic() {
    let h = Harness::new();
    let t = managed(topic("orders", 1, 1, &[]));
    h.store_topic(&t).await;
    h.k8s.insert(&t);
    h.kafka.insert(topic("orders", 1, 1, &[]));
    h.kafka.make_unavailable("orders");

    drive(&h, vec![Trigger::Sweep]).await;

    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.mutations().is_empty());
    assert!(h.stored("orders").await.is_some());
}

#[tokio::test]
async fn test_unmanaged_resource_is_left_alone() {
    let h = Harness::new();
    h.k8s.insert(&topic("orders", 1, 1, &[]));

    let decision = h
        .operator()
        .reconcile(&name("orders"), None, "test")
        .await
        .unwrap();

    assert_eq!(decision, None);
    assert!(h.kafka.calls().is_empty());
    assert!(h.k8s.calls().is_empty());
    assert!(h.stored("orders").await.is_none());
}

#[tokio::test]
async fn test_resource_with_override_reconciles_its_topic_name() {
    let h = Harness::new();
    h.k8s.insert_raw(
        "orders-v2",
        KafkaTopicSpec {
            topic_name: Some("Orders.V2".to_string()),
            partitions: 2,
            replicas: 1,
            config: BTreeMap::new(),
        },
        predicate().labels().clone(),
    );

    drive(
        &h,
        vec![Trigger::ResourceAdded {
            topic: name("Orders.V2"),
            resource: ResourceName::new("orders-v2"),
        }],
    )
    .await;

    assert_eq!(h.kafka.calls(), vec!["create Orders.V2"]);
    let stored = h.stored("Orders.V2").await.unwrap();
    assert_eq!(stored.resource_name().as_str(), "orders-v2");
}

#[tokio::test]
async fn test_duplicate_triggers_create_once() {
    let h = Harness::new();
    h.k8s.insert(&managed(topic("orders", 2, 1, &[])));

    drive(&h, vec![added("orders"), added("orders")]).await;

    assert_eq!(h.kafka.count("create"), 1);
    assert!(h.k8s.mutations().is_empty());
    assert_eq!(h.kafka.get("orders").unwrap().partitions(), 2);
    assert!(h.stored("orders").await.is_some());
}

#[tokio::test]
async fn test_create_race_is_followed_up() {
    let h = Harness::new();
    h.k8s.insert(&managed(topic("orders", 2, 1, &[])));
    h.kafka.lose_next_create_race();

    drive(&h, vec![added("orders")]).await;

    assert_eq!(h.kafka.count("create"), 1);
    assert_eq!(h.k8s.warning_reasons(), vec!["TopicCreateRace"]);
    assert!(h.stored("orders").await.is_some());

    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(phase(&resource).as_deref(), Some("Ready"));
}

#[tokio::test]
async fn test_sweep_reconciles_every_source() {
    let h = Harness::new();
    h.kafka.insert(topic("orders", 1, 1, &[]));
    h.kafka.insert(topic("__consumer_offsets", 50, 1, &[]));
    h.k8s.insert(&managed(topic("payments", 2, 1, &[])));
    h.store_topic(&managed(topic("invoices", 1, 1, &[]))).await;

    drive(&h, vec![Trigger::Sweep]).await;

    assert!(h.k8s.resource("orders").is_some());
    assert!(h.k8s.resource("consumer-offsets").is_none());
    assert_eq!(h.kafka.calls(), vec!["create payments"]);
    assert!(h.stored("orders").await.is_some());
    assert!(h.stored("payments").await.is_some());
    assert!(h.stored("invoices").await.is_none());
}

#[tokio::test]
async fn test_internal_topic_triggers_are_ignored() {
    let h = Harness::new();
    h.kafka.insert(topic("__consumer_offsets", 50, 1, &[]));

    drive(
        &h,
        vec![Trigger::KafkaTopicCreated(name("__consumer_offsets"))],
    )
    .await;

    assert!(h.k8s.calls().is_empty());
    assert!(h.stored("__consumer_offsets").await.is_none());
}

#[tokio::test]
async fn test_rejected_resource_gets_a_warning() {
    let h = Harness::new();
    h.k8s.insert_raw(
        "orders",
        KafkaTopicSpec {
            topic_name: Some("not valid".to_string()),
            partitions: 1,
            replicas: 1,
            config: BTreeMap::new(),
        },
        predicate().labels().clone(),
    );

    drive(
        &h,
        vec![Trigger::ResourceRejected {
            resource: ResourceName::new("orders"),
            reason: "invalid topic name".to_string(),
        }],
    )
    .await;

    assert_eq!(
        h.k8s.warnings(),
        vec![("orders".to_string(), "InvalidTopicName".to_string())]
    );
    assert!(h.kafka.calls().is_empty());
    let resource = h.k8s.resource("orders").unwrap();
    assert_eq!(phase(&resource).as_deref(), Some("NotReady"));
}
