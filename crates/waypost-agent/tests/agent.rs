use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use waypost_agent::{Agent, AgentError, AgentOptions, AgentState};
use waypost_core::Subscription;
use waypost_wire::{ChannelFabric, Delivery, InMemoryFabric, Message, Packet, PongData};

const REGISTRY: &str = "registry-id";

fn observe(fabric: &InMemoryFabric, channel: &str) -> mpsc::UnboundedReceiver<Delivery> {
    let (tx, rx) = mpsc::unbounded_channel();
    fabric.subscribe(channel, tx).unwrap();
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        packets.push(Packet::decode(&delivery.payload).unwrap());
    }
    packets
}

fn agent(fabric: &Arc<InMemoryFabric>) -> Agent {
    Agent::new(
        AgentOptions::new("foo")
            .with_prefix(Some("dev".into()))
            .subscribe(Subscription::new("bar")),
        fabric.clone(),
    )
}

fn approve(fabric: &InMemoryFabric, to: &str, id: &str) {
    let approval = Packet::approval(REGISTRY, to, id);
    fabric.publish("dev-gateway", &approval.encode().unwrap()).unwrap();
}

#[test]
fn register_announces_on_the_shared_channel() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut gateway = observe(&fabric, "dev-gateway");
    let mut agent = agent(&fabric);
    agent.register().unwrap();

    let sent = drain(&mut gateway);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].metadata.origin, agent.ephemeral_id());
    assert_eq!(sent[0].metadata.to, None);
    match &sent[0].message {
        Message::Register(data) => {
            assert_eq!(data.name, "foo");
            assert_eq!(data.prefix.as_deref(), Some("dev"));
            assert_eq!(data.subscribe_to, vec![Subscription::new("bar")]);
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn approval_for_someone_else_is_ignored() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();

    approve(&fabric, "another-agent", "U2");
    agent.process_pending().unwrap();
    assert_eq!(agent.state(), &AgentState::Pending);
    assert_eq!(fabric.subscriber_count("dev-U2"), 0);
}

#[test]
fn approval_adopts_the_private_channel() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    let registrations = agent.registrations();
    agent.register().unwrap();

    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();

    assert_eq!(
        agent.state(),
        &AgentState::Registered { id: "U1".to_string() }
    );
    assert_eq!(fabric.subscriber_count("dev-U1"), 1);
    assert_eq!(registrations.borrow().as_deref(), Some("U1"));

    approve(&fabric, agent.ephemeral_id(), "U3");
    agent.process_pending().unwrap();
    assert_eq!(agent.assigned_id(), Some("U1"));
    assert_eq!(fabric.subscriber_count("dev-U3"), 0);
}

#[test]
fn ping_gets_exactly_one_pong_with_the_same_interaction_id() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();

    let mut private = observe(&fabric, "dev-U1");
    let ping = Packet::ping(REGISTRY, "U1", "X");
    fabric.publish("dev-U1", &ping.encode().unwrap()).unwrap();
    agent.process_pending().unwrap();

    let pongs: Vec<Packet> = drain(&mut private)
        .into_iter()
        .filter(|p| matches!(p.message, Message::Pong(_)))
        .collect();
    assert_eq!(pongs.len(), 1);
    assert_eq!(pongs[0].metadata.origin, "U1");
    assert_eq!(pongs[0].metadata.to.as_deref(), Some(REGISTRY));
    assert_eq!(pongs[0].metadata.interaction_id.as_deref(), Some("X"));
    assert_eq!(
        pongs[0].message,
        Message::Pong(PongData {
            prefix: Some("dev".into())
        })
    );

    // Our own pong comes back on the channel and must not be answered.
    assert_eq!(agent.process_pending().unwrap(), 1);
    assert!(drain(&mut private).is_empty());
}

#[test]
fn ping_for_another_agent_is_not_answered() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();

    let mut private = observe(&fabric, "dev-U1");
    let ping = Packet::ping(REGISTRY, "U2", "X");
    fabric.publish("dev-U1", &ping.encode().unwrap()).unwrap();
    agent.process_pending().unwrap();

    assert_eq!(drain(&mut private).len(), 1);
}

#[test]
fn ping_without_interaction_id_is_not_answered() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();

    let mut private = observe(&fabric, "dev-U1");
    let ping = json!({"event": "ping", "data": {}, "metadata": {"origin": REGISTRY, "to": "U1"}});
    fabric.publish("dev-U1", &ping.to_string()).unwrap();
    agent.process_pending().unwrap();

    let sent = drain(&mut private);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message, Message::Ping);
}

#[test]
fn malformed_traffic_is_dropped() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    fabric.publish("dev-gateway", "][").unwrap();
    assert!(agent.process_pending().is_ok());
    assert_eq!(agent.state(), &AgentState::Pending);
}

#[test]
fn events_require_registration() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    assert!(matches!(
        agent.publish_event("foo", json!({})),
        Err(AgentError::NotRegistered)
    ));

    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();
    let mut private = observe(&fabric, "dev-U1");
    agent.publish_event("foo", json!({ "id": 7 })).unwrap();

    let sent = drain(&mut private);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].metadata.origin, "U1");
    assert_eq!(
        sent[0].message,
        Message::Event {
            name: "foo".into(),
            data: json!({ "id": 7 })
        }
    );
}

#[test]
fn shutdown_unsubscribes() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut agent = agent(&fabric);
    agent.register().unwrap();
    approve(&fabric, agent.ephemeral_id(), "U1");
    agent.process_pending().unwrap();

    agent.shutdown();
    assert_eq!(fabric.subscriber_count("dev-gateway"), 0);
    assert_eq!(fabric.subscriber_count("dev-U1"), 0);
}

#[tokio::test]
async fn wait_registered_resolves_on_approval() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mut gateway = observe(&fabric, "dev-gateway");
    let (handle, task) = waypost_agent::spawn(agent(&fabric)).unwrap();
    assert_eq!(handle.assigned_id(), None);

    let request = drain(&mut gateway).pop().unwrap();
    approve(&fabric, &request.metadata.origin, "U1");

    let id = tokio::time::timeout(Duration::from_secs(2), handle.wait_registered())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, "U1");
    assert_eq!(request.metadata.origin, handle.ephemeral_id());

    handle.shutdown();
    task.await.unwrap();
    assert!(matches!(
        handle.publish_event("foo", json!({})).await,
        Err(AgentError::Stopped)
    ));
}
