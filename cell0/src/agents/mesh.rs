//! Agent mesh: registration, dispatch, messaging, fencing (spec §4.5).

use super::routing::{self, RoutingStrategy};
use super::{Agent, AgentResult, Intent};
use crate::error::{CellError, CellResult};
use crate::types::{AgentDescriptor, AgentStatus, CapabilityTag};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A fencing token handed to an agent's `handle` call (spec §4.5
/// "Fencing"): becomes invalid if the session's pipeline was superseded.
/// Long-running handlers must poll `is_valid` at yield points.
#[derive(Clone)]
pub struct Fence {
    generation: Arc<AtomicU64>,
    issued_at_generation: u64,
}

impl Fence {
    pub fn is_valid(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.issued_at_generation
    }
}

struct SessionFence {
    generation: Arc<AtomicU64>,
}

impl SessionFence {
    fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn issue(&self) -> Fence {
        Fence {
            generation: self.generation.clone(),
            issued_at_generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Supersede all outstanding fences for this session (e.g. a new intent
    /// preempted the in-flight one).
    fn supersede(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// An agent wrapped with the descriptor the mesh uses for routing. The
/// descriptor is copy-on-write: mutators (`set_load`, `set_status`) publish
/// a brand new `AgentDescriptor` rather than mutating one in place (spec
/// §5 "Agent descriptors are copy-on-write").
pub struct AgentHandle {
    pub agent: Arc<dyn Agent>,
    descriptor: arc_swap::ArcSwap<AgentDescriptor>,
}

mod arc_swap {
    //! Minimal copy-on-write cell, in the spirit of the `arc-swap` crate,
    //! implemented locally to avoid adding a dependency the teacher's stack
    //! doesn't carry.
    use std::sync::{Arc, RwLock};

    pub struct ArcSwap<T>(RwLock<Arc<T>>);

    impl<T> ArcSwap<T> {
        pub fn new(v: T) -> Self {
            Self(RwLock::new(Arc::new(v)))
        }

        pub fn load(&self) -> Arc<T> {
            self.0.read().unwrap().clone()
        }

        pub fn store(&self, v: T) {
            *self.0.write().unwrap() = Arc::new(v);
        }
    }
}

impl AgentHandle {
    pub fn descriptor(&self) -> Arc<AgentDescriptor> {
        self.descriptor.load()
    }

    pub fn set_load(&self, load_factor: f32) {
        let mut next = (*self.descriptor.load()).clone();
        next.load_factor = load_factor.clamp(0.0, 1.0);
        self.descriptor.store(next);
    }

    pub fn set_status(&self, status: AgentStatus) {
        let mut next = (*self.descriptor.load()).clone();
        next.status = status;
        self.descriptor.store(next);
    }
}

#[derive(Debug, Clone)]
pub struct MeshEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct AgentMesh {
    agents: DashMap<String, Arc<AgentHandle>>,
    fences: DashMap<String, Arc<SessionFence>>,
    round_robin_counters: DashMap<String, AtomicU64>,
    sticky_assignments: DashMap<String, String>,
    topics: DashMap<String, broadcast::Sender<MeshEvent>>,
}

impl AgentMesh {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            fences: DashMap::new(),
            round_robin_counters: DashMap::new(),
            sticky_assignments: DashMap::new(),
            topics: DashMap::new(),
        }
    }

    /// Registration (spec §4.5): duplicates in the same domain are allowed
    /// and participate in routing.
    pub fn register(&self, agent: Arc<dyn Agent>, descriptor: AgentDescriptor) {
        let id = descriptor.id.clone();
        let handle = Arc::new(AgentHandle {
            agent,
            descriptor: arc_swap::ArcSwap::new(descriptor),
        });
        self.agents.insert(id, handle);
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|e| (*e.value().descriptor()).clone())
            .collect()
    }

    fn fence_for(&self, session_id: &str) -> Arc<SessionFence> {
        self.fences
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionFence::new()))
            .clone()
    }

    /// Mark a session's in-flight fence superseded (e.g. a duplicate/newer
    /// intent preempted it). Long-running handlers observe this at their
    /// next `Fence::is_valid` check.
    pub fn supersede(&self, session_id: &str) {
        self.fence_for(session_id).supersede();
    }

    /// Route and dispatch an intent (spec §4.4 EXECUTE -> §4.5).
    pub async fn dispatch(
        &self,
        session_id: &str,
        capability: &CapabilityTag,
        intent: Intent,
        strategy: RoutingStrategy,
    ) -> CellResult<AgentResult> {
        let descriptors = self.descriptors();
        let seq = self
            .round_robin_counters
            .entry(capability.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);
        let sticky = self.sticky_assignments.get(session_id).map(|e| e.clone());

        let chosen = routing::select(
            strategy,
            &descriptors,
            capability,
            seq,
            sticky.as_deref(),
        )
        .ok_or_else(|| CellError::ProviderUnavailable(format!("no agent for {capability}")))?
        .clone();

        if strategy == RoutingStrategy::Sticky {
            self.sticky_assignments
                .insert(session_id.to_string(), chosen.id.clone());
        }

        let handle = self
            .agents
            .get(&chosen.id)
            .ok_or_else(|| CellError::NotFound(format!("agent {}", chosen.id)))?
            .clone();

        let fence = self.fence_for(session_id).issue();
        handle.agent.handle(intent, fence).await
    }

    /// Broadcast: all agents in a domain (spec §4.5 Messaging).
    pub async fn broadcast(
        &self,
        domain: crate::types::Domain,
        intent_template: &Intent,
    ) -> Vec<CellResult<AgentResult>> {
        let targets: Vec<Arc<AgentHandle>> = self
            .agents
            .iter()
            .filter(|e| e.value().descriptor().domain as u8 == domain as u8)
            .map(|e| e.value().clone())
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for handle in targets {
            let fence = self
                .fence_for(&intent_template.session_id)
                .issue();
            results.push(handle.agent.handle(intent_template.clone(), fence).await);
        }
        results
    }

    /// Multicast: fan-out to a named group of agent ids (spec §4.5).
    pub async fn multicast(
        &self,
        group: &[String],
        intent_template: &Intent,
    ) -> HashMap<String, CellResult<AgentResult>> {
        let mut results = HashMap::new();
        for agent_id in group {
            let Some(handle) = self.agents.get(agent_id).map(|e| e.clone()) else {
                results.insert(
                    agent_id.clone(),
                    Err(CellError::NotFound(format!("agent {agent_id}"))),
                );
                continue;
            };
            let fence = self.fence_for(&intent_template.session_id).issue();
            let result = handle.agent.handle(intent_template.clone(), fence).await;
            results.insert(agent_id.clone(), result);
        }
        results
    }

    /// Pub/sub: subscribe to a topic, receiving a bounded-buffer receiver.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<MeshEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    pub fn publish(&self, topic: &str, payload: serde_json::Value) {
        if let Some(sender) = self.topics.get(topic) {
            let _ = sender.send(MeshEvent {
                topic: topic.to_string(),
                payload,
            });
        }
    }
}

impl Default for AgentMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicBool;

    struct EchoAgent {
        id: String,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn id(&self) -> &str {
            &self.id
        }

        async fn handle(&self, intent: Intent, _fence: Fence) -> CellResult<AgentResult> {
            Ok(AgentResult {
                payload: intent.payload,
            })
        }
    }

    fn descriptor(id: &str) -> AgentDescriptor {
        let mut caps = BTreeSet::new();
        caps.insert(CapabilityTag::from("summarize"));
        AgentDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            domain: Domain::Research,
            capabilities: caps,
            priority: 1,
            load_factor: 0.0,
            status: AgentStatus::Online,
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_agent() {
        let mesh = AgentMesh::new();
        mesh.register(Arc::new(EchoAgent { id: "a1".into() }), descriptor("a1"));
        let intent = Intent {
            operation_id: "op-1".into(),
            session_id: "sess-1".into(),
            capability: "summarize".into(),
            payload: serde_json::json!({"ok": true}),
        };
        let result = mesh
            .dispatch("sess-1", &"summarize".into(), intent, RoutingStrategy::LeastLoaded)
            .await
            .unwrap();
        assert_eq!(result.payload, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn fence_invalidated_after_supersede() {
        let mesh = AgentMesh::new();
        mesh.register(Arc::new(EchoAgent { id: "a1".into() }), descriptor("a1"));
        let fence = mesh.fence_for("sess-1").issue();
        assert!(fence.is_valid());
        mesh.supersede("sess-1");
        assert!(!fence.is_valid());
    }

    #[tokio::test]
    async fn pubsub_delivers_published_event() {
        let mesh = AgentMesh::new();
        let mut rx = mesh.subscribe("topic-a");
        mesh.publish("topic-a", serde_json::json!({"x": 1}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn broadcast_reaches_all_agents_in_domain() {
        let mesh = AgentMesh::new();
        mesh.register(Arc::new(EchoAgent { id: "a1".into() }), descriptor("a1"));
        mesh.register(Arc::new(EchoAgent { id: "a2".into() }), descriptor("a2"));
        let intent = Intent {
            operation_id: "op-1".into(),
            session_id: "sess-1".into(),
            capability: "summarize".into(),
            payload: serde_json::json!({}),
        };
        let results = mesh.broadcast(Domain::Research, &intent).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        let _ = AtomicBool::new(false); // silence unused-import on some cfgs
    }
}
