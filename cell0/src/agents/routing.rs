//! Routing strategies (spec §4.5).

use crate::types::{AgentDescriptor, AgentStatus, CapabilityTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    LeastLoaded,
    CapabilityPriority,
    RoundRobin,
    Random,
    /// Session-affinity: same session always routes to the same agent id
    /// once it has been assigned one.
    Sticky,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::LeastLoaded
    }
}

fn routable(candidates: &[AgentDescriptor], capability: &CapabilityTag) -> Vec<&AgentDescriptor> {
    candidates
        .iter()
        .filter(|a| a.status != AgentStatus::Offline && a.capabilities.contains(capability))
        .collect()
}

/// Select a single agent out of the candidate descriptors. `round_robin_seq`
/// is a monotonically increasing counter the caller advances per call so
/// round-robin has somewhere to keep its cursor without the mesh owning
/// per-capability state.
pub fn select<'a>(
    strategy: RoutingStrategy,
    candidates: &'a [AgentDescriptor],
    capability: &CapabilityTag,
    round_robin_seq: u64,
    sticky_agent_id: Option<&str>,
) -> Option<&'a AgentDescriptor> {
    let pool = routable(candidates, capability);
    if pool.is_empty() {
        return None;
    }

    match strategy {
        RoutingStrategy::LeastLoaded => pool.into_iter().min_by(|a, b| {
            a.load_factor
                .partial_cmp(&b.load_factor)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority.cmp(&a.priority))
        }),
        RoutingStrategy::CapabilityPriority => pool.into_iter().max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.load_factor.partial_cmp(&a.load_factor).unwrap_or(std::cmp::Ordering::Equal))
        }),
        RoutingStrategy::RoundRobin => {
            let idx = (round_robin_seq as usize) % pool.len();
            Some(pool[idx])
        }
        RoutingStrategy::Random => {
            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..pool.len());
            Some(pool[idx])
        }
        RoutingStrategy::Sticky => {
            if let Some(sticky_id) = sticky_agent_id {
                if let Some(found) = pool.iter().find(|a| a.id == sticky_id) {
                    return Some(found);
                }
            }
            pool.into_iter().min_by(|a, b| {
                a.load_factor
                    .partial_cmp(&b.load_factor)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        }
    }
}
