//! CLASSIFY phase (spec §4.4): deterministic pattern matching produces a
//! risk floor; an optional capability provider may only raise confidence,
//! never lower risk below that floor.

use crate::capabilities::CapabilityMarketplace;
use crate::types::{Domain, IntentType};

#[derive(Debug, Clone)]
pub struct Classification {
    pub intent_type: IntentType,
    pub risk_score: f32,
    pub confidence: f32,
    pub domain: Domain,
}

struct Pattern {
    needle: &'static str,
    intent_type: IntentType,
    risk_floor: f32,
}

const PATTERNS: &[Pattern] = &[
    Pattern { needle: "delete", intent_type: IntentType::SystemWrite, risk_floor: 0.7 },
    Pattern { needle: "rm -rf", intent_type: IntentType::SystemExec, risk_floor: 0.95 },
    Pattern { needle: "format disk", intent_type: IntentType::SystemExec, risk_floor: 0.95 },
    Pattern { needle: "transfer $", intent_type: IntentType::SystemWrite, risk_floor: 0.8 },
    Pattern { needle: "send message", intent_type: IntentType::Communicate, risk_floor: 0.2 },
    Pattern { needle: "read file", intent_type: IntentType::SystemRead, risk_floor: 0.1 },
    Pattern { needle: "run command", intent_type: IntentType::SystemExec, risk_floor: 0.6 },
    Pattern { needle: "schedule", intent_type: IntentType::Meta, risk_floor: 0.15 },
];

fn deterministic_match(canonicalized_text: &str) -> (IntentType, f32) {
    PATTERNS
        .iter()
        .filter(|p| canonicalized_text.contains(p.needle))
        .map(|p| (p.intent_type, p.risk_floor))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((IntentType::Reason, 0.05))
}

/// Run the deterministic pass, then (if a provider is registered) ask it to
/// refine `confidence` only -- never to move `risk_score` below the
/// deterministic floor (spec §4.4 "a high-risk pattern match cannot be
/// downgraded below its floor").
pub async fn classify(
    canonicalized_text: &str,
    domain: Domain,
    capability_provider: Option<&CapabilityMarketplace>,
    provider_name: &str,
) -> Classification {
    let (intent_type, risk_floor) = deterministic_match(canonicalized_text);
    let mut confidence = 0.6_f32;
    let mut risk_score = risk_floor;

    if let Some(market) = capability_provider {
        if let Ok(advisory) = market
            .call(
                provider_name,
                "classify",
                serde_json::json!({ "text": canonicalized_text }),
            )
            .await
        {
            if let Some(c) = advisory.get("confidence").and_then(|v| v.as_f64()) {
                confidence = (c as f32).clamp(0.0, 1.0);
            }
            if let Some(r) = advisory.get("risk_score").and_then(|v| v.as_f64()) {
                risk_score = (r as f32).max(risk_floor).clamp(0.0, 1.0);
            }
        }
    }

    Classification {
        intent_type,
        risk_score,
        confidence,
        domain,
    }
}
