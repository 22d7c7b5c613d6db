//! Intent routing
//!
//! Pure map from classified intent to the next node. Exhaustive over the
//! closed intent set, so an unroutable intent cannot be represented.

use crate::models::{IntentLabel, NodeId};

/// Resolve the specialist node for an intent. Product acquisition is the
/// only route that passes through compliance review downstream.
pub fn route(intent: IntentLabel) -> NodeId {
    match intent {
        IntentLabel::AccountData => NodeId::Account,
        IntentLabel::KnowledgeGeneral => NodeId::Knowledge,
        IntentLabel::ProductAcquisition => NodeId::Product,
        IntentLabel::ComplaintEscalation => NodeId::Escalation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_intent_routes_to_its_specialist() {
        assert_eq!(route(IntentLabel::AccountData), NodeId::Account);
        assert_eq!(route(IntentLabel::KnowledgeGeneral), NodeId::Knowledge);
        assert_eq!(route(IntentLabel::ProductAcquisition), NodeId::Product);
        assert_eq!(route(IntentLabel::ComplaintEscalation), NodeId::Escalation);
    }

    #[test]
    fn routing_is_deterministic() {
        for intent in IntentLabel::ALL {
            assert_eq!(route(intent), route(intent));
        }
    }

    #[test]
    fn only_product_acquisition_routes_toward_compliance() {
        let compliance_bound: Vec<_> = IntentLabel::ALL
            .iter()
            .filter(|intent| route(**intent) == NodeId::Product)
            .collect();

        assert_eq!(compliance_bound, vec![&IntentLabel::ProductAcquisition]);
    }
}
