//! Agrégation de sévérité : état dominant d'un host à partir de ses events courants.

use crate::models::{EventKind, EventRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DominantState {
    pub status: i64,
    pub kind: EventKind,
    pub output: String,
}

impl Default for DominantState {
    fn default() -> Self {
        Self { status: 0, kind: EventKind::Host, output: String::new() }
    }
}

/// Calcule (status, type, output) dominant pour un ensemble d'events d'un même host.
///
/// L'event host (description de service vide) l'emporte s'il est en WARNING ou
/// CRITICAL, ou si aucun service n'est en erreur. Sinon le pire service gagne ;
/// à sévérité égale, le premier rencontré est conservé.
pub fn dominant_state<'a, I>(events: I) -> DominantState
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut host_status = 0;
    let mut host_output = String::new();
    let mut service_status = 0;
    let mut service_output = String::new();

    for event in events {
        if event.is_host_level() {
            host_status = event.eventstate;
            host_output = event.output.clone();
            continue;
        }
        if event.eventstate > service_status {
            service_status = event.eventstate;
            service_output = event.output.clone();
        }
    }

    if matches!(host_status, 1 | 2) || service_status == 0 {
        DominantState { status: host_status, kind: EventKind::Host, output: host_output }
    } else {
        DominantState { status: service_status, kind: EventKind::Service, output: service_output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(service: &str, state: i64, output: &str) -> EventRecord {
        EventRecord {
            id: format!("{service}-{state}"),
            sitename: "AMS".into(),
            hostname: "r1".into(),
            servicedescription: service.into(),
            kind: if service.is_empty() { "HOST".into() } else { "SERVICE".into() },
            statetype: json!("HARD"),
            output: output.into(),
            longoutput: String::new(),
            eventstate: state,
            timestamp: 0,
            object_id: None,
            layer: None,
            endtime: None,
        }
    }

    #[test]
    fn test_empty_set_is_ok_host() {
        let empty: Vec<EventRecord> = Vec::new();
        assert_eq!(dominant_state(&empty), DominantState::default());
    }

    #[test]
    fn test_host_warning_dominates_critical_service() {
        let events = vec![
            event("", 1, "host warn"),
            event("disk", 0, "disk ok"),
            event("cpu", 2, "cpu crit"),
        ];
        let state = dominant_state(&events);
        assert_eq!(state, DominantState { status: 1, kind: EventKind::Host, output: "host warn".into() });
    }

    #[test]
    fn test_critical_service_dominates_ok_host() {
        let events = vec![
            event("", 0, "host up"),
            event("disk", 0, "disk ok"),
            event("cpu", 2, "cpu crit"),
        ];
        let state = dominant_state(&events);
        assert_eq!(state, DominantState { status: 2, kind: EventKind::Service, output: "cpu crit".into() });
    }

    #[test]
    fn test_clean_services_leave_host_authoritative() {
        let events = vec![event("", 3, "unreachable"), event("cpu", 0, "ok")];
        let state = dominant_state(&events);
        assert_eq!(state.kind, EventKind::Host);
        assert_eq!(state.status, 3);
    }

    #[test]
    fn test_unknown_host_yields_to_failing_service() {
        let events = vec![event("", 3, "unknown"), event("cpu", 1, "cpu warn")];
        let state = dominant_state(&events);
        assert_eq!(state, DominantState { status: 1, kind: EventKind::Service, output: "cpu warn".into() });
    }

    #[test]
    fn test_ties_keep_first_service_output() {
        let events = vec![event("a", 2, "first"), event("b", 2, "second")];
        assert_eq!(dominant_state(&events).output, "first");
    }

    #[test]
    fn test_services_without_host_event() {
        let events = vec![event("cpu", 1, "cpu warn")];
        let state = dominant_state(&events);
        assert_eq!(state.kind, EventKind::Service);
        assert_eq!(state.status, 1);
    }
}
