//! Trace context propagation across the broker boundary: read
//! `traceparent`/`tracestate` headers on inbound, inject them on outbound
//! (spec.md §4.L / §4.M).

use std::collections::HashMap;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

pub fn extract_trace_context(
    headers: &HashMap<String, String>,
) -> (Option<String>, Option<String>) {
    (
        headers.get(TRACEPARENT_HEADER).cloned(),
        headers.get(TRACESTATE_HEADER).cloned(),
    )
}

pub fn inject_trace_context(
    headers: &mut HashMap<String, String>,
    traceparent: Option<&str>,
    tracestate: Option<&str>,
) {
    if let Some(value) = traceparent {
        headers.insert(TRACEPARENT_HEADER.to_string(), value.to_string());
    }
    if let Some(value) = tracestate {
        headers.insert(TRACESTATE_HEADER.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_headers() {
        let mut headers = HashMap::new();
        inject_trace_context(&mut headers, Some("00-a-b-01"), Some("vendor=x"));
        let (traceparent, tracestate) = extract_trace_context(&headers);
        assert_eq!(traceparent.as_deref(), Some("00-a-b-01"));
        assert_eq!(tracestate.as_deref(), Some("vendor=x"));
    }

    #[test]
    fn missing_headers_yield_none() {
        let headers = HashMap::new();
        assert_eq!(extract_trace_context(&headers), (None, None));
    }
}
