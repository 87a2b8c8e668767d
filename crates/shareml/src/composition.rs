//! Wires the preflight and store stages together into the gate that sits
//! between contract validation and dispatch. `shareml_runner::runner`
//! drives the envelope/lock/retry machinery around whatever closure a
//! binary supplies; the functions here are what that closure typically
//! calls first, before it ever reaches a provider.

use shareml_contracts::Payload;
use shareml_core::TaskError;
use shareml_preflight::{should_skip, validate_content, PreflightConfig};
use shareml_store::{check_budget_fail_open, BudgetLimits, ResultStore};

/// Pulls the text a payload is ultimately about, for the task types that
/// carry inline text. Transcription has no text yet (it's behind
/// `media_url`) so it has nothing to preflight here.
fn extractable_text(payload: &Payload) -> Option<(&str, &str)> {
    match payload {
        Payload::Summarize(p) => Some((p.content.text.as_str(), "article")),
        Payload::Embed(p) => Some((p.content.text.as_str(), p.content.content_kind.as_str())),
        Payload::Transcribe(_) | Payload::BatchEmbed(_) | Payload::Raw(_) => None,
    }
}

/// Validates and, if necessary, truncates the payload's text before it's
/// handed to a provider. Returns `Ok(None)` for payloads with no inline
/// text (transcription, batch embedding) — those skip this gate entirely.
/// Returns `Err(TaskError::PreflightSkipped)` for spam/empty/all-URL input.
pub fn preflight_gate(
    payload: &Payload,
    config: &PreflightConfig,
) -> Result<Option<(String, bool)>, TaskError> {
    let Some((text, content_type)) = extractable_text(payload) else {
        return Ok(None);
    };

    if should_skip(text) {
        return Err(TaskError::PreflightSkipped(
            "content is empty, all links, or looks like spam".into(),
        ));
    }

    let bounds = config.bounds_for(content_type);
    let info = validate_content(text, content_type, config);
    if !info.valid {
        return Err(TaskError::PreflightSkipped(info.errors.join("; ")));
    }

    let (truncated, was_truncated) =
        shareml_preflight::truncate_to_limit(text, bounds.max_tokens());
    Ok(Some((truncated, was_truncated)))
}

/// Checks the rolling hourly/daily spend against `limits` before a job is
/// allowed to make a paid provider call. Fails open: a store error returns
/// `allowed: true` rather than blocking the whole pipeline on the store's
/// availability (spec.md §4.K).
pub async fn budget_gate(
    store: &dyn ResultStore,
    estimated_usd: f64,
    limits: &BudgetLimits,
) -> Result<(), TaskError> {
    let decision = check_budget_fail_open(store, estimated_usd, limits).await;
    if decision.allowed {
        return Ok(());
    }
    Err(TaskError::BudgetExceeded {
        reason: decision.reason.unwrap_or_default(),
        hourly_used: decision.hourly_used,
        hourly_limit: decision.hourly_limit,
        daily_used: decision.daily_used,
        daily_limit: decision.daily_limit,
    })
}
