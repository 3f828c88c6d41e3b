//! Message rendering for queued dispatches.

use courier_core::{decode_html_entities, repair_mojibake, substitute_placeholders};

use super::{PendingDispatch, SendJob};

/// Renders one recipient's message from the stored template.
///
/// Order matters: entity decoding must run after the mojibake repair because
/// entity sequences are multi-byte-clean while the raw template text may not
/// be.
pub fn render_message(template: &str, full_name: Option<&str>, username: Option<&str>) -> String {
    let substituted = substitute_placeholders(template, full_name, username);
    let repaired = repair_mojibake(&substituted);
    decode_html_entities(&repaired)
}

/// Expands a pending dispatch into per-recipient send jobs, in list order.
pub fn build_send_jobs(dispatch: &PendingDispatch) -> Vec<SendJob> {
    dispatch
        .recipients
        .iter()
        .map(|recipient| SendJob {
            recipient_id: recipient.recipient_id.clone(),
            rendered_message: render_message(
                &dispatch.template,
                recipient.full_name.as_deref(),
                recipient.username.as_deref(),
            ),
            full_name: recipient.full_name.clone(),
            username: recipient.username.clone(),
            message_id: Some(dispatch.message_id.clone()),
            list_id: dispatch.list_id.clone(),
            user_ref: recipient.user_ref.clone(),
        })
        .collect()
}
