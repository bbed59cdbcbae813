use techie_interfaces::{ClientEvent, EventSink, UsageReporter};
use tracing::{debug, warn};

/// Code of the error event raised when usage cannot be fetched.
pub const USAGE_ERROR_CODE: &str = "ConsumptionFetchError";

/// Look up token consumption for `conversation_id` and publish it.
pub async fn refresh_usage(
    reporter: &dyn UsageReporter,
    events: &dyn EventSink,
    conversation_id: &str,
) {
    if conversation_id.is_empty() {
        return;
    }

    match reporter.fetch_usage(conversation_id).await {
        Ok(usage) => {
            debug!(conversation_id = %conversation_id, total = usage.total_tokens, "Usage refreshed");
            events.emit(ClientEvent::UsageUpdated(usage));
        }
        Err(e) => {
            warn!(conversation_id = %conversation_id, "Usage refresh failed: {}", e);
            events.emit(ClientEvent::ServerError {
                code: USAGE_ERROR_CODE.to_string(),
                message: format!("Failed to fetch consumption data:\n{}", e),
            });
        }
    }
}
