//! Centralized default constants for the marginalia AI core.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// MODEL SERVICE
// =============================================================================

/// Default generation model.
pub const GEN_MODEL: &str = "gemini-2.5-flash";

/// Default Generative Language API base URL.
pub const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Generation request timeout in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Minimum interval between outbound model calls (milliseconds).
///
/// Bursts of uploads at this spacing stay under the provider's free-tier
/// requests-per-minute quota.
pub const COOLDOWN_MIN_DELAY_MS: u64 = 2_500;

// =============================================================================
// WEB SEARCH
// =============================================================================

/// Default Brave web search endpoint.
pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// Number of search results folded into the final prompt.
pub const SEARCH_MAX_RESULTS: usize = 5;

/// Search request timeout in seconds.
pub const SEARCH_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// SUMMARY JOBS
// =============================================================================

/// Maximum summary jobs talking to the model at once.
pub const SUMMARY_MAX_CONCURRENT: usize = 4;

/// Maximum characters of an error message kept in a failed summary.
pub const SUMMARY_ERROR_MAX_CHARS: usize = 100;

/// Summary text stored when a user cancels generation.
pub const SUMMARY_CANCELLED_MESSAGE: &str = "Summary generation cancelled by user";

/// Prefix of the summary text stored when generation fails.
pub const SUMMARY_FAILED_PREFIX: &str = "Failed to generate summary: ";

/// Broadcast channel capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// CHAT
// =============================================================================

/// Number of most recent chat turns sent as context.
pub const CHAT_HISTORY_LIMIT: usize = 100;

/// Fallback image MIME type when neither extension nor magic bytes decide.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const ENV_GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";
pub const ENV_GEMINI_TIMEOUT_SECS: &str = "GEMINI_TIMEOUT_SECS";
pub const ENV_AI_COOLDOWN_MS: &str = "AI_COOLDOWN_MS";
pub const ENV_BRAVE_SEARCH_API_KEY: &str = "BRAVE_SEARCH_API_KEY";
pub const ENV_BRAVE_SEARCH_ENDPOINT: &str = "BRAVE_SEARCH_ENDPOINT";
pub const ENV_SEARCH_MAX_RESULTS: &str = "SEARCH_MAX_RESULTS";
pub const ENV_SUMMARY_MAX_CONCURRENT: &str = "SUMMARY_MAX_CONCURRENT";
pub const ENV_SUMMARY_ERROR_MAX_CHARS: &str = "SUMMARY_ERROR_MAX_CHARS";
pub const ENV_CHAT_HISTORY_LIMIT: &str = "CHAT_HISTORY_LIMIT";
