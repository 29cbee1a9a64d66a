//! Generic error handling utilities
//!
//! Every module error implements [`ContextualError`] so fatal paths (startup,
//! a consumer worker ending with an error) can log them uniformly.

/// Trait for errors that can distinguish between user-actionable and system errors
///
/// This trait enables generic error handling functions to determine whether an error
/// should show specific user messages or generic context with debug details.
///
/// # Design Principles
/// - User-actionable errors (like validation failures) should show specific messages
/// - System errors (like IO failures) should show generic context to avoid overwhelming users
/// - All errors should provide debug details for system administrators
///
/// # Implementation Consistency
/// **IMPORTANT**: When `is_user_actionable()` returns `true`, `user_message()` should return
/// `Some(message)` with a helpful, actionable message. When `is_user_actionable()` returns
/// `false`, `user_message()` should return `None`. This ensures consistent error handling
/// behavior across the application.
pub trait ContextualError: std::error::Error {
    /// Returns true if this error contains a specific, user-actionable message
    /// that should be displayed directly to the user
    ///
    /// Examples of user-actionable errors:
    /// - Configuration errors with clear fixes
    /// - An unreachable broker URL
    ///
    /// Examples of system errors:
    /// - Broker channel failures
    /// - Search index timeouts
    fn is_user_actionable(&self) -> bool;

    /// Returns the specific user message if this is a user-actionable error
    ///
    /// This should return Some(message) when is_user_actionable() returns true,
    /// and None otherwise. The message should be clear, concise, and actionable.
    fn user_message(&self) -> Option<&str>;
}

/// Log errors with appropriate detail level based on error specificity
///
/// This function provides unified error handling by:
/// - Showing specific messages for user-actionable errors (preserves detail)
/// - Showing generic context with debug details for system errors (avoids overwhelming users)
/// - Ensuring consistent error formatting across all modules
///
/// # Arguments
/// * `error` - The error to handle (must implement ContextualError)
/// * `operation_context` - Human-readable description of the operation that failed
///
/// # Examples
/// ```rust,no_run
/// # use clickstream_gateway::core::error_handling::log_error_with_context;
/// # use clickstream_gateway::core::config::Settings;
/// let mut settings = Settings::default();
/// settings.broker.url = "http://not-a-broker".to_string();
/// if let Err(e) = settings.validate() {
///     // Logs: "FATAL: broker.url must start with amqp:// or amqps://"
///     log_error_with_context(&e, "Loading configuration");
/// }
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    // Always emit a primary fatal line containing at least some context plus
    // useful detail. If the error is user-actionable we prefer its user message.
    if error.is_user_actionable() {
        if let Some(user_msg) = error.user_message() {
            log::error!("FATAL: {}", user_msg);
        } else {
            log::error!("FATAL: {}", operation_context);
        }
    } else {
        log::error!("FATAL: {}", operation_context);
    }
    // Always provide detail only at debug level (requested change)
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
