//! Reconnection policy.
//!
//! Pure functions deciding what the connection driver does after a failed
//! handshake or a dropped link.

use crate::error::SessionError;

/// Check if the failure must end the session without retrying.
///
/// Authentication failures are never retried.
pub fn should_exit_immediately(error: &SessionError) -> bool {
    matches!(error, SessionError::Auth(_))
}

/// Check if another reconnection attempt should be made.
///
/// # Arguments
///
/// * `error` - The failure that ended the previous attempt or link
/// * `current_attempt` - Reconnection attempts already made in this streak
/// * `max_attempts` - The maximum number of reconnection attempts allowed
pub fn should_attempt_reconnect(
    error: &SessionError,
    current_attempt: u32,
    max_attempts: u32,
) -> bool {
    if should_exit_immediately(error) {
        return false;
    }

    current_attempt < max_attempts
}
