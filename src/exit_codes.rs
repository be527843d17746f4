//! Exit code constants for the margarita CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, unreadable input, invalid config)
//! - 2: Parse failure
//! - 3: Render failure (missing include, include cycle, evaluation error)
//! - 4: Script effect failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, unreadable files, or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The template or script could not be parsed.
pub const PARSE_FAILURE: i32 = 2;

/// Rendering failed: include not found, include cycle, or evaluation error.
pub const RENDER_FAILURE: i32 = 3;

/// A script effect failed, or the agent run failed or was cancelled.
pub const EFFECT_FAILURE: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            SUCCESS,
            USER_ERROR,
            PARSE_FAILURE,
            RENDER_FAILURE,
            EFFECT_FAILURE,
        ];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }
}
