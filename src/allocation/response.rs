//! Fixed texts sent back to requesters.

/// Sent when the requester already holds a link.
pub const ALREADY_CLAIMED_TEXT: &str = "You've already gotten one!";

/// Sent when every link has been handed out.
pub const EXHAUSTED_TEXT: &str = "Sorry, all the spots have been claimed!";

/// Public reply posted after a failed DM to a mention's author. `handle`
/// already carries its `@`.
pub fn fallback_notice(handle: &str) -> String {
    format!(
        "{} Sorry, we couldn't send you a direct message. Send us a DM and we'll get your link to you there.",
        handle
    )
}
