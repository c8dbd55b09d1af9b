//! Bayeux channel names.
//!
//! Meta channels carry session control; the service channel carries query
//! submissions; the data channel carries progress and results for every
//! query of the session.

/// Registers the client and obtains a client id.
pub const META_HANDSHAKE: &str = "/meta/handshake";

/// Subscribes the client to a data channel.
pub const META_SUBSCRIBE: &str = "/meta/subscribe";

/// Long-poll request held open by the remote until data is available.
pub const META_CONNECT: &str = "/meta/connect";

/// Unregisters the client.
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// Query submission channel.
pub const SERVICE_QUERY: &str = "/service/query";

/// Default data channel for inbound query messages.
pub const DEFAULT_DATA_CHANNEL: &str = "/messaging";

/// Connection type stamped on every frame.
pub const CONNECTION_TYPE: &str = "long-polling";

/// Returns `true` if `channel` is a well-formed Bayeux channel name.
///
/// A channel starts with `/` and has no empty segments.
#[must_use]
pub fn is_valid(channel: &str) -> bool {
    channel
        .strip_prefix('/')
        .is_some_and(|rest| !rest.is_empty() && rest.split('/').all(|segment| !segment.is_empty()))
}

/// Returns `true` if `channel` is a meta channel.
#[inline]
#[must_use]
pub fn is_meta(channel: &str) -> bool {
    channel.starts_with("/meta/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_validation() {
        assert!(is_valid(DEFAULT_DATA_CHANNEL));
        assert!(is_valid(META_HANDSHAKE));
        assert!(!is_valid("messaging"));
        assert!(!is_valid("/"));
        assert!(!is_valid("/meta//connect"));
    }

    #[test]
    fn test_is_meta() {
        assert!(is_meta(META_CONNECT));
        assert!(!is_meta(SERVICE_QUERY));
        assert!(!is_meta(DEFAULT_DATA_CHANNEL));
    }
}
