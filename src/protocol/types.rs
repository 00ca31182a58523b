//! Wire tags and server reply texts.

/// `type` discriminator values.
pub mod tag {
    pub const REGISTER: &str = "AGENT_REGISTER";
    pub const DIRECT: &str = "AGENT_MESSAGE";
    pub const BROADCAST: &str = "BROADCAST_MESSAGE";
    pub const LIST_REQUEST: &str = "LIST_AGENTS_REQUEST";
    pub const LIST_RESPONSE: &str = "LIST_AGENTS_RESPONSE";
    pub const SERVER_INFO: &str = "SERVER_INFO";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";

    /// Every tag the relay understands, in declaration order.
    pub const ALL: [&str; 7] = [
        REGISTER,
        DIRECT,
        BROADCAST,
        LIST_REQUEST,
        LIST_RESPONSE,
        SERVER_INFO,
        SERVER_ERROR,
    ];

    /// Tags a registered agent may send for routing.
    pub const ROUTABLE: [&str; 3] = [DIRECT, BROADCAST, LIST_REQUEST];
}

/// `content` of the `SERVER_INFO` / `SERVER_ERROR` frames the relay sends.
pub mod reply {
    pub const WELCOME: &str = "welcome";
    pub const AGENT_ID_MISSING: &str = "agent_id missing";
    pub const INVALID_TOKEN: &str = "invalid token";
    pub const AGENT_ID_IN_USE: &str = "agent id in use";
    pub const REGISTER_FIRST: &str = "first message must be AGENT_REGISTER";
    pub const INCOMPLETE_MESSAGE: &str = "incomplete message";
    pub const AGENT_NOT_ONLINE: &str = "agent not online";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown message type";
    pub const INVALID_FORMAT: &str = "invalid format";
    pub const SENDER_MISMATCH: &str = "sender_id mismatch";
    pub const INTERNAL_ERROR: &str = "internal error";
}
