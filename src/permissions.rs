//! Permission Evaluator (spec §4.4) — the single place that decides
//! whether a client may speak into or listen to a channel. Pure and
//! synchronous: it never touches a registry lock itself, so callers
//! (the routing core) supply the already-read `Client`/membership facts.

use crate::models::{ChannelId, Client, Direction};

/// `allow` combines the client's permission matrix with its channel
/// membership — a client absent from a channel may never speak or
/// listen to it regardless of matrix entries (spec §3, §4.4).
pub fn allow(client: &Client, channel: ChannelId, direction: Direction) -> bool {
    if !client.is_member_of(channel) {
        return false;
    }
    match direction {
        Direction::Speak => client.permissions.can_speak(channel),
        Direction::Listen => client.permissions.can_listen(channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientId, ClientStatus, PermissionMatrix, SessionHandle};
    use std::collections::HashMap;

    fn member_of(channels: Vec<ChannelId>, permissions: PermissionMatrix) -> Client {
        Client {
            id: ClientId::new_v4(),
            display_name: "test".into(),
            session_handle: Some(SessionHandle::new()),
            admin_flag: false,
            status: ClientStatus::Active,
            channels,
            permissions,
            user_settings: HashMap::new(),
        }
    }

    #[test]
    fn non_member_is_never_allowed_even_with_global_grants() {
        let channel = ChannelId::new_v4();
        let client = member_of(
            vec![],
            PermissionMatrix {
                speak_to_all: true,
                listen_to_all: true,
                ..Default::default()
            },
        );
        assert!(!allow(&client, channel, Direction::Speak));
        assert!(!allow(&client, channel, Direction::Listen));
    }

    #[test]
    fn member_with_per_channel_grant_is_allowed() {
        let channel = ChannelId::new_v4();
        let mut perms = PermissionMatrix::default();
        perms.speak_to.insert(channel, true);
        let client = member_of(vec![channel], perms);

        assert!(allow(&client, channel, Direction::Speak));
        assert!(!allow(&client, channel, Direction::Listen));
    }

    #[test]
    fn member_without_any_grant_is_denied() {
        let channel = ChannelId::new_v4();
        let client = member_of(vec![channel], PermissionMatrix::default());
        assert!(!allow(&client, channel, Direction::Speak));
        assert!(!allow(&client, channel, Direction::Listen));
    }
}
