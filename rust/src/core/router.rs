// Typed push notifications -> the one listing that needs refetching.

/// What a notification invalidates. Payload fields are never merged into state; the target is
/// simply fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefetchTarget {
    IncomingSolicitations,
    Friends,
    Invitations,
    OwnedExits,
    Offers,
    Notifications,
}

pub const ROUTES: &[(&str, RefetchTarget)] = &[
    ("follow", RefetchTarget::IncomingSolicitations),
    ("follow_accept", RefetchTarget::Friends),
    ("invite", RefetchTarget::Invitations),
    ("invite_accept", RefetchTarget::OwnedExits),
    ("offer", RefetchTarget::Offers),
    ("like", RefetchTarget::Notifications),
];

/// `None` for types this client does not know; those are dropped without error.
pub fn route(notification_type: &str) -> Option<RefetchTarget> {
    ROUTES
        .iter()
        .find(|(ty, _)| *ty == notification_type)
        .map(|(_, target)| *target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_known_type_routes_to_its_listing() {
        assert_eq!(route("follow"), Some(RefetchTarget::IncomingSolicitations));
        assert_eq!(route("follow_accept"), Some(RefetchTarget::Friends));
        assert_eq!(route("invite"), Some(RefetchTarget::Invitations));
        assert_eq!(route("invite_accept"), Some(RefetchTarget::OwnedExits));
        assert_eq!(route("offer"), Some(RefetchTarget::Offers));
        assert_eq!(route("like"), Some(RefetchTarget::Notifications));
    }

    #[test]
    fn targets_are_distinct_and_unknown_types_drop() {
        let targets: HashSet<_> = ROUTES.iter().map(|(_, t)| *t).collect();
        assert_eq!(targets.len(), ROUTES.len());
        assert_eq!(route("typing"), None);
        assert_eq!(route(""), None);
        assert_eq!(route("FOLLOW"), None);
    }
}
