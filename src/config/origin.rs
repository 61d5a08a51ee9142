//! Origin policy for WebSocket upgrades
//!
//! Browsers send an `Origin` header with every handshake. The policy decides
//! which origins may open a connection.

use std::collections::HashSet;

/// Which origins are allowed to upgrade
///
/// `AllowAll` is the default so local editor frontends on any dev-server port
/// can connect. Use an allow list for anything reachable from other hosts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    /// Accept every origin
    #[default]
    AllowAll,
    /// Accept only the listed origins
    AllowList(HashSet<String>),
}

impl OriginPolicy {
    /// Build a policy from a list of origins; an empty list allows all
    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = origins
            .into_iter()
            .map(|o| o.into().trim_end_matches('/').to_string())
            .collect();

        if set.is_empty() {
            Self::AllowAll
        } else {
            Self::AllowList(set)
        }
    }

    /// Check whether a handshake with the given `Origin` header may proceed
    ///
    /// Requests without an `Origin` header come from non-browser clients and
    /// are always accepted.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (Self::AllowAll, _) | (_, None) => true,
            (Self::AllowList(set), Some(origin)) => set.contains(origin.trim_end_matches('/')),
        }
    }
}
