//! Inbound response routing.
//!
//! The embedder runs some network tap that observes host traffic and hands
//! each response here as `(url, body)`. Routing is by URL shape only; the
//! engine never touches transport APIs itself. Failures degrade to
//! "nothing new this cycle": they are logged and swallowed so one bad
//! response cannot take the whole page integration down.

use roomwatch_shared::Uid;
use tracing::{debug, warn};

use crate::orchestrator::{Orchestrator, SnapshotProvider};

/// URL fragment identifying the room user-list endpoint.
pub const USER_LIST_FRAGMENT: &str = "action=userlist";
/// URL fragment identifying the private-log endpoint.
pub const PRIVATE_LOG_FRAGMENT: &str = "action=privatelog";

/// Where a host response should be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    UserList,
    /// Private log for the conversation with this uid.
    PrivateLog(Uid),
    /// Not a response the engine cares about.
    Ignore,
}

impl Route {
    /// Classify a host URL.
    ///
    /// The private-log route requires a `uid` query parameter; without it
    /// the response cannot be attributed to a conversation and is ignored.
    pub fn from_url(url: &str) -> Route {
        if url.contains(USER_LIST_FRAGMENT) {
            return Route::UserList;
        }
        if url.contains(PRIVATE_LOG_FRAGMENT) {
            return match query_param(url, "uid") {
                Some(uid) if !uid.is_empty() => Route::PrivateLog(Uid::new(uid)),
                _ => {
                    warn!(url, "private-log response without uid parameter");
                    Route::Ignore
                }
            };
        }
        Route::Ignore
    }
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

impl<P: SnapshotProvider> Orchestrator<P> {
    /// Entry point for the network tap. Routes `body` by `url` and runs the
    /// matching processor; every failure is logged and absorbed here.
    pub async fn on_response(&self, url: &str, body: &str) {
        match Route::from_url(url) {
            Route::UserList => {
                if let Err(e) = self.process_user_list_response(body).await {
                    warn!(error = %e, "user-list response not processed");
                }
            }
            Route::PrivateLog(uid) => {
                if let Err(e) = self.process_private_log_response(&uid, body).await {
                    warn!(uid = %uid, error = %e, "private-log response not processed");
                }
            }
            Route::Ignore => debug!(url, "ignoring unrelated response"),
        }
    }
}
