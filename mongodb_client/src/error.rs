use std::{collections::HashSet, sync::Arc};

use bson::Document;

use crate::{
    bson_util, error_chain_fmt, ServerAddress, TopologyDescription, TopologyVersion,
};

pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";
pub const NON_RESUMABLE_CHANGE_STREAM_ERROR: &str = "NonResumableChangeStreamError";

/// NotWritablePrimary, NotPrimaryNoSecondaryOk, LegacyNotPrimary.
const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
/// InterruptedAtShutdown, InterruptedDueToReplStateChange, NotPrimaryOrSecondary,
/// PrimarySteppedDown, ShutdownInProgress.
const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
/// Interrupted, CappedPositionLost, CursorKilled.
const NON_RESUMABLE_CODES: [i32; 3] = [11601, 136, 237];
/// Used for servers that predate the `ResumableChangeStreamError` label.
const LEGACY_RESUMABLE_CODES: [i32; 18] = [
    6, 7, 43, 63, 89, 91, 133, 150, 189, 234, 262, 9001, 10107, 11600, 11602, 13388, 13435,
    13436,
];
/// Servers from this wire version on attach change stream error labels themselves.
const RESUMABLE_LABEL_WIRE_VERSION: i32 = 9;

/// Errors surfaced by operations: commands, server selection and change streams.
#[derive(thiserror::Error, Clone)]
pub enum MongoError {
    #[error("Command failed: {0}")]
    Command(#[from] CommandError),
    #[error("Network error{}: {message}", format_address(.address))]
    Network {
        address: Option<ServerAddress>,
        message: String,
    },
    #[error("Server selection timed out: {message}. Last known topology: {topology}")]
    ServerSelectionTimeout {
        message: String,
        topology: Arc<TopologyDescription>,
    },
    #[error("Incompatible server: {message}")]
    IncompatibleServer { message: String },
    #[error("Change stream document is missing its resume token (`_id`)")]
    MissingResumeToken,
    #[error("Invalid server response: {message}")]
    InvalidResponse { message: String },
    #[error("The client has been shut down")]
    Shutdown,
}
impl std::fmt::Debug for MongoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

fn format_address(address: &Option<ServerAddress>) -> String {
    address
        .as_ref()
        .map(|address| format!(" ({})", address))
        .unwrap_or_default()
}

impl MongoError {
    pub fn network(address: Option<ServerAddress>, message: impl Into<String>) -> Self {
        Self::Network {
            address,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Command(error) => Some(error.code),
            _ => None,
        }
    }

    pub fn labels(&self) -> HashSet<String> {
        match self {
            Self::Command(error) => error.labels.clone(),
            _ => HashSet::new(),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        match self {
            Self::Command(error) => error.has_label(label),
            _ => false,
        }
    }

    pub(crate) fn topology_version(&self) -> Option<TopologyVersion> {
        match self {
            Self::Command(error) => error.topology_version.clone(),
            _ => None,
        }
    }

    /// "Not writable primary" and "node is recovering" errors. A server answering with one of
    /// these no longer holds the role the client thought it had.
    pub fn is_state_change_error(&self) -> bool {
        match self {
            Self::Command(error) => error.is_not_writable_primary() || error.is_recovering(),
            _ => false,
        }
    }

    /// Whether a change stream may transparently reopen itself after this error was returned by
    /// a `getMore`. `max_wire_version` is the one of the server the cursor was pinned to.
    pub fn is_resumable(&self, max_wire_version: Option<i32>) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Command(error) => {
                if error.has_label(NON_RESUMABLE_CHANGE_STREAM_ERROR)
                    || NON_RESUMABLE_CODES.contains(&error.code)
                {
                    return false;
                }
                if max_wire_version.unwrap_or(0) >= RESUMABLE_LABEL_WIRE_VERSION {
                    error.has_label(RESUMABLE_CHANGE_STREAM_ERROR)
                } else {
                    error.has_label(RESUMABLE_CHANGE_STREAM_ERROR)
                        || LEGACY_RESUMABLE_CODES.contains(&error.code)
                }
            }
            _ => false,
        }
    }
}

/// A command the server answered with `ok: 0`. Code, code name, message and labels are kept
/// exactly as the server sent them.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("{code_name} ({code}): {message}")]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
    pub labels: HashSet<String>,
    pub topology_version: Option<TopologyVersion>,
}

impl CommandError {
    pub fn new(code: i32, code_name: &str, message: &str) -> Self {
        Self {
            code,
            code_name: code_name.to_string(),
            message: message.to_string(),
            labels: HashSet::new(),
            topology_version: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.labels.insert(label.to_string());
        self
    }

    /// Returns the error carried by a reply, or `None` when the reply reports success.
    pub fn from_reply(reply: &Document) -> Option<Self> {
        if bson_util::is_ok(reply) {
            return None;
        }
        let code = bson_util::get_int(reply, "code")
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(0);
        Some(Self {
            code,
            code_name: reply.get_str("codeName").unwrap_or_default().to_string(),
            message: reply.get_str("errmsg").unwrap_or_default().to_string(),
            labels: bson_util::get_string_list(reply, "errorLabels")
                .into_iter()
                .collect(),
            topology_version: reply
                .get_document("topologyVersion")
                .ok()
                .and_then(TopologyVersion::from_document),
        })
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    fn is_not_writable_primary(&self) -> bool {
        if NOT_WRITABLE_PRIMARY_CODES.contains(&self.code) {
            return true;
        }
        // Old servers only set a message. "not master or secondary" means recovering.
        self.code == 0
            && self.message.contains("not master")
            && !self.message.contains("not master or secondary")
    }

    fn is_recovering(&self) -> bool {
        if RECOVERING_CODES.contains(&self.code) {
            return true;
        }
        self.code == 0
            && (self.message.contains("not master or secondary")
                || self.message.contains("node is recovering"))
    }
}
