pub mod document;
pub mod event;
pub mod link;

pub use document::{Document, DocumentRef};
pub use event::{
    sign_event_body, verify_event_signature, ReconcileOutcomeKind, ReconcileSummary,
    StateChangeEvent, EVENT_SIGNATURE_HEADER,
};
pub use link::{
    parse_link_query, ActionLinkParams, LinkError, LinkSigner, SignedActionRequest, SignerError,
    APPLY_ACTION_PATH,
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short version string: packaged git hash, then the build-time git hash, then "unknown".
pub fn get_version() -> String {
    let hash = option_env!("COUNTERSIGN_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(git_hash) if git_hash.len() >= 8 => git_hash[..8].to_string(),
        Some(git_hash) => git_hash.to_string(),
        None => "unknown".to_string(),
    }
}
