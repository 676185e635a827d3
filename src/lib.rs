//! # Varco (Account Settings & Identity Linking)
//!
//! `varco` is the self-service engine of a web-facing identity service. It
//! lets an authenticated user attach or detach external OpenID-Connect
//! providers and set a password, through short-lived, server-tracked flows.
//!
//! ## Flows
//!
//! Every multi-step interaction (login, settings update) is an explicit,
//! CSRF-protected flow row addressed by an unguessable id. Submissions are
//! serialized per flow with an optimistic version check; duplicate concurrent
//! submissions are rejected, never interleaved.
//!
//! ## Privileged sessions
//!
//! Sensitive mutations (provider link/unlink) require a session that was
//! (re-)authenticated within a configured max age. Stale sessions are routed
//! through a forced re-authentication login flow; the interrupted settings
//! action is recorded on the flow and resumed once the session is fresh again.
//!
//! ## OIDC round-trips
//!
//! The OAuth2 authorization-code dance is modeled as a persisted, single-use
//! state record binding mode, flow, nonce, and (for link mode) the target
//! identity. Provider parameters are snapshotted into the record, so a
//! configuration reload never invalidates an in-flight round-trip.
//!
//! ## Security boundaries
//!
//! - Raw session tokens, CSRF tokens, and OAuth2 state values never touch the
//!   database; only SHA-256 hashes are stored and compared.
//! - A provider identity (provider, subject) can be linked to at most one
//!   local identity, enforced by a unique index at the storage layer.
//! - The callback never trusts a client-supplied identity; link mode attaches
//!   to the identity bound server-side when the redirect was issued.

pub mod api;
pub mod cli;
pub mod config;
pub mod flow;
pub mod identity;
pub mod messages;
pub mod oidc;
pub mod session;
pub mod state;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
