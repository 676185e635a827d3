//! Privileged-session policy.
//!
//! Sensitive settings mutations require a session that was (re-)authenticated
//! within the configured max age. The check is pure: it reads the session's
//! `authenticated_at` and nothing else.

use chrono::{DateTime, Duration, Utc};

use super::SessionRecord;
use crate::config::SelfServiceConfig;

/// A session is fresh iff `now - authenticated_at <= max_age`.
#[must_use]
pub fn is_fresh(authenticated_at: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    now - authenticated_at <= max_age
}

/// Freshness of a resolved session against the configured window.
#[must_use]
pub fn session_is_fresh(session: &SessionRecord, config: &SelfServiceConfig) -> bool {
    is_fresh(
        session.authenticated_at,
        Duration::seconds(config.privileged_session_max_age_seconds()),
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AssuranceLevel, AuthenticationMethod};
    use uuid::Uuid;

    fn session(authenticated_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            authenticated_at,
            authentication_methods: vec![AuthenticationMethod::password(authenticated_at)],
            aal: AssuranceLevel::Aal1,
            expires_at: authenticated_at + Duration::days(7),
        }
    }

    #[test]
    fn fresh_within_window() {
        let now = Utc::now();
        assert!(is_fresh(now - Duration::seconds(10), Duration::seconds(60), now));
    }

    #[test]
    fn stale_past_window() {
        let now = Utc::now();
        assert!(!is_fresh(now - Duration::seconds(61), Duration::seconds(60), now));
    }

    #[test]
    fn boundary_is_inclusive() {
        let now = Utc::now();
        assert!(is_fresh(now - Duration::seconds(60), Duration::seconds(60), now));
    }

    #[test]
    fn short_window_forces_reauth_long_window_does_not() {
        // The same session is stale under a 1s window and fresh under a long one.
        let record = session(Utc::now() - Duration::seconds(30));

        let short = SelfServiceConfig::new(
            "https://account.varco.dev".to_string(),
            "https://api.varco.dev".to_string(),
        )
        .with_privileged_session_max_age_seconds(1);
        assert!(!session_is_fresh(&record, &short));

        let long = SelfServiceConfig::new(
            "https://account.varco.dev".to_string(),
            "https://api.varco.dev".to_string(),
        )
        .with_privileged_session_max_age_seconds(60 * 60);
        assert!(session_is_fresh(&record, &long));
    }

    #[test]
    fn refreshing_authenticated_at_restores_freshness() {
        let config = SelfServiceConfig::new(
            "https://account.varco.dev".to_string(),
            "https://api.varco.dev".to_string(),
        )
        .with_privileged_session_max_age_seconds(60);

        let mut record = session(Utc::now() - Duration::hours(2));
        assert!(!session_is_fresh(&record, &config));

        // What a successful re-authentication does to the stored session.
        record.authenticated_at = Utc::now();
        assert!(session_is_fresh(&record, &config));
    }
}
