use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use time::{Duration, OffsetDateTime};

/// How long a code stays valid after being issued.
const CODE_TTL: Duration = Duration::minutes(15);

/// Verification attempts allowed per code.
const MAX_ATTEMPTS: u32 = 5;

/// Why a submitted code was rejected. Every variant is an expected,
/// recoverable outcome reported back to the caller.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("code does not exist or has expired")]
    NotFound,
    #[error("code has expired, request a new one")]
    Expired,
    #[error("too many attempts, request a new one")]
    AttemptsExhausted,
    #[error("incorrect code, {remaining} attempts remaining")]
    Mismatch { remaining: u32 },
}

#[derive(Debug)]
struct CodeEntry {
    code: String,
    expires_at: OffsetDateTime,
    attempts: u32,
}

/// In-memory one-time reset codes, keyed by normalized email.
///
/// Codes do not survive a restart; a pending reset must then be started
/// over by the user.
#[derive(Debug, Default)]
pub struct VerificationCodeStore {
    entries: Mutex<HashMap<String, CodeEntry>>,
}

/// Six random digits, uniform over 100000..=999999. Not a CSPRNG draw;
/// the attempt limit and TTL bound guessing instead.
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl VerificationCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a code for `email`, replacing any outstanding one.
    pub fn save(&self, email: &str, code: &str) {
        self.save_at(email, code, OffsetDateTime::now_utc());
    }

    pub(crate) fn save_at(&self, email: &str, code: &str, now: OffsetDateTime) {
        let mut entries = self.entries.lock().expect("code store lock poisoned");
        entries.insert(
            normalize_email(email),
            CodeEntry {
                code: code.to_string(),
                expires_at: now + CODE_TTL,
                attempts: 0,
            },
        );
    }

    /// Check a submitted code. Each failed comparison consumes one of the
    /// five attempts; success, expiry and exhaustion all remove the entry,
    /// so a code can never be consumed twice.
    pub fn verify(&self, email: &str, code: &str) -> Result<(), VerifyError> {
        self.verify_at(email, code, OffsetDateTime::now_utc())
    }

    fn verify_at(&self, email: &str, code: &str, now: OffsetDateTime) -> Result<(), VerifyError> {
        let key = normalize_email(email);
        let mut entries = self.entries.lock().expect("code store lock poisoned");

        let entry = entries.get_mut(&key).ok_or(VerifyError::NotFound)?;

        if now > entry.expires_at {
            entries.remove(&key);
            return Err(VerifyError::Expired);
        }

        // attempts counts previous calls only; a sixth call fails here
        // before its code is even compared
        if entry.attempts >= MAX_ATTEMPTS {
            entries.remove(&key);
            return Err(VerifyError::AttemptsExhausted);
        }

        entry.attempts += 1;
        if entry.code != code {
            return Err(VerifyError::Mismatch {
                remaining: MAX_ATTEMPTS - entry.attempts,
            });
        }

        entries.remove(&key);
        Ok(())
    }

    /// Drop every expired entry, returning how many were removed. Memory
    /// hygiene only; `verify` checks expiry on its own.
    pub fn sweep(&self) -> usize {
        self.sweep_at(OffsetDateTime::now_utc())
    }

    pub(crate) fn sweep_at(&self, now: OffsetDateTime) -> usize {
        let mut entries = self.entries.lock().expect("code store lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().expect("numeric code");
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn save_then_verify_succeeds_exactly_once() {
        let store = VerificationCodeStore::new();
        store.save("a@b.com", "482913");
        assert_eq!(store.verify("a@b.com", "482913"), Ok(()));
        assert_eq!(
            store.verify("a@b.com", "482913"),
            Err(VerifyError::NotFound)
        );
    }

    #[test]
    fn unknown_email_is_not_found() {
        let store = VerificationCodeStore::new();
        assert_eq!(
            store.verify("nobody@b.com", "123456"),
            Err(VerifyError::NotFound)
        );
    }

    #[test]
    fn mismatches_count_down_remaining_attempts() {
        let store = VerificationCodeStore::new();
        store.save("a@b.com", "482913");
        for remaining in (0..5).rev() {
            assert_eq!(
                store.verify("a@b.com", "000000"),
                Err(VerifyError::Mismatch { remaining })
            );
        }
        // all five attempts used: even the right code is refused, and the entry is gone
        assert_eq!(
            store.verify("a@b.com", "482913"),
            Err(VerifyError::AttemptsExhausted)
        );
        assert_eq!(
            store.verify("a@b.com", "482913"),
            Err(VerifyError::NotFound)
        );
    }

    #[test]
    fn fifth_attempt_still_gets_compared() {
        let store = VerificationCodeStore::new();
        store.save("a@b.com", "482913");
        for _ in 0..4 {
            assert!(store.verify("a@b.com", "000000").is_err());
        }
        assert_eq!(store.verify("a@b.com", "482913"), Ok(()));
    }

    #[test]
    fn expired_code_is_rejected_and_removed() {
        let store = VerificationCodeStore::new();
        store.save_at("a@b.com", "482913", now() - Duration::minutes(20));
        assert_eq!(store.verify("a@b.com", "482913"), Err(VerifyError::Expired));
        assert_eq!(
            store.verify("a@b.com", "482913"),
            Err(VerifyError::NotFound)
        );
    }

    #[test]
    fn expiry_is_checked_before_the_attempt_limit() {
        let store = VerificationCodeStore::new();
        let t0 = now();
        store.save_at("a@b.com", "482913", t0);
        for _ in 0..3 {
            assert!(matches!(
                store.verify_at("a@b.com", "000000", t0),
                Err(VerifyError::Mismatch { .. })
            ));
        }
        assert_eq!(
            store.verify_at("a@b.com", "482913", t0 + Duration::minutes(16)),
            Err(VerifyError::Expired)
        );
    }

    #[test]
    fn resend_replaces_the_previous_code() {
        let store = VerificationCodeStore::new();
        store.save("a@b.com", "111111");
        store.save("a@b.com", "222222");
        assert_eq!(
            store.verify("a@b.com", "111111"),
            Err(VerifyError::Mismatch { remaining: 4 })
        );
        assert_eq!(store.verify("a@b.com", "222222"), Ok(()));
    }

    #[test]
    fn email_is_normalized_for_lookup() {
        let store = VerificationCodeStore::new();
        store.save("Foo@Bar.com", "123456");
        assert_eq!(store.verify("  foo@bar.com ", "123456"), Ok(()));
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let store = VerificationCodeStore::new();
        let t = now();
        store.save_at("old@b.com", "111111", t - Duration::minutes(30));
        store.save_at("fresh@b.com", "222222", t);
        assert_eq!(store.sweep_at(t), 1);
        assert_eq!(
            store.verify_at("old@b.com", "111111", t),
            Err(VerifyError::NotFound)
        );
        assert_eq!(store.verify_at("fresh@b.com", "222222", t), Ok(()));
    }

    #[test]
    fn guessing_scenario_runs_to_success() {
        let store = VerificationCodeStore::new();
        store.save("a@b.com", "482913");
        for remaining in [4, 3, 2] {
            assert_eq!(
                store.verify("a@b.com", "000000"),
                Err(VerifyError::Mismatch { remaining })
            );
        }
        assert_eq!(store.verify("a@b.com", "482913"), Ok(()));
        assert_eq!(
            store.verify("a@b.com", "482913"),
            Err(VerifyError::NotFound)
        );
    }
}
