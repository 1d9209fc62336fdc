use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("chars_per_token must be > 0")]
    InvalidCharsPerToken,
}

/// Deterministic char-count approximation of token usage. No I/O, pure
/// functions, so callers never have to treat this as a suspension point.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize) -> Result<Self, TokenError> {
        if chars_per_token == 0 {
            return Err(TokenError::InvalidCharsPerToken);
        }
        Ok(Self { chars_per_token })
    }

    pub fn estimate(&self, text: &str) -> usize {
        let len = text.chars().count();
        (len + self.chars_per_token - 1) / self.chars_per_token
    }

    pub fn estimate_batch(&self, texts: &[&str]) -> usize {
        texts.iter().map(|t| self.estimate(t)).sum()
    }

    /// Returns a prefix of `text` that fits within `n` tokens with a 5%
    /// safety margin, plus a trailing ellipsis marker if truncated.
    pub fn truncate_to_tokens(&self, text: &str, n: usize) -> String {
        let budget_tokens = ((n as f64) * 0.95).floor().max(0.0) as usize;
        let budget_chars = budget_tokens.saturating_mul(self.chars_per_token);
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= budget_chars {
            return text.to_string();
        }
        let truncated: String = chars[..budget_chars].iter().collect();
        format!("{truncated}…")
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(4).expect("4 is a valid chars_per_token")
    }
}

/// Allocation ledger for a token budget. `allocate` is the safe path that
/// never overdraws; `force_allocate` is the explicit override callers use
/// when they've decided overdraw is acceptable (e.g. a final synthesis call
/// that must go through regardless).
#[derive(Debug, Clone)]
pub struct TokenBudget {
    pub name: String,
    total: u64,
    used: u64,
}

impl TokenBudget {
    pub fn new(name: impl Into<String>, total: u64) -> Self {
        Self {
            name: name.into(),
            total,
            used: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    /// Succeeds iff `used + n <= total`; `used` is unchanged on failure.
    pub fn allocate(&mut self, n: u64) -> bool {
        match self.used.checked_add(n) {
            Some(next) if next <= self.total => {
                self.used = next;
                true
            }
            _ => false,
        }
    }

    /// Always succeeds; may push `used` past `total`. Caller takes
    /// responsibility for the overdraw.
    pub fn force_allocate(&mut self, n: u64) {
        self.used = self.used.saturating_add(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_ceil_division() {
        let estimator = TokenEstimator::new(4).unwrap();
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcde"), 2);
        assert_eq!(estimator.estimate(""), 0);
    }

    #[test]
    fn estimate_batch_sums_individual_estimates() {
        let estimator = TokenEstimator::new(4).unwrap();
        assert_eq!(estimator.estimate_batch(&["abcd", "abcde"]), 3);
    }

    #[test]
    fn truncate_to_tokens_leaves_margin_and_marks_truncation() {
        let estimator = TokenEstimator::new(1).unwrap();
        let text = "0123456789";
        let truncated = estimator.truncate_to_tokens(text, 10);
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn truncate_to_tokens_is_noop_when_already_within_budget() {
        let estimator = TokenEstimator::new(4).unwrap();
        let text = "short";
        assert_eq!(estimator.truncate_to_tokens(text, 100), text);
    }

    #[test]
    fn allocate_succeeds_exactly_at_the_boundary() {
        let mut budget = TokenBudget::new("planning", 100);
        assert!(budget.allocate(100));
        assert_eq!(budget.used(), 100);
        assert!(!budget.allocate(1));
        assert_eq!(budget.used(), 100, "failed allocation must not mutate used");
    }

    #[test]
    fn force_allocate_always_succeeds() {
        let mut budget = TokenBudget::new("synthesis", 10);
        budget.force_allocate(50);
        assert_eq!(budget.used(), 50);
    }
}
