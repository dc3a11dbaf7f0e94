//! Built-in sample emails for the CLI demo.

use crate::pipeline::types::EmailRecord;

const RECIPIENT: &str = "John Doe <john.doe@company.com>";

/// The demo emails: a company announcement, a status update and a direct
/// question.
pub fn all() -> Vec<EmailRecord> {
    vec![
        EmailRecord::new(
            "Alice Jones <alice.jones@bar.com>",
            RECIPIENT,
            "Xmas Party Theme",
            "Hi Team,\n\nLetting you know that our annual Christmas party is coming up. \
The theme is Xmas Movies.\n\nBest,\nAlice",
        ),
        EmailRecord::new(
            "Alice Jones <alice.jones@company.com>",
            RECIPIENT,
            "Project Update",
            "Hi Team,\n\nLetting you know that the billing dashboard project is now live. \
Kudos to the team for delivering on time! @Monitoring team, please inform if any \
critical issues arise.\n\nBest,\nAlice",
        ),
        EmailRecord::new(
            "Alice Jones <alice.jones@bar.com>",
            RECIPIENT,
            "Quick question about API documentation",
            "Hi John,\n\nUrgent issue - your service is down. Is there a reason why",
        ),
    ]
}

/// Sample at `index`, if any.
pub fn sample(index: usize) -> Option<EmailRecord> {
    all().into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_distinct_samples() {
        let samples = all();
        assert_eq!(samples.len(), 3);
        assert_ne!(samples[0].identity_key(), samples[1].identity_key());
        assert_eq!(sample(2).unwrap().subject, "Quick question about API documentation");
        assert!(sample(3).is_none());
    }
}
