//! Transport and credential ladders for report submission.

use core::fmt;

/// How the submission connection is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// Plain connection upgraded with `STARTTLS`.
    StartTls,
    /// TLS from the first byte.
    ImplicitTls,
    /// No encryption.
    Plain,
}

/// One rung of the transport ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strategy {
    /// Port to connect to
    pub port: u16,
    /// Connection security
    pub security: Security,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.security {
            Security::StartTls => "starttls",
            Security::ImplicitTls => "tls",
            Security::Plain => "plain",
        };
        write!(f, "{name}:{}", self.port)
    }
}

/// Builds the transport ladder: `STARTTLS` on the submission port, implicit
/// TLS on the secure port, then plain text.
pub fn transport_ladder(submission_port: u16, secure_port: u16, plain_port: u16) -> Vec<Strategy> {
    vec![
        Strategy {
            port: submission_port,
            security: Security::StartTls,
        },
        Strategy {
            port: secure_port,
            security: Security::ImplicitTls,
        },
        Strategy {
            port: plain_port,
            security: Security::Plain,
        },
    ]
}

/// Login names to try for one configured address.
///
/// For `user@example.com` this yields the full address, `user`, and
/// `EXAMPLE\user` (the directory-style login many corporate servers expect).
pub fn username_candidates(address: &str) -> Vec<String> {
    let address = address.trim();
    let mut candidates = vec![address.to_owned()];
    if let Some((local, domain)) = address.split_once('@') {
        candidates.push(local.to_owned());
        if let Some(label) = domain.split('.').next().filter(|label| !label.is_empty()) {
            candidates.push(format!("{}\\{local}", label.to_uppercase()));
        }
    }
    candidates.retain(|candidate| !candidate.is_empty());
    candidates.dedup();
    candidates
}

/// Expands configured `(address, password)` accounts into the ordered list of
/// `(username, password)` pairs to try, without repetitions.
pub fn credential_ladder(accounts: &[(String, String)]) -> Vec<(String, String)> {
    let mut ladder: Vec<(String, String)> = Vec::new();
    for (address, password) in accounts {
        for username in username_candidates(address) {
            let pair = (username, password.clone());
            if !ladder.contains(&pair) {
                ladder.push(pair);
            }
        }
    }
    ladder
}

#[cfg(test)]
mod test {
    use super::{Security, credential_ladder, transport_ladder, username_candidates};

    #[test]
    fn usernames_for_full_address() {
        assert_eq!(
            username_candidates("jperez@telconet.ec"),
            ["jperez@telconet.ec", "jperez", "TELCONET\\jperez"]
        );
    }

    #[test]
    fn bare_username_has_one_candidate() {
        assert_eq!(username_candidates(" first "), ["first"]);
    }

    #[test]
    fn ladder_keeps_account_order_and_drops_repeats() {
        let ladder = credential_ladder(&[
            ("first".to_owned(), "a".to_owned()),
            ("second@domain.test".to_owned(), "b".to_owned()),
            ("first".to_owned(), "a".to_owned()),
        ]);
        let usernames = ladder.iter().map(|(user, _)| user.as_str()).collect::<Vec<_>>();

        assert_eq!(
            usernames,
            ["first", "second@domain.test", "second", "DOMAIN\\second"]
        );
        assert_eq!(ladder[1].1, "b");
    }

    #[test]
    fn transports_in_fallback_order() {
        let ladder = transport_ladder(587, 465, 25);
        assert_eq!(
            ladder.iter().map(|rung| (rung.port, rung.security)).collect::<Vec<_>>(),
            [(587, Security::StartTls), (465, Security::ImplicitTls), (25, Security::Plain)]
        );
    }
}
