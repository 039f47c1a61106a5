//! One check-inbox pass and the poll loop that drives it.
//!
//! `check_inbox` is generic over the mailbox and reply transport so it can
//! run against in-memory fakes in tests; `spawn_poll_loop` wires the real
//! IMAP/SMTP implementations to a tokio interval. Cycles are serialized:
//! the loop awaits each cycle before the next tick, and ticks that fire
//! mid-cycle are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ProtocolError;
use crate::mailbox::{ImapSession, Mailbox};
use crate::responder::{self, ReplyTransport, SmtpReplier};

/// Counters for one completed pass over the unread messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub listed: usize,
    pub urgent: usize,
    pub replied: usize,
    pub reply_failures: usize,
    pub mark_failures: usize,
}

/// Run one pass: list unread, classify, reply to urgent messages, mark
/// everything read.
///
/// Per-message failures (reply delivery, mark-read) are logged and counted;
/// they never abort the batch. Only a failed listing aborts the pass.
pub fn check_inbox<M, R>(
    mailbox: &mut M,
    replier: &R,
    keywords: &[String],
) -> Result<CycleOutcome, ProtocolError>
where
    M: Mailbox,
    R: ReplyTransport,
{
    let messages = mailbox.list_unread()?;
    let mut outcome = CycleOutcome {
        listed: messages.len(),
        ..CycleOutcome::default()
    };

    if messages.is_empty() {
        info!("No unread messages");
        return Ok(outcome);
    }
    info!("Found {} unread message(s)", messages.len());

    for message in &messages {
        let urgent = responder::is_urgent(message, keywords);
        info!(
            sender = %message.sender,
            subject = %message.subject,
            urgent,
            "Processing message"
        );

        if urgent {
            outcome.urgent += 1;
            match replier.send_reply(message) {
                Ok(()) => outcome.replied += 1,
                Err(e) => {
                    outcome.reply_failures += 1;
                    error!(sender = %message.sender, "Failed to send auto-reply: {e}");
                }
            }
        }

        // Marked read whether or not the reply went out.
        if let Err(e) = mailbox.mark_read(&message.uid) {
            outcome.mark_failures += 1;
            warn!(uid = %message.uid, "Failed to mark message read: {e}");
        }
    }

    Ok(outcome)
}

/// Run one cycle against the real mailbox: connect, check, logout.
///
/// Blocking; call from `spawn_blocking`. Session establishment failure
/// aborts only this cycle.
pub fn run_cycle(config: &Config) -> crate::error::Result<CycleOutcome> {
    let mut session = ImapSession::connect(config)?;
    let replier = SmtpReplier::new(config.clone());
    let outcome = check_inbox(&mut session, &replier, &config.keywords)?;
    session.logout();
    Ok(outcome)
}

/// Spawn the poll loop: an immediate cycle, then one per interval.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poll_loop(config: Config) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Checking inbox every {}s on {}",
            config.poll_interval_secs, config.imap_host
        );

        let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll loop shutting down");
                return;
            }

            let cfg = config.clone();
            match tokio::task::spawn_blocking(move || run_cycle(&cfg)).await {
                Ok(Ok(outcome)) => {
                    info!(
                        listed = outcome.listed,
                        urgent = outcome.urgent,
                        replied = outcome.replied,
                        reply_failures = outcome.reply_failures,
                        mark_failures = outcome.mark_failures,
                        "Cycle complete"
                    );
                }
                Ok(Err(e)) => error!("Cycle failed: {e}"),
                Err(e) => error!("Cycle task panicked: {e}"),
            }
        }
    });

    (handle, shutdown_flag)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::default_keywords;
    use crate::error::DeliveryError;
    use crate::mailbox::MailMessage;

    fn message(uid: &str, sender: &str, subject: &str, body: &str) -> MailMessage {
        MailMessage {
            uid: uid.to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            message_id: None,
        }
    }

    #[derive(Default)]
    struct FakeMailbox {
        messages: Vec<MailMessage>,
        marked: Vec<String>,
        fail_mark_for: Vec<String>,
    }

    impl Mailbox for FakeMailbox {
        fn list_unread(&mut self) -> Result<Vec<MailMessage>, ProtocolError> {
            Ok(self.messages.clone())
        }

        fn mark_read(&mut self, uid: &str) -> Result<(), ProtocolError> {
            if self.fail_mark_for.iter().any(|u| u == uid) {
                return Err(ProtocolError::CommandRejected {
                    command: format!("STORE {uid} +FLAGS (\\Seen)"),
                    response: "NO no such message".to_string(),
                });
            }
            self.marked.push(uid.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeReplier {
        sent_to: RefCell<Vec<String>>,
        fail: bool,
    }

    impl ReplyTransport for FakeReplier {
        fn send_reply(&self, message: &MailMessage) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Transport(
                    "simulated transport failure".to_string(),
                ));
            }
            self.sent_to.borrow_mut().push(message.sender.clone());
            Ok(())
        }
    }

    #[test]
    fn every_listed_message_ends_marked_read() {
        let mut mailbox = FakeMailbox {
            messages: vec![
                message("1", "alice@example.com", "URGENT: server down", ""),
                message("2", "bob@example.com", "Lunch?", "Free at noon?"),
            ],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier::default();

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(mailbox.marked, vec!["1", "2"]);
        assert_eq!(outcome.listed, 2);
        assert_eq!(outcome.urgent, 1);
        assert_eq!(outcome.replied, 1);
    }

    #[test]
    fn urgent_body_triggers_exactly_one_reply() {
        let mut mailbox = FakeMailbox {
            messages: vec![message("1", "alice@example.com", "Question", "Please help asap")],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier::default();

        check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(*replier.sent_to.borrow(), vec!["alice@example.com"]);
        assert_eq!(mailbox.marked, vec!["1"]);
    }

    #[test]
    fn routine_message_gets_no_reply_but_is_marked_read() {
        let mut mailbox = FakeMailbox {
            messages: vec![message("1", "bob@example.com", "Lunch?", "Free at noon?")],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier::default();

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert!(replier.sent_to.borrow().is_empty());
        assert_eq!(mailbox.marked, vec!["1"]);
        assert_eq!(outcome.urgent, 0);
    }

    #[test]
    fn reply_failure_still_marks_read_and_continues() {
        let mut mailbox = FakeMailbox {
            messages: vec![
                message("1", "alice@example.com", "URGENT", "server down"),
                message("2", "bob@example.com", "also urgent", ""),
            ],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier {
            fail: true,
            ..FakeReplier::default()
        };

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(mailbox.marked, vec!["1", "2"]);
        assert_eq!(outcome.urgent, 2);
        assert_eq!(outcome.replied, 0);
        assert_eq!(outcome.reply_failures, 2);
    }

    #[test]
    fn mark_read_failure_does_not_abort_the_batch() {
        let mut mailbox = FakeMailbox {
            messages: vec![
                message("1", "alice@example.com", "URGENT", ""),
                message("2", "bob@example.com", "help needed", ""),
            ],
            fail_mark_for: vec!["1".to_string()],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier::default();

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(mailbox.marked, vec!["2"]);
        assert_eq!(outcome.mark_failures, 1);
        assert_eq!(
            *replier.sent_to.borrow(),
            vec!["alice@example.com", "bob@example.com"]
        );
    }

    #[test]
    fn unparseable_body_still_classifies_on_subject() {
        let mut mailbox = FakeMailbox {
            messages: vec![message("1", "carol@example.com", "URGENT report attached", "")],
            ..FakeMailbox::default()
        };
        let replier = FakeReplier::default();

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(outcome.urgent, 1);
        assert_eq!(outcome.replied, 1);
        assert_eq!(mailbox.marked, vec!["1"]);
    }

    #[test]
    fn empty_inbox_is_a_noop() {
        let mut mailbox = FakeMailbox::default();
        let replier = FakeReplier::default();

        let outcome = check_inbox(&mut mailbox, &replier, &default_keywords()).unwrap();

        assert_eq!(outcome, CycleOutcome::default());
        assert!(mailbox.marked.is_empty());
        assert!(replier.sent_to.borrow().is_empty());
    }
}
