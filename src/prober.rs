//! Resolves which spelling of a query the connected firmware accepts.
//!
//! Firmware command dialects vary by model and option; rather than hardcode
//! one spelling, the prober walks an ordered [`VariantSet`] and keeps the
//! first candidate whose reply has the expected field count with every field
//! a finite number. First match wins — later candidates are never sent.

use log::{info, warn};

use crate::channel::CommandChannel;
use crate::error::ChannelError;
use crate::protocol::{parse_field, Command, VariantSet};

/// Try each candidate in order; return the first accepted one.
///
/// A rejected candidate (timeout, wrong field count, unparsable field,
/// device error text) is logged and the next is tried. Only a fatal
/// transport failure aborts early. If nothing is accepted the error carries
/// every tried variant and what came back, so the operator can diagnose the
/// dialect by hand.
pub fn resolve(
    channel: &mut CommandChannel,
    variants: &VariantSet,
    expected_fields: usize,
) -> Result<Command, ChannelError> {
    let mut tried = Vec::with_capacity(variants.len());
    let mut replies = Vec::with_capacity(variants.len());

    for candidate in variants.iter() {
        info!("probing variant: {}", candidate.text);
        tried.push(candidate.text.clone());

        let reply = match channel.execute(candidate) {
            Ok(reply) => reply,
            Err(ChannelError::Transport(t)) if !t.is_transient() => {
                return Err(ChannelError::Transport(t))
            }
            Err(err) => {
                warn!("variant {:?} failed: {err}", candidate.text);
                replies.push(format!("<{err}>"));
                continue;
            }
        };

        if reply.fields.len() != expected_fields {
            warn!(
                "variant {:?} returned {} fields, expected {expected_fields}: {:?}",
                candidate.text,
                reply.fields.len(),
                reply.text
            );
            replies.push(reply.text);
            continue;
        }

        let parsed: Result<Vec<f64>, ChannelError> = reply
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| parse_field(i, field))
            .collect();
        match parsed {
            Ok(values) => {
                info!("resolved {:?} => {values:?}", candidate.text);
                return Ok(candidate.clone());
            }
            Err(err) => {
                warn!("variant {:?} rejected: {err}", candidate.text);
                replies.push(reply.text);
            }
        }
    }

    Err(ChannelError::ProbeFailed { tried, replies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RetryPolicy;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            per_attempt_timeout: Duration::from_millis(30),
            inter_attempt_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn first_well_formed_variant_wins_and_later_ones_are_never_sent() {
        let mock = MockTransport::new(|line| {
            Some(match line {
                "A?" => "1.0,2.0".to_string(),
                "B?" => "1.0,2.0,3.0".to_string(),
                "C?" => "ERR -100".to_string(),
                other => panic!("unexpected command {other:?}"),
            })
        });
        let sent = mock.sent_log();
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let set = VariantSet::from_queries(["A?", "B?", "C?"]);

        let resolved = resolve(&mut channel, &set, 3).unwrap();
        assert_eq!(resolved.text, "B?");
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            ["A?".to_string(), "B?".to_string()]
        );
    }

    #[test]
    fn probe_failure_reports_every_variant_and_reply() {
        let mock = MockTransport::new(|line| {
            Some(match line {
                "A?" => "garbage".to_string(),
                _ => "0,\"No error\"".to_string(),
            })
        });
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let set = VariantSet::from_queries(["A?", "B?"]);

        let err = resolve(&mut channel, &set, 3).unwrap_err();
        match err {
            ChannelError::ProbeFailed { tried, replies } => {
                assert_eq!(tried, vec!["A?".to_string(), "B?".to_string()]);
                assert_eq!(replies.len(), 2);
                assert_eq!(replies[0], "garbage");
            }
            other => panic!("expected ProbeFailed, got {other:?}"),
        }
    }

    #[test]
    fn timeouts_reject_and_move_on() {
        // First variant never answers; second does.
        let mock = MockTransport::new(|line| {
            (line == "B?").then(|| "1.5,2.5,3.5".to_string())
        });
        let mut channel = CommandChannel::new(Box::new(mock), fast_policy());
        let set = VariantSet::from_queries(["A?", "B?"]);
        let resolved = resolve(&mut channel, &set, 3).unwrap();
        assert_eq!(resolved.text, "B?");
    }
}
