//! Termination detection for a running negotiation.

use std::collections::HashMap;

/// Decides from per-agent message counters whether the system has
/// quiesced. Fed by the observer on every stats report; must be reset at
/// the start of every negotiation.
pub trait TerminationDetector: Send {
    fn reset(&mut self);

    /// Record one report and return whether termination is detected.
    fn update(&mut self, agent: &str, msgs_in: u64, msgs_out: u64) -> bool;
}

/// Message-counter detection.
///
/// The negotiation has terminated when the system-wide number of outgoing
/// messages equals the system-wide number of processed incoming messages.
/// Agents report only after activity and count outgoing messages before
/// they are handed to the transport, so the balanced state is first
/// observable exactly when no message is left in flight.
#[derive(Default)]
pub struct MessageCounter {
    counts: HashMap<String, (u64, u64)>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn totals(&self) -> (u64, u64) {
        self.counts
            .values()
            .fold((0, 0), |(ins, outs), (i, o)| (ins + i, outs + o))
    }
}

impl TerminationDetector for MessageCounter {
    fn reset(&mut self) {
        self.counts.clear();
    }

    fn update(&mut self, agent: &str, msgs_in: u64, msgs_out: u64) -> bool {
        self.counts.insert(agent.to_owned(), (msgs_in, msgs_out));
        let (total_in, total_out) = self.totals();
        total_in == total_out
    }
}
