use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::Frame;

use super::protocol::sequence_greater_than;

const INITIAL_SRTT_MS: f32 = 100.0;
const INITIAL_RTT_VAR_MS: f32 = 50.0;

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub tag: Frame,
    pub send_time: Instant,
    pub acked: bool,
}

/// Result of applying one echoed ack field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOutcome {
    pub newly_acked: usize,
    pub highest_tag: Option<Frame>,
}

/// Remembers outgoing sequences until the peer echoes them back.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    has_sample: bool,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: INITIAL_SRTT_MS,
            rtt_var: INITIAL_RTT_VAR_MS,
            has_sample: false,
        }
    }

    /// Returns how many unacked packets were evicted to make room.
    pub fn track_packet(&mut self, sequence: u32, tag: Frame, now: Instant) -> usize {
        let mut evicted = 0;
        while self.pending.len() >= self.max_pending {
            if self.pending.pop_front().is_some_and(|p| !p.acked) {
                evicted += 1;
            }
        }

        self.pending.push_back(PendingPacket {
            sequence,
            tag,
            send_time: now,
            acked: false,
        });
        evicted
    }

    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32, now: Instant) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                outcome.newly_acked += 1;
                outcome.highest_tag = Some(outcome.highest_tag.map_or(pending.tag, |t| t.max(pending.tag)));

                let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
                rtt_samples.push(rtt);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        outcome
    }

    /// Drops unacked packets sent more than `timeout` before `now` and
    /// returns how many were dropped.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|p| p.acked || now.duration_since(p.send_time) <= timeout);
        before - self.pending.len()
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if !self.has_sample {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.has_sample = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Remembers incoming sequences so they can be echoed as `ack`/`ack_bits`.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    /// Returns `false` for a sequence seen recently.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff < 32 {
                self.received_bitfield = (self.received_bitfield << diff) | (1 << (diff - 1));
            } else if diff == 32 {
                self.received_bitfield = 1 << 31;
            } else {
                self.received_bitfield = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}
