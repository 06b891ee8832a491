//! Per-client, per-frame input buffering with prediction.
//!
//! Inputs arrive stamped with a frame (from the transport's ordered tick)
//! or unstamped (side-channel inputs, stamped with the next unprocessed
//! frame by the coordinator before insertion). For each simulated frame the
//! coordinator [`gather`](InputBuffer::gather)s the inputs in ascending
//! `(clientId, seq)` order; clients with no input for the frame are
//! predicted by repeating their most recent earlier input.
//!
//! Predictions are recorded. When a late input arrives for an already
//! simulated frame, it is compared against what was predicted: a matching
//! input needs no correction, a differing one marks the rollback frame.
//! Prediction is computed from the buffered history rather than a running
//! cursor, so re-gathering during resimulation yields exactly the inputs a
//! peer that had them in time would have used.

use std::collections::BTreeMap;

use unison_wire::Value;

/// One stored input payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredInput {
    /// Transport sequence number.
    pub seq: u32,
    /// Full input payload.
    pub data: Value,
}

/// Outcome of inserting an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The input is for the current frame or later; no correction needed.
    Scheduled,
    /// The input is late but matches what was predicted; no correction
    /// needed.
    LateMatched,
    /// The input is late and differs from the prediction; a rollback to its
    /// frame has been marked.
    LateRollbackMarked,
}

/// Per-client, per-frame input storage.
#[derive(Debug, Default)]
pub struct InputBuffer {
    /// frame -> client -> inputs sorted ascending by seq.
    by_frame: BTreeMap<u32, BTreeMap<u32, Vec<StoredInput>>>,
    /// frame -> client -> the payload that was predicted for that slot.
    predictions: BTreeMap<u32, BTreeMap<u32, Value>>,
    /// Earliest frame whose prediction was contradicted by a late input.
    pending_rollback: Option<u32>,
    /// Highest sequence number ever inserted.
    max_seq: u32,
}

impl InputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an input for `(frame, client)`.
    ///
    /// `current_frame` is the next frame the simulation will run; anything
    /// below it is late and is checked against the recorded prediction.
    pub fn insert(
        &mut self,
        frame: u32,
        client: u32,
        seq: u32,
        data: Value,
        current_frame: u32,
    ) -> InsertOutcome {
        self.max_seq = self.max_seq.max(seq);

        let slot = self.by_frame.entry(frame).or_default().entry(client).or_default();
        let pos = slot.partition_point(|s| s.seq <= seq);
        slot.insert(pos, StoredInput { seq, data: data.clone() });

        if frame >= current_frame {
            return InsertOutcome::Scheduled;
        }

        let predicted = self
            .predictions
            .get(&frame)
            .and_then(|clients| clients.get(&client));
        if predicted == Some(&data) {
            InsertOutcome::LateMatched
        } else {
            self.pending_rollback = Some(match self.pending_rollback {
                Some(existing) => existing.min(frame),
                None => frame,
            });
            InsertOutcome::LateRollbackMarked
        }
    }

    /// Gather the inputs to apply for `frame`, in ascending `(client, seq)`
    /// order. `clients` must be the active clients sorted ascending by
    /// interned id -- the canonical ordering.
    ///
    /// Clients with no buffered input for the frame get a prediction:
    /// their most recent input from an earlier frame, or `Value::Null` if
    /// they have never sent one. Predictions are recorded so late arrivals
    /// can be checked against them.
    pub fn gather(&mut self, frame: u32, clients: &[u32]) -> Vec<(u32, Value)> {
        debug_assert!(clients.windows(2).all(|w| w[0] < w[1]), "clients not sorted");
        let mut out = Vec::new();
        for &client in clients {
            let real = self
                .by_frame
                .get(&frame)
                .and_then(|by_client| by_client.get(&client));
            match real {
                Some(inputs) if !inputs.is_empty() => {
                    for input in inputs {
                        out.push((client, input.data.clone()));
                    }
                }
                _ => {
                    let predicted = self.latest_before(frame, client).unwrap_or(Value::Null);
                    self.predictions
                        .entry(frame)
                        .or_default()
                        .insert(client, predicted.clone());
                    out.push((client, predicted));
                }
            }
        }
        out
    }

    /// The most recent input a client sent for any frame before `frame`.
    fn latest_before(&self, frame: u32, client: u32) -> Option<Value> {
        self.by_frame
            .range(..frame)
            .rev()
            .find_map(|(_, by_client)| {
                by_client
                    .get(&client)
                    .and_then(|inputs| inputs.last())
                    .map(|input| input.data.clone())
            })
    }

    /// Whether every listed client has a real input for `frame`.
    pub fn is_confirmed(&self, frame: u32, clients: &[u32]) -> bool {
        clients.iter().all(|client| {
            self.by_frame
                .get(&frame)
                .and_then(|by_client| by_client.get(client))
                .is_some_and(|inputs| !inputs.is_empty())
        })
    }

    /// Take the pending rollback frame, clearing it.
    pub fn take_pending_rollback(&mut self) -> Option<u32> {
        self.pending_rollback.take()
    }

    /// The pending rollback frame without clearing it.
    pub fn pending_rollback(&self) -> Option<u32> {
        self.pending_rollback
    }

    /// Highest sequence number inserted so far.
    pub fn max_seq(&self) -> u32 {
        self.max_seq
    }

    /// Drop inputs and predictions older than `frame`.
    pub fn prune_before(&mut self, frame: u32) {
        self.by_frame = self.by_frame.split_off(&frame);
        self.predictions = self.predictions.split_off(&frame);
    }

    /// Number of frames with buffered inputs.
    pub fn buffered_frames(&self) -> usize {
        self.by_frame.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
