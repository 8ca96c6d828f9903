// src/plan/step.rs

//! Build steps and the signalling between them.
//!
//! Each step owns a [`Gate`] that counts completion signals from its parents,
//! and one subscriber sender per child. A parent publishes exactly one
//! terminal [`StepOutcome`] to every subscriber; a child opens only after it
//! has seen `Succeeded` from every parent.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::image::{Image, ImageRef};

/// Terminal state of a step, as published to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// Never ran because a parent did not succeed.
    Skipped,
    /// Never finished because the build was cancelled.
    Cancelled,
}

impl StepOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::Failed => "failed",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of waiting on a step's parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    /// Every parent succeeded; the step may run.
    Open,
    /// A parent failed, was skipped, or went away without signalling.
    Skipped,
    /// The build token was cancelled, or a parent was cancelled.
    Cancelled,
}

/// Inbound fan-in counter.
///
/// Every parent gets its own sender through [`Gate::add_parent`]; the gate
/// opens once it has received `required` success signals.
#[derive(Debug)]
pub struct Gate {
    tx: Option<mpsc::UnboundedSender<StepOutcome>>,
    rx: mpsc::UnboundedReceiver<StepOutcome>,
    required: usize,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx,
            required: 0,
        }
    }

    /// Register one more parent and return the sender it must signal.
    pub fn add_parent(&mut self) -> mpsc::UnboundedSender<StepOutcome> {
        self.required += 1;
        match &self.tx {
            Some(tx) => tx.clone(),
            // Sealed: hand out a sender for a fresh, never-read channel.
            // Wiring only happens while planning, before anything waits.
            None => mpsc::unbounded_channel().0,
        }
    }

    /// Number of parents this gate waits for.
    pub fn required(&self) -> usize {
        self.required
    }

    /// Drop the gate's own sender so a parent that goes away without
    /// signalling closes the channel instead of leaving us parked.
    pub fn seal(&mut self) {
        self.tx = None;
    }

    /// Wait until every parent has succeeded, one has not, or `cancel` fires.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> GateResult {
        self.seal();

        let mut received = 0;
        while received < self.required {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateResult::Cancelled,
                signal = self.rx.recv() => match signal {
                    Some(StepOutcome::Succeeded) => {
                        received += 1;
                        trace!(received, required = self.required, "parent signal received");
                    }
                    Some(StepOutcome::Cancelled) => return GateResult::Cancelled,
                    Some(StepOutcome::Failed) | Some(StepOutcome::Skipped) => {
                        return GateResult::Skipped;
                    }
                    None => return GateResult::Skipped,
                },
            }
        }

        GateResult::Open
    }
}

/// One build unit: a rendered image plus its wiring.
#[derive(Debug)]
pub struct Step {
    image: Arc<Image>,
    label: String,
    gate: Gate,
    subscribers: Vec<mpsc::UnboundedSender<StepOutcome>>,
    children: Vec<usize>,
}

impl Step {
    pub fn new(image: Arc<Image>) -> Self {
        let label = image.id.to_string();
        Self {
            image,
            label,
            gate: Gate::new(),
            subscribers: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn id(&self) -> &ImageRef {
        &self.image.id
    }

    /// Output label used in logs and reports.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of in-plan parents this step waits for.
    pub fn inbound(&self) -> usize {
        self.gate.required()
    }

    pub fn is_top_level(&self) -> bool {
        self.inbound() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Plan indices of the steps waiting on this one.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Register `tx` to receive this step's outcome.
    pub fn subscribe(&mut self, tx: mpsc::UnboundedSender<StepOutcome>) {
        self.subscribers.push(tx);
    }

    pub(crate) fn add_parent(&mut self) -> mpsc::UnboundedSender<StepOutcome> {
        self.gate.add_parent()
    }

    pub(crate) fn push_child(&mut self, child: usize) {
        self.children.push(child);
    }

    pub async fn wait(&mut self, cancel: &CancellationToken) -> GateResult {
        self.gate.wait(cancel).await
    }

    /// Publish `outcome` to every subscriber. Subsequent calls are no-ops.
    pub fn notify(&mut self, outcome: StepOutcome) {
        for tx in self.subscribers.drain(..) {
            // A child that already gave up (cancelled) has dropped its receiver.
            let _ = tx.send(outcome);
        }
        trace!(step = %self.label, %outcome, "subscribers notified");
    }
}
