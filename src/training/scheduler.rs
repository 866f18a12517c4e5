//! Learning Rate Scheduler Module
//!
//! Multi-milestone step decay, applied once per epoch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{invalid_choice, GestureError, Result};

/// Schedule families that can be named in a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    /// Decay by a fixed factor at each milestone epoch
    MultiStepLr,
}

impl SchedulerKind {
    pub const ACCEPTED: [&'static str; 1] = ["multi-step-lr"];
}

impl FromStr for SchedulerKind {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "multi-step-lr" => Ok(SchedulerKind::MultiStepLr),
            other => Err(invalid_choice("scheduler", other, &Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::MultiStepLr => write!(f, "multi-step-lr"),
        }
    }
}

/// How often the schedule advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleInterval {
    Epoch,
}

/// Learning rate schedule as a function of the epoch index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Step decay: multiply by `gamma` once for every milestone reached
    MultiStep {
        initial_lr: f64,
        gamma: f64,
        milestones: Vec<usize>,
    },
}

impl LRScheduler {
    /// Build the schedule a config names
    pub fn from_kind(
        kind: SchedulerKind,
        initial_lr: f64,
        milestones: &[usize],
        gamma: f64,
    ) -> Self {
        match kind {
            SchedulerKind::MultiStepLr => Self::multi_step(initial_lr, gamma, milestones.to_vec()),
        }
    }

    /// Create a multi-milestone step decay scheduler
    pub fn multi_step(initial_lr: f64, gamma: f64, mut milestones: Vec<usize>) -> Self {
        milestones.sort_unstable();
        Self::MultiStep {
            initial_lr,
            gamma,
            milestones,
        }
    }

    /// Get the learning rate for a given epoch.
    ///
    /// A milestone listed twice decays twice.
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::MultiStep {
                initial_lr,
                gamma,
                milestones,
            } => {
                let passed = milestones.iter().filter(|&&m| epoch >= m).count();
                initial_lr * gamma.powi(passed as i32)
            }
        }
    }
}

/// A schedule together with the epoch it is currently at
#[derive(Debug, Clone)]
pub struct EpochScheduler {
    schedule: LRScheduler,
    epoch: usize,
}

impl EpochScheduler {
    pub fn new(schedule: LRScheduler) -> Self {
        Self { schedule, epoch: 0 }
    }

    /// Learning rate for the current epoch
    pub fn current_lr(&self) -> f64 {
        self.schedule.get_lr(self.epoch)
    }

    /// Advance one epoch and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.epoch += 1;
        self.current_lr()
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn schedule(&self) -> &LRScheduler {
        &self.schedule
    }
}
