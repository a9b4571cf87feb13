//! Command queue — an explicit, bounded, testable sum type describing
//! every external mutation.

use std::collections::VecDeque;

use glam::Vec3;

use crate::config::{GravityMode, TransferMode};
use crate::solver::boundary::{BoundaryShape, CollisionMode};
use crate::solver::emitter::Emitter;
use crate::solver::forces::ForceField;

/// Every external mutation the core accepts, draining once at frame start.
#[derive(Debug, Clone)]
pub enum Command {
    SetBoundaryShape(BoundaryShape),
    SetBoundaryEnabled(bool),
    SetBoundaryVisible(bool),
    SetWallStiffness(f32),
    SetRestitution(f32),
    SetFriction(f32),
    SetCollisionMode(CollisionMode),
    SetGridSize(Vec3),
    SetParticleCount(u32),
    SetGravityMode(GravityMode),
    SetTransferMode(TransferMode),
    SetAudioReactive(bool),
    ApplyForceField(ForceField),
    RemoveForceField(usize),
    ApplyEmitter(Emitter),
    RemoveEmitter(usize),
    PerformanceOverride(crate::performance::Tier),
    ClearPerformanceOverride,
}

/// Bounded FIFO drained once per frame by `FramePipeline::tick`.
pub struct CommandQueue {
    queue: VecDeque<Command>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a command onto the queue. Returns `false` and drops the oldest
    /// pending command if the queue was already at capacity, so a
    /// misbehaving producer can never block the frame loop.
    pub fn push(&mut self, command: Command) -> bool {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.queue.push_back(command);
            return false;
        }
        self.queue.push_back(command);
        true
    }

    /// Drain all pending commands in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = Command> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut q = CommandQueue::new(2);
        assert!(q.push(Command::SetWallStiffness(0.1)));
        assert!(q.push(Command::SetWallStiffness(0.2)));
        assert!(!q.push(Command::SetWallStiffness(0.3)));
        assert_eq!(q.len(), 2);
        let drained: Vec<_> = q.drain().collect();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn drain_empties_queue() {
        let mut q = CommandQueue::new(4);
        q.push(Command::SetBoundaryEnabled(true));
        q.push(Command::SetBoundaryVisible(false));
        let _: Vec<_> = q.drain().collect();
        assert!(q.is_empty());
    }
}
