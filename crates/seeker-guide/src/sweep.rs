use crate::{GuidanceError, Position};

/// Number of whole fractions in `[0, 1)`: 0.1 -> 10.
pub fn steps_for(fraction: f64) -> Result<u32, GuidanceError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(GuidanceError::SweepFraction(fraction));
    }
    Ok(((1.0 / fraction).round() as u32).max(1))
}

/// Linear interpolation `start + t * (target - start)` for `t = 0, 1/n, ..`
/// up to but excluding 1, followed by the target itself.
#[derive(Debug, Clone)]
pub struct LinearSweep {
    start: Position,
    target: Position,
    steps: u32,
    index: u32,
}

impl LinearSweep {
    pub fn new(start: Position, target: Position, fraction: f64) -> Result<Self, GuidanceError> {
        Ok(Self::with_steps(start, target, steps_for(fraction)?))
    }

    pub fn with_steps(start: Position, target: Position, steps: u32) -> Self {
        Self { start, target, steps: steps.max(1), index: 0 }
    }

    pub fn target(&self) -> Position {
        self.target
    }
}

impl Iterator for LinearSweep {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.index > self.steps {
            return None;
        }
        let i = self.index;
        self.index += 1;
        if i == self.steps {
            return Some(self.target);
        }
        let t = i as f64 / self.steps as f64;
        Some(self.start + (self.target - self.start) * t)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.steps + 1).saturating_sub(self.index) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for LinearSweep {}
