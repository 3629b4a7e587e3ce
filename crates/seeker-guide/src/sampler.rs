use crate::{Axes, Position};

/// Per-axis position error, `target - current`.
pub type ErrorVector = Position;

/// Pure per-axis subtraction. Axes outside the controlled set read as zero.
pub fn sample(axes: Axes, current: &Position, target: &Position) -> ErrorVector {
    let mut e = target - current;
    if axes == Axes::Planar {
        e.z = 0.0;
    }
    e
}

#[derive(Debug, Clone)]
pub struct ErrorSampler {
    axes: Axes,
    last: Option<ErrorVector>,
}

impl ErrorSampler {
    pub fn new(axes: Axes) -> Self {
        Self { axes, last: None }
    }

    pub fn sample(&mut self, current: &Position, target: &Position) -> ErrorVector {
        let e = sample(self.axes, current, target);
        self.last = Some(e);
        e
    }

    pub fn last(&self) -> Option<ErrorVector> {
        self.last
    }

    pub fn axes(&self) -> Axes {
        self.axes
    }
}
