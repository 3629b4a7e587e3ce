use crate::{GuidanceConfig, GuidanceError};

pub fn check_gains(cfg: &GuidanceConfig) -> Result<(), GuidanceError> {
    for (axis, value) in [("planar", cfg.gains.planar), ("vertical", cfg.gains.vertical)] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(GuidanceError::Gain { axis, value });
        }
    }
    Ok(())
}

pub fn check_limits(cfg: &GuidanceConfig) -> Result<(), GuidanceError> {
    let (min, max) = (cfg.min_step, cfg.max_step);
    if !(min > 0.0 && min.is_finite() && max.is_finite() && max >= min) {
        return Err(GuidanceError::StepLimits { min, max });
    }
    if !(cfg.arrival_tolerance > 0.0 && cfg.arrival_tolerance.is_finite()) {
        return Err(GuidanceError::Tolerance(cfg.arrival_tolerance));
    }
    if !(cfg.sweep_fraction > 0.0 && cfg.sweep_fraction <= 1.0) {
        return Err(GuidanceError::SweepFraction(cfg.sweep_fraction));
    }
    Ok(())
}

/// All startup checks for the guidance section.
pub fn check_guidance(cfg: &GuidanceConfig) -> Result<(), GuidanceError> {
    check_gains(cfg)?;
    check_limits(cfg)?;
    cfg.start_position()?;
    Ok(())
}
