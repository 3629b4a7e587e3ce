use seeker_guide::{GuidanceConfig, GuidanceLaw, Position};
use seeker_proto::{AxisMap, CommandMapper, FrameEncoder, FrameFormat};
use seeker_vision::{check_vision, VisionConfig};

use crate::config::{check_loop, LoopConfig};
use crate::ControlError;

/// Everything the loop needs except its collaborators.
#[derive(Debug, Clone)]
pub struct LoopSetup {
    pub guidance: GuidanceConfig,
    pub axes: Vec<AxisMap>,
    pub format: FrameFormat,
    pub vision: VisionConfig,
    pub control: LoopConfig,
}

/// Validated law, mapper and encoder, built before any transport is opened.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub(crate) law: GuidanceLaw,
    pub(crate) start: Position,
    pub(crate) mapper: CommandMapper,
    pub(crate) encoder: FrameEncoder,
    pub(crate) vision: VisionConfig,
    pub(crate) control: LoopConfig,
}

impl LoopSetup {
    pub fn validate(&self) -> Result<Pipeline, ControlError> {
        check_loop(&self.control)?;
        check_vision(&self.vision).map_err(|e| ControlError::Configuration(format!("{:#}", e)))?;

        let law = GuidanceLaw::new(&self.guidance)?;
        let start = self.guidance.start_position()?;
        let mapper = CommandMapper::new(&self.axes)?;
        let encoder = FrameEncoder::new(self.format.clone())?;
        if let Some(n) = encoder.expected_channels() {
            if mapper.channels() != n {
                return Err(ControlError::Configuration(format!(
                    "output expects {} axes, {} mapped",
                    n,
                    mapper.channels()
                )));
            }
        }
        Ok(Pipeline { law, start, mapper, encoder, vision: self.vision.clone(), control: self.control.clone() })
    }
}

impl Pipeline {
    pub fn mapper(&self) -> &CommandMapper {
        &self.mapper
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    pub fn start(&self) -> Position {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeker_guide::Axes;
    use seeker_proto::SourceAxis;

    fn setup() -> LoopSetup {
        LoopSetup {
            guidance: GuidanceConfig::new(Axes::Planar, &[0.0, 0.0]),
            axes: vec![
                AxisMap { channel: 0, source: SourceAxis::X, range: [0.0, 640.0], invert: false },
                AxisMap { channel: 1, source: SourceAxis::Y, range: [0.0, 480.0], invert: false },
            ],
            format: FrameFormat::sbus(),
            vision: VisionConfig::default(),
            control: LoopConfig::default(),
        }
    }

    #[test]
    fn valid_setup_builds() {
        let p = setup().validate().unwrap();
        assert_eq!(p.mapper().channels(), 2);
        assert_eq!(p.start(), Position::zeros());
    }

    #[test]
    fn sbus_needs_two_axes() {
        let mut s = setup();
        s.axes.pop();
        let err = s.validate().unwrap_err();
        assert_eq!(err.to_string(), "configuration: output expects 2 axes, 1 mapped");
    }

    #[test]
    fn unstable_gain_is_a_config_error() {
        let mut s = setup();
        s.guidance.gains.planar = 1.5;
        assert!(matches!(s.validate(), Err(ControlError::Configuration(_))));
    }

    #[test]
    fn bad_vision_threshold_is_a_config_error() {
        let mut s = setup();
        s.vision.conf_threshold = 2.0;
        assert!(matches!(s.validate(), Err(ControlError::Configuration(_))));
    }
}
