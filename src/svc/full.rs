use super::{DecodeTargets, FramePattern, GenericFrameInfo, LayerFrameConfig};
use super::{ScalableVideoController, StreamLayersConfig, VideoBitrateAllocation};

/// Full SVC: every spatial layer predicts from the layer below on every picture.
///
/// Covers `L1T1` to `L3T3`.
#[derive(Debug)]
pub struct FullSvc {
    targets: DecodeTargets,
    last_pattern: FramePattern,
    can_reference_t0: [bool; super::MAX_SPATIAL_LAYERS],
    can_reference_t1: [bool; super::MAX_SPATIAL_LAYERS],
}

impl FullSvc {
    /// Controller for the given layer counts, all layers active.
    pub fn new(num_spatial_layers: usize, num_temporal_layers: usize) -> Self {
        FullSvc {
            targets: DecodeTargets::new(num_spatial_layers, num_temporal_layers),
            last_pattern: FramePattern::None,
            can_reference_t0: Default::default(),
            can_reference_t1: Default::default(),
        }
    }

    fn t0_configs(&mut self, pattern: FramePattern) -> Vec<LayerFrameConfig> {
        let mut configs = vec![];
        let mut spatial_dependency = None;

        // No temporal references across T0 on higher temporal layers.
        self.can_reference_t1 = Default::default();

        for sid in 0..self.targets.num_spatial {
            if !self.targets.is_active(sid, 0) {
                // Next frame of this layer can't use a potentially old frame.
                self.can_reference_t0[sid] = false;
                continue;
            }

            let mut config = LayerFrameConfig::new()
                .with_id(pattern.id())
                .with_spatial_id(sid as u8)
                .with_temporal_id(0);

            if let Some(dep) = spatial_dependency {
                config = config.reference(dep);
            } else if pattern == FramePattern::Key {
                config = config.keyframe();
            }

            let buffer = self.targets.buffer_index(sid, 0);
            config = if self.can_reference_t0[sid] {
                config.reference_and_update(buffer)
            } else {
                config.update(buffer)
            };

            spatial_dependency = Some(buffer);
            configs.push(config);
        }

        configs
    }

    fn t1_configs(&self) -> Vec<LayerFrameConfig> {
        let mut configs = vec![];
        let mut spatial_dependency = None;
        let t = &self.targets;

        for sid in 0..t.num_spatial {
            if !t.is_active(sid, 1) || !self.can_reference_t0[sid] {
                continue;
            }

            let mut config = LayerFrameConfig::new()
                .with_id(FramePattern::DeltaT1.id())
                .with_spatial_id(sid as u8)
                .with_temporal_id(1)
                .reference(t.buffer_index(sid, 0));

            if let Some(dep) = spatial_dependency {
                config = config.reference(dep);
            }

            // Top layer frames are never referenced when there is no T2.
            if t.num_temporal > 2 || sid < t.num_spatial - 1 {
                config = config.update(t.buffer_index(sid, 1));
            }

            spatial_dependency = Some(t.buffer_index(sid, 1));
            configs.push(config);
        }

        configs
    }

    fn t2_configs(&self, pattern: FramePattern) -> Vec<LayerFrameConfig> {
        let mut configs = vec![];
        let mut spatial_dependency = None;
        let t = &self.targets;

        for sid in 0..t.num_spatial {
            if !t.is_active(sid, 2) || !self.can_reference_t0[sid] {
                continue;
            }

            let temporal = if pattern == FramePattern::DeltaT2B && self.can_reference_t1[sid] {
                t.buffer_index(sid, 1)
            } else {
                t.buffer_index(sid, 0)
            };

            let mut config = LayerFrameConfig::new()
                .with_id(pattern.id())
                .with_spatial_id(sid as u8)
                .with_temporal_id(2)
                .reference(temporal);

            if let Some(dep) = spatial_dependency {
                config = config.reference(dep);
            }

            if sid < t.num_spatial - 1 {
                config = config.update(t.buffer_index(sid, 2));
            }

            spatial_dependency = Some(t.buffer_index(sid, 2));
            configs.push(config);
        }

        configs
    }
}

impl ScalableVideoController for FullSvc {
    fn stream_config(&self) -> StreamLayersConfig {
        StreamLayersConfig::halving(self.targets.num_spatial, self.targets.num_temporal)
    }

    fn next_frame_config(&mut self, restart: bool) -> Vec<LayerFrameConfig> {
        if !self.targets.any() {
            self.last_pattern = FramePattern::None;
            return vec![];
        }

        if self.last_pattern == FramePattern::None || restart {
            self.can_reference_t0 = Default::default();
            self.last_pattern = FramePattern::None;
        }

        let pattern = self.targets.next_pattern(self.last_pattern);

        let configs = match pattern {
            FramePattern::Key | FramePattern::DeltaT0 => self.t0_configs(pattern),
            FramePattern::DeltaT1 => self.t1_configs(),
            FramePattern::DeltaT2A | FramePattern::DeltaT2B => self.t2_configs(pattern),
            FramePattern::None => unreachable!("Next pattern is never None"),
        };

        if configs.is_empty() && !restart {
            warn!(
                "No config for L{}T{} with active decode targets {:b}, restarting",
                self.targets.num_spatial,
                self.targets.num_temporal,
                self.targets.bits()
            );
            return self.next_frame_config(true);
        }

        configs
    }

    fn on_encode_done(&mut self, config: &LayerFrameConfig) -> GenericFrameInfo {
        // The pattern only advances once something was encoded, so a dropped
        // temporal instant repeats the same pattern.
        self.last_pattern = FramePattern::from_id(config.id());

        let sid = config.spatial_id() as usize;
        match config.temporal_id() {
            0 => self.can_reference_t0[sid] = true,
            1 => self.can_reference_t1[sid] = true,
            _ => {}
        }

        let part_of_chain = (0..self.targets.num_spatial)
            .map(|s| config.temporal_id() == 0 && sid <= s)
            .collect();

        GenericFrameInfo {
            spatial_id: config.spatial_id(),
            temporal_id: config.temporal_id(),
            encoder_buffers: config.buffers().to_vec(),
            part_of_chain,
            active_decode_targets: self.targets.bits(),
        }
    }

    fn on_rates_updated(&mut self, bitrates: &VideoBitrateAllocation) {
        for sid in 0..self.targets.num_spatial {
            // A temporal layer needs rate on all layers below it.
            let mut active = true;
            for tid in 0..self.targets.num_temporal {
                active = active && !bitrates.bitrate(sid, tid).is_zero();
                self.targets.set_active(sid, tid, active);
            }
        }
    }
}
