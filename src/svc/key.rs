use super::{DecodeTargets, FramePattern, GenericFrameInfo, LayerFrameConfig, MAX_SPATIAL_LAYERS};
use super::{ScalableVideoController, StreamLayersConfig, VideoBitrateAllocation};

/// Key SVC: spatial layers depend on each other only on key pictures.
///
/// Covers `L2T1_KEY` to `L3T3_KEY`. Re-enabling a spatial layer requires a key picture.
#[derive(Debug)]
pub struct KeySvc {
    targets: DecodeTargets,
    last_pattern: FramePattern,
    spatial_id_is_enabled: [bool; MAX_SPATIAL_LAYERS],
    can_reference_t1: [bool; MAX_SPATIAL_LAYERS],
}

impl KeySvc {
    /// Controller for the given layer counts, all layers active.
    pub fn new(num_spatial_layers: usize, num_temporal_layers: usize) -> Self {
        KeySvc {
            targets: DecodeTargets::new(num_spatial_layers, num_temporal_layers),
            last_pattern: FramePattern::None,
            spatial_id_is_enabled: Default::default(),
            can_reference_t1: Default::default(),
        }
    }

    fn key_configs(&mut self) -> Vec<LayerFrameConfig> {
        let mut configs = vec![];
        let mut spatial_dependency = None;

        self.spatial_id_is_enabled = Default::default();
        self.can_reference_t1 = Default::default();

        for sid in 0..self.targets.num_spatial {
            if !self.targets.is_active(sid, 0) {
                continue;
            }

            let mut config = LayerFrameConfig::new()
                .with_id(FramePattern::Key.id())
                .with_spatial_id(sid as u8)
                .with_temporal_id(0);

            config = match spatial_dependency {
                Some(dep) => config.reference(dep),
                None => config.keyframe(),
            };

            let buffer = self.targets.buffer_index(sid, 0);
            configs.push(config.update(buffer));

            self.spatial_id_is_enabled[sid] = true;
            spatial_dependency = Some(buffer);
        }

        configs
    }

    fn t0_configs(&mut self) -> Vec<LayerFrameConfig> {
        let mut configs = vec![];

        // No temporal references across T0 on higher temporal layers.
        self.can_reference_t1 = Default::default();

        for sid in 0..self.targets.num_spatial {
            if !self.targets.is_active(sid, 0) {
                self.spatial_id_is_enabled[sid] = false;
                continue;
            }
            configs.push(
                LayerFrameConfig::new()
                    .with_id(FramePattern::DeltaT0.id())
                    .with_spatial_id(sid as u8)
                    .with_temporal_id(0)
                    .reference_and_update(self.targets.buffer_index(sid, 0)),
            );
        }

        configs
    }

    fn t1_configs(&self) -> Vec<LayerFrameConfig> {
        let t = &self.targets;

        (0..t.num_spatial)
            .filter(|sid| t.is_active(*sid, 1))
            .map(|sid| {
                let config = LayerFrameConfig::new()
                    .with_id(FramePattern::DeltaT1.id())
                    .with_spatial_id(sid as u8)
                    .with_temporal_id(1)
                    .reference(t.buffer_index(sid, 0));
                if t.num_temporal > 2 {
                    config.update(t.buffer_index(sid, 1))
                } else {
                    config
                }
            })
            .collect()
    }

    fn t2_configs(&self, pattern: FramePattern) -> Vec<LayerFrameConfig> {
        let t = &self.targets;

        (0..t.num_spatial)
            .filter(|sid| t.is_active(*sid, 2))
            .map(|sid| {
                let buffer = if self.can_reference_t1[sid] {
                    t.buffer_index(sid, 1)
                } else {
                    t.buffer_index(sid, 0)
                };
                LayerFrameConfig::new()
                    .with_id(pattern.id())
                    .with_spatial_id(sid as u8)
                    .with_temporal_id(2)
                    .reference(buffer)
            })
            .collect()
    }
}

impl ScalableVideoController for KeySvc {
    fn stream_config(&self) -> StreamLayersConfig {
        StreamLayersConfig::halving(self.targets.num_spatial, self.targets.num_temporal)
    }

    fn next_frame_config(&mut self, restart: bool) -> Vec<LayerFrameConfig> {
        if !self.targets.any() {
            self.last_pattern = FramePattern::None;
            return vec![];
        }

        if restart {
            self.last_pattern = FramePattern::None;
        }

        match self.targets.next_pattern(self.last_pattern) {
            FramePattern::Key => self.key_configs(),
            FramePattern::DeltaT0 => self.t0_configs(),
            FramePattern::DeltaT1 => self.t1_configs(),
            p @ (FramePattern::DeltaT2A | FramePattern::DeltaT2B) => self.t2_configs(p),
            FramePattern::None => unreachable!("Next pattern is never None"),
        }
    }

    fn on_encode_done(&mut self, config: &LayerFrameConfig) -> GenericFrameInfo {
        self.last_pattern = FramePattern::from_id(config.id());

        let sid = config.spatial_id() as usize;
        if config.temporal_id() == 1 {
            self.can_reference_t1[sid] = true;
        }

        let is_key = config.is_keyframe() || self.last_pattern == FramePattern::Key;
        let part_of_chain = (0..self.targets.num_spatial)
            .map(|s| {
                if is_key {
                    sid <= s
                } else {
                    config.temporal_id() == 0 && sid == s
                }
            })
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
            let mut active = !bitrates.bitrate(sid, 0).is_zero();
            self.targets.set_active(sid, 0, active);

            if !self.spatial_id_is_enabled[sid] && active {
                // Re-enabling a spatial layer needs a key picture.
                self.last_pattern = FramePattern::None;
            }

            for tid in 1..self.targets.num_temporal {
                active = active && !bitrates.bitrate(sid, tid).is_zero();
                self.targets.set_active(sid, tid, active);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::Bitrate;
    use crate::svc::CodecBufferUsage;

    fn encode_all(svc: &mut KeySvc) -> Vec<LayerFrameConfig> {
        let configs = svc.next_frame_config(false);
        for c in &configs {
            svc.on_encode_done(c);
        }
        configs
    }

    fn rates(layers: usize) -> VideoBitrateAllocation {
        let mut r = VideoBitrateAllocation::new();
        for sid in 0..layers {
            r.set_bitrate(sid, 0, Bitrate::kbps(100));
            r.set_bitrate(sid, 1, Bitrate::kbps(50));
        }
        r
    }

    #[test]
    fn key_picture_predicts_between_layers() {
        let mut svc = KeySvc::new(2, 1);
        let key = encode_all(&mut svc);
        assert!(key[0].is_keyframe());
        assert!(!key[1].is_keyframe());
        assert_eq!(
            key[1].buffers()[0],
            CodecBufferUsage {
                id: 0,
                referenced: true,
                updated: false
            }
        );
    }

    #[test]
    fn delta_pictures_are_independent_per_layer() {
        let mut svc = KeySvc::new(2, 2);
        encode_all(&mut svc);
        let t1 = encode_all(&mut svc);
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[1].temporal_id(), 1);
        assert_eq!(t1[1].buffers().len(), 1);
        assert_eq!(t1[1].buffers()[0].id, 1);

        let t0 = encode_all(&mut svc);
        assert_eq!(t0[1].buffers().len(), 1);
        assert!(t0[1].buffers()[0].referenced && t0[1].buffers()[0].updated);
    }

    #[test]
    fn reenabling_layer_needs_key_picture() {
        let mut svc = KeySvc::new(2, 2);
        encode_all(&mut svc);

        svc.on_rates_updated(&rates(1));
        let t1 = encode_all(&mut svc);
        assert_eq!(t1.len(), 1);
        let t0 = encode_all(&mut svc);
        assert!(!t0[0].is_keyframe());

        svc.on_rates_updated(&rates(2));
        let key = encode_all(&mut svc);
        assert!(key[0].is_keyframe());
        assert_eq!(key.len(), 2);
    }

    #[test]
    fn chain_on_key_and_t0() {
        let mut svc = KeySvc::new(2, 1);
        let key = svc.next_frame_config(false);
        assert_eq!(svc.on_encode_done(&key[1]).part_of_chain, vec![false, true]);
        let t0 = svc.next_frame_config(false);
        assert_eq!(svc.on_encode_done(&t0[0]).part_of_chain, vec![true, false]);
    }
}
