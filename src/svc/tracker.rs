use std::fmt;

use super::{InterLayerPredMode, LayerFrameConfig, SvcError};
use super::{MAX_P_DIFF, MAX_SPATIAL_LAYERS, NUM_BUFFERS};

/// What a codec buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceBufferSlot {
    /// Picture number (pictures since key) of the frame.
    pub pic_num: u64,
    /// Spatial layer of the frame.
    pub spatial_id: u8,
    /// Temporal layer of the frame.
    pub temporal_id: u8,
}

/// Per spatial layer reference configuration handed to the codec.
///
/// Each layer can reference three buffers, named last, golden and alt-ref, and
/// update any set of buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefFrameConfig {
    /// Buffer behind "last".
    pub lst_fb_idx: [usize; MAX_SPATIAL_LAYERS],
    /// Buffer behind "golden".
    pub gld_fb_idx: [usize; MAX_SPATIAL_LAYERS],
    /// Buffer behind "alt-ref".
    pub alt_fb_idx: [usize; MAX_SPATIAL_LAYERS],
    /// Predict from "last".
    pub reference_last: [bool; MAX_SPATIAL_LAYERS],
    /// Predict from "golden".
    pub reference_golden: [bool; MAX_SPATIAL_LAYERS],
    /// Predict from "alt-ref".
    pub reference_alt_ref: [bool; MAX_SPATIAL_LAYERS],
    /// Bit `i` set if buffer `i` is updated.
    pub update_buffer_slot: [u8; MAX_SPATIAL_LAYERS],
}

impl RefFrameConfig {
    /// Referenced buffers of a spatial layer, in order last, alt-ref, golden.
    fn referenced(&self, sid: usize) -> impl Iterator<Item = usize> + '_ {
        [
            (self.reference_last[sid], self.lst_fb_idx[sid]),
            (self.reference_alt_ref[sid], self.alt_fb_idx[sid]),
            (self.reference_golden[sid], self.gld_fb_idx[sid]),
        ]
        .into_iter()
        .filter(|(r, _)| *r)
        .map(|(_, idx)| idx)
    }
}

/// Reference metadata of an encoded layer frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceInfo {
    /// Picture distance to each temporal reference, 1..=127.
    pub p_diff: Vec<u8>,
    /// Bit `i` set if buffer `i` was referenced.
    pub referenced: u8,
}

/// Maps codec buffers to the pictures they hold.
#[derive(Default, Clone)]
pub struct SvcReferenceTracker {
    slots: [Option<ReferenceBufferSlot>; NUM_BUFFERS],
}

impl SvcReferenceTracker {
    /// All buffers empty.
    pub fn new() -> Self {
        SvcReferenceTracker::default()
    }

    /// Forget all buffers.
    pub fn reset(&mut self) {
        self.slots = Default::default();
    }

    /// What buffer `idx` holds, if anything.
    pub fn slot(&self, idx: usize) -> Option<&ReferenceBufferSlot> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    /// Translate the layer configs of picture `pic_num` to a codec reference config.
    ///
    /// Temporal references must point to an older picture of the same spatial layer
    /// (or a lower one if inter-layer prediction is always on). A reference to a buffer
    /// updated by a lower layer of the same picture must come from the layer just below.
    ///
    /// Fails with [`SvcError::ReferenceTooOld`] if a temporal reference is more than
    /// 127 pictures back.
    ///
    /// # Panics
    ///
    /// If the configs disagree with what the buffers hold.
    pub fn ref_frame_config(
        &self,
        layers: &[LayerFrameConfig],
        pic_num: u64,
        mode: InterLayerPredMode,
    ) -> Result<RefFrameConfig, SvcError> {
        let mut config = RefFrameConfig::default();

        for (i, layer) in layers.iter().enumerate() {
            let sid = layer.spatial_id() as usize;
            assert!(sid < MAX_SPATIAL_LAYERS, "Spatial id out of range: {}", sid);

            for usage in layer.buffers().iter().filter(|u| u.referenced) {
                let same_picture = layers[..i]
                    .iter()
                    .find(|l| l.buffers().iter().any(|u2| u2.updated && u2.id == usage.id));

                if let Some(lower) = same_picture {
                    assert!(
                        mode != InterLayerPredMode::Off,
                        "Inter-layer reference S{} -> S{} with prediction off",
                        lower.spatial_id(),
                        sid
                    );
                    assert_eq!(
                        lower.spatial_id() as usize + 1,
                        sid,
                        "Inter-layer reference must be from the layer below"
                    );
                    continue;
                }

                let Some(slot) = self.slots[usage.id] else {
                    panic!("S{} references empty buffer {}", sid, usage.id);
                };

                assert!(
                    slot.pic_num < pic_num,
                    "S{} references buffer {} of picture {} not older than {}",
                    sid,
                    usage.id,
                    slot.pic_num,
                    pic_num
                );

                check_temporal_reference(&slot, layer, mode);

                let p_diff = pic_num - slot.pic_num;
                if p_diff > MAX_P_DIFF {
                    debug!("S{} reference to buffer {} too old: {}", sid, usage.id, p_diff);
                    return Err(SvcError::ReferenceTooOld(p_diff));
                }
            }

            let buffers = layer.buffers();

            if let Some(b) = buffers.first() {
                config.lst_fb_idx[sid] = b.id;
                config.reference_last[sid] = b.referenced;
            }
            if let Some(b) = buffers.get(1) {
                config.gld_fb_idx[sid] = b.id;
                config.reference_golden[sid] = b.referenced;
            }
            if let Some(b) = buffers.get(2) {
                config.alt_fb_idx[sid] = b.id;
                config.reference_alt_ref[sid] = b.referenced;
            }
            for b in buffers.iter().filter(|b| b.updated) {
                config.update_buffer_slot[sid] |= 1 << b.id;
            }
        }

        Ok(config)
    }

    /// Reference metadata for an encoded layer frame of picture `pic_num`.
    ///
    /// Must be called before [`SvcReferenceTracker::on_encode_done`] for the same layer,
    /// and after it for the lower layers of the same picture.
    pub fn reference_info(
        &self,
        layer: &LayerFrameConfig,
        config: &RefFrameConfig,
        pic_num: u64,
        inter_layer_predicted: bool,
        mode: InterLayerPredMode,
    ) -> ReferenceInfo {
        let sid = layer.spatial_id() as usize;
        let mut info = ReferenceInfo::default();
        let mut refs: Vec<ReferenceBufferSlot> = vec![];

        for idx in config.referenced(sid) {
            let Some(slot) = self.slots[idx] else {
                panic!("S{} referenced empty buffer {}", sid, idx);
            };
            if refs.contains(&slot) {
                continue;
            }
            refs.push(slot);
            info.referenced |= 1 << idx;
        }

        let mut seen_pics = vec![];

        for slot in refs {
            assert!(slot.pic_num <= pic_num, "Reference to a future picture");

            if slot.pic_num == pic_num {
                assert!(inter_layer_predicted, "Same picture reference without ILP");
                assert_eq!(
                    slot.spatial_id as usize + 1,
                    sid,
                    "Inter-layer reference must be from the layer below"
                );
                continue;
            }

            check_temporal_reference(&slot, layer, mode);

            // Several lower layers of the same picture may be referenced if some
            // layers are skipped. Only one diff per picture.
            if seen_pics.contains(&slot.pic_num) {
                continue;
            }
            seen_pics.push(slot.pic_num);

            let p_diff = pic_num - slot.pic_num;
            assert!(p_diff <= MAX_P_DIFF, "P_DIFF out of range: {}", p_diff);
            info.p_diff.push(p_diff as u8);
        }

        trace!(
            "Picture {} S{}T{} referenced buffers {:08b}",
            pic_num,
            sid,
            layer.temporal_id(),
            info.referenced
        );

        info
    }

    /// Record that the layer of picture `pic_num` was written to its update buffers.
    pub fn on_encode_done(&mut self, layer: &LayerFrameConfig, config: &RefFrameConfig, pic_num: u64) {
        let sid = layer.spatial_id() as usize;
        let written = ReferenceBufferSlot {
            pic_num,
            spatial_id: layer.spatial_id(),
            temporal_id: layer.temporal_id(),
        };
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if config.update_buffer_slot[sid] & (1 << i) != 0 {
                *slot = Some(written);
            }
        }
    }
}

fn check_temporal_reference(slot: &ReferenceBufferSlot, layer: &LayerFrameConfig, mode: InterLayerPredMode) {
    if mode == InterLayerPredMode::On {
        // With inter-layer prediction on every picture, all lower layers are relayed
        // and may be referenced.
        assert!(
            slot.spatial_id <= layer.spatial_id(),
            "Temporal reference from S{} to higher S{}",
            layer.spatial_id(),
            slot.spatial_id
        );
    } else {
        assert_eq!(
            slot.spatial_id,
            layer.spatial_id(),
            "Temporal reference across spatial layers"
        );
    }
    assert!(
        slot.temporal_id <= layer.temporal_id(),
        "Temporal reference from T{} to higher T{}",
        layer.temporal_id(),
        slot.temporal_id
    );
}

impl fmt::Debug for SvcReferenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut l = f.debug_map();
        for (i, s) in self.slots.iter().enumerate() {
            if let Some(s) = s {
                l.entry(&i, &format_args!("{}:S{}T{}", s.pic_num, s.spatial_id, s.temporal_id));
            }
        }
        l.finish()
    }
}
