use crate::config::Vp9EncoderConfig;

use super::{GenericFrameInfo, InterLayerPredMode, LayerFrameConfig, ScalabilityMode};
use super::{RefFrameConfig, ScalableVideoController, StreamLayersConfig, SvcError};
use super::{SvcReferenceTracker, VideoBitrateAllocation, Vp9Descriptor, MAX_SPATIAL_LAYERS};

/// Layers of the temporal instant about to be encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerId {
    /// Lowest spatial layer encoded.
    pub spatial_id: u8,
    /// Temporal layer of the instant.
    pub temporal_id: u8,
    /// Temporal layer per spatial layer.
    pub temporal_id_per_spatial: [u8; MAX_SPATIAL_LAYERS],
}

/// A raw input picture.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// RTP timestamp, 90kHz.
    pub timestamp: u32,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Pixel data, opaque to this crate.
    pub data: Vec<u8>,
}

/// One spatial layer as produced by the codec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedLayer {
    /// Spatial layer.
    pub spatial_id: u8,
    /// Temporal layer.
    pub temporal_id: u8,
    /// Encoded as an intra frame.
    pub is_key: bool,
    /// Bitstream.
    pub data: Vec<u8>,
}

/// An encoded layer frame ready for packetization.
#[derive(Debug, Clone)]
pub struct EncodedVp9Frame {
    /// RTP timestamp of the picture.
    pub timestamp: u32,
    /// Key frame of an independently decodable layer.
    pub is_key_frame: bool,
    /// Payload descriptor for the packetizer.
    pub descriptor: Vp9Descriptor,
    /// Layer and dependency info from the controller.
    pub generic: GenericFrameInfo,
    /// Bitstream.
    pub data: Vec<u8>,
}

/// Control surface of a VP9 codec.
pub trait Vp9Backend {
    /// Set the layers and reference buffers of the next encode.
    fn apply(&mut self, layer_id: &LayerId, config: &RefFrameConfig) -> Result<(), SvcError>;

    /// Encode a picture, lowest spatial layer first.
    fn encode(&mut self, frame: &RawFrame, force_key: bool) -> Result<Vec<EncodedLayer>, SvcError>;

    /// New target rates per layer.
    fn set_rates(&mut self, _bitrates: &VideoBitrateAllocation) {}
}

/// Drives a [`Vp9Backend`] through the layer structure of a [`ScalabilityMode`].
pub struct Vp9Encoder<B> {
    backend: B,
    mode: ScalabilityMode,
    controller: Box<dyn ScalableVideoController + Send>,
    tracker: SvcReferenceTracker,
    inter_layer_pred: InterLayerPredMode,
    stream: StreamLayersConfig,
    width: u16,
    height: u16,
    flexible_mode: bool,
    layer_deactivation_requires_key_frame: bool,
    force_key_frame: bool,
    pics_since_key: u64,
    initial_picture_id: u16,
    picture_id: Option<u16>,
    tl0_pic_idx: Option<u8>,
    ss_info_needed: bool,
    // Active spatial layers as (first, last + 1). (0, 0) if none.
    active_layers: (usize, usize),
}

impl<B: Vp9Backend> Vp9Encoder<B> {
    pub(crate) fn new(config: Vp9EncoderConfig, backend: B) -> Result<Self, SvcError> {
        if config.width() == 0 || config.height() == 0 {
            return Err(SvcError::InvalidResolution(config.width(), config.height()));
        }

        let mode = config.scalability_mode();
        let controller = mode.create_controller();
        let stream = controller.stream_config();

        debug!("Create VP9 encoder {} {}x{}", mode, config.width(), config.height());

        Ok(Vp9Encoder {
            backend,
            mode,
            controller,
            tracker: SvcReferenceTracker::new(),
            inter_layer_pred: mode.inter_layer_pred_mode(),
            stream,
            width: config.width(),
            height: config.height(),
            flexible_mode: config.flexible_mode(),
            layer_deactivation_requires_key_frame: config.layer_deactivation_requires_key_frame(),
            force_key_frame: true,
            pics_since_key: 0,
            initial_picture_id: config.initial_picture_id(),
            picture_id: None,
            tl0_pic_idx: None,
            ss_info_needed: true,
            active_layers: (0, stream.num_spatial_layers),
        })
    }

    /// The layer structure.
    pub fn scalability_mode(&self) -> ScalabilityMode {
        self.mode
    }

    /// Layer counts and scaling factors.
    pub fn stream_config(&self) -> StreamLayersConfig {
        self.stream
    }

    /// The codec.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the codec.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The reference buffer slots.
    pub fn tracker(&self) -> &SvcReferenceTracker {
        &self.tracker
    }

    /// Whether the next picture will be a key picture.
    pub fn is_key_frame_forced(&self) -> bool {
        self.force_key_frame
    }

    /// Make the next picture a key picture.
    pub fn request_key_frame(&mut self) {
        debug!("Key frame requested");
        self.force_key_frame = true;
    }

    /// Update the layer rates. Layers without rate are switched off.
    ///
    /// Only the lowest and highest spatial layers can be switched off. A key picture
    /// is forced when the layer change can't be handled by prediction.
    pub fn set_rates(&mut self, bitrates: &VideoBitrateAllocation) -> Result<(), SvcError> {
        let new_layers = active_layers(bitrates, self.stream.num_spatial_layers)?;
        let current = self.active_layers;

        let activation_requires_key_frame = matches!(
            self.inter_layer_pred,
            InterLayerPredMode::Off | InterLayerPredMode::OnKeyPic
        );
        let lower_layers_enabled = new_layers.0 < current.0;
        let higher_layers_enabled = new_layers.1 > current.1;
        let disabled_layers = new_layers.0 > current.0 || new_layers.1 < current.1;

        if lower_layers_enabled
            || (higher_layers_enabled && activation_requires_key_frame)
            || (disabled_layers && self.layer_deactivation_requires_key_frame)
        {
            debug!("Layers {:?} -> {:?} force key frame", current, new_layers);
            self.force_key_frame = true;
        }

        if current != new_layers {
            self.ss_info_needed = true;
        }

        self.active_layers = new_layers;
        self.controller.on_rates_updated(bitrates);
        self.backend.set_rates(bitrates);

        Ok(())
    }

    /// Encode a picture into one frame per spatial layer.
    ///
    /// Empty if the codec dropped the picture.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Vec<EncodedVp9Frame>, SvcError> {
        let (layers, config, pic_num) = self.next_layers()?;

        let mut layer_id = LayerId {
            spatial_id: layers[0].spatial_id(),
            temporal_id: layers[0].temporal_id(),
            ..Default::default()
        };
        for l in &layers {
            layer_id.temporal_id_per_spatial[l.spatial_id() as usize] = l.temporal_id();
        }

        self.backend.apply(&layer_id, &config)?;
        let produced = self.backend.encode(frame, self.force_key_frame)?;

        let count = produced.len();
        let mut frames = Vec::with_capacity(count);

        for (i, layer) in produced.into_iter().enumerate() {
            let Some(layer_config) = layers.iter().find(|l| l.spatial_id() == layer.spatial_id) else {
                warn!(
                    "Encoder produced S{}T{} which wasn't requested",
                    layer.spatial_id, layer.temporal_id
                );
                return Err(SvcError::UnexpectedLayer(layer.spatial_id, layer.temporal_id));
            };

            let first_frame_in_picture = i == 0;
            let end_of_picture = i + 1 == count;

            let encoded = self.on_layer_encoded(
                layer,
                layer_config,
                &config,
                pic_num,
                first_frame_in_picture,
                end_of_picture,
                frame.timestamp,
            )?;

            frames.push(encoded);
        }

        Ok(frames)
    }

    /// Layer configs, codec reference config and picture number of the next picture.
    fn next_layers(&mut self) -> Result<(Vec<LayerFrameConfig>, RefFrameConfig, u64), SvcError> {
        loop {
            let restart = self.force_key_frame;
            let layers = self.controller.next_frame_config(restart);

            if layers.is_empty() {
                return Err(SvcError::NoLayers);
            }

            if layers[0].is_keyframe() {
                self.force_key_frame = true;
            }

            let pic_num = if self.force_key_frame {
                0
            } else {
                self.pics_since_key + 1
            };

            match self
                .tracker
                .ref_frame_config(&layers, pic_num, self.inter_layer_pred)
            {
                Ok(config) => return Ok((layers, config, pic_num)),
                Err(SvcError::ReferenceTooOld(p_diff)) if !restart => {
                    warn!("Reference {} pictures back, restart with key frame", p_diff);
                    self.force_key_frame = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_layer_encoded(
        &mut self,
        layer: EncodedLayer,
        layer_config: &LayerFrameConfig,
        config: &RefFrameConfig,
        pic_num: u64,
        first_frame_in_picture: bool,
        end_of_picture: bool,
        timestamp: u32,
    ) -> Result<EncodedVp9Frame, SvcError> {
        if layer.is_key {
            self.pics_since_key = 0;
        } else if first_frame_in_picture {
            self.pics_since_key += 1;
        }

        if self.pics_since_key != pic_num {
            return Err(SvcError::Backend(format!(
                "Picture {} encoded as {}, key frame mismatch",
                pic_num, self.pics_since_key
            )));
        }

        // Can't have a key frame on a higher temporal layer.
        assert!(self.pics_since_key != 0 || layer.temporal_id == 0);

        let sid = layer.spatial_id as usize;
        let tid = layer.temporal_id;

        if first_frame_in_picture {
            self.advance_picture(tid);
        }

        let is_key_pic = self.pics_since_key == 0;
        let inter_layer_pred_allowed = self.inter_layer_pred == InterLayerPredMode::On
            || (self.inter_layer_pred == InterLayerPredMode::OnKeyPic && is_key_pic);

        // Upper layers are marked as predicted whenever allowed, even if the codec
        // didn't use it. Otherwise a receiver could decode them without the layer below.
        let inter_layer_predicted = !first_frame_in_picture && inter_layer_pred_allowed;

        // All lower layers are kept as references, also the inactive ones, since
        // upper layers can be enabled later without a key frame.
        let non_ref_for_inter_layer_pred =
            !inter_layer_pred_allowed || sid + 1 == self.stream.num_spatial_layers;

        let info = self.tracker.reference_info(
            layer_config,
            config,
            pic_num,
            inter_layer_predicted,
            self.inter_layer_pred,
        );

        let temporal_up_switch = layer_config
            .buffers()
            .iter()
            .filter(|b| b.referenced)
            .filter_map(|b| self.tracker.slot(b.id))
            .filter(|s| s.pic_num < pic_num)
            .all(|s| tid == 0 || s.temporal_id < tid);

        let is_key_frame = layer.is_key && !inter_layer_predicted;

        let (first_active, end_active) = self.active_layers;
        let num_active = end_active.max(1);

        let mut descriptor = Vp9Descriptor {
            picture_id: self.picture_id.unwrap_or(self.initial_picture_id),
            flexible_mode: self.flexible_mode,
            first_frame_in_picture,
            end_of_picture,
            temporal_idx: (self.stream.num_temporal_layers > 1).then_some(tid),
            spatial_idx: (num_active > 1).then_some(layer.spatial_id),
            temporal_up_switch,
            inter_layer_predicted,
            non_ref_for_inter_layer_pred,
            inter_pic_predicted: !is_key_pic && !info.p_diff.is_empty(),
            tl0_pic_idx: self.tl0_pic_idx.unwrap_or(0),
            p_diff: info.p_diff,
            num_spatial_layers: num_active as u8,
            first_active_layer: if num_active > 1 { first_active as u8 } else { 0 },
            ..Default::default()
        };

        // SS on key frames of independent layers, and on the base layer when the
        // active layers changed without a key picture.
        if is_key_frame || (self.ss_info_needed && tid == 0 && sid == first_active) {
            descriptor.ss_data_available = true;
            descriptor.spatial_layer_resolution_present = true;
            for i in first_active..num_active {
                let num = self.stream.scaling_factor_num[i];
                let den = self.stream.scaling_factor_den[i];
                descriptor.width[i] = (self.width as u32 * num / den) as u16;
                descriptor.height[i] = (self.height as u32 * num / den) as u16;
            }
            self.ss_info_needed = false;
        }

        self.tracker.on_encode_done(layer_config, config, pic_num);
        let generic = self.controller.on_encode_done(layer_config);

        if is_key_frame {
            self.force_key_frame = false;
        }

        trace!(
            "Encoded picture {} S{}T{} key={} p_diff={:?}",
            descriptor.picture_id,
            sid,
            tid,
            is_key_frame,
            descriptor.p_diff
        );

        Ok(EncodedVp9Frame {
            timestamp,
            is_key_frame,
            descriptor,
            generic,
            data: layer.data,
        })
    }

    fn advance_picture(&mut self, tid: u8) {
        self.picture_id = Some(match self.picture_id {
            None => self.initial_picture_id,
            Some(id) => (id + 1) & 0x7fff,
        });

        if tid == 0 {
            self.tl0_pic_idx = Some(match self.tl0_pic_idx {
                None => 0,
                Some(idx) => idx.wrapping_add(1),
            });
        }
    }
}

/// Active spatial layers as (first, last + 1).
fn active_layers(bitrates: &VideoBitrateAllocation, num_spatial: usize) -> Result<(usize, usize), SvcError> {
    let mut first = None;
    let mut end = 0;

    for sid in 0..num_spatial {
        if bitrates.is_spatial_layer_active(sid) {
            if first.is_some() && end < sid {
                return Err(SvcError::MiddleLayerDeactivated(end));
            }
            first.get_or_insert(sid);
            end = sid + 1;
        }
    }

    Ok((first.unwrap_or(0), end))
}

impl<B> std::fmt::Debug for Vp9Encoder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vp9Encoder")
            .field("mode", &self.mode)
            .field("force_key_frame", &self.force_key_frame)
            .field("pics_since_key", &self.pics_since_key)
            .field("picture_id", &self.picture_id)
            .field("active_layers", &self.active_layers)
            .field("tracker", &self.tracker)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::Bitrate;

    #[derive(Default)]
    struct Fake {
        applied: Vec<(LayerId, RefFrameConfig)>,
    }

    impl Vp9Backend for Fake {
        fn apply(&mut self, layer_id: &LayerId, config: &RefFrameConfig) -> Result<(), SvcError> {
            self.applied.push((*layer_id, *config));
            Ok(())
        }

        fn encode(&mut self, _frame: &RawFrame, force_key: bool) -> Result<Vec<EncodedLayer>, SvcError> {
            let (layer_id, config) = self.applied.last().copied().unwrap_or_default();
            Ok((0..MAX_SPATIAL_LAYERS)
                .filter(|sid| {
                    *sid >= layer_id.spatial_id as usize
                        && (config.update_buffer_slot[*sid] != 0
                            || config.reference_last[*sid]
                            || config.reference_golden[*sid])
                })
                .map(|sid| EncodedLayer {
                    spatial_id: sid as u8,
                    temporal_id: layer_id.temporal_id_per_spatial[sid],
                    is_key: force_key && sid == layer_id.spatial_id as usize,
                    data: vec![sid as u8; 10],
                })
                .collect())
        }
    }

    fn encoder(mode: ScalabilityMode) -> Vp9Encoder<Fake> {
        Vp9EncoderConfig::new(1280, 720)
            .set_scalability_mode(mode)
            .set_initial_picture_id(100)
            .build(Fake::default())
            .unwrap()
    }

    fn rates(layers: std::ops::Range<usize>) -> VideoBitrateAllocation {
        let mut r = VideoBitrateAllocation::new();
        for sid in layers {
            for tid in 0..3 {
                r.set_bitrate(sid, tid, Bitrate::kbps(100));
            }
        }
        r
    }

    #[test]
    fn first_picture_is_key() {
        let mut enc = encoder(ScalabilityMode::L2T3);
        let frames = enc.encode(&RawFrame::default()).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_key_frame);
        assert!(!frames[1].is_key_frame);
        assert!(!enc.is_key_frame_forced());

        let d0 = &frames[0].descriptor;
        assert_eq!(d0.picture_id, 100);
        assert!(d0.first_frame_in_picture && !d0.end_of_picture);
        assert!(d0.ss_data_available);
        assert_eq!(d0.width[..2], [640, 1280]);
        assert_eq!(d0.height[..2], [360, 720]);
        assert!(!d0.inter_layer_predicted);

        let d1 = &frames[1].descriptor;
        assert!(d1.end_of_picture);
        assert!(d1.inter_layer_predicted);
        assert!(d1.non_ref_for_inter_layer_pred);
        assert!(!d1.ss_data_available);
    }

    #[test]
    fn picture_id_and_p_diff() {
        let mut enc = encoder(ScalabilityMode::L2T3);
        for _ in 0..4 {
            enc.encode(&RawFrame::default()).unwrap();
        }

        // Fifth picture is T0, referencing T0 of the key picture.
        let frames = enc.encode(&RawFrame::default()).unwrap();
        assert_eq!(frames[1].descriptor.picture_id, 104);
        assert_eq!(frames[1].descriptor.temporal_idx, Some(0));
        assert_eq!(frames[1].descriptor.p_diff, vec![4]);
        assert!(frames[1].descriptor.inter_pic_predicted);
    }

    #[test]
    fn request_key_frame_restarts() {
        let mut enc = encoder(ScalabilityMode::L1T3);
        enc.encode(&RawFrame::default()).unwrap();
        enc.encode(&RawFrame::default()).unwrap();

        enc.request_key_frame();
        let frames = enc.encode(&RawFrame::default()).unwrap();
        assert!(frames[0].is_key_frame);
        assert!(frames[0].descriptor.p_diff.is_empty());
        assert!(!frames[0].descriptor.inter_pic_predicted);
    }

    #[test]
    fn single_layer_has_no_indices() {
        let mut enc = encoder(ScalabilityMode::L1T1);
        let frames = enc.encode(&RawFrame::default()).unwrap();
        assert_eq!(frames[0].descriptor.temporal_idx, None);
        assert_eq!(frames[0].descriptor.spatial_idx, None);
    }

    #[test]
    fn enabling_layer_in_key_mode_forces_key_frame() {
        let mut enc = encoder(ScalabilityMode::L2T1Key);
        enc.set_rates(&rates(0..1)).unwrap();
        enc.encode(&RawFrame::default()).unwrap();
        enc.encode(&RawFrame::default()).unwrap();
        assert!(!enc.is_key_frame_forced());

        enc.set_rates(&rates(0..2)).unwrap();
        assert!(enc.is_key_frame_forced());
        let frames = enc.encode(&RawFrame::default()).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_key_frame);
    }

    #[test]
    fn enabling_higher_layer_with_ilp_needs_no_key_frame() {
        let mut enc = encoder(ScalabilityMode::L2T1);
        enc.set_rates(&rates(0..1)).unwrap();
        enc.encode(&RawFrame::default()).unwrap();

        enc.set_rates(&rates(0..2)).unwrap();
        assert!(!enc.is_key_frame_forced());

        let frames = enc.encode(&RawFrame::default()).unwrap();
        // Layer change is announced with SS on the base layer.
        assert!(frames[0].descriptor.ss_data_available);
        assert!(!frames[0].is_key_frame);
    }

    #[test]
    fn middle_layer_deactivation_refused() {
        let mut enc = encoder(ScalabilityMode::L3T1);
        let mut r = rates(0..3);
        r.set_bitrate(1, 0, Bitrate::ZERO);
        assert_eq!(enc.set_rates(&r), Err(SvcError::MiddleLayerDeactivated(1)));
    }

    #[test]
    fn zero_resolution_refused() {
        let r = Vp9EncoderConfig::new(0, 720).build(Fake::default());
        assert_eq!(r.unwrap_err(), SvcError::InvalidResolution(0, 720));
    }

    #[test]
    fn no_layers() {
        let mut enc = encoder(ScalabilityMode::L1T1);
        enc.set_rates(&VideoBitrateAllocation::new()).unwrap();
        assert_eq!(
            enc.encode(&RawFrame::default()).unwrap_err(),
            SvcError::NoLayers
        );
    }
}
