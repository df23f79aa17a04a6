//! Scalable video coding: layer structures, reference tracking and the VP9 encoder wrapper.
//!
//! A [`ScalableVideoController`] decides, per temporal instant, which spatial and temporal
//! layers to encode and which abstract codec buffers each layer references and updates.
//! The [`SvcReferenceTracker`] maps those buffers onto encoded picture numbers so the
//! wrapper can emit correct VP9 reference metadata.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::rtp::Bitrate;

mod descriptor;
mod encoder;
mod full;
mod key;
mod tracker;

pub use descriptor::{Vp9Descriptor, Vp9Packetizer};
pub use encoder::{EncodedLayer, EncodedVp9Frame, LayerId, RawFrame, Vp9Backend, Vp9Encoder};
pub use full::FullSvc;
pub use key::KeySvc;
pub use tracker::{RefFrameConfig, ReferenceBufferSlot, ReferenceInfo, SvcReferenceTracker};

/// Max number of spatial layers.
pub const MAX_SPATIAL_LAYERS: usize = 3;

/// Max number of temporal layers.
pub const MAX_TEMPORAL_LAYERS: usize = 3;

/// Number of codec reference buffers.
pub const NUM_BUFFERS: usize = 8;

/// Max number of buffers a single layer frame uses.
pub const MAX_BUFFER_USAGES: usize = 3;

/// Max picture distance of a temporal reference (7 bit P_DIFF).
pub const MAX_P_DIFF: u64 = 127;

/// Errors from layer configuration and the encoder wrapper.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SvcError {
    /// The controller has no layer to encode for this frame.
    #[error("No active layers to encode")]
    NoLayers,

    /// A temporal reference is further back than a P_DIFF can express.
    #[error("Reference too old: {0} pictures back")]
    ReferenceTooOld(u64),

    /// The codec produced a layer that was not requested.
    #[error("Unexpected layer produced: S{0}T{1}")]
    UnexpectedLayer(u8, u8),

    /// Width or height is zero.
    #[error("Invalid resolution: {0}x{1}")]
    InvalidResolution(u16, u16),

    /// Scalability mode name not recognized.
    #[error("Unknown scalability mode: {0}")]
    UnknownScalabilityMode(String),

    /// Only the top spatial layers can be switched off.
    #[error("Middle spatial layer {0} deactivated")]
    MiddleLayerDeactivated(usize),

    /// The codec backend failed.
    #[error("Codec backend: {0}")]
    Backend(String),
}

/// How a higher spatial layer may predict from the layer below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterLayerPredMode {
    /// Spatial layers are independent.
    Off,
    /// Always predict from the layer below.
    #[default]
    On,
    /// Only key pictures predict from the layer below.
    OnKeyPic,
}

/// A named layer structure.
///
/// `LxTy` has x spatial and y temporal layers. The `Key` variants only
/// predict between spatial layers on key pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ScalabilityMode {
    L1T1,
    L1T2,
    L1T3,
    L2T1,
    L2T2,
    L2T3,
    L3T1,
    L3T2,
    L3T3,
    L2T1Key,
    L2T2Key,
    L2T3Key,
    L3T1Key,
    L3T2Key,
    L3T3Key,
}

impl ScalabilityMode {
    const ALL: [ScalabilityMode; 15] = [
        ScalabilityMode::L1T1,
        ScalabilityMode::L1T2,
        ScalabilityMode::L1T3,
        ScalabilityMode::L2T1,
        ScalabilityMode::L2T2,
        ScalabilityMode::L2T3,
        ScalabilityMode::L3T1,
        ScalabilityMode::L3T2,
        ScalabilityMode::L3T3,
        ScalabilityMode::L2T1Key,
        ScalabilityMode::L2T2Key,
        ScalabilityMode::L2T3Key,
        ScalabilityMode::L3T1Key,
        ScalabilityMode::L3T2Key,
        ScalabilityMode::L3T3Key,
    ];

    /// The name as used in SDP and WebRTC-SVC, i.e. `L2T3_KEY`.
    pub fn as_str(&self) -> &'static str {
        use ScalabilityMode::*;
        match self {
            L1T1 => "L1T1",
            L1T2 => "L1T2",
            L1T3 => "L1T3",
            L2T1 => "L2T1",
            L2T2 => "L2T2",
            L2T3 => "L2T3",
            L3T1 => "L3T1",
            L3T2 => "L3T2",
            L3T3 => "L3T3",
            L2T1Key => "L2T1_KEY",
            L2T2Key => "L2T2_KEY",
            L2T3Key => "L2T3_KEY",
            L3T1Key => "L3T1_KEY",
            L3T2Key => "L3T2_KEY",
            L3T3Key => "L3T3_KEY",
        }
    }

    /// Number of spatial layers.
    pub fn num_spatial_layers(&self) -> usize {
        let b = self.as_str().as_bytes()[1];
        (b - b'0') as usize
    }

    /// Number of temporal layers.
    pub fn num_temporal_layers(&self) -> usize {
        let b = self.as_str().as_bytes()[3];
        (b - b'0') as usize
    }

    /// Key SVC: spatial layers only depend on each other on key pictures.
    pub fn is_key_svc(&self) -> bool {
        self.as_str().ends_with("_KEY")
    }

    /// When spatial layers predict from the layer below.
    pub fn inter_layer_pred_mode(&self) -> InterLayerPredMode {
        if self.is_key_svc() {
            InterLayerPredMode::OnKeyPic
        } else {
            InterLayerPredMode::On
        }
    }

    /// Create the controller implementing this structure.
    pub fn create_controller(&self) -> Box<dyn ScalableVideoController + Send> {
        let s = self.num_spatial_layers();
        let t = self.num_temporal_layers();
        if self.is_key_svc() {
            Box::new(KeySvc::new(s, t))
        } else {
            Box::new(FullSvc::new(s, t))
        }
    }
}

impl FromStr for ScalabilityMode {
    type Err = SvcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScalabilityMode::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| SvcError::UnknownScalabilityMode(s.to_string()))
    }
}

impl fmt::Display for ScalabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Use of one codec buffer by a layer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecBufferUsage {
    /// Buffer index, 0..8.
    pub id: usize,
    /// The frame predicts from the buffer.
    pub referenced: bool,
    /// The frame is stored in the buffer.
    pub updated: bool,
}

/// How to encode one spatial layer of a temporal instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerFrameConfig {
    id: usize,
    spatial_id: u8,
    temporal_id: u8,
    is_keyframe: bool,
    buffers: Vec<CodecBufferUsage>,
}

impl LayerFrameConfig {
    /// Spatial and temporal layer 0, no buffers.
    pub fn new() -> Self {
        LayerFrameConfig::default()
    }

    /// Opaque tag the controller uses to recognize its own configs.
    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Set the spatial layer.
    pub fn with_spatial_id(mut self, sid: u8) -> Self {
        self.spatial_id = sid;
        self
    }

    /// Set the temporal layer.
    pub fn with_temporal_id(mut self, tid: u8) -> Self {
        self.temporal_id = tid;
        self
    }

    /// Encode without any references.
    pub fn keyframe(mut self) -> Self {
        self.is_keyframe = true;
        self
    }

    /// Predict from `buffer`.
    pub fn reference(self, buffer: usize) -> Self {
        self.use_buffer(buffer, true, false)
    }

    /// Store the frame in `buffer`.
    pub fn update(self, buffer: usize) -> Self {
        self.use_buffer(buffer, false, true)
    }

    /// Predict from `buffer` and store the frame in it.
    pub fn reference_and_update(self, buffer: usize) -> Self {
        self.use_buffer(buffer, true, true)
    }

    fn use_buffer(mut self, id: usize, referenced: bool, updated: bool) -> Self {
        assert!(id < NUM_BUFFERS, "Buffer index out of range: {}", id);
        assert!(
            self.buffers.len() < MAX_BUFFER_USAGES,
            "Too many buffers for one layer frame"
        );
        self.buffers.push(CodecBufferUsage {
            id,
            referenced,
            updated,
        });
        self
    }

    /// The controller's tag.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Spatial layer.
    pub fn spatial_id(&self) -> u8 {
        self.spatial_id
    }

    /// Temporal layer.
    pub fn temporal_id(&self) -> u8 {
        self.temporal_id
    }

    /// Whether encoded without references.
    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    /// Buffer usages in the order added. At most 3.
    pub fn buffers(&self) -> &[CodecBufferUsage] {
        &self.buffers
    }
}

/// Static description of a layer structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayersConfig {
    /// Number of spatial layers.
    pub num_spatial_layers: usize,
    /// Number of temporal layers.
    pub num_temporal_layers: usize,
    /// Spatial layers predict from a lower resolution layer.
    pub uses_reference_scaling: bool,
    /// Resolution of spatial layer `sid` relative to the top layer is
    /// `scaling_factor_num[sid] / scaling_factor_den[sid]`.
    pub scaling_factor_num: [u32; MAX_SPATIAL_LAYERS],
    /// See `scaling_factor_num`.
    pub scaling_factor_den: [u32; MAX_SPATIAL_LAYERS],
}

impl StreamLayersConfig {
    /// Each layer half the resolution of the one above.
    pub(crate) fn halving(num_spatial_layers: usize, num_temporal_layers: usize) -> Self {
        let mut c = StreamLayersConfig {
            num_spatial_layers,
            num_temporal_layers,
            uses_reference_scaling: num_spatial_layers > 1,
            scaling_factor_num: [1; MAX_SPATIAL_LAYERS],
            scaling_factor_den: [1; MAX_SPATIAL_LAYERS],
        };
        for sid in (1..num_spatial_layers).rev() {
            c.scaling_factor_num[sid - 1] = c.scaling_factor_num[sid];
            c.scaling_factor_den[sid - 1] = 2 * c.scaling_factor_den[sid];
        }
        c
    }
}

/// What the controller reports about an encoded layer frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericFrameInfo {
    /// Spatial layer.
    pub spatial_id: u8,
    /// Temporal layer.
    pub temporal_id: u8,
    /// Buffers referenced and updated.
    pub encoder_buffers: Vec<CodecBufferUsage>,
    /// Per spatial layer, whether the frame is part of that layer's chain.
    pub part_of_chain: Vec<bool>,
    /// Bit `sid * num_temporal + tid` set for each active decode target.
    pub active_decode_targets: u32,
}

/// Target bitrate per spatial and temporal layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoBitrateAllocation {
    bitrates: [[Bitrate; MAX_TEMPORAL_LAYERS]; MAX_SPATIAL_LAYERS],
}

impl VideoBitrateAllocation {
    /// All layers at zero.
    pub fn new() -> Self {
        VideoBitrateAllocation::default()
    }

    /// Set the rate of one layer. Layers beyond 3x3 are ignored.
    pub fn set_bitrate(&mut self, sid: usize, tid: usize, rate: Bitrate) {
        let Some(slot) = self.bitrates.get_mut(sid).and_then(|t| t.get_mut(tid)) else {
            debug!("Ignore bitrate for layer out of range S{}T{}", sid, tid);
            return;
        };
        *slot = rate;
    }

    /// The rate of one layer. Zero for layers beyond 3x3.
    pub fn bitrate(&self, sid: usize, tid: usize) -> Bitrate {
        self.bitrates
            .get(sid)
            .and_then(|t| t.get(tid))
            .copied()
            .unwrap_or(Bitrate::ZERO)
    }

    /// A spatial layer is active if its base temporal layer has a rate.
    pub fn is_spatial_layer_active(&self, sid: usize) -> bool {
        !self.bitrate(sid, 0).is_zero()
    }
}

/// Decides the layer configuration of every encoded temporal instant.
pub trait ScalableVideoController {
    /// The layer structure.
    fn stream_config(&self) -> StreamLayersConfig;

    /// Configurations for the next temporal instant, one per spatial layer to encode.
    ///
    /// `restart` starts over with a key picture. Empty means nothing to encode.
    fn next_frame_config(&mut self, restart: bool) -> Vec<LayerFrameConfig>;

    /// Report that `config` was encoded.
    fn on_encode_done(&mut self, config: &LayerFrameConfig) -> GenericFrameInfo;

    /// Enable and disable decode targets from the layer bitrates.
    fn on_rates_updated(&mut self, bitrates: &VideoBitrateAllocation);
}

/// Temporal pattern of a temporal instant. Used as [`LayerFrameConfig::id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FramePattern {
    None = 0,
    Key = 1,
    DeltaT2A = 2,
    DeltaT1 = 3,
    DeltaT2B = 4,
    DeltaT0 = 5,
}

impl FramePattern {
    pub fn from_id(id: usize) -> FramePattern {
        match id {
            1 => FramePattern::Key,
            2 => FramePattern::DeltaT2A,
            3 => FramePattern::DeltaT1,
            4 => FramePattern::DeltaT2B,
            5 => FramePattern::DeltaT0,
            _ => FramePattern::None,
        }
    }

    pub fn id(&self) -> usize {
        *self as usize
    }
}

/// Active state of each (spatial, temporal) decode target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecodeTargets {
    pub num_spatial: usize,
    pub num_temporal: usize,
    active: u32,
}

impl DecodeTargets {
    pub fn new(num_spatial: usize, num_temporal: usize) -> Self {
        assert!(
            (1..=MAX_SPATIAL_LAYERS).contains(&num_spatial),
            "Bad number of spatial layers: {}",
            num_spatial
        );
        assert!(
            (1..=MAX_TEMPORAL_LAYERS).contains(&num_temporal),
            "Bad number of temporal layers: {}",
            num_temporal
        );
        DecodeTargets {
            num_spatial,
            num_temporal,
            active: (1 << (num_spatial * num_temporal)) - 1,
        }
    }

    pub fn is_active(&self, sid: usize, tid: usize) -> bool {
        tid < self.num_temporal && self.active & (1 << (sid * self.num_temporal + tid)) != 0
    }

    pub fn set_active(&mut self, sid: usize, tid: usize, active: bool) {
        let bit = 1 << (sid * self.num_temporal + tid);
        if active {
            self.active |= bit;
        } else {
            self.active &= !bit;
        }
    }

    pub fn any(&self) -> bool {
        self.active != 0
    }

    pub fn bits(&self) -> u32 {
        self.active
    }

    pub fn temporal_layer_is_active(&self, tid: usize) -> bool {
        (0..self.num_spatial).any(|sid| self.is_active(sid, tid))
    }

    /// Buffer holding the latest frame of a layer. T1 and T2 share a buffer.
    pub fn buffer_index(&self, sid: usize, tid: usize) -> usize {
        if tid == 0 {
            sid
        } else {
            self.num_spatial + sid
        }
    }

    /// Temporal pattern following `last`, skipping inactive temporal layers.
    pub fn next_pattern(&self, last: FramePattern) -> FramePattern {
        use FramePattern::*;
        match last {
            None => Key,
            DeltaT2B => DeltaT0,
            DeltaT2A => {
                if self.temporal_layer_is_active(1) {
                    DeltaT1
                } else {
                    DeltaT0
                }
            }
            DeltaT1 => {
                if self.temporal_layer_is_active(2) {
                    DeltaT2B
                } else {
                    DeltaT0
                }
            }
            Key | DeltaT0 => {
                if self.temporal_layer_is_active(2) {
                    DeltaT2A
                } else if self.temporal_layer_is_active(1) {
                    DeltaT1
                } else {
                    DeltaT0
                }
            }
        }
    }
}
