use super::{MAX_BUFFER_USAGES, MAX_SPATIAL_LAYERS};

/// VP9 payload descriptor of one encoded layer frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vp9Descriptor {
    /// 15 bit picture id.
    pub picture_id: u16,
    /// References are signalled with P_DIFF rather than a GOF description.
    pub flexible_mode: bool,
    /// First layer frame of the picture.
    pub first_frame_in_picture: bool,
    /// Last layer frame of the picture.
    pub end_of_picture: bool,
    /// `None` when there is only one temporal layer.
    pub temporal_idx: Option<u8>,
    /// `None` when the highest active spatial layer index is 0. With only S1
    /// active it is still written.
    pub spatial_idx: Option<u8>,
    /// Switching up to this temporal layer is possible at this frame.
    pub temporal_up_switch: bool,
    /// Predicted from the layer below in the same picture.
    pub inter_layer_predicted: bool,
    /// Not used as reference by the layer above.
    pub non_ref_for_inter_layer_pred: bool,
    /// Predicted from an earlier picture.
    pub inter_pic_predicted: bool,
    /// Index of the latest temporal layer 0 picture. Only sent in non-flexible mode.
    pub tl0_pic_idx: u8,
    /// Picture distance to each reference. At most 3, each 1..=127.
    pub p_diff: Vec<u8>,
    /// Scalability structure present.
    pub ss_data_available: bool,
    /// The scalability structure carries per layer resolutions.
    pub spatial_layer_resolution_present: bool,
    /// Spatial layers up to and including the highest active.
    pub num_spatial_layers: u8,
    /// Lowest active spatial layer.
    pub first_active_layer: u8,
    /// Per spatial layer width, 0 for layers below the first active.
    pub width: [u16; MAX_SPATIAL_LAYERS],
    /// Per spatial layer height, 0 for layers below the first active.
    pub height: [u16; MAX_SPATIAL_LAYERS],
}

impl Vp9Descriptor {
    fn layer_info_present(&self) -> bool {
        self.temporal_idx.is_some() || self.spatial_idx.is_some()
    }

    fn ref_indices_present(&self) -> bool {
        self.flexible_mode && self.inter_pic_predicted
    }

    fn header_len(&self, with_ss: bool) -> usize {
        // Required byte and 15 bit picture id.
        let mut len = 3;

        if self.layer_info_present() {
            len += if self.flexible_mode { 1 } else { 2 };
        }

        if self.ref_indices_present() {
            len += self.p_diff.len();
        }

        if with_ss {
            len += 1;
            if self.spatial_layer_resolution_present {
                len += 4 * self.num_spatial_layers as usize;
            }
        }

        len
    }

    fn write_header(&self, out: &mut Vec<u8>, b: bool, e: bool) {
        let v = self.ss_data_available && b;

        let mut first = 0x80; // I=1
        if self.inter_pic_predicted {
            first |= 0x40;
        }
        if self.layer_info_present() {
            first |= 0x20;
        }
        if self.flexible_mode {
            first |= 0x10;
        }
        if b {
            first |= 0x08;
        }
        if e {
            first |= 0x04;
        }
        if v {
            first |= 0x02;
        }
        if self.non_ref_for_inter_layer_pred {
            first |= 0x01;
        }
        out.push(first);

        // M=1, 15 bit picture id.
        out.push((self.picture_id >> 8) as u8 & 0x7f | 0x80);
        out.push((self.picture_id & 0xff) as u8);

        if self.layer_info_present() {
            let tid = self.temporal_idx.unwrap_or(0);
            let sid = self.spatial_idx.unwrap_or(0);
            let mut layer = (tid & 0x07) << 5 | (sid & 0x07) << 1;
            if self.temporal_up_switch {
                layer |= 0x10;
            }
            if self.inter_layer_predicted {
                layer |= 0x01;
            }
            out.push(layer);

            if !self.flexible_mode {
                out.push(self.tl0_pic_idx);
            }
        }

        if self.ref_indices_present() {
            let n = self.p_diff.len();
            for (i, p_diff) in self.p_diff.iter().enumerate() {
                let more = if i + 1 < n { 1 } else { 0 };
                out.push(*p_diff << 1 | more);
            }
        }

        if v {
            self.write_ss(out);
        }
    }

    fn write_ss(&self, out: &mut Vec<u8>) {
        let n_s = self.num_spatial_layers.saturating_sub(1);
        let mut b = (n_s & 0x07) << 5;
        if self.spatial_layer_resolution_present {
            b |= 0x10;
        }
        // G=0, no picture group description.
        out.push(b);

        if self.spatial_layer_resolution_present {
            for i in 0..self.num_spatial_layers as usize {
                out.extend_from_slice(&self.width[i].to_be_bytes());
                out.extend_from_slice(&self.height[i].to_be_bytes());
            }
        }
    }
}

/// Packetizes VP9 layer frames.
///
/// The picture id and layer state come with each [`Vp9Descriptor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Vp9Packetizer;

impl Vp9Packetizer {
    /// A packetizer. It holds no state.
    pub fn new() -> Self {
        Vp9Packetizer
    }

    /// Split a layer frame into RTP payloads of at most `mtu` bytes.
    ///
    /// Empty if the payload is empty or `mtu` leaves no room after the descriptor.
    pub fn packetize(&self, mtu: usize, payload: &[u8], descriptor: &Vp9Descriptor) -> Vec<Vec<u8>> {
        /*
         * https://datatracker.ietf.org/doc/html/rfc9628
         *
         * Flexible mode (F=1)
         *        0 1 2 3 4 5 6 7
         *       +-+-+-+-+-+-+-+-+
         *       |I|P|L|F|B|E|V|Z| (REQUIRED)
         *       +-+-+-+-+-+-+-+-+
         *  I:   |M| PICTURE ID  | (REQUIRED)
         *       +-+-+-+-+-+-+-+-+
         *  M:   | EXTENDED PID  | (RECOMMENDED)
         *       +-+-+-+-+-+-+-+-+
         *  L:   | tid |U| SID |D| (CONDITIONALLY RECOMMENDED)
         *       +-+-+-+-+-+-+-+-+                             -\
         *  P,F: | P_DIFF      |N| (CONDITIONALLY REQUIRED)    - up to 3 times
         *       +-+-+-+-+-+-+-+-+                             -/
         *  V:   | SS            |
         *       | ..            |
         *       +-+-+-+-+-+-+-+-+
         *
         * Non-flexible mode (F=0)
         *  L:   | tid |U| SID |D| (CONDITIONALLY RECOMMENDED)
         *       +-+-+-+-+-+-+-+-+
         *       |   tl0picidx   | (CONDITIONALLY REQUIRED)
         *       +-+-+-+-+-+-+-+-+
         */

        if payload.is_empty() || mtu == 0 {
            return vec![];
        }

        debug_assert!(descriptor.p_diff.len() <= MAX_BUFFER_USAGES);

        let first_header = descriptor.header_len(descriptor.ss_data_available);
        let header = descriptor.header_len(false);

        if mtu <= first_header {
            debug!("MTU {} too small for VP9 descriptor of {} bytes", mtu, first_header);
            return vec![];
        }

        let mut payloads = vec![];
        let mut index = 0;

        while index < payload.len() {
            let b = index == 0;
            let max_fragment = mtu - if b { first_header } else { header };
            let size = max_fragment.min(payload.len() - index);
            let e = index + size == payload.len();

            let mut out = Vec::with_capacity(mtu);
            descriptor.write_header(&mut out, b, e);
            out.extend_from_slice(&payload[index..index + size]);
            payloads.push(out);

            index += size;
        }

        payloads
    }

    /// Whether the RTP marker bit is set. The marker ends the picture.
    pub fn is_marker(&self, descriptor: &Vp9Descriptor, last: bool) -> bool {
        last && descriptor.end_of_picture
    }
}
