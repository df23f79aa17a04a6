use std::fmt;
use std::ops::Deref;
use std::str::from_utf8;

use serde::{Deserialize, Serialize};

use crate::util::NonCryptographicRng;

/// Max length of the MID, RID and repaired RID extension values.
pub const MAX_STR_ID_LEN: usize = 16;

macro_rules! str_id {
    ($id:ident, $name:literal) => {
        /// Stream identifier carried in an RTP header extension.
        ///
        /// Only ASCII alphanumeric characters are kept, anything else becomes `_`.
        /// The value is truncated to 16 bytes, the max one-byte-form extension value.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $id {
            len: u8,
            bytes: [u8; MAX_STR_ID_LEN],
        }

        impl $id {
            /// An empty id, which is never sent.
            pub const fn empty() -> $id {
                $id {
                    len: 0,
                    bytes: [0; MAX_STR_ID_LEN],
                }
            }

            /// The id as sent in the extension value.
            pub fn as_bytes(&self) -> &[u8] {
                &self.bytes[..self.len as usize]
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s: &str = self;
                write!(f, "{}", s)
            }
        }

        impl fmt::Debug for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s: &str = self;
                write!(f, "{}({})", $name, s)
            }
        }

        impl Deref for $id {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                // Only ascii is ever written in From<&str>.
                from_utf8(self.as_bytes()).unwrap_or_default()
            }
        }

        impl<'a> From<&'a str> for $id {
            fn from(v: &'a str) -> Self {
                let mut bytes = [0; MAX_STR_ID_LEN];
                let mut len = 0;

                for (i, c) in v.chars().take(MAX_STR_ID_LEN).enumerate() {
                    bytes[i] = if c.is_ascii_alphanumeric() {
                        c as u8
                    } else {
                        b'_'
                    };
                    len += 1;
                }

                $id { len, bytes }
            }
        }

        impl Default for $id {
            fn default() -> Self {
                $id::empty()
            }
        }
    };
}

macro_rules! num_id {
    ($id:ident, $t:ty, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $id($t);

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

str_id!(Mid, "Mid");
str_id!(Rid, "Rid");
num_id!(Ssrc, u32, "Synchronization source, one per RTP stream.");
num_id!(Pt, u8, "RTP payload type.");
num_id!(SeqNo, u64, "Sequence number extended to 64 bits so it never wraps.");

impl Ssrc {
    /// A random SSRC.
    pub fn new() -> Self {
        Ssrc(NonCryptographicRng::u32())
    }
}

impl Pt {
    /// A payload type usable in const context.
    pub const fn new_with_value(v: u8) -> Pt {
        Pt(v)
    }

    /// Payload types are 7 bit on the wire.
    pub fn is_valid(&self) -> bool {
        self.0 <= 127
    }
}

impl SeqNo {
    /// Whether `other` directly follows this one.
    pub fn is_next(&self, other: SeqNo) -> bool {
        if **self >= *other {
            return false;
        }
        *other - **self == 1
    }

    /// The following sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The 16 bit value that goes on the wire.
    pub fn as_u16(&self) -> u16 {
        self.0 as u16
    }
}
