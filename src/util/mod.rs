mod window;
pub(crate) use window::WindowSum;

/// Random values for ids and initial counters.
///
/// Everything drawn here can be overridden through configuration.
pub struct NonCryptographicRng;

impl NonCryptographicRng {
    /// A random u16.
    #[inline(always)]
    pub fn u16() -> u16 {
        fastrand::u16(..)
    }

    /// A random u32.
    #[inline(always)]
    pub fn u32() -> u32 {
        fastrand::u32(..)
    }
}
