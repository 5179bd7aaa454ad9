//! Frame timing conversions shared by the decoder and the encoders.
//!
//! Order is always: clamp to the configured maximum, floor to
//! [`MIN_FRAME_DURATION_MS`], then convert to the target unit.

/// Shortest display time any frame may have.
pub const MIN_FRAME_DURATION_MS: u32 = 10;
/// Duration given to static images and frames without timing information.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;
/// APNG: a zero denominator means hundredths of a second.
pub const DEFAULT_DELAY_DENOMINATOR: u16 = 100;

/// APNG `delay_num / delay_den` → whole milliseconds, floored to the minimum.
pub fn delay_fraction_to_ms(num: u16, den: u16) -> u32 {
    let den = if den == 0 { DEFAULT_DELAY_DENOMINATOR } else { den };
    let ms = (u64::from(num) * 1000 + u64::from(den) / 2) / u64::from(den);
    floor_duration(ms.min(u64::from(u32::MAX)) as u32)
}

pub fn floor_duration(ms: u32) -> u32 {
    ms.max(MIN_FRAME_DURATION_MS)
}

/// Clamp then floor: the effective display time of a frame in milliseconds.
pub fn effective_duration_ms(ms: u32, max_ms: Option<u32>) -> u32 {
    let clamped = match max_ms {
        Some(max) => ms.min(max),
        None => ms,
    };
    floor_duration(clamped)
}

/// Milliseconds → GIF hundredths of a second, never below one unit.
pub fn ms_to_centiseconds(ms: u32, max_ms: Option<u32>) -> u16 {
    let ms = effective_duration_ms(ms, max_ms);
    let cs = (ms + 5) / 10;
    cs.clamp(1, u32::from(u16::MAX)) as u16
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every converted duration is visible and respects the clamp.
        #[test]
        fn prop_centiseconds_bounds(ms in 0u32..200_000, max in proptest::option::of(1u32..20_000)) {
            let cs = ms_to_centiseconds(ms, max);
            prop_assert!(cs >= 1);
            if let Some(max) = max {
                let upper = (max.max(MIN_FRAME_DURATION_MS) + 5) / 10;
                prop_assert!(u32::from(cs) <= upper.max(1));
            }
        }

        #[test]
        fn prop_delay_fraction_has_floor(num in any::<u16>(), den in any::<u16>()) {
            prop_assert!(delay_fraction_to_ms(num, den) >= MIN_FRAME_DURATION_MS);
        }
    }
}
