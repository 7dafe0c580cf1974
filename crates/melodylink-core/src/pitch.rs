//! Pitch quantization onto the two-octave playable window.
//!
//! Sinks can only play keys in `[WINDOW_LOW, WINDOW_HIGH]`, expressed as a
//! playback-rate ratio between 0.5 and 2.0. Keys outside the window are
//! folded by two octaves at a time; the number of folds is the *register*,
//! which selects a register-shifted variant of the timbre instead of
//! changing the ratio.

use std::sync::LazyLock;

/// Lowest key of the playable window.
pub const WINDOW_LOW: i32 = 33;
/// Highest key of the playable window.
pub const WINDOW_HIGH: i32 = 56;
/// Size of one fold (two octaves).
pub const FOLD: i32 = 24;

const RATIO_STEPS: usize = 2401;

/// `ratio[i] = 2^((i - 1200) / 1200)`, one entry per cent across ±12 semitones.
static RATIOS: LazyLock<[f32; RATIO_STEPS]> = LazyLock::new(|| {
    let mut table = [0.0f32; RATIO_STEPS];
    for (i, ratio) in table.iter_mut().enumerate() {
        *ratio = 2f64.powf((i as f64 - 1200.0) / 1200.0) as f32;
    }
    table
});

/// A key folded into the playable window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantized {
    /// Folded key, always inside `[WINDOW_LOW, WINDOW_HIGH]`.
    pub key: i32,
    /// Signed number of two-octave folds; `key + FOLD * register` is the
    /// cent-shifted input key.
    pub register: i32,
    /// Playback ratio at the folded key and remaining cents.
    pub ratio: f32,
}

/// Shift a key by whole semitones of a cent offset, rounding toward negative infinity.
pub fn apply_cents_to_key(key: i32, cents: i32) -> i32 {
    key + cents.div_euclid(100)
}

/// Quantize `key` shifted by `cents` onto the playable window.
pub fn quantize(key: i32, cents: i32) -> Quantized {
    let shifted = apply_cents_to_key(key, cents);
    let remainder = cents.rem_euclid(100);

    let mut folded = shifted;
    let mut register = 0;
    while folded < WINDOW_LOW {
        folded += FOLD;
        register -= 1;
    }
    while folded > WINDOW_HIGH {
        folded -= FOLD;
        register += 1;
    }

    let index = ((folded - WINDOW_LOW) * 100 + remainder) as usize;
    Quantized {
        key: folded,
        register,
        ratio: RATIOS[index],
    }
}

/// Timbre name with the register suffix a sink uses to pick the shifted variant.
pub fn warped_name(name: &str, register: i32) -> String {
    if register == 0 {
        name.to_string()
    } else {
        format!("{}_{}", name, register)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_table_bounds() {
        assert!((RATIOS[0] - 0.5).abs() < 1e-6);
        assert!((RATIOS[1200] - 1.0).abs() < 1e-6);
        assert!((RATIOS[2400] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_in_range_key_has_no_register() {
        for key in WINDOW_LOW..=WINDOW_HIGH {
            let q = quantize(key, 0);
            assert_eq!(q.key, key);
            assert_eq!(q.register, 0);
        }
        assert!((quantize(45, 0).ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fold_invariant() {
        for key in 0..128 {
            for cents in [-1250, -450, -101, -100, -1, 0, 1, 99, 100, 375, 1199] {
                let q = quantize(key, cents);
                assert!((WINDOW_LOW..=WINDOW_HIGH).contains(&q.key), "key {} cents {}", key, cents);
                assert_eq!(q.key + FOLD * q.register, apply_cents_to_key(key, cents));
                assert!(q.ratio >= 0.5 && q.ratio < 2.0);
            }
        }
    }

    #[test]
    fn test_negative_cents_round_down() {
        assert_eq!(apply_cents_to_key(60, -1), 59);
        assert_eq!(apply_cents_to_key(60, -100), 59);
        assert_eq!(apply_cents_to_key(60, -101), 58);

        // 50 cents below key 45 is key 44 plus 50 cents.
        let q = quantize(45, -50);
        assert_eq!(q.key, 44);
        let expected = 2f32.powf((11.0 * 100.0 + 50.0 - 1200.0) / 1200.0);
        assert!((q.ratio - expected).abs() < 1e-5);
    }

    #[test]
    fn test_register_direction() {
        let high = quantize(60, 0);
        assert_eq!((high.key, high.register), (36, 1));

        let low = quantize(20, 0);
        assert_eq!((low.key, low.register), (44, -1));

        let very_low = quantize(0, 0);
        assert_eq!((very_low.key, very_low.register), (48, -2));
    }

    #[test]
    fn test_warped_name() {
        assert_eq!(warped_name("harp", 0), "harp");
        assert_eq!(warped_name("harp", 1), "harp_1");
        assert_eq!(warped_name("flute", -2), "flute_-2");
    }
}
