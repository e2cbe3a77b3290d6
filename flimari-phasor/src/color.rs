//! Deterministic display colours for dataset groups.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use palette::{Hsl, IntoColor, Srgb};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// `#rrggbb` colour for a group name.
///
/// The name is hashed (FNV-1a) onto a hue; saturation and lightness are
/// fixed, so equal names always give the same colour.
#[must_use]
pub fn group_color(group: &str) -> String {
    let hash = group.bytes().fold(FNV_OFFSET, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    });
    let hue = (hash % 360) as f32;
    let rgb: Srgb = Hsl::new(hue, 0.75, 0.55).into_color();
    format!(
        "#{:02x}{:02x}{:02x}",
        to_channel(rgb.red),
        to_channel(rgb.green),
        to_channel(rgb.blue)
    )
}

fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_deterministic_hex() {
        let a = group_color("control");
        assert_eq!(a, group_color("control"));
        assert_eq!(a.len(), 7);
        assert!(a.starts_with('#'));
        assert!(a[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_groups_differ() {
        assert_ne!(group_color("control"), group_color("treated"));
    }
}
