// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
use crate::types::Colour;

// ITU-R BT.709 luma coefficients; they sum to 1.
const RED_WEIGHT: f32 = 0.2126;
const GREEN_WEIGHT: f32 = 0.7152;
const BLUE_WEIGHT: f32 = 0.0722;

/// Compositing and contrast operations on colours.
pub trait AdjustContrast {
    /// Perceived brightness in `[0, 1]`, linear in each channel.
    fn brightness(&self) -> f32;

    /// Alpha-composites `self` over an opaque `background`, returning an opaque colour.
    fn as_opaque(&self, background: &Self) -> Self;

    /// How far `self` sits from `background` relative to the furthest it could go
    /// in the same direction. 0 means equal brightness, 1 means pure black or white.
    fn relative_contrast(&self, background: &Self) -> f32;

    /// Pushes `self` toward black or white until its relative contrast against
    /// `background` reaches `desired_contrast`. Colours that already contrast
    /// enough are returned unchanged.
    fn contrast_to(&self, background: &Self, desired_contrast: f32) -> Self;
}

/// Which extreme a foreground should be pushed toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Darker,
    Lighter,
}

fn direction(foreground: f32, background: f32) -> Direction {
    if foreground < background {
        Direction::Darker
    } else if foreground > background {
        Direction::Lighter
    } else if background > 0.5 {
        // Equal brightness: head for the extreme with more room.
        Direction::Darker
    } else {
        Direction::Lighter
    }
}

fn headroom(background: f32, direction: Direction) -> f32 {
    match direction {
        Direction::Darker => background,
        Direction::Lighter => 1.0 - background,
    }
}

impl AdjustContrast for Colour {
    fn brightness(&self) -> f32 {
        (RED_WEIGHT * self.r + GREEN_WEIGHT * self.g + BLUE_WEIGHT * self.b) / 255.0
    }

    fn as_opaque(&self, background: &Self) -> Self {
        debug_assert!(
            background.is_opaque(),
            "cannot composite over a translucent background: {background:?}"
        );
        let alpha = self.a;
        let blend = |fore: f32, back: f32| fore * alpha + back * (1.0 - alpha);
        Self::new(
            blend(self.r, background.r),
            blend(self.g, background.g),
            blend(self.b, background.b),
            1.0,
        )
    }

    fn relative_contrast(&self, background: &Self) -> f32 {
        let foreground_brightness = self.brightness();
        let background_brightness = background.brightness();
        let room = headroom(
            background_brightness,
            direction(foreground_brightness, background_brightness),
        );
        if room <= 0.0 {
            return 1.0;
        }
        ((foreground_brightness - background_brightness).abs() / room).min(1.0)
    }

    fn contrast_to(&self, background: &Self, desired_contrast: f32) -> Self {
        let desired_contrast = desired_contrast.clamp(0.0, 1.0);
        if self.relative_contrast(background) >= desired_contrast {
            return *self;
        }

        let foreground_brightness = self.brightness();
        let background_brightness = background.brightness();
        let direction = direction(foreground_brightness, background_brightness);
        let room = headroom(background_brightness, direction);

        match direction {
            Direction::Darker => {
                // Scaling keeps the channel ratios, so hue and saturation survive.
                // Insufficient contrast implies the foreground is not already black.
                let target = background_brightness - desired_contrast * room;
                let scale = target / foreground_brightness;
                Self::new(self.r * scale, self.g * scale, self.b * scale, self.a)
            }
            Direction::Lighter => {
                let target = background_brightness + desired_contrast * room;
                let t = (target - foreground_brightness) / (1.0 - foreground_brightness);
                let lift = |channel: f32| channel * (1.0 - t) + 255.0 * t;
                Self::new(lift(self.r), lift(self.g), lift(self.b), self.a)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_brightness_extremes_and_greys() {
        assert_close(Colour::BLACK.brightness(), 0.0);
        assert_close(Colour::WHITE.brightness(), 1.0);
        assert_close(Colour::rgb(51.0, 51.0, 51.0).brightness(), 0.2);
        // Green is perceived brighter than red, red brighter than blue.
        let green = Colour::rgb(0.0, 255.0, 0.0).brightness();
        let red = Colour::rgb(255.0, 0.0, 0.0).brightness();
        let blue = Colour::rgb(0.0, 0.0, 255.0).brightness();
        assert!(green > red && red > blue);
    }

    #[test]
    fn test_as_opaque_keeps_opaque_foreground() {
        let backgrounds = [Colour::BLACK, Colour::WHITE, Colour::rgb(12.0, 200.0, 99.0)];
        let foreground = Colour::rgb(82.0, 29.0, 255.0);
        for background in backgrounds {
            assert_eq!(foreground.as_opaque(&background), foreground);
        }
    }

    #[test]
    fn test_as_opaque_transparent_yields_background() {
        let background = Colour::rgb(45.0, 150.0, 139.0);
        assert_eq!(Colour::TRANSPARENT.as_opaque(&background), background);
        assert_eq!(
            Colour::new(255.0, 255.0, 255.0, 0.0).as_opaque(&background),
            background
        );
    }

    #[test]
    fn test_as_opaque_blends_half_transparent() {
        let red = Colour::new(255.0, 0.0, 0.0, 0.5);
        let blended = red.as_opaque(&Colour::rgb(0.0, 0.0, 255.0));
        assert_eq!(blended, Colour::rgb(127.5, 0.0, 127.5));
        assert!(blended.is_opaque());
    }

    #[test]
    fn test_as_opaque_dark_text_on_light_page() {
        let text = Colour::new(10.0, 10.0, 10.0, 0.9);
        let page = Colour::rgb(250.0, 250.0, 250.0);
        let composited = text.as_opaque(&page);
        assert_close(composited.r, 34.0);
        assert_eq!(composited.to_string(), "rgb(34, 34, 34)");
    }

    #[test]
    fn test_relative_contrast_bounds() {
        assert_close(Colour::BLACK.relative_contrast(&Colour::WHITE), 1.0);
        assert_close(Colour::WHITE.relative_contrast(&Colour::BLACK), 1.0);
        let grey = Colour::rgb(128.0, 128.0, 128.0);
        assert_close(grey.relative_contrast(&grey), 0.0);
    }

    #[test]
    fn test_contrast_to_zero_is_identity() {
        let pairs = [
            (Colour::rgb(128.0, 128.0, 128.0), Colour::rgb(128.0, 128.0, 128.0)),
            (Colour::rgb(200.0, 10.0, 10.0), Colour::WHITE),
            (Colour::rgb(20.0, 30.0, 40.0), Colour::BLACK),
        ];
        for (foreground, background) in pairs {
            assert_eq!(foreground.contrast_to(&background, 0.0), foreground);
        }
    }

    #[test]
    fn test_contrast_to_one_reaches_black_or_white() {
        let background = Colour::rgb(128.0, 128.0, 128.0);
        let darker = Colour::rgb(100.0, 90.0, 120.0);
        let lighter = Colour::rgb(150.0, 200.0, 140.0);
        assert_eq!(darker.contrast_to(&background, 1.0), Colour::BLACK);
        assert_eq!(lighter.contrast_to(&background, 1.0), Colour::WHITE);
    }

    #[test]
    fn test_contrast_to_darkens_grey_text_on_white() {
        let text = Colour::rgb(150.0, 150.0, 150.0);
        let corrected = text.contrast_to(&Colour::WHITE, 0.8);
        assert_close(corrected.brightness(), 0.2);
        assert_eq!(corrected.to_string(), "rgb(51, 51, 51)");
        assert_close(corrected.relative_contrast(&Colour::WHITE), 0.8);
    }

    #[test]
    fn test_contrast_to_lightens_grey_text_on_black() {
        let text = Colour::rgb(100.0, 100.0, 100.0);
        let corrected = text.contrast_to(&Colour::BLACK, 0.8);
        assert_close(corrected.brightness(), 0.8);
        assert_eq!(corrected.to_string(), "rgb(204, 204, 204)");
    }

    #[test]
    fn test_contrast_to_keeps_hue_when_darkening() {
        let text = Colour::rgb(200.0, 100.0, 50.0);
        let corrected = text.contrast_to(&Colour::WHITE, 0.9);
        assert_close(corrected.r / corrected.g, 2.0);
        assert_close(corrected.g / corrected.b, 2.0);
        assert!(corrected.brightness() < text.brightness());
    }

    #[test]
    fn test_contrast_to_sufficient_contrast_is_unchanged() {
        let composited = Colour::new(10.0, 10.0, 10.0, 0.9).as_opaque(&Colour::rgb(250.0, 250.0, 250.0));
        let corrected = composited.contrast_to(&Colour::rgb(250.0, 250.0, 250.0), 0.8);
        assert_eq!(corrected, composited);
    }

    #[test]
    fn test_contrast_to_equal_brightness_picks_roomier_side() {
        let light = Colour::rgb(200.0, 200.0, 200.0);
        assert!(light.contrast_to(&light, 0.5).brightness() < light.brightness());

        let dark = Colour::rgb(40.0, 40.0, 40.0);
        assert!(dark.contrast_to(&dark, 0.5).brightness() > dark.brightness());
    }

    #[test]
    fn test_contrast_to_never_moves_toward_background() {
        let background = Colour::rgb(120.0, 130.0, 125.0);
        for value in [0.0, 60.0, 118.0, 140.0, 200.0, 255.0] {
            let text = Colour::rgb(value, value, value);
            let before = (text.brightness() - background.brightness()).abs();
            let after = (text.contrast_to(&background, 0.7).brightness() - background.brightness()).abs();
            assert!(after + EPSILON >= before, "{value}: {before} -> {after}");
        }
    }
}
