// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors produced when a style value cannot be read as a colour.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColourParseError {
    #[error("empty colour value")]
    Empty,
    #[error("invalid hex colour '#{0}'")]
    InvalidHex(String),
    #[error("expected 3 or 4 colour channels, found {0}")]
    ChannelCount(usize),
    #[error("invalid colour channel '{0}'")]
    InvalidChannel(String),
    #[error("unrecognised colour syntax '{0}'")]
    Unrecognised(String),
}

/// An RGBA colour with real-valued channels.
///
/// `r`, `g` and `b` lie in `[0, 255]` and may be fractional after blending.
/// `a` is the opacity in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Colour {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Colour {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgb(255.0, 255.0, 255.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Builds a colour with every channel clamped into its valid range.
    pub fn clamped(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::new(
            r.clamp(0.0, 255.0),
            g.clamp(0.0, 255.0),
            b.clamp(0.0, 255.0),
            a.clamp(0.0, 1.0),
        )
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0.0
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 1.0
    }

    /// Channels rounded to the nearest integer, as written to a stylesheet.
    pub fn to_rgb8(&self) -> [u8; 3] {
        [round_channel(self.r), round_channel(self.g), round_channel(self.b)]
    }

    /// Parses `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`, with or without the `#`.
    pub fn from_hex(hex: &str) -> Result<Self, ColourParseError> {
        let hex = hex.trim_start_matches('#');
        let invalid = || ColourParseError::InvalidHex(hex.to_owned());
        if !hex.is_ascii() {
            return Err(invalid());
        }

        let digits: Vec<u8> = match hex.len() {
            3 | 4 => hex
                .chars()
                .map(|c| {
                    c.to_digit(16)
                        .map(|d| (d * 17) as u8)
                        .ok_or_else(invalid)
                })
                .collect::<Result<_, _>>()?,
            6 | 8 => (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_e| invalid()))
                .collect::<Result<_, _>>()?,
            _ => return Err(invalid()),
        };

        let alpha = digits.get(3).map_or(1.0, |&a| f32::from(a) / 255.0);
        Ok(Self::new(
            f32::from(digits[0]),
            f32::from(digits[1]),
            f32::from(digits[2]),
            alpha,
        ))
    }
}

fn round_channel(channel: f32) -> u8 {
    channel.round().clamp(0.0, 255.0) as u8
}

impl From<[u8; 3]> for Colour {
    fn from(arr: [u8; 3]) -> Self {
        Self::rgb(f32::from(arr[0]), f32::from(arr[1]), f32::from(arr[2]))
    }
}

impl From<[u8; 4]> for Colour {
    fn from(arr: [u8; 4]) -> Self {
        Self::new(
            f32::from(arr[0]),
            f32::from(arr[1]),
            f32::from(arr[2]),
            f32::from(arr[3]) / 255.0,
        )
    }
}

/// Serialises as an opaque `rgb(r, g, b)`; corrections are always written fully opaque.
impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.to_rgb8();
        write!(f, "rgb({r}, {g}, {b})")
    }
}

impl FromStr for Colour {
    type Err = ColourParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        if value.is_empty() {
            return Err(ColourParseError::Empty);
        }
        if value == "transparent" {
            return Ok(Self::TRANSPARENT);
        }
        if let Some(hex) = value.strip_prefix('#') {
            return Self::from_hex(hex);
        }
        if let Some(args) = function_arguments(&value, "rgba")
            .or_else(|| function_arguments(&value, "rgb"))
        {
            return parse_channels(args);
        }
        if let Some(colour) = named_colour(&value) {
            return Ok(colour);
        }
        // Bare channel lists such as "120,120,120".
        if value.contains(',') {
            return parse_channels(&value);
        }
        Err(ColourParseError::Unrecognised(s.trim().to_owned()))
    }
}

impl TryFrom<String> for Colour {
    type Error = ColourParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Colour> for String {
    fn from(colour: Colour) -> Self {
        if colour.is_opaque() {
            colour.to_string()
        } else {
            let [r, g, b] = colour.to_rgb8();
            format!("rgba({r}, {g}, {b}, {})", colour.a)
        }
    }
}

/// Returns the text between the parentheses of `name(...)`.
fn function_arguments<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    value
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Parses both the legacy `r, g, b[, a]` and the modern `r g b [/ a]` channel lists.
fn parse_channels(args: &str) -> Result<Colour, ColourParseError> {
    let parts: Vec<&str> = if args.contains(',') {
        args.split(',').map(str::trim).collect()
    } else {
        let (channels, alpha) = match args.split_once('/') {
            Some((channels, alpha)) => (channels, Some(alpha.trim())),
            None => (args, None),
        };
        channels.split_whitespace().chain(alpha).collect()
    };

    if !(3..=4).contains(&parts.len()) {
        return Err(ColourParseError::ChannelCount(parts.len()));
    }

    let r = parse_channel(parts[0])?;
    let g = parse_channel(parts[1])?;
    let b = parse_channel(parts[2])?;
    let a = parts.get(3).map_or(Ok(1.0), |alpha| parse_alpha(alpha))?;
    Ok(Colour::clamped(r, g, b, a))
}

fn parse_channel(raw: &str) -> Result<f32, ColourParseError> {
    let invalid = || ColourParseError::InvalidChannel(raw.to_owned());
    let value = if let Some(percent) = raw.strip_suffix('%') {
        percent.trim().parse::<f32>().map_err(|_e| invalid())? * 255.0 / 100.0
    } else {
        raw.parse::<f32>().map_err(|_e| invalid())?
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn parse_alpha(raw: &str) -> Result<f32, ColourParseError> {
    let invalid = || ColourParseError::InvalidChannel(raw.to_owned());
    let value = if let Some(percent) = raw.strip_suffix('%') {
        percent.trim().parse::<f32>().map_err(|_e| invalid())? / 100.0
    } else {
        raw.parse::<f32>().map_err(|_e| invalid())?
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

/// The CSS named colours most often met in computed styles.
fn named_colour(name: &str) -> Option<Colour> {
    let rgb: [u8; 3] = match name {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "lime" => [0, 255, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" | "aqua" => [0, 255, 255],
        "magenta" | "fuchsia" => [255, 0, 255],
        "silver" => [192, 192, 192],
        "gray" | "grey" => [128, 128, 128],
        "darkgray" | "darkgrey" => [169, 169, 169],
        "lightgray" | "lightgrey" => [211, 211, 211],
        "dimgray" | "dimgrey" => [105, 105, 105],
        "gainsboro" => [220, 220, 220],
        "whitesmoke" => [245, 245, 245],
        "maroon" => [128, 0, 0],
        "olive" => [128, 128, 0],
        "navy" => [0, 0, 128],
        "purple" => [128, 0, 128],
        "teal" => [0, 128, 128],
        "orange" => [255, 165, 0],
        "brown" => [165, 42, 42],
        "pink" => [255, 192, 203],
        "gold" => [255, 215, 0],
        "beige" => [245, 245, 220],
        "ivory" => [255, 255, 240],
        "linen" => [250, 240, 230],
        "snow" => [255, 250, 250],
        "darkblue" => [0, 0, 139],
        "darkred" => [139, 0, 0],
        "darkgreen" => [0, 100, 0],
        "lightblue" => [173, 216, 230],
        "lightyellow" => [255, 255, 224],
        "steelblue" => [70, 130, 180],
        "slategray" | "slategrey" => [112, 128, 144],
        "rebeccapurple" => [102, 51, 153],
        _ => return None,
    };
    Some(rgb.into())
}
