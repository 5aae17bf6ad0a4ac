// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
//! Narrow views of a rendered document: its element tree, the computed style of
//! each element, and a way to write corrected style values back.
use std::fmt::Debug;
use std::hash::Hash;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// A computed style property read while resolving colours.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, EnumIter, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum StyleProperty {
    Color,
    BackgroundColor,
    BackgroundImage,
    BackgroundRepeat,
    FontWeight,
}

impl StyleProperty {
    /// The CSS initial value, used when a document does not report the property.
    pub fn initial_value(self) -> &'static str {
        match self {
            Self::Color => "rgb(0, 0, 0)",
            Self::BackgroundColor => "transparent",
            Self::BackgroundImage => "none",
            Self::BackgroundRepeat => "repeat",
            Self::FontWeight => "400",
        }
    }

    /// Whether an element without its own value takes its parent's.
    pub fn is_inherited(self) -> bool {
        matches!(self, Self::Color | Self::FontWeight)
    }
}

/// A style property the corrector writes.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, EnumIter, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum CorrectedProperty {
    Color,
    FontWeight,
    ScrollbarColor,
}

/// The element tree of a document.
pub trait DocumentTree {
    type Element: Copy + Eq + Hash + Debug;

    /// The outermost element, which carries document-wide styles such as the scrollbar colour.
    fn root(&self) -> Self::Element;

    /// The containing element, or `None` at the root.
    fn parent(&self, element: Self::Element) -> Option<Self::Element>;

    /// Elements that directly own non-whitespace text, in document order.
    fn text_elements(&self) -> Vec<Self::Element>;
}

/// Reads resolved style values.
pub trait StyleReader<E> {
    fn computed(&self, element: E, property: StyleProperty) -> String;
}

/// Writes style values with the highest precedence, overriding any existing rule.
pub trait StyleWriter<E> {
    fn set_important(&mut self, element: E, property: CorrectedProperty, value: &str);
}
